//! Content hashing for change and move detection.
//!
//! SHA-256 hex digests are the unit of change detection: equal digests are
//! treated as equal content. [`ChecksumStore`] keeps the last digest per file
//! keyed by `(len, mtime)` so an unchanged tree is not re-hashed on every scan.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use sha2::{Digest, Sha256};

use crate::error::IoError;

/// Hex-encoded SHA-256 of an in-memory buffer.
#[must_use]
pub fn content_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of a file, streamed in 64 KiB blocks.
///
/// # Errors
/// `NotFound` when the file does not exist, `System` for read failures.
pub fn file_checksum(path: &Path) -> Result<String, IoError> {
    let file =
        File::open(path).map_err(|_| IoError::NotFound(path.to_string_lossy().to_string()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut block = [0u8; 64 * 1024];
    loop {
        let read = reader.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone)]
struct CachedChecksum {
    len: u64,
    modified: Option<SystemTime>,
    checksum: String,
}

/// Per-project checksum cache.
#[derive(Debug)]
pub struct ChecksumStore {
    cache: Mutex<HashMap<PathBuf, CachedChecksum>>,
    enabled: bool,
}

impl Default for ChecksumStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumStore {
    /// Store with caching enabled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            enabled: true,
        }
    }

    /// Store that always re-hashes.
    #[must_use]
    pub fn uncached() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            enabled: false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, CachedChecksum>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checksum of the file at `path`, reusing the cached digest when its
    /// length and modification time are unchanged.
    ///
    /// # Errors
    /// Propagates [`file_checksum`] failures; the stale entry is dropped.
    pub fn checksum(&self, path: &Path) -> Result<String, IoError> {
        let metadata = std::fs::metadata(path).map_err(|_| {
            self.invalidate(path);
            IoError::NotFound(path.to_string_lossy().to_string())
        })?;
        let len = metadata.len();
        let modified = metadata.modified().ok();

        if self.enabled
            && let Some(cached) = self.lock().get(path)
            && cached.len == len
            && cached.modified.is_some()
            && cached.modified == modified
        {
            return Ok(cached.checksum.clone());
        }

        let checksum = match file_checksum(path) {
            Ok(checksum) => checksum,
            Err(err) => {
                self.invalidate(path);
                return Err(err);
            }
        };
        if self.enabled {
            self.lock().insert(
                path.to_path_buf(),
                CachedChecksum {
                    len,
                    modified,
                    checksum: checksum.clone(),
                },
            );
        }
        Ok(checksum)
    }

    /// Drop the cached digest for one path.
    pub fn invalidate(&self, path: &Path) {
        self.lock().remove(path);
    }

    /// Keep only the digests whose path satisfies `keep`. Returns how many
    /// were dropped.
    pub fn retain(&self, mut keep: impl FnMut(&Path) -> bool) -> usize {
        let mut cache = self.lock();
        let before = cache.len();
        cache.retain(|path, _| keep(path));
        before - cache.len()
    }

    /// Drop every cached digest.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached digests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
