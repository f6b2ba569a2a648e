//! Project tree scanner.
//!
//! Walks a project root depth-first, pruning ignored directories before
//! descending into them, and produces an [`Inventory`] of
//! `relative path -> checksum`. Pruning happens inside the walk (via
//! `filter_entry`), so the cost of a scan does not grow with the size of an
//! ignored subtree such as `node_modules`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksum::ChecksumStore;
use crate::error::IoError;
use crate::filter::PathFilter;

/// Relative path (forward slashes) -> SHA-256 hex checksum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory(pub BTreeMap<String, String>);

impl Inventory {
    /// Number of files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no file was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checksum recorded for `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&String> {
        self.0.get(path)
    }
}

/// One scan result.
#[derive(Debug, Default)]
pub struct Scan {
    /// Files that were found and hashed.
    pub inventory: Inventory,
    /// Paths (files or directory prefixes) whose state could not be read.
    /// Callers must not treat records under these paths as deleted.
    pub unreadable: BTreeSet<String>,
}

impl Scan {
    /// Whether `path` sits at or below an unreadable entry.
    #[must_use]
    pub fn is_unreadable(&self, path: &str) -> bool {
        self.unreadable
            .iter()
            .any(|prefix| is_same_or_descendant(path, prefix))
    }
}

/// Whether `path` equals `prefix` or lives under it.
#[must_use]
pub fn is_same_or_descendant(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Normalize a relative path to forward slashes without `.` segments.
#[must_use]
pub fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(segment) => Some(segment.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Directory walker producing checksummed inventories.
#[derive(Debug, Clone)]
pub struct Scanner {
    filter: PathFilter,
    checksums: Arc<ChecksumStore>,
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Scanner {
    /// Scanner hashing on rayon's global pool.
    #[must_use]
    pub fn new(filter: PathFilter, checksums: Arc<ChecksumStore>) -> Self {
        Self {
            filter,
            checksums,
            pool: None,
        }
    }

    /// Hash on a dedicated bounded pool instead of the global one.
    #[must_use]
    pub fn with_pool(mut self, pool: Arc<rayon::ThreadPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// The ignore rules this scanner applies.
    #[must_use]
    pub fn filter(&self) -> &PathFilter {
        &self.filter
    }

    /// Shared checksum cache.
    #[must_use]
    pub fn checksums(&self) -> &Arc<ChecksumStore> {
        &self.checksums
    }

    /// Scan the whole project tree.
    ///
    /// # Errors
    /// `NotFound` when `root` is not a readable directory. Problems below the
    /// root are reported in [`Scan::unreadable`] instead.
    pub fn scan(&self, root: &Path) -> Result<Scan, IoError> {
        if !root.is_dir() {
            return Err(IoError::NotFound(root.to_string_lossy().to_string()));
        }
        std::fs::read_dir(root)?;

        let mut scan = Scan::default();
        let files = self.walk(root, root, &mut scan);
        self.hash_into(root, files, &mut scan);

        // Files gone from the tree no longer need a cached digest.
        let seen: HashSet<PathBuf> = scan.inventory.0.keys().map(|rel| root.join(rel)).collect();
        let pruned = self
            .checksums
            .retain(|path| !path.starts_with(root) || seen.contains(path));
        debug!(
            root = %root.display(),
            files = scan.inventory.len(),
            unreadable = scan.unreadable.len(),
            pruned,
            "scan complete"
        );
        Ok(scan)
    }

    /// Scan only the given project-relative paths (files or directories).
    ///
    /// Paths that no longer exist are simply absent from the inventory.
    ///
    /// # Errors
    /// `NotFound` when `root` is not a directory.
    pub fn scan_paths(&self, root: &Path, rel_paths: &[String]) -> Result<Scan, IoError> {
        if !root.is_dir() {
            return Err(IoError::NotFound(root.to_string_lossy().to_string()));
        }
        let mut scan = Scan::default();
        let mut files: Vec<String> = Vec::new();
        for rel in rel_paths {
            let rel_path = Path::new(rel);
            if rel.is_empty() || self.filter.is_ignored(rel_path) {
                continue;
            }
            let absolute = root.join(rel_path);
            let Ok(metadata) = std::fs::symlink_metadata(&absolute) else {
                continue;
            };
            if metadata.is_dir() {
                if self.filter.is_ignored_entry(rel_path, true) {
                    continue;
                }
                files.extend(self.walk(root, &absolute, &mut scan));
            } else if metadata.is_file() {
                files.push(normalize_rel_path(rel_path));
            }
        }
        files.sort();
        files.dedup();
        self.hash_into(root, files, &mut scan);
        Ok(scan)
    }

    fn walk(&self, root: &Path, start: &Path, scan: &mut Scan) -> Vec<String> {
        let filter = &self.filter;
        let mut files = Vec::new();
        let walker = WalkDir::new(start)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                if entry.path() == root {
                    return true;
                }
                let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
                !filter.is_ignored_entry(rel, entry.file_type().is_dir())
            });

        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    if let Ok(rel) = entry.path().strip_prefix(root) {
                        files.push(normalize_rel_path(rel));
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    let rel = err
                        .path()
                        .and_then(|p| p.strip_prefix(root).ok())
                        .map(normalize_rel_path)
                        .unwrap_or_default();
                    warn!(path = %rel, error = %err, "cannot read directory entry");
                    scan.unreadable.insert(rel);
                }
            }
        }
        files
    }

    fn hash_into(&self, root: &Path, files: Vec<String>, scan: &mut Scan) {
        let checksums = &self.checksums;
        let hash_all = || {
            files
                .par_iter()
                .map(|rel| {
                    let absolute: PathBuf = root.join(rel);
                    (rel.clone(), checksums.checksum(&absolute))
                })
                .collect::<Vec<_>>()
        };
        let hashed = match &self.pool {
            Some(pool) => pool.install(hash_all),
            None => hash_all(),
        };

        for (rel, result) in hashed {
            match result {
                Ok(checksum) => {
                    scan.inventory.0.insert(rel, checksum);
                }
                // Vanished between walk and hash: it is simply gone now.
                Err(IoError::NotFound(_)) => {
                    debug!(path = %rel, "file disappeared during scan");
                }
                Err(err) => {
                    warn!(path = %rel, error = %err, "cannot checksum file");
                    scan.unreadable.insert(rel);
                }
            }
        }
    }
}
