//! Safe file reading with binary detection.
//!
//! Reconciliation reads each changed file exactly once: the raw bytes feed
//! both the race check (checksum recomputed from what was actually read) and
//! the markdown parser.

use std::fs as std_fs;
use std::io::Read;
use std::path::Path;

use memchr::memchr;

use crate::error::IoError;

/// Quick binary detection - checks first 8KB for NULL bytes.
///
/// Files containing NULL bytes in the first 8KB are considered binary.
#[must_use]
pub fn is_binary(buffer: &[u8]) -> bool {
    let check_len = std::cmp::min(buffer.len(), 8192);
    memchr(0, &buffer[..check_len]).is_some()
}

/// Decode bytes to text with lossy UTF-8 fallback.
///
/// # Errors
/// Returns `IoError::BinaryFile` when binary content is detected.
pub fn decode_text(buffer: &[u8]) -> Result<String, IoError> {
    if is_binary(buffer) {
        return Err(IoError::BinaryFile);
    }
    Ok(String::from_utf8_lossy(buffer).into_owned())
}

/// Read the raw bytes of a file, refusing anything above `max_bytes`.
///
/// # Errors
/// `NotFound` when the file vanished, `TooLarge` above the limit, `System`
/// for any other I/O failure.
pub fn read_bytes_limited<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<Vec<u8>, IoError> {
    let path = path.as_ref();

    let metadata = std_fs::metadata(path)
        .map_err(|_| IoError::NotFound(path.to_string_lossy().to_string()))?;

    if metadata.len() > max_bytes {
        return Err(IoError::TooLarge(metadata.len(), max_bytes));
    }

    let mut file = std_fs::File::open(path)?;
    let mut buffer = Vec::with_capacity(usize::try_from(metadata.len()).unwrap_or_default());
    file.read_to_end(&mut buffer)?;
    Ok(buffer)
}

/// Read text from a file with size and binary checks.
///
/// # Errors
/// Same as [`read_bytes_limited`], plus `BinaryFile` for binary content.
pub fn read_text_safe<P: AsRef<Path>>(path: P, max_bytes: u64) -> Result<String, IoError> {
    let buffer = read_bytes_limited(path, max_bytes)?;
    decode_text(&buffer)
}
