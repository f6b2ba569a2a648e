//! Error types for the filesystem layer.
//!
//! Follows ODF-REP: Library crates use `thiserror` for explicit error enums.

use thiserror::Error;

/// Error types for scanning, hashing, reading and watching.
///
/// Each variant represents a specific failure mode in the I/O pipeline.
#[derive(Error, Debug)]
pub enum IoError {
    /// File or directory does not exist.
    #[error("File not found: {0}")]
    NotFound(String),

    /// File exceeds size limit.
    #[error("File too large: {0} bytes (limit: {1})")]
    TooLarge(u64, u64),

    /// File contains binary content (NULL bytes detected).
    #[error("Binary file detected")]
    BinaryFile,

    /// Low-level I/O error from std::io.
    #[error("IO error: {0}")]
    System(#[from] std::io::Error),

    /// Invalid UTF-8 encoding.
    #[error("UTF-8 decoding error")]
    Encoding,

    /// An ignore pattern could not be compiled.
    #[error("Invalid ignore pattern '{pattern}': {reason}")]
    Pattern {
        /// The offending glob.
        pattern: String,
        /// Compiler message from `globset`.
        reason: String,
    },

    /// The OS watch mechanism refused the subscription.
    #[error("Watch subscription failed: {0}")]
    Watch(String),
}

impl From<notify::Error> for IoError {
    fn from(err: notify::Error) -> Self {
        Self::Watch(err.to_string())
    }
}
