//! Error types for the knowledge sync engine.

use omni_io::IoError;
use thiserror::Error;

/// Failures inside [`crate::GraphRepository`] and [`crate::SearchIndex`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// SQLite reported an error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Metadata or tags could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// A uniqueness rule would be broken; the change was not applied.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
    /// The requested entity does not exist.
    #[error("Entity not found: {0}")]
    NotFound(String),
    /// The search expression could not be evaluated.
    #[error("Invalid search query: {0}")]
    InvalidQuery(String),
}

/// Failures of a reconciliation pass or of a project-level operation.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The file could not be interpreted (e.g. binary content in a note).
    #[error("Parse error in {path}: {reason}")]
    Parse {
        /// Project-relative path.
        path: String,
        /// What went wrong.
        reason: String,
    },
    /// A caller-supplied path escapes the project root.
    #[error("Path escapes project root: {0}")]
    PathTraversal(String),
    /// A caller-supplied path is excluded by the ignore rules.
    #[error("Path is ignored: {0}")]
    Ignored(String),
    /// The file changed between scan and read; retried next pass.
    #[error("Checksum changed while reading {path}")]
    ChecksumMismatchRace {
        /// Project-relative path.
        path: String,
    },
    /// Applying the file would break a uniqueness rule.
    #[error("Constraint violation for {path}: {reason}")]
    ConstraintViolation {
        /// Project-relative path.
        path: String,
        /// Which rule.
        reason: String,
    },
    /// The OS watcher could not be installed.
    #[error("Watch subscription failed: {0}")]
    WatchSubscription(String),
    /// The project root cannot be read; fatal for this project only.
    #[error("Project root unavailable: {0}")]
    ProjectRoot(String),
    /// Filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
    /// Repository failure.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
    /// Configuration could not be loaded.
    #[error("Config error: {0}")]
    Config(String),
    /// A background task panicked or was cancelled.
    #[error("Task error: {0}")]
    Task(String),
}

impl SyncError {
    /// Whether this failure concerns a single file and must not abort the
    /// rest of a reconciliation pass.
    #[must_use]
    pub fn is_file_local(&self) -> bool {
        match self {
            Self::Parse { .. }
            | Self::ChecksumMismatchRace { .. }
            | Self::ConstraintViolation { .. }
            | Self::Io(_)
            | Self::Repository(_) => true,
            Self::PathTraversal(_)
            | Self::Ignored(_)
            | Self::WatchSubscription(_)
            | Self::ProjectRoot(_)
            | Self::Config(_)
            | Self::Task(_) => false,
        }
    }

    /// Attach a path to a repository error, lifting constraint violations.
    pub(crate) fn for_path(path: &str, err: RepositoryError) -> Self {
        match err {
            RepositoryError::ConstraintViolation(reason) => Self::ConstraintViolation {
                path: path.to_string(),
                reason,
            },
            other => Self::Repository(other),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(IoError::System(err))
    }
}
