use chrono::{DateTime, Utc};
use omni_io::IoError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::SyncError;

/// What the service is doing right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No pass has run yet.
    #[default]
    Idle,
    /// A reconciliation pass is in flight.
    Syncing,
    /// The last pass finished.
    Ready,
    /// The last pass hit a project-level failure.
    Failed,
}

/// How file changes reach the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    /// Nobody is watching.
    #[default]
    Off,
    /// OS notifications.
    Live,
    /// Periodic full scans (watcher unavailable).
    Polling,
}

/// Category of a per-file failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Content could not be interpreted.
    Parse,
    /// The file changed while it was being read.
    ChecksumRace,
    /// A uniqueness rule rejected the change.
    ConstraintViolation,
    /// Filesystem or database trouble.
    Storage,
}

impl FailureKind {
    fn of(err: &SyncError) -> Self {
        match err {
            SyncError::Parse { .. } => Self::Parse,
            SyncError::ChecksumMismatchRace { .. } => Self::ChecksumRace,
            SyncError::ConstraintViolation { .. } => Self::ConstraintViolation,
            _ => Self::Storage,
        }
    }
}

/// Error text without the path, which [`FileFailure`] stores separately.
fn detail(err: &SyncError) -> String {
    match err {
        SyncError::Parse { reason, .. } | SyncError::ConstraintViolation { reason, .. } => {
            reason.clone()
        }
        other => other.to_string(),
    }
}

/// A per-file failure from a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    /// Project-relative path.
    pub path: String,
    /// Category.
    pub kind: FailureKind,
    /// What went wrong.
    pub error: String,
    /// When it happened.
    pub at: DateTime<Utc>,
}

impl FileFailure {
    /// Rebuild a typed error from the recorded failure.
    #[must_use]
    pub fn to_error(&self) -> SyncError {
        let path = self.path.clone();
        match self.kind {
            FailureKind::Parse => SyncError::Parse {
                path,
                reason: self.error.clone(),
            },
            FailureKind::ChecksumRace => SyncError::ChecksumMismatchRace { path },
            FailureKind::ConstraintViolation => SyncError::ConstraintViolation {
                path,
                reason: self.error.clone(),
            },
            FailureKind::Storage => {
                SyncError::Io(IoError::System(std::io::Error::other(self.error.clone())))
            }
        }
    }
}

/// Counts of one finished pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// Files seen by the scan.
    pub scanned: usize,
    /// Entities created.
    pub new: usize,
    /// Entities updated from changed files.
    pub modified: usize,
    /// Entities deleted.
    pub deleted: usize,
    /// Entities moved.
    pub moved: usize,
    /// Files left alone.
    pub unchanged: usize,
    /// Forward references resolved by the sweep.
    pub resolved: usize,
    /// Files that failed and were skipped.
    pub failed: usize,
}

impl SyncReport {
    /// Whether the pass wrote nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.applied() == 0 && self.resolved == 0
    }

    /// File-level operations that succeeded.
    #[must_use]
    pub fn applied(&self) -> usize {
        self.new + self.modified + self.deleted + self.moved
    }
}

/// Progress and health of one project's sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Current state.
    pub state: SyncState,
    /// How changes are observed.
    pub watch_mode: WatchMode,
    /// Completion time of the last pass without a project-level failure.
    pub last_successful_scan: Option<DateTime<Utc>>,
    /// Files scanned by the last pass.
    pub scanned: usize,
    /// Operations applied by the last pass.
    pub applied: usize,
    /// Files that failed in the last pass.
    pub failed: usize,
    /// Operations not yet applied (in-flight pass or queued watch events).
    pub pending: usize,
    /// Most recent per-file failures, oldest first.
    pub recent_errors: VecDeque<FileFailure>,
    /// Last project-level failure, cleared by the next successful pass.
    pub last_error: Option<String>,
}

impl SyncStatus {
    pub(crate) fn record_failure(&mut self, path: &str, error: &SyncError, limit: usize) {
        if limit == 0 {
            return;
        }
        while self.recent_errors.len() >= limit {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(FileFailure {
            path: path.to_string(),
            kind: FailureKind::of(error),
            error: detail(error),
            at: Utc::now(),
        });
    }

    /// Most recent failure recorded for `path`.
    #[must_use]
    pub fn failure_for(&self, path: &str) -> Option<&FileFailure> {
        self.recent_errors.iter().rev().find(|f| f.path == path)
    }

    pub(crate) fn finish(&mut self, report: &SyncReport) {
        self.state = SyncState::Ready;
        self.last_successful_scan = Some(Utc::now());
        self.scanned = report.scanned;
        self.applied = report.applied();
        self.failed = report.failed;
        self.pending = 0;
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_errors_are_bounded() {
        let mut status = SyncStatus::default();
        for n in 0..5 {
            let path = format!("f{n}.md");
            let err = SyncError::Parse {
                path: path.clone(),
                reason: "bad".to_string(),
            };
            status.record_failure(&path, &err, 3);
        }
        let paths: Vec<&str> = status.recent_errors.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["f2.md", "f3.md", "f4.md"]);
        assert_eq!(status.recent_errors[0].kind, FailureKind::Parse);
    }

    #[test]
    fn test_failure_rebuilds_typed_error() {
        let mut status = SyncStatus::default();
        let err = SyncError::ConstraintViolation {
            path: "a.md".to_string(),
            reason: "permalink taken".to_string(),
        };
        status.record_failure("a.md", &err, 4);
        let rebuilt = status.recent_errors[0].to_error();
        assert_eq!(status.recent_errors[0].error, "permalink taken");
        assert!(matches!(rebuilt, SyncError::ConstraintViolation { ref path, .. } if path == "a.md"));
        assert!(rebuilt.is_file_local());
    }

    #[test]
    fn test_latest_failure_for_path() {
        let mut status = SyncStatus::default();
        let race = SyncError::ChecksumMismatchRace {
            path: "a.md".to_string(),
        };
        status.record_failure("a.md", &race, 4);
        status.record_failure("b.md", &race, 4);
        assert_eq!(status.failure_for("a.md").map(|f| f.kind), Some(FailureKind::ChecksumRace));
        assert!(status.failure_for("c.md").is_none());
    }

    #[test]
    fn test_finish_copies_counts() {
        let mut status = SyncStatus {
            pending: 4,
            last_error: Some("boom".to_string()),
            ..SyncStatus::default()
        };
        let report = SyncReport {
            scanned: 10,
            new: 2,
            deleted: 1,
            failed: 1,
            ..SyncReport::default()
        };
        status.finish(&report);
        assert_eq!(status.state, SyncState::Ready);
        assert_eq!((status.scanned, status.applied, status.failed), (10, 3, 1));
        assert_eq!(status.pending, 0);
        assert!(status.last_error.is_none());
        assert!(status.last_successful_scan.is_some());
    }
}
