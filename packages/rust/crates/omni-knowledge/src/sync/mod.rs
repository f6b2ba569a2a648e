//! Reconciliation of the file tree into the graph.
//!
//! Modular design:
//! - `diff.rs`: Pure scan-vs-stored classification (new / modified /
//!   deleted / moved / unchanged)
//! - `service.rs`: `SyncService`, the only writer of the repository
//! - `status.rs`: Reports, status and recent per-file failures
//!
//! A pass applies moves, deletes, modified files and new files, in that
//! order, then runs the forward-reference sweep once. Per-file failures are
//! recorded and skipped; the file is retried by the next pass.

mod diff;
mod service;
mod status;

pub use diff::{ChangeSet, FileMove, classify};
pub use service::SyncService;
pub use status::{FailureKind, FileFailure, SyncReport, SyncState, SyncStatus, WatchMode};
