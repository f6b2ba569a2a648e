#![allow(clippy::doc_markdown)]

//! omni-io - Filesystem layer for knowledge sync
//!
//! Everything the sync engine needs from the disk, without knowing anything
//! about markdown or the graph.
//!
//! # Features
//!
//! - **Filtering**: One ignore predicate shared by scanner and watcher
//! - **Checksums**: SHA-256 content digests with an `(len, mtime)` cache
//! - **Scanning**: Pruned directory walk with parallel hashing (rayon)
//! - **Watching**: `notify` subscription into a bounded tokio channel
//! - **Debouncing**: Pure per-path coalescing of event bursts
//!
//! # Architecture
//!
//! ```text
//! omni-io/src/
//! ├── lib.rs       # Re-exports (this file)
//! ├── error.rs     # IoError enum
//! ├── read.rs      # Size-limited reads & binary detection
//! ├── filter.rs    # PathFilter ignore rules
//! ├── checksum.rs  # SHA-256 digests & ChecksumStore
//! ├── scanner.rs   # Scanner -> Inventory
//! ├── debounce.rs  # Debouncer
//! └── watcher.rs   # FileWatcher -> FileEvent
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use omni_io::{ChecksumStore, PathFilter, Scanner};
//!
//! let scanner = Scanner::new(PathFilter::new(), Arc::new(ChecksumStore::new()));
//! let scan = scanner.scan(project_root)?;
//! for (path, checksum) in &scan.inventory.0 {
//!     println!("{path} {checksum}");
//! }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

mod checksum;
mod debounce;
mod error;
mod filter;
mod read;
mod scanner;
mod watcher;

// ============================================================================
// Public Re-exports
// ============================================================================

pub use checksum::{ChecksumStore, content_checksum, file_checksum};
pub use debounce::Debouncer;
pub use error::IoError;
pub use filter::{IGNORED_DIR_NAMES, IGNORED_FILE_NAMES, IGNORED_SUFFIXES, PathFilter};
pub use read::{decode_text, is_binary, read_bytes_limited, read_text_safe};
pub use scanner::{Inventory, Scan, Scanner, is_same_or_descendant, normalize_rel_path};
pub use watcher::{FileEvent, FileWatcher};
