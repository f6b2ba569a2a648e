#![allow(clippy::doc_markdown)]

//! omni-knowledge - Markdown projects mirrored into a queryable knowledge graph.
//!
//! Plain markdown files stay the source of truth. Each file becomes an
//! entity with observations and relations in a per-project SQLite graph,
//! kept in lockstep with an FTS5 search index.
//!
//! # Features
//!
//! - **Parsing**: frontmatter, `- [category] text` observations,
//!   `- type [[Target]]` relations, implicit `[[links]]`
//! - **Reconciliation**: new / modified / deleted / moved classification,
//!   identity-preserving moves, order-independent forward-reference sweep
//! - **Watching**: debounced OS notifications with a polling fallback
//! - **Queries**: lookups by id / permalink / path, graph traversal,
//!   ranked full-text search, directory listings, stats
//!
//! # Architecture
//!
//! ```text
//! omni-knowledge/src/
//! ├── lib.rs          # Re-exports (this file)
//! ├── entity.rs       # Entity / Observation / Relation model
//! ├── error.rs        # RepositoryError, SyncError
//! ├── config.rs       # SyncConfig (YAML + env)
//! ├── logging.rs      # tracing-subscriber setup
//! ├── markdown/       # Parser, renderer, permalinks
//! ├── repository/     # GraphRepository (SQLite)
//! ├── search.rs       # SearchIndex (FTS5)
//! ├── sync/           # SyncService, classification, status
//! ├── watch.rs        # WatchService
//! └── project.rs      # Project, ProjectContext
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use omni_knowledge::{ProjectContext, SearchQuery, SyncConfig};
//!
//! let project = ProjectContext::open("/path/to/notes", SyncConfig::from_env())?;
//! project.sync_full().await?;
//! let hits = project.search(&SearchQuery::new("tokio OR async"))?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod config;
pub mod entity;
pub mod error;
mod logging;
pub mod markdown;
mod project;
pub mod repository;
pub mod search;
pub mod sync;
mod watch;

// ============================================================================
// Public Re-exports
// ============================================================================

pub use config::SyncConfig;
pub use entity::{
    ContentType, DirectoryEntry, Entity, EntityId, EntityRecord, GraphStats, Metadata,
    MetadataValue, NoteFragment, Observation, ParsedNote, Relation, RelationDraft,
    RelationTarget,
};
pub use error::{RepositoryError, SyncError};
pub use logging::{DEFAULT_LOG_DIRECTIVE, init_tracing};
pub use markdown::{parse_note, render_markdown};
pub use project::{Project, ProjectContext};
pub use repository::{FileSnapshot, GraphRepository, Neighbor, UpsertOutcome};
pub use search::{SearchHit, SearchIndex, SearchQuery};
pub use sync::{
    ChangeSet, FailureKind, FileFailure, FileMove, SyncReport, SyncService, SyncState,
    SyncStatus, WatchMode,
};
pub use watch::WatchService;
