//! OS file-change subscription.
//!
//! Wraps `notify`'s recommended watcher and forwards project-relative
//! [`FileEvent`]s into a bounded tokio channel. The watcher callback runs on a
//! notify-owned thread, so it uses `blocking_send`; a full channel therefore
//! applies backpressure to the OS event thread instead of dropping events.
//! Dropping the [`FileWatcher`] ends the subscription.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::IoError;
use crate::scanner::normalize_rel_path;

/// A change notification with paths relative to the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileEvent {
    /// A file or directory appeared.
    Created {
        /// Relative path.
        path: String,
    },
    /// Content or metadata changed.
    Modified {
        /// Relative path.
        path: String,
    },
    /// A file or directory disappeared.
    Deleted {
        /// Relative path.
        path: String,
    },
    /// Both sides of a rename were reported together.
    Renamed {
        /// Old relative path.
        from: String,
        /// New relative path.
        to: String,
    },
    /// The OS dropped events; the consumer should rescan everything.
    Rescan,
    /// The subscription reported an error.
    Error {
        /// Error message from the backend.
        error: String,
    },
}

impl FileEvent {
    /// Every relative path this event touches.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        match self {
            Self::Created { path } | Self::Modified { path } | Self::Deleted { path } => {
                vec![path.as_str()]
            }
            Self::Renamed { from, to } => vec![from.as_str(), to.as_str()],
            Self::Rescan | Self::Error { .. } => Vec::new(),
        }
    }
}

/// Live recursive subscription on one directory tree.
pub struct FileWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileWatcher")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FileWatcher {
    /// Subscribe to changes below `root`, sending events to `sender`.
    ///
    /// # Errors
    /// `IoError::Watch` when the OS mechanism refuses the subscription (for
    /// example when the inotify watch limit is exhausted).
    pub fn start(root: &Path, sender: mpsc::Sender<FileEvent>) -> Result<Self, IoError> {
        let roots = RootAliases::new(root);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let events = match result {
                    Ok(event) => translate_event(&roots, &event),
                    Err(err) => vec![FileEvent::Error {
                        error: err.to_string(),
                    }],
                };
                for event in events {
                    if sender.blocking_send(event).is_err() {
                        // Receiver gone; the watcher is about to be dropped.
                        return;
                    }
                }
            },
            Config::default(),
        )?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "file watcher started");
        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    /// The watched root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// The root as given plus its canonical form; backends may report either.
#[derive(Debug, Clone)]
struct RootAliases {
    given: PathBuf,
    canonical: Option<PathBuf>,
}

impl RootAliases {
    fn new(root: &Path) -> Self {
        let canonical = std::fs::canonicalize(root)
            .ok()
            .filter(|canonical| canonical != root);
        Self {
            given: root.to_path_buf(),
            canonical,
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.given).ok().or_else(|| {
            self.canonical
                .as_ref()
                .and_then(|canonical| path.strip_prefix(canonical).ok())
        })?;
        let rel = normalize_rel_path(rel);
        (!rel.is_empty()).then_some(rel)
    }
}

fn translate_event(roots: &RootAliases, event: &Event) -> Vec<FileEvent> {
    if event.need_rescan() {
        warn!("watch backend requested a rescan");
        return vec![FileEvent::Rescan];
    }
    let rel_paths: Vec<String> = event
        .paths
        .iter()
        .filter_map(|path| roots.relative(path))
        .collect();

    match event.kind {
        EventKind::Create(_) => rel_paths
            .into_iter()
            .map(|path| FileEvent::Created { path })
            .collect(),
        EventKind::Remove(_) => rel_paths
            .into_iter()
            .map(|path| FileEvent::Deleted { path })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if rel_paths.len() == 2 => {
            let mut paths = rel_paths.into_iter();
            match (paths.next(), paths.next()) {
                (Some(from), Some(to)) => vec![FileEvent::Renamed { from, to }],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => rel_paths
            .into_iter()
            .map(|path| FileEvent::Deleted { path })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => rel_paths
            .into_iter()
            .map(|path| FileEvent::Created { path })
            .collect(),
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => rel_paths
            .into_iter()
            .map(|path| FileEvent::Modified { path })
            .collect(),
        EventKind::Access(_) => Vec::new(),
    }
}
