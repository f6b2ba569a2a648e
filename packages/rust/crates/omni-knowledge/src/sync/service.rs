use omni_io::{
    ChecksumStore, IoError, PathFilter, Scan, Scanner, content_checksum, decode_text, is_binary,
    is_same_or_descendant, normalize_rel_path, read_bytes_limited,
};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use super::diff::{ChangeSet, classify};
use super::status::{SyncReport, SyncState, SyncStatus, WatchMode};
use crate::config::SyncConfig;
use crate::entity::{ContentType, NoteFragment};
use crate::error::SyncError;
use crate::markdown::parse_note;
use crate::markdown::permalink::{file_stem, is_markdown_path};
use crate::repository::{FileSnapshot, GraphRepository};

/// Which part of the tree a pass covers.
#[derive(Debug, Clone)]
enum Scope {
    Full,
    Paths(Vec<String>),
}

/// Reconciles one project's files into its graph.
///
/// Passes are serialized per project; clones share the same lock, status
/// and worker pool.
#[derive(Debug, Clone)]
pub struct SyncService {
    inner: Arc<SyncInner>,
}

#[derive(Debug)]
struct SyncInner {
    root: PathBuf,
    config: SyncConfig,
    repository: GraphRepository,
    scanner: Scanner,
    pool: Arc<rayon::ThreadPool>,
    pass_lock: Arc<tokio::sync::Mutex<()>>,
    status: RwLock<SyncStatus>,
}

impl SyncService {
    /// Service for the project rooted at `root` (absolute).
    ///
    /// # Errors
    /// `Io` for an invalid ignore pattern, `Config` when the worker pool
    /// cannot be built.
    pub fn new(
        root: impl Into<PathBuf>,
        repository: GraphRepository,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let root = root.into();
        let config = config.sanitized();
        let filter = PathFilter::with_patterns(&config.extra_ignore)?
            .excluding(database_files_under(&root, &config));
        let checksums = if config.checksum_cache {
            ChecksumStore::new()
        } else {
            ChecksumStore::uncached()
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|index| format!("omni-knowledge-sync-{index}"))
            .build()
            .map_err(|e| SyncError::Config(format!("worker pool: {e}")))?;
        let pool = Arc::new(pool);
        let scanner = Scanner::new(filter, Arc::new(checksums)).with_pool(Arc::clone(&pool));

        Ok(Self {
            inner: Arc::new(SyncInner {
                root,
                config,
                repository,
                scanner,
                pool,
                pass_lock: Arc::new(tokio::sync::Mutex::new(())),
                status: RwLock::new(SyncStatus::default()),
            }),
        })
    }

    /// Project root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Graph this service writes to.
    #[must_use]
    pub fn repository(&self) -> &GraphRepository {
        &self.inner.repository
    }

    /// Ignore rules shared by scans and the watcher.
    #[must_use]
    pub fn filter(&self) -> &PathFilter {
        self.inner.scanner.filter()
    }

    /// Snapshot of progress and recent failures.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.inner.status().clone()
    }

    pub(crate) fn set_watch_mode(&self, mode: WatchMode) {
        self.inner.status_mut().watch_mode = mode;
    }

    pub(crate) fn set_pending(&self, pending: usize) {
        self.inner.status_mut().pending = pending;
    }

    /// Reconcile the whole tree.
    ///
    /// # Errors
    /// `ProjectRoot` when the root cannot be scanned, `Repository` when the
    /// stored inventory cannot be read, `Task` when the worker died.
    /// Per-file failures are not errors; see [`SyncReport::failed`] and
    /// [`SyncStatus::recent_errors`].
    pub async fn sync_full(&self) -> Result<SyncReport, SyncError> {
        self.run(Scope::Full).await
    }

    /// Reconcile only `paths` (project-relative files or directories).
    /// Tracked files under a requested path that no longer exist are deleted.
    ///
    /// # Errors
    /// As [`Self::sync_full`].
    pub async fn sync_paths(&self, paths: Vec<String>) -> Result<SyncReport, SyncError> {
        self.run(Scope::Paths(paths)).await
    }

    async fn run(&self, scope: Scope) -> Result<SyncReport, SyncError> {
        let guard = Arc::clone(&self.inner.pass_lock).lock_owned().await;
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            inner.reconcile(scope)
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))?
    }
}

impl SyncInner {
    fn status(&self) -> std::sync::RwLockReadGuard<'_, SyncStatus> {
        self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn status_mut(&self) -> std::sync::RwLockWriteGuard<'_, SyncStatus> {
        self.status.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail_pass(&self, err: SyncError) -> SyncError {
        warn!(root = %self.root.display(), error = %err, "reconciliation failed");
        let mut status = self.status_mut();
        status.state = SyncState::Failed;
        status.pending = 0;
        status.last_error = Some(err.to_string());
        err
    }

    fn record_failure(&self, path: &str, err: &SyncError, report: &mut SyncReport) {
        warn!(path, error = %err, "file skipped");
        report.failed += 1;
        let limit = self.config.max_recent_errors;
        self.status_mut().record_failure(path, err, limit);
    }

    /// Requested paths normalized; `None` means the whole tree.
    fn normalize_scope(&self, scope: Scope) -> Option<Vec<String>> {
        let Scope::Paths(paths) = scope else {
            return None;
        };
        let mut normalized = BTreeSet::new();
        for raw in paths {
            let rel = normalize_rel_path(Path::new(&raw));
            if rel.is_empty() {
                return None;
            }
            if !self.scanner.filter().is_ignored(Path::new(&rel)) {
                normalized.insert(rel);
            }
        }
        Some(normalized.into_iter().collect())
    }

    fn reconcile(&self, scope: Scope) -> Result<SyncReport, SyncError> {
        self.status_mut().state = SyncState::Syncing;
        let requested = self.normalize_scope(scope);

        let scanned = match &requested {
            None => self.scanner.scan(&self.root),
            Some(paths) => self.scanner.scan_paths(&self.root, paths),
        };
        let scan = match scanned {
            Ok(scan) => scan,
            Err(err) => {
                return Err(self.fail_pass(SyncError::ProjectRoot(format!(
                    "{}: {err}",
                    self.root.display()
                ))));
            }
        };
        let stored = match self.stored_in_scope(&scan, requested.as_deref()) {
            Ok(stored) => stored,
            Err(err) => return Err(self.fail_pass(err)),
        };

        let changes = classify(&scan, &stored);
        let mut report = SyncReport {
            scanned: scan.inventory.len(),
            unchanged: changes.unchanged,
            ..SyncReport::default()
        };
        self.status_mut().pending = changes.pending();
        if changes.is_empty() {
            debug!(scanned = report.scanned, "nothing to reconcile");
        } else {
            info!(
                scanned = report.scanned,
                new = changes.new.len(),
                modified = changes.modified.len(),
                deleted = changes.deleted.len(),
                moved = changes.moved.len(),
                "reconciliation started"
            );
        }

        self.apply(&scan, &changes, &mut report);

        report.resolved = match self.repository.resolve_forward_references() {
            Ok(resolved) => resolved,
            Err(err) => return Err(self.fail_pass(err.into())),
        };
        self.status_mut().finish(&report);
        if !report.is_noop() || report.failed > 0 {
            info!(
                new = report.new,
                modified = report.modified,
                deleted = report.deleted,
                moved = report.moved,
                resolved = report.resolved,
                failed = report.failed,
                "reconciliation finished"
            );
        }
        Ok(report)
    }

    /// Stored records the scan is authoritative for, plus records of
    /// vanished files elsewhere that share a checksum with a new file (move
    /// sources for an incremental pass).
    fn stored_in_scope(
        &self,
        scan: &Scan,
        requested: Option<&[String]>,
    ) -> Result<BTreeMap<String, String>, SyncError> {
        let all = self.repository.sync_records()?;
        let Some(requested) = requested else {
            return Ok(all);
        };
        let mut scoped: BTreeMap<String, String> = all
            .iter()
            .filter(|(path, _)| requested.iter().any(|p| is_same_or_descendant(path, p)))
            .map(|(path, checksum)| (path.clone(), checksum.clone()))
            .collect();

        for (path, checksum) in &scan.inventory.0 {
            if all.contains_key(path) {
                continue;
            }
            for source in self.repository.records_with_checksum(checksum)? {
                if !scoped.contains_key(&source) && !self.root.join(&source).exists() {
                    scoped.insert(source, checksum.clone());
                }
            }
        }
        Ok(scoped)
    }

    fn apply(&self, scan: &Scan, changes: &ChangeSet, report: &mut SyncReport) {
        let repository = &self.repository;

        for file_move in &changes.moved {
            match repository.move_file(
                &file_move.from,
                &file_move.to,
                self.config.update_permalinks_on_move,
            ) {
                Ok(id) => {
                    debug!(from = %file_move.from, to = %file_move.to, %id, "moved");
                    report.moved += 1;
                }
                Err(err) => {
                    self.record_failure(&file_move.to, &SyncError::for_path(&file_move.to, err), report);
                }
            }
        }

        for path in &changes.deleted {
            match repository.delete_file(path) {
                Ok(Some(id)) => {
                    debug!(path, %id, "deleted");
                    report.deleted += 1;
                }
                Ok(None) => {}
                Err(err) => self.record_failure(path, &SyncError::for_path(path, err), report),
            }
        }

        let work: Vec<(&str, bool)> = changes
            .modified
            .iter()
            .map(|p| (p.as_str(), false))
            .chain(changes.new.iter().map(|p| (p.as_str(), true)))
            .collect();
        let loaded: Vec<(&str, bool, Result<FileSnapshot, SyncError>)> = self.pool.install(|| {
            work.par_iter()
                .map(|(path, is_new)| {
                    let expected = scan.inventory.get(path).map_or("", String::as_str);
                    (*path, *is_new, self.load_snapshot(path, expected))
                })
                .collect()
        });

        for (path, is_new, snapshot) in loaded {
            let result = snapshot.and_then(|snapshot| {
                repository
                    .upsert_file(&snapshot)
                    .map_err(|err| SyncError::for_path(path, err))
            });
            match result {
                Ok(outcome) => {
                    debug!(path, id = %outcome.id(), ?outcome, "applied");
                    if is_new {
                        report.new += 1;
                    } else {
                        report.modified += 1;
                    }
                }
                Err(err) => self.record_failure(path, &err, report),
            }
            let mut status = self.status_mut();
            status.pending = status.pending.saturating_sub(1);
        }
    }

    /// Read and parse one file. The bytes must still hash to `expected`.
    fn load_snapshot(&self, rel: &str, expected: &str) -> Result<FileSnapshot, SyncError> {
        let absolute = self.root.join(rel);
        let bytes = match read_bytes_limited(&absolute, self.config.max_file_size) {
            Ok(bytes) => bytes,
            Err(IoError::TooLarge(size, limit)) => {
                debug!(path = rel, size, limit, "tracked as opaque (too large)");
                return Ok(opaque_snapshot(rel, expected));
            }
            Err(err) => return Err(err.into()),
        };

        let checksum = content_checksum(&bytes);
        if checksum != expected {
            self.scanner.checksums().invalidate(&absolute);
            return Err(SyncError::ChecksumMismatchRace {
                path: rel.to_string(),
            });
        }
        if !is_markdown_path(rel) {
            return Ok(opaque_snapshot(rel, &checksum));
        }
        if is_binary(&bytes) {
            return Err(SyncError::Parse {
                path: rel.to_string(),
                reason: "binary content in a markdown file".to_string(),
            });
        }

        let text = decode_text(&bytes)?;
        let parsed = parse_note(&text, rel);
        for warning in &parsed.warnings {
            warn!(path = rel, %warning, "frontmatter ignored");
        }
        Ok(FileSnapshot {
            file_path: rel.to_string(),
            checksum,
            content_type: ContentType::Markdown,
            fragment: parsed.fragment,
            search_text: parsed.body,
        })
    }
}

/// The database and its SQLite side files, when they live inside `root`.
fn database_files_under(root: &Path, config: &SyncConfig) -> Vec<String> {
    let db = config.resolved_database_path(root);
    let db = match (db.parent().map(Path::canonicalize), db.file_name()) {
        (Some(Ok(parent)), Some(name)) => parent.join(name),
        _ => db,
    };
    let Ok(rel) = db.strip_prefix(root) else {
        return Vec::new();
    };
    let rel = normalize_rel_path(rel);
    if rel.is_empty() {
        return Vec::new();
    }
    ["", "-wal", "-shm", "-journal"]
        .iter()
        .map(|suffix| format!("{rel}{suffix}"))
        .collect()
}

fn opaque_snapshot(rel: &str, checksum: &str) -> FileSnapshot {
    let name = file_stem(rel);
    FileSnapshot {
        file_path: rel.to_string(),
        checksum: checksum.to_string(),
        content_type: ContentType::Binary,
        fragment: NoteFragment::opaque(name),
        search_text: rel.replace(['/', '.', '_', '-'], " "),
    }
}
