//! Per-project entry point.
//!
//! A [`ProjectContext`] bundles the canonical root, the graph repository,
//! the search index, the sync service and (optionally) a watch service.
//! Nothing is process-global: open one context per project.
//!
//! Writes go through the files: `write_note`, `move_note` and `delete_note`
//! change the tree and then run an incremental pass on the touched paths, so
//! the sync service remains the only writer of the graph.

use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::entity::{DirectoryEntry, EntityId, EntityRecord, GraphStats, NoteFragment};
use crate::error::SyncError;
use crate::markdown::render_markdown;
use crate::repository::{GraphRepository, Neighbor};
use crate::search::{SearchHit, SearchIndex, SearchQuery};
use crate::sync::{SyncReport, SyncService, SyncStatus, WatchMode};
use crate::watch::WatchService;

/// A project root with path validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    /// Canonicalize and check `root`.
    ///
    /// # Errors
    /// `ProjectRoot` when `root` does not exist or is not a directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, SyncError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| SyncError::ProjectRoot(format!("{}: {e}", root.display())))?;
        if !canonical.is_dir() {
            return Err(SyncError::ProjectRoot(format!(
                "{} is not a directory",
                canonical.display()
            )));
        }
        Ok(Self { root: canonical })
    }

    /// Canonical root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate a caller-supplied project-relative path.
    ///
    /// Returns the normalized relative path and its absolute location.
    /// Symlinked directories that lead outside the root are rejected too.
    ///
    /// # Errors
    /// `PathTraversal` for empty or absolute paths, `..` segments, or paths
    /// that resolve outside the root.
    pub fn resolve(&self, rel: &str) -> Result<(String, PathBuf), SyncError> {
        let traversal = || SyncError::PathTraversal(rel.to_string());
        let mut segments: Vec<String> = Vec::new();
        for component in Path::new(rel.trim()).components() {
            match component {
                Component::Normal(segment) => {
                    segments.push(segment.to_string_lossy().to_string());
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(traversal());
                }
            }
        }
        if segments.is_empty() {
            return Err(traversal());
        }
        let normalized = segments.join("/");
        let absolute = self.root.join(&normalized);

        // The deepest existing ancestor must stay inside the root.
        let mut probe = absolute.as_path();
        loop {
            if probe.exists() {
                let real = probe.canonicalize().map_err(|_| traversal())?;
                if !real.starts_with(&self.root) {
                    return Err(traversal());
                }
                break;
            }
            match probe.parent() {
                Some(parent) => probe = parent,
                None => break,
            }
        }
        Ok((normalized, absolute))
    }
}

/// Everything needed to work with one project.
#[derive(Debug)]
pub struct ProjectContext {
    project: Project,
    repository: GraphRepository,
    search: SearchIndex,
    sync: SyncService,
    watch: tokio::sync::Mutex<Option<WatchService>>,
}

impl ProjectContext {
    /// Open a project, creating its state directory and database.
    ///
    /// # Errors
    /// `ProjectRoot` when the root is unusable, `Repository` when the
    /// database cannot be opened, `Io`/`Config` for bad settings.
    pub fn open(root: impl AsRef<Path>, config: SyncConfig) -> Result<Self, SyncError> {
        let project = Project::open(root)?;
        let db_path = config.resolved_database_path(project.root());
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ProjectRoot(format!("{}: {e}", parent.display())))?;
        }
        let repository = GraphRepository::open(&db_path)?;
        info!(root = %project.root().display(), db = %db_path.display(), "project opened");
        Self::assemble(project, repository, config)
    }

    /// Open a project backed by an existing repository handle.
    ///
    /// # Errors
    /// As [`Self::open`], minus database creation.
    pub fn with_repository(
        root: impl AsRef<Path>,
        repository: GraphRepository,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        Self::assemble(Project::open(root)?, repository, config)
    }

    fn assemble(
        project: Project,
        repository: GraphRepository,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let sync = SyncService::new(project.root(), repository.clone(), config)?;
        Ok(Self {
            search: SearchIndex::new(&repository),
            project,
            repository,
            sync,
            watch: tokio::sync::Mutex::new(None),
        })
    }

    /// Canonical project root.
    #[must_use]
    pub fn project_root(&self) -> &Path {
        self.project.root()
    }

    /// Graph repository (read access for hosts).
    #[must_use]
    pub fn repository(&self) -> &GraphRepository {
        &self.repository
    }

    /// Search handle.
    #[must_use]
    pub fn search_index(&self) -> &SearchIndex {
        &self.search
    }

    /// Sync service.
    #[must_use]
    pub fn sync_service(&self) -> &SyncService {
        &self.sync
    }

    fn checked(&self, rel: &str) -> Result<(String, PathBuf), SyncError> {
        let (normalized, absolute) = self.project.resolve(rel)?;
        if self.sync.filter().is_ignored(Path::new(&normalized)) {
            return Err(SyncError::Ignored(normalized));
        }
        Ok((normalized, absolute))
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Reconcile the whole project.
    ///
    /// # Errors
    /// See [`SyncService::sync_full`].
    pub async fn sync_full(&self) -> Result<SyncReport, SyncError> {
        self.sync.sync_full().await
    }

    /// Reconcile the given project-relative paths.
    ///
    /// # Errors
    /// `PathTraversal` / `Ignored` for a bad path (nothing is synced), then
    /// as [`SyncService::sync_paths`].
    pub async fn sync_paths(&self, paths: &[&str]) -> Result<SyncReport, SyncError> {
        let mut checked = Vec::with_capacity(paths.len());
        for path in paths {
            checked.push(self.checked(path)?.0);
        }
        self.sync.sync_paths(checked).await
    }

    /// Progress, counts and recent failures.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        self.sync.status()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    async fn record_after_sync(&self, rel: &str) -> Result<EntityRecord, SyncError> {
        self.sync.sync_paths(vec![rel.to_string()]).await?;
        if let Some(record) = self.repository.get_by_path(rel)? {
            return Ok(record);
        }
        Err(self.sync.status().failure_for(rel).map_or_else(
            || SyncError::Io(omni_io::IoError::NotFound(rel.to_string())),
            crate::sync::FileFailure::to_error,
        ))
    }

    /// Write `content` to `rel` (creating directories) and sync it.
    ///
    /// # Errors
    /// Path validation errors, I/O errors, or the per-file error that kept
    /// the note out of the graph (the file stays on disk).
    pub async fn write_note(&self, rel: &str, content: &str) -> Result<EntityRecord, SyncError> {
        let (rel, absolute) = self.checked(rel)?;
        if let Some(parent) = absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&absolute, content).await?;
        debug!(path = %rel, bytes = content.len(), "note written");
        self.record_after_sync(&rel).await
    }

    /// Render `fragment` around `body` in canonical layout and write it.
    ///
    /// # Errors
    /// As [`Self::write_note`].
    pub async fn write_fragment(
        &self,
        rel: &str,
        fragment: &NoteFragment,
        body: &str,
    ) -> Result<EntityRecord, SyncError> {
        self.write_note(rel, &render_markdown(fragment, body)).await
    }

    /// Remove the file at `rel` and its entity. Returns whether an entity
    /// was deleted.
    ///
    /// # Errors
    /// Path validation and I/O errors.
    pub async fn delete_note(&self, rel: &str) -> Result<bool, SyncError> {
        let (rel, absolute) = self.checked(rel)?;
        match tokio::fs::remove_file(&absolute).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let report = self.sync.sync_paths(vec![rel]).await?;
        Ok(report.deleted > 0)
    }

    /// Move a note, keeping its entity id, observations and relations.
    ///
    /// # Errors
    /// `ConstraintViolation` when `to` exists, `Io` when `from` is missing,
    /// and path validation errors.
    pub async fn move_note(&self, from: &str, to: &str) -> Result<EntityRecord, SyncError> {
        let (from, from_abs) = self.checked(from)?;
        let (to, to_abs) = self.checked(to)?;
        if tokio::fs::try_exists(&to_abs).await? {
            return Err(SyncError::ConstraintViolation {
                path: to,
                reason: "target already exists".to_string(),
            });
        }
        if !tokio::fs::try_exists(&from_abs).await? {
            return Err(SyncError::Io(omni_io::IoError::NotFound(from)));
        }
        if let Some(parent) = to_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&from_abs, &to_abs).await?;
        debug!(from = %from, to = %to, "note moved");
        self.sync.sync_paths(vec![from, to.clone()]).await?;
        self.repository
            .get_by_path(&to)?
            .ok_or_else(|| {
                self.sync.status().failure_for(&to).map_or_else(
                    || SyncError::Io(omni_io::IoError::NotFound(to.clone())),
                    crate::sync::FileFailure::to_error,
                )
            })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Entity with observations and relations by id.
    ///
    /// # Errors
    /// Repository failures.
    pub fn get(&self, id: EntityId) -> Result<Option<EntityRecord>, SyncError> {
        Ok(self.repository.get(id)?)
    }

    /// Entity by permalink.
    ///
    /// # Errors
    /// Repository failures.
    pub fn get_by_permalink(&self, permalink: &str) -> Result<Option<EntityRecord>, SyncError> {
        Ok(self.repository.get_by_permalink(permalink)?)
    }

    /// Entity by project-relative path.
    ///
    /// # Errors
    /// `PathTraversal` for a bad path, repository failures.
    pub fn get_by_path(&self, rel: &str) -> Result<Option<EntityRecord>, SyncError> {
        let (rel, _) = self.project.resolve(rel)?;
        Ok(self.repository.get_by_path(&rel)?)
    }

    /// Entities within `depth` hops of `id`.
    ///
    /// # Errors
    /// Repository failures, `NotFound` for an unknown id.
    pub fn neighbors(&self, id: EntityId, depth: usize) -> Result<Vec<Neighbor>, SyncError> {
        Ok(self.repository.neighbors(id, depth)?)
    }

    /// Ranked full-text search.
    ///
    /// # Errors
    /// `InvalidQuery` and repository failures.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, SyncError> {
        Ok(self.search.search(query)?)
    }

    /// Tracked files and directories under `dir` ("" for the root).
    ///
    /// # Errors
    /// `PathTraversal` for a bad directory, repository failures.
    pub fn list_directory(&self, dir: &str, depth: usize) -> Result<Vec<DirectoryEntry>, SyncError> {
        let dir = if dir.trim().trim_matches('/').is_empty() {
            String::new()
        } else {
            self.project.resolve(dir)?.0
        };
        Ok(self.repository.list_directory(&dir, depth)?)
    }

    /// Graph counts.
    ///
    /// # Errors
    /// Repository failures.
    pub fn stats(&self) -> Result<GraphStats, SyncError> {
        Ok(self.repository.stats()?)
    }

    // ------------------------------------------------------------------
    // Watching
    // ------------------------------------------------------------------

    /// Run a full pass, then start watching. Idempotent.
    ///
    /// # Errors
    /// Errors of the initial pass; see [`WatchService::start`].
    pub async fn start_watch(&self) -> Result<WatchMode, SyncError> {
        let mut watch = self.watch.lock().await;
        if let Some(service) = watch.as_ref() {
            return Ok(service.mode());
        }
        self.sync.sync_full().await?;
        let service = WatchService::start(self.sync.clone())?;
        let mode = service.mode();
        *watch = Some(service);
        Ok(mode)
    }

    /// Stop watching; no-op when not watching.
    ///
    /// # Errors
    /// `Task` when the watch loop panicked.
    pub async fn stop_watch(&self) -> Result<(), SyncError> {
        let service = self.watch.lock().await.take();
        match service {
            Some(service) => service.stop().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = TempDir::new().unwrap();
        let project = Project::open(dir.path()).unwrap();
        for bad in ["", "   ", "../x.md", "a/../../x.md", "/etc/passwd", "./.."] {
            assert!(
                matches!(project.resolve(bad), Err(SyncError::PathTraversal(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_resolve_normalizes() {
        let dir = TempDir::new().unwrap();
        let project = Project::open(dir.path()).unwrap();
        let (rel, absolute) = project.resolve("./notes//a.md").unwrap();
        assert_eq!(rel, "notes/a.md");
        assert_eq!(absolute, project.root().join("notes/a.md"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let project = Project::open(dir.path()).unwrap();
        assert!(matches!(
            project.resolve("link/x.md"),
            Err(SyncError::PathTraversal(_))
        ));
    }

    #[test]
    fn test_open_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Project::open(dir.path().join("missing")),
            Err(SyncError::ProjectRoot(_))
        ));
    }
}
