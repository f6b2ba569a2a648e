//! Sync engine configuration.
//!
//! Loaded from YAML (all keys optional) and then overridden by environment
//! variables:
//!
//! ```yaml
//! debounce_ms: 500
//! workers: 4
//! scan_interval_secs: 60
//! extra_ignore: ["archive/**", "*.draft.md"]
//! update_permalinks_on_move: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SyncError;

/// Overrides [`SyncConfig::debounce_ms`].
pub const DEBOUNCE_MS_ENV: &str = "OMNI_KNOWLEDGE_DEBOUNCE_MS";
/// Overrides [`SyncConfig::workers`].
pub const WORKERS_ENV: &str = "OMNI_KNOWLEDGE_WORKERS";
/// Overrides [`SyncConfig::scan_interval_secs`].
pub const SCAN_INTERVAL_ENV: &str = "OMNI_KNOWLEDGE_SCAN_INTERVAL_SECS";
/// Overrides [`SyncConfig::database_path`].
pub const DB_PATH_ENV: &str = "OMNI_KNOWLEDGE_DB_PATH";

/// Directory (inside the project, ignored by the scanner) holding the graph.
pub const STATE_DIR_NAME: &str = ".omni-knowledge";
/// Database file name inside [`STATE_DIR_NAME`].
pub const DB_FILE_NAME: &str = "graph.db";

const MAX_DEFAULT_WORKERS: usize = 8;

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .min(MAX_DEFAULT_WORKERS)
}

/// Per-project sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet window per path before a watch event is reconciled.
    pub debounce_ms: u64,
    /// Size of the parse/checksum worker pool.
    pub workers: usize,
    /// Capacity of the watch event channel.
    pub channel_capacity: usize,
    /// Full-scan interval when the OS watcher is unavailable.
    pub scan_interval_secs: u64,
    /// How many per-file errors the status keeps.
    pub max_recent_errors: usize,
    /// Files above this size are tracked as opaque without reading them.
    pub max_file_size: u64,
    /// Extra glob patterns to ignore, relative to the project root.
    pub extra_ignore: Vec<String>,
    /// Recompute path-derived permalinks when a file moves.
    pub update_permalinks_on_move: bool,
    /// Database location; defaults to `<root>/.omni-knowledge/graph.db`.
    pub database_path: Option<PathBuf>,
    /// Reuse checksums of files whose size and mtime did not change.
    pub checksum_cache: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            workers: default_workers(),
            channel_capacity: 1024,
            scan_interval_secs: 60,
            max_recent_errors: 32,
            max_file_size: 10 * 1024 * 1024,
            extra_ignore: Vec::new(),
            update_permalinks_on_move: true,
            database_path: None,
            checksum_cache: true,
        }
    }
}

fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

impl SyncConfig {
    /// Load from a YAML file, then apply environment overrides.
    ///
    /// # Errors
    /// `SyncError::Config` when the file cannot be read or parsed.
    pub fn from_yaml_file(path: &Path) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SyncError::Config(format!("{}: {e}", path.display())))?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse YAML text without touching the environment.
    ///
    /// # Errors
    /// `SyncError::Config` for invalid YAML or field types.
    pub fn from_yaml_str(raw: &str) -> Result<Self, SyncError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self =
            serde_yaml::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(config.sanitized())
    }

    /// Defaults plus environment overrides.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply `OMNI_KNOWLEDGE_*` overrides; unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(ms) = lookup(DEBOUNCE_MS_ENV).as_deref().and_then(parse_positive_u64) {
            self.debounce_ms = ms;
        }
        if let Some(workers) = lookup(WORKERS_ENV)
            .as_deref()
            .and_then(parse_positive_u64)
            .and_then(|w| usize::try_from(w).ok())
        {
            self.workers = workers;
        }
        if let Some(secs) = lookup(SCAN_INTERVAL_ENV)
            .as_deref()
            .and_then(parse_positive_u64)
        {
            self.scan_interval_secs = secs;
        }
        if let Some(path) = lookup(DB_PATH_ENV)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
        {
            self.database_path = Some(PathBuf::from(path));
        }
        *self = self.clone().sanitized();
    }

    pub(crate) fn sanitized(mut self) -> Self {
        self.workers = self.workers.max(1);
        self.channel_capacity = self.channel_capacity.max(1);
        self.max_recent_errors = self.max_recent_errors.max(1);
        self.scan_interval_secs = self.scan_interval_secs.max(1);
        self
    }

    /// Debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Polling interval.
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Where the database lives for a project rooted at `root`. Relative
    /// configured paths resolve against the root.
    #[must_use]
    pub fn resolved_database_path(&self, root: &Path) -> PathBuf {
        match &self.database_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(STATE_DIR_NAME).join(DB_FILE_NAME),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(500));
        assert!(config.workers >= 1 && config.workers <= MAX_DEFAULT_WORKERS);
        assert!(config.update_permalinks_on_move);
        assert_eq!(
            config.resolved_database_path(Path::new("/p")),
            PathBuf::from("/p/.omni-knowledge/graph.db")
        );
    }

    #[test]
    fn test_yaml_partial() {
        let config =
            SyncConfig::from_yaml_str("debounce_ms: 50\nextra_ignore: ['archive/**']\nworkers: 0\n")
                .unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.extra_ignore, vec!["archive/**"]);
        assert_eq!(config.workers, 1);
        assert_eq!(config.scan_interval_secs, 60);
    }

    #[test]
    fn test_yaml_invalid() {
        assert!(matches!(
            SyncConfig::from_yaml_str("debounce_ms: soon"),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (DEBOUNCE_MS_ENV, "120"),
            (WORKERS_ENV, "not-a-number"),
            (DB_PATH_ENV, "state/kb.db"),
        ]);
        let mut config = SyncConfig::default();
        let workers = config.workers;
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));
        assert_eq!(config.debounce_ms, 120);
        assert_eq!(config.workers, workers);
        assert_eq!(
            config.resolved_database_path(Path::new("/p")),
            PathBuf::from("/p/state/kb.db")
        );
    }
}
