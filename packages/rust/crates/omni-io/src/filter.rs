//! Ignore rules shared by the scanner and the watcher.
//!
//! A path is ignored when any of its components is hidden (leading `.`) or is
//! one of [`IGNORED_DIR_NAMES`], when its file name is in
//! [`IGNORED_FILE_NAMES`] or ends with one of [`IGNORED_SUFFIXES`], or when it
//! matches a caller-supplied glob or excluded file.

use std::path::{Component, Path};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::IoError;

/// Directory names that are never descended into.
pub const IGNORED_DIR_NAMES: &[&str] = &[
    // dependency trees
    "node_modules",
    "bower_components",
    "vendor",
    "site-packages",
    "venv",
    "env",
    // build output
    "target",
    "build",
    "dist",
    "out",
    // language caches
    "__pycache__",
    "coverage",
    "htmlcov",
    // VCS / IDE metadata without a leading dot
    "CVS",
    "nbproject",
    // OS artifacts
    "$RECYCLE.BIN",
    "System Volume Information",
    "lost+found",
];

/// File names that are never tracked.
pub const IGNORED_FILE_NAMES: &[&str] = &["Thumbs.db", "desktop.ini", "Icon\r"];

/// File suffixes for logs, temp files and atomic-write sentinels.
pub const IGNORED_SUFFIXES: &[&str] = &[
    ".log",
    ".tmp",
    ".temp",
    ".swp",
    ".swo",
    ".swx",
    ".bak",
    ".part",
    ".partial",
    ".crdownload",
    ".pyc",
    "~",
];

/// Pure predicate deciding whether a project-relative path is observed.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    extra: Option<GlobSet>,
    extra_patterns: Vec<String>,
    excluded: Vec<String>,
}

impl PathFilter {
    /// Filter with only the built-in rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter with the built-in rules plus extra glob patterns.
    ///
    /// # Errors
    /// Returns `IoError::Pattern` for a glob that does not compile.
    pub fn with_patterns<I, S>(patterns: I) -> Result<Self, IoError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GlobSetBuilder::new();
        let mut extra_patterns = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let glob = Glob::new(pattern).map_err(|e| IoError::Pattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            builder.add(glob);
            extra_patterns.push(pattern.to_string());
        }
        if extra_patterns.is_empty() {
            return Ok(Self::default());
        }
        let set = builder.build().map_err(|e| IoError::Pattern {
            pattern: extra_patterns.join(", "),
            reason: e.to_string(),
        })?;
        Ok(Self {
            extra: Some(set),
            extra_patterns,
            excluded: Vec::new(),
        })
    }

    /// Also ignore these exact project-relative files.
    #[must_use]
    pub fn excluding<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref().replace('\\', "/");
            if !path.is_empty() && !self.excluded.contains(&path) {
                self.excluded.push(path);
            }
        }
        self
    }

    /// Exact files excluded with [`Self::excluding`].
    #[must_use]
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Extra glob patterns this filter was built with.
    #[must_use]
    pub fn extra_patterns(&self) -> &[String] {
        &self.extra_patterns
    }

    /// Whether a directory with this name is pruned.
    #[must_use]
    pub fn is_ignored_dir_name(name: &str) -> bool {
        name.starts_with('.') || IGNORED_DIR_NAMES.contains(&name)
    }

    /// Whether a file with this name is skipped.
    #[must_use]
    pub fn is_ignored_file_name(name: &str) -> bool {
        name.starts_with('.')
            || IGNORED_FILE_NAMES.contains(&name)
            || IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
    }

    /// Check a walk entry. `rel_path` is relative to the project root.
    #[must_use]
    pub fn is_ignored_entry(&self, rel_path: &Path, is_dir: bool) -> bool {
        let Some(name) = rel_path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };
        let by_name = if is_dir {
            Self::is_ignored_dir_name(&name)
        } else {
            Self::is_ignored_file_name(&name)
        };
        by_name || self.matches_extra(rel_path)
    }

    /// Check an arbitrary project-relative path, e.g. from a watch event.
    ///
    /// Every ancestor component is checked against the directory rules, the
    /// last component against the file rules. Whether the last component is
    /// itself an ignored directory is decided by the scanner, which can stat
    /// it.
    #[must_use]
    pub fn is_ignored(&self, rel_path: &Path) -> bool {
        let names: Vec<String> = rel_path
            .components()
            .filter_map(|component| match component {
                Component::Normal(segment) => Some(segment.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        let Some((last, ancestors)) = names.split_last() else {
            return false;
        };
        if ancestors.iter().any(|name| Self::is_ignored_dir_name(name)) {
            return true;
        }
        Self::is_ignored_file_name(last) || self.matches_extra(rel_path)
    }

    fn matches_extra(&self, rel_path: &Path) -> bool {
        if self.extra.is_none() && self.excluded.is_empty() {
            return false;
        }
        let normalized = rel_path.to_string_lossy().replace('\\', "/");
        self.excluded.iter().any(|path| *path == normalized)
            || self
                .extra
                .as_ref()
                .is_some_and(|set| set.is_match(normalized.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_and_dependency_dirs() {
        let filter = PathFilter::new();
        assert!(filter.is_ignored(Path::new(".git/config")));
        assert!(filter.is_ignored(Path::new("docs/node_modules/pkg/readme.md")));
        assert!(filter.is_ignored(Path::new("target/debug/notes.md")));
        assert!(filter.is_ignored(Path::new("notes/.obsidian/workspace.json")));
        assert!(!filter.is_ignored(Path::new("notes/alpha.md")));
    }

    #[test]
    fn test_temp_and_log_suffixes() {
        let filter = PathFilter::new();
        assert!(filter.is_ignored(Path::new("notes/alpha.md.tmp")));
        assert!(filter.is_ignored(Path::new("notes/alpha.md~")));
        assert!(filter.is_ignored(Path::new("server.log")));
        assert!(filter.is_ignored(Path::new(".alpha.md.swp")));
        assert!(filter.is_ignored(Path::new("photos/Thumbs.db")));
    }

    #[test]
    fn test_entry_rules_split_dirs_and_files() {
        let filter = PathFilter::new();
        assert!(filter.is_ignored_entry(Path::new("build"), true));
        // A file that happens to be named like an ignored directory is kept.
        assert!(!filter.is_ignored_entry(Path::new("notes/build"), false));
        assert!(filter.is_ignored_entry(Path::new("notes/x.log"), false));
    }

    #[test]
    fn test_extra_patterns() {
        let filter = PathFilter::with_patterns(["archive/**", "*.draft.md"]).unwrap();
        assert!(filter.is_ignored(Path::new("archive/2019/old.md")));
        assert!(filter.is_ignored(Path::new("notes/idea.draft.md")));
        assert!(!filter.is_ignored(Path::new("notes/idea.md")));
        assert_eq!(filter.extra_patterns().len(), 2);
    }

    #[test]
    fn test_excluded_files_match_exactly() {
        let filter = PathFilter::new().excluding(["graph.db", "graph.db-wal", "graph.db"]);
        assert_eq!(filter.excluded().len(), 2);
        assert!(filter.is_ignored(Path::new("graph.db")));
        assert!(filter.is_ignored_entry(Path::new("graph.db-wal"), false));
        assert!(!filter.is_ignored(Path::new("notes/graph.db")));
        assert!(!filter.is_ignored(Path::new("graph.db-shm")));
    }

    #[test]
    fn test_invalid_pattern() {
        let result = PathFilter::with_patterns(["a[b"]);
        assert!(matches!(result, Err(IoError::Pattern { .. })));
    }
}
