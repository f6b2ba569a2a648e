//! Scan-vs-stored classification.

use omni_io::Scan;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A file that disappeared at `from` and reappeared, byte-identical, at `to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMove {
    /// Old project-relative path.
    pub from: String,
    /// New project-relative path.
    pub to: String,
}

/// What one reconciliation pass has to do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Paths not yet tracked.
    pub new: Vec<String>,
    /// Tracked paths whose checksum changed.
    pub modified: Vec<String>,
    /// Tracked paths that are gone.
    pub deleted: Vec<String>,
    /// Identity-preserving moves.
    pub moved: Vec<FileMove>,
    /// Tracked paths with unchanged checksum.
    pub unchanged: usize,
}

impl ChangeSet {
    /// Whether nothing needs to be applied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new.is_empty()
            && self.modified.is_empty()
            && self.deleted.is_empty()
            && self.moved.is_empty()
    }

    /// Number of file-level operations in the set.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len() + self.moved.len()
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Classify `scan` against `stored` (path -> checksum).
///
/// `stored` must already be restricted to the paths the scan covered. Stored
/// paths under an unreadable entry of the scan are neither deleted nor moved.
///
/// A deleted and a new path with equal checksums form a move. Pairing is
/// one-to-one: candidates with the same file name are paired first, the
/// remainder in sorted path order. Unpaired paths stay new/deleted.
#[must_use]
pub fn classify(scan: &Scan, stored: &BTreeMap<String, String>) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let mut fresh: BTreeMap<&str, &str> = BTreeMap::new();

    for (path, checksum) in &scan.inventory.0 {
        match stored.get(path) {
            Some(previous) if previous == checksum => changes.unchanged += 1,
            Some(_) => changes.modified.push(path.clone()),
            None => {
                fresh.insert(path, checksum);
            }
        }
    }

    // checksum -> gone paths, sorted
    let mut gone: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (path, checksum) in stored {
        if scan.inventory.get(path).is_none() && !scan.is_unreadable(path) {
            gone.entry(checksum.as_str()).or_default().insert(path);
        }
    }

    let mut moved: Vec<FileMove> = Vec::new();
    for same_name in [true, false] {
        let candidates: Vec<(&str, &str)> = fresh.iter().map(|(p, c)| (*p, *c)).collect();
        for (to, checksum) in candidates {
            let Some(sources) = gone.get_mut(checksum) else {
                continue;
            };
            let from = sources
                .iter()
                .find(|from| !same_name || base_name(from) == base_name(to))
                .copied();
            if let Some(from) = from {
                sources.remove(from);
                fresh.remove(to);
                moved.push(FileMove {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
        }
    }
    moved.sort_by(|a, b| a.to.cmp(&b.to));

    changes.new = fresh.keys().map(|p| (*p).to_string()).collect();
    changes.deleted = gone
        .into_values()
        .flatten()
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    changes.moved = moved;
    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_io::Inventory;

    fn scan(files: &[(&str, &str)]) -> Scan {
        Scan {
            inventory: Inventory(
                files
                    .iter()
                    .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
                    .collect(),
            ),
            unreadable: BTreeSet::new(),
        }
    }

    fn stored(files: &[(&str, &str)]) -> BTreeMap<String, String> {
        files
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect()
    }

    #[test]
    fn test_basic_classification() {
        let changes = classify(
            &scan(&[("a.md", "1"), ("b.md", "2x"), ("new.md", "9")]),
            &stored(&[("a.md", "1"), ("b.md", "2"), ("gone.md", "3")]),
        );
        assert_eq!(changes.unchanged, 1);
        assert_eq!(changes.modified, vec!["b.md"]);
        assert_eq!(changes.new, vec!["new.md"]);
        assert_eq!(changes.deleted, vec!["gone.md"]);
        assert!(changes.moved.is_empty());
        assert_eq!(changes.pending(), 3);
    }

    #[test]
    fn test_move_detected_by_checksum() {
        let changes = classify(
            &scan(&[("archive/a.md", "1")]),
            &stored(&[("a.md", "1")]),
        );
        assert_eq!(
            changes.moved,
            vec![FileMove {
                from: "a.md".to_string(),
                to: "archive/a.md".to_string()
            }]
        );
        assert!(changes.new.is_empty() && changes.deleted.is_empty());
    }

    #[test]
    fn test_equal_checksums_prefer_same_name() {
        let changes = classify(
            &scan(&[("x/b.md", "e"), ("y/a.md", "e")]),
            &stored(&[("a.md", "e"), ("b.md", "e")]),
        );
        assert_eq!(changes.moved.len(), 2);
        assert_eq!(changes.moved[0].from, "b.md");
        assert_eq!(changes.moved[0].to, "x/b.md");
        assert_eq!(changes.moved[1].from, "a.md");
        assert_eq!(changes.moved[1].to, "y/a.md");
    }

    #[test]
    fn test_surplus_copies_stay_new() {
        let changes = classify(
            &scan(&[("c1.md", "e"), ("c2.md", "e")]),
            &stored(&[("orig.md", "e")]),
        );
        assert_eq!(changes.moved.len(), 1);
        assert_eq!(changes.moved[0].from, "orig.md");
        assert_eq!(changes.moved[0].to, "c1.md");
        assert_eq!(changes.new, vec!["c2.md"]);
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn test_unreadable_paths_are_not_deleted() {
        let mut current = scan(&[]);
        current.unreadable.insert("locked".to_string());
        let changes = classify(
            &current,
            &stored(&[("locked/a.md", "1"), ("other.md", "2")]),
        );
        assert_eq!(changes.deleted, vec!["other.md"]);
    }

    #[test]
    fn test_identical_state_is_empty() {
        let files = [("a.md", "1"), ("b/c.md", "2")];
        let changes = classify(&scan(&files), &stored(&files));
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, 2);
    }
}
