use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::GraphRepository;
use crate::entity::EntityId;
use crate::error::RepositoryError;
use crate::markdown::permalink::normalize_permalink;

/// Match a link target to an entity: permalink first (as written, then
/// normalized), then case-insensitive title. Ties go to the smallest id.
pub(super) fn resolve_name(conn: &Connection, name: &str) -> Result<Option<EntityId>, RepositoryError> {
    let name = name.trim();
    if name.is_empty() {
        return Ok(None);
    }
    let normalized = normalize_permalink(name);
    let by_permalink: Option<i64> = conn
        .prepare_cached(
            "SELECT id FROM entity WHERE permalink = ?1 OR permalink = ?2 \
             ORDER BY (permalink = ?1) DESC, id LIMIT 1",
        )?
        .query_row(params![name, normalized], |row| row.get(0))
        .optional()?;
    if let Some(id) = by_permalink {
        return Ok(Some(EntityId(id)));
    }
    let by_title: Option<i64> = conn
        .prepare_cached("SELECT id FROM entity WHERE title = ?1 COLLATE NOCASE ORDER BY id LIMIT 1")?
        .query_row(params![name], |row| row.get(0))
        .optional()?;
    Ok(by_title.map(EntityId))
}

impl GraphRepository {
    /// Entity a link target currently points at, if any.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn resolve_name(&self, name: &str) -> Result<Option<EntityId>, RepositoryError> {
        resolve_name(&self.lock(), name)
    }

    /// Resolve every forward reference whose target now exists.
    ///
    /// A relation that would duplicate an already resolved one is kept as an
    /// alias of it: hidden from reads, and released again when that target
    /// goes away. Returns the number of relations resolved or merged; zero means
    /// nothing was written.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn resolve_forward_references(&self) -> Result<usize, RepositoryError> {
        let mut conn = self.lock();
        let pending: Vec<(i64, i64, String, String)> = {
            let mut stmt = conn.prepare(
                "SELECT id, from_id, relation_type, to_name FROM relation \
                 WHERE to_id IS NULL AND merged_into IS NULL ORDER BY id",
            )?;
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
                .collect::<Result<Vec<_>, _>>()?
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let tx = conn.transaction()?;
        let mut resolved = 0usize;
        for (id, from_id, relation_type, to_name) in pending {
            let Some(target) = resolve_name(&tx, &to_name)? else {
                continue;
            };
            let duplicate: Option<i64> = tx
                .prepare_cached(
                    "SELECT id FROM relation WHERE from_id = ?1 AND relation_type = ?2 AND to_id = ?3",
                )?
                .query_row(params![from_id, relation_type, target.0], |row| row.get(0))
                .optional()?;
            if let Some(kept) = duplicate {
                tx.execute(
                    "UPDATE relation SET merged_into = ?1 WHERE id = ?2",
                    params![kept, id],
                )?;
            } else {
                tx.execute(
                    "UPDATE relation SET to_id = ?1 WHERE id = ?2",
                    params![target.0, id],
                )?;
            }
            resolved += 1;
        }
        if resolved > 0 {
            tx.commit()?;
            debug!(resolved, "forward references resolved");
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ContentType, NoteFragment, RelationDraft, RelationTarget};
    use crate::repository::{FileSnapshot, UpsertOutcome};

    fn snapshot(path: &str, title: &str, links: &[&str]) -> FileSnapshot {
        let mut fragment = NoteFragment::new(title);
        fragment.relations = links
            .iter()
            .map(|target| RelationDraft::new("links_to", *target))
            .collect();
        FileSnapshot {
            file_path: path.to_string(),
            checksum: format!("sum-{path}-{}", links.join(",")),
            content_type: ContentType::Markdown,
            fragment,
            search_text: title.to_string(),
        }
    }

    #[test]
    fn test_forward_reference_resolves_after_target_appears() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let a = repo.upsert_file(&snapshot("a.md", "A", &["B"])).unwrap().id();
        assert_eq!(repo.unresolved_relations().unwrap().len(), 1);
        assert_eq!(repo.resolve_forward_references().unwrap(), 0);

        let b = repo.upsert_file(&snapshot("b.md", "B", &[])).unwrap().id();
        assert_eq!(repo.resolve_forward_references().unwrap(), 1);
        assert!(repo.unresolved_relations().unwrap().is_empty());

        let record = repo.get(a).unwrap().unwrap();
        assert_eq!(record.outgoing[0].target, RelationTarget::Resolved(b));
        assert_eq!(repo.resolve_forward_references().unwrap(), 0);
    }

    #[test]
    fn test_permalink_match_beats_title() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let titled = repo.upsert_file(&snapshot("one.md", "target", &[])).unwrap().id();
        let linked = repo.upsert_file(&snapshot("target.md", "Other", &[])).unwrap().id();
        assert_ne!(titled, linked);
        assert_eq!(repo.resolve_name("target").unwrap(), Some(linked));
        assert_eq!(repo.resolve_name("TARGET").unwrap(), Some(linked));
        assert_eq!(repo.resolve_name("other").unwrap(), Some(linked));
        assert_eq!(repo.resolve_name("missing").unwrap(), None);
        assert_eq!(repo.resolve_name("  ").unwrap(), None);
    }

    #[test]
    fn test_title_tie_goes_to_oldest() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let first = repo.upsert_file(&snapshot("x/a.md", "Same", &[])).unwrap();
        let second = repo.upsert_file(&snapshot("y/b.md", "same", &[])).unwrap();
        assert!(matches!(first, UpsertOutcome::Created(_)));
        assert!(matches!(second, UpsertOutcome::Created(_)));
        assert_eq!(repo.resolve_name("SAME").unwrap(), Some(first.id()));
    }

    #[test]
    fn test_aliases_collapse_into_one_relation() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let b = repo.upsert_file(&snapshot("b.md", "Bee", &[])).unwrap().id();
        let a = repo
            .upsert_file(&snapshot("a.md", "A", &["b", "Bee"]))
            .unwrap()
            .id();
        assert_eq!(repo.resolve_forward_references().unwrap(), 2);
        let record = repo.get(a).unwrap().unwrap();
        assert_eq!(record.outgoing.len(), 1);
        assert_eq!(record.outgoing[0].target, RelationTarget::Resolved(b));
        assert_eq!(repo.get(b).unwrap().unwrap().incoming.len(), 1);
        let stats = repo.stats().unwrap();
        assert_eq!((stats.relations, stats.unresolved_relations), (1, 0));
        assert_eq!(repo.resolve_forward_references().unwrap(), 0);
    }

    #[test]
    fn test_alias_survives_target_delete_and_relinks_by_title() {
        let repo = GraphRepository::open_in_memory().unwrap();
        repo.upsert_file(&snapshot("b.md", "Bee", &[])).unwrap();
        let a = repo
            .upsert_file(&snapshot("a.md", "A", &["b", "Bee"]))
            .unwrap()
            .id();
        repo.resolve_forward_references().unwrap();

        repo.delete_file("b.md").unwrap();
        let names: Vec<RelationTarget> = repo
            .get(a)
            .unwrap()
            .unwrap()
            .outgoing
            .into_iter()
            .map(|r| r.target)
            .collect();
        assert_eq!(
            names,
            vec![
                RelationTarget::Unresolved("b".to_string()),
                RelationTarget::Unresolved("Bee".to_string()),
            ]
        );

        let other = repo.upsert_file(&snapshot("other.md", "Bee", &[])).unwrap().id();
        assert_eq!(repo.resolve_forward_references().unwrap(), 1);
        let record = repo.get(a).unwrap().unwrap();
        assert_eq!(record.outgoing.len(), 2);
        assert_eq!(record.outgoing[1].target, RelationTarget::Resolved(other));
        assert_eq!(repo.unresolved_relations().unwrap().len(), 1);
    }

    #[test]
    fn test_dropping_the_kept_name_promotes_the_alias() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let b = repo.upsert_file(&snapshot("b.md", "Bee", &[])).unwrap().id();
        let a = repo
            .upsert_file(&snapshot("a.md", "A", &["b", "Bee"]))
            .unwrap()
            .id();
        repo.resolve_forward_references().unwrap();

        repo.upsert_file(&snapshot("a.md", "A", &["Bee"])).unwrap();
        assert_eq!(repo.resolve_forward_references().unwrap(), 1);
        let record = repo.get(a).unwrap().unwrap();
        assert_eq!(record.outgoing.len(), 1);
        assert_eq!(record.outgoing[0].to_name, "Bee");
        assert_eq!(record.outgoing[0].target, RelationTarget::Resolved(b));
    }

    #[test]
    fn test_delete_reverts_incoming_to_forward_reference() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let a = repo.upsert_file(&snapshot("a.md", "A", &["b"])).unwrap().id();
        repo.upsert_file(&snapshot("b.md", "B", &["a"])).unwrap();
        assert_eq!(repo.resolve_forward_references().unwrap(), 2);

        assert!(repo.delete_file("b.md").unwrap().is_some());
        let record = repo.get(a).unwrap().unwrap();
        assert_eq!(record.outgoing.len(), 1);
        assert_eq!(
            record.outgoing[0].target,
            RelationTarget::Unresolved("b".to_string())
        );
        assert!(record.incoming.is_empty());
        assert_eq!(repo.stats().unwrap().entities, 1);

        repo.upsert_file(&snapshot("b.md", "B", &[])).unwrap();
        assert_eq!(repo.resolve_forward_references().unwrap(), 1);
    }
}
