//! Persisted knowledge graph (SQLite).
//!
//! Modular design:
//! - `mod.rs`: `GraphRepository` handle, open, read queries
//! - `schema.rs`: Tables, partial unique indexes, FTS5 table
//! - `rows.rs`: Row <-> model mapping
//! - `write.rs`: Per-file transactional upsert / move / delete
//! - `resolve.rs`: Forward-reference resolution sweep
//!
//! Every write method runs in its own transaction, and the search index row
//! is updated inside that same transaction.

mod resolve;
mod rows;
mod schema;
mod write;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::entity::{
    DirectoryEntry, Entity, EntityId, EntityRecord, GraphStats, Relation,
};
use crate::error::RepositoryError;

pub use write::{FileSnapshot, UpsertOutcome};

/// An entity reached by [`GraphRepository::neighbors`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    /// The reached entity.
    pub entity: Entity,
    /// Number of hops from the start entity.
    pub distance: usize,
}

/// Handle to one project's graph database. Cheap to clone.
#[derive(Debug, Clone)]
pub struct GraphRepository {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl GraphRepository {
    /// Open (or create) the database file at `path`. The parent directory
    /// must exist.
    ///
    /// # Errors
    /// `Database` when SQLite cannot open or migrate the file.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Private in-memory database, for tests and throwaway projects.
    ///
    /// # Errors
    /// `Database` when the schema cannot be created.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, RepositoryError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file, `None` when in memory.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    // ------------------------------------------------------------------
    // Entity reads
    // ------------------------------------------------------------------

    /// Entity row by id.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn entity(&self, id: EntityId) -> Result<Option<Entity>, RepositoryError> {
        rows::entity_where(&self.lock(), "id", &id.0)
    }

    /// Entity row by permalink.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn entity_by_permalink(&self, permalink: &str) -> Result<Option<Entity>, RepositoryError> {
        rows::entity_where(&self.lock(), "permalink", &permalink)
    }

    /// Entity row by project-relative file path.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn entity_by_path(&self, file_path: &str) -> Result<Option<Entity>, RepositoryError> {
        rows::entity_where(&self.lock(), "file_path", &file_path)
    }

    /// Entities whose title matches case-insensitively, oldest first.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn find_by_title(&self, title: &str) -> Result<Vec<Entity>, RepositoryError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM entity WHERE title = ?1 COLLATE NOCASE ORDER BY id",
            rows::ENTITY_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params![title.trim()], rows::EntityRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(rows::EntityRow::into_entity).collect()
    }

    fn record_for(&self, entity: Option<Entity>) -> Result<Option<EntityRecord>, RepositoryError> {
        let Some(entity) = entity else {
            return Ok(None);
        };
        let conn = self.lock();
        Ok(Some(EntityRecord {
            observations: rows::load_observations(&conn, entity.id)?,
            outgoing: rows::load_outgoing(&conn, entity.id)?,
            incoming: rows::load_incoming(&conn, entity.id)?,
            entity,
        }))
    }

    /// Entity with observations and relations.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn get(&self, id: EntityId) -> Result<Option<EntityRecord>, RepositoryError> {
        let entity = self.entity(id)?;
        self.record_for(entity)
    }

    /// [`Self::get`] by permalink.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn get_by_permalink(&self, permalink: &str) -> Result<Option<EntityRecord>, RepositoryError> {
        let entity = self.entity_by_permalink(permalink)?;
        self.record_for(entity)
    }

    /// [`Self::get`] by file path.
    ///
    /// # Errors
    /// `Database` / `Serialization` on storage failures.
    pub fn get_by_path(&self, file_path: &str) -> Result<Option<EntityRecord>, RepositoryError> {
        let entity = self.entity_by_path(file_path)?;
        self.record_for(entity)
    }

    /// Relations still waiting for a target, in insertion order.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn unresolved_relations(&self) -> Result<Vec<Relation>, RepositoryError> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {} FROM relation WHERE to_id IS NULL AND merged_into IS NULL ORDER BY id",
            rows::RELATION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let relations = stmt
            .query_map([], rows::relation_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    // ------------------------------------------------------------------
    // Sync state
    // ------------------------------------------------------------------

    /// Recorded inventory: file path -> checksum.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn sync_records(&self) -> Result<BTreeMap<String, String>, RepositoryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT file_path, checksum FROM sync_record")?;
        let records = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(records)
    }

    /// Recorded paths whose checksum equals `checksum`, sorted.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn records_with_checksum(&self, checksum: &str) -> Result<Vec<String>, RepositoryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT file_path FROM sync_record WHERE checksum = ?1 ORDER BY file_path",
        )?;
        let paths = stmt
            .query_map(params![checksum], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(paths)
    }

    // ------------------------------------------------------------------
    // Traversal and listings
    // ------------------------------------------------------------------

    /// Breadth-first walk over resolved relations in both directions, up to
    /// `depth` hops. The start entity is not included.
    ///
    /// # Errors
    /// `NotFound` when `start` does not exist.
    pub fn neighbors(&self, start: EntityId, depth: usize) -> Result<Vec<Neighbor>, RepositoryError> {
        if self.entity(start)?.is_none() {
            return Err(RepositoryError::NotFound(start.to_string()));
        }
        let mut visited: HashSet<EntityId> = HashSet::from([start]);
        let mut frontier: Vec<EntityId> = vec![start];
        let mut found: Vec<Neighbor> = Vec::new();

        for distance in 1..=depth {
            let mut next_frontier: Vec<EntityId> = Vec::new();
            for id in &frontier {
                for adjacent in self.adjacent(*id)? {
                    if visited.insert(adjacent) {
                        next_frontier.push(adjacent);
                    }
                }
            }
            for id in &next_frontier {
                if let Some(entity) = self.entity(*id)? {
                    found.push(Neighbor { entity, distance });
                }
            }
            if next_frontier.is_empty() {
                break;
            }
            frontier = next_frontier;
        }
        Ok(found)
    }

    fn adjacent(&self, id: EntityId) -> Result<Vec<EntityId>, RepositoryError> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT to_id FROM relation WHERE from_id = ?1 AND to_id IS NOT NULL \
             UNION SELECT from_id FROM relation WHERE to_id = ?1 \
             ORDER BY 1",
        )?;
        let ids = stmt
            .query_map(params![id.0], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(EntityId))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Tracked files and sub-directories under `dir` (project-relative,
    /// empty for the root), descending at most `depth` levels (minimum 1).
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn list_directory(&self, dir: &str, depth: usize) -> Result<Vec<DirectoryEntry>, RepositoryError> {
        let dir = dir.trim().trim_matches('/');
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };
        let depth = depth.max(1);

        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, file_path FROM entity \
             WHERE substr(file_path, 1, length(?1)) = ?1 ORDER BY file_path",
        )?;
        let files = stmt
            .query_map(params![prefix], |row| {
                Ok((
                    EntityId(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut entries: BTreeMap<String, DirectoryEntry> = BTreeMap::new();
        for (id, title, file_path) in files {
            let rest = &file_path[prefix.len()..];
            let parts: Vec<&str> = rest.split('/').collect();
            for level in 1..=depth.min(parts.len()) {
                let path = format!("{prefix}{}", parts[..level].join("/"));
                let is_file = level == parts.len();
                entries.entry(path.clone()).or_insert_with(|| DirectoryEntry {
                    name: parts[level - 1].to_string(),
                    path,
                    is_dir: !is_file,
                    entity_id: is_file.then_some(id),
                    title: is_file.then(|| title.clone()),
                });
            }
        }
        Ok(entries.into_values().collect())
    }

    /// Row counts.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn stats(&self) -> Result<GraphStats, RepositoryError> {
        let conn = self.lock();
        let count = |sql: &str| -> Result<usize, RepositoryError> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(usize::try_from(n).unwrap_or_default())
        };
        Ok(GraphStats {
            entities: count("SELECT COUNT(*) FROM entity")?,
            observations: count("SELECT COUNT(*) FROM observation")?,
            relations: count("SELECT COUNT(*) FROM relation WHERE merged_into IS NULL")?,
            unresolved_relations: count(
                "SELECT COUNT(*) FROM relation WHERE to_id IS NULL AND merged_into IS NULL",
            )?,
        })
    }
}
