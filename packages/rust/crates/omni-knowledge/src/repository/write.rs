use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::GraphRepository;
use super::rows::{self, now_millis};
use crate::entity::{ContentType, Entity, EntityId, NoteFragment, Observation, RelationDraft};
use crate::error::RepositoryError;
use crate::markdown::permalink::{
    derive_permalink, file_stem, normalize_permalink, permalink_candidates,
};
use crate::search;

/// Everything needed to apply one file to the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct FileSnapshot {
    /// Project-relative path.
    pub file_path: String,
    /// Checksum of the bytes the fragment was parsed from.
    pub checksum: String,
    /// Markdown or opaque.
    pub content_type: ContentType,
    /// Parsed graph content.
    pub fragment: NoteFragment,
    /// Text for the full-text index.
    pub search_text: String,
}

/// What [`GraphRepository::upsert_file`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new entity was inserted.
    Created(EntityId),
    /// An existing entity was updated in place.
    Updated(EntityId),
}

impl UpsertOutcome {
    /// The affected entity.
    #[must_use]
    pub fn id(self) -> EntityId {
        match self {
            Self::Created(id) | Self::Updated(id) => id,
        }
    }
}

fn constraint(err: rusqlite::Error) -> RepositoryError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            RepositoryError::ConstraintViolation(
                message.clone().unwrap_or_else(|| failure.to_string()),
            )
        }
        _ => RepositoryError::Database(err),
    }
}

fn permalink_owner(conn: &Connection, permalink: &str) -> Result<Option<EntityId>, RepositoryError> {
    Ok(conn
        .query_row(
            "SELECT id FROM entity WHERE permalink = ?1",
            params![permalink],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .map(EntityId))
}

fn unique_derived_permalink(
    conn: &Connection,
    file_path: &str,
    owner: Option<EntityId>,
) -> Result<String, RepositoryError> {
    let base = derive_permalink(file_path);
    for candidate in permalink_candidates(&base) {
        match permalink_owner(conn, &candidate)? {
            None => return Ok(candidate),
            Some(id) if Some(id) == owner => return Ok(candidate),
            Some(_) => {}
        }
    }
    Err(RepositoryError::ConstraintViolation(format!(
        "no free permalink for {file_path}"
    )))
}

/// Pick `(permalink, explicit)` for a file being created or updated.
fn choose_permalink(
    conn: &Connection,
    fragment: &NoteFragment,
    file_path: &str,
    current: Option<&Entity>,
) -> Result<(String, bool), RepositoryError> {
    let owner = current.map(|entity| entity.id);
    if let Some(raw) = fragment.permalink.as_deref() {
        let permalink = normalize_permalink(raw);
        if let Some(other) = permalink_owner(conn, &permalink)?
            && Some(other) != owner
        {
            return Err(RepositoryError::ConstraintViolation(format!(
                "permalink '{permalink}' is already used by entity {other}"
            )));
        }
        return Ok((permalink, true));
    }
    match current {
        Some(entity) if !entity.permalink_explicit => Ok((entity.permalink.clone(), false)),
        _ => Ok((unique_derived_permalink(conn, file_path, owner)?, false)),
    }
}

fn search_tags(fragment: &NoteFragment) -> Vec<String> {
    let mut tags: Vec<String> = fragment.tags.clone();
    for observation in &fragment.observations {
        for tag in &observation.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
    }
    tags
}

fn insert_observations(
    conn: &Connection,
    entity_id: EntityId,
    observations: &[Observation],
) -> Result<(), RepositoryError> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO observation (entity_id, position, category, content, tags_json, context) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, observation) in (0i64..).zip(observations) {
        stmt.execute(params![
            entity_id.0,
            position,
            observation.category,
            observation.content,
            serde_json::to_string(&observation.tags)?,
            observation.context,
        ])?;
    }
    Ok(())
}

/// Replace observations only when they differ from what is stored.
fn sync_observations(
    conn: &Connection,
    entity_id: EntityId,
    observations: &[Observation],
) -> Result<bool, RepositoryError> {
    if rows::load_observations(conn, entity_id)? == observations {
        return Ok(false);
    }
    conn.execute(
        "DELETE FROM observation WHERE entity_id = ?1",
        params![entity_id.0],
    )?;
    insert_observations(conn, entity_id, observations)?;
    Ok(true)
}

/// Distinct drafts keyed by `(relation_type, target)`, first occurrence wins.
fn dedup_drafts(drafts: &[RelationDraft]) -> Vec<&RelationDraft> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    drafts
        .iter()
        .filter(|d| seen.insert((d.relation_type.as_str(), d.target.as_str())))
        .collect()
}

/// Diff stored outgoing relations against `drafts` by `(type, target name)`.
/// Kept rows retain their resolution; new rows start unresolved and are
/// picked up by the resolution sweep.
fn sync_relations(
    conn: &Connection,
    entity_id: EntityId,
    drafts: &[RelationDraft],
) -> Result<usize, RepositoryError> {
    struct Stored {
        id: i64,
        context: Option<String>,
        position: i64,
    }

    let mut stmt = conn.prepare_cached(
        "SELECT id, relation_type, to_name, context, position FROM relation WHERE from_id = ?1",
    )?;
    let mut stored: HashMap<(String, String), Stored> = stmt
        .query_map(params![entity_id.0], |row| {
            Ok((
                (row.get::<_, String>(1)?, row.get::<_, String>(2)?),
                Stored {
                    id: row.get(0)?,
                    context: row.get(3)?,
                    position: row.get(4)?,
                },
            ))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;

    let desired = dedup_drafts(drafts);
    let mut writes = 0usize;

    let wanted: HashSet<(&str, &str)> = desired
        .iter()
        .map(|d| (d.relation_type.as_str(), d.target.as_str()))
        .collect();
    let mut stale: Vec<i64> = stored
        .iter()
        .filter(|((kind, name), _)| !wanted.contains(&(kind.as_str(), name.as_str())))
        .map(|(_, row)| row.id)
        .collect();
    stale.sort_unstable();
    for id in stale {
        release_aliases(conn, "id = ?1", id)?;
        conn.execute("DELETE FROM relation WHERE id = ?1", params![id])?;
        writes += 1;
    }

    for (position, draft) in (0i64..).zip(desired) {
        let key = (draft.relation_type.clone(), draft.target.clone());
        match stored.remove(&key) {
            Some(row) if row.context == draft.context && row.position == position => {}
            Some(row) => {
                conn.execute(
                    "UPDATE relation SET context = ?1, position = ?2 WHERE id = ?3",
                    params![draft.context, position, row.id],
                )?;
                writes += 1;
            }
            None => {
                conn.execute(
                    "INSERT INTO relation (from_id, to_id, to_name, relation_type, context, position) \
                     VALUES (?1, NULL, ?2, ?3, ?4, ?5)",
                    params![
                        entity_id.0,
                        draft.target,
                        draft.relation_type,
                        draft.context,
                        position
                    ],
                )
                .map_err(constraint)?;
                writes += 1;
            }
        }
    }
    Ok(writes)
}

fn upsert_record(
    conn: &Connection,
    file_path: &str,
    checksum: &str,
    entity_id: EntityId,
) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO sync_record (file_path, checksum, entity_id) VALUES (?1, ?2, ?3) \
         ON CONFLICT(file_path) DO UPDATE SET checksum = excluded.checksum, entity_id = excluded.entity_id",
        params![file_path, checksum, entity_id.0],
    )?;
    Ok(())
}

/// Make aliases of the relations selected by `filter` (over the kept
/// relation's columns) forward references of their own again.
fn release_aliases(conn: &Connection, filter: &str, param: i64) -> Result<usize, RepositoryError> {
    let sql = format!(
        "UPDATE relation SET merged_into = NULL WHERE merged_into IN \
         (SELECT id FROM relation WHERE {filter})"
    );
    Ok(conn.execute(&sql, params![param])?)
}

/// Turn relations pointing at `entity_id` back into forward references,
/// together with any names that were merged into them.
fn unresolve_incoming(conn: &Connection, entity_id: EntityId) -> Result<usize, RepositoryError> {
    let released = release_aliases(conn, "to_id = ?1", entity_id.0)?;
    // An identical forward reference may already exist; keep that one.
    let merged = conn.execute(
        "DELETE FROM relation WHERE to_id = ?1 AND from_id != ?1 AND EXISTS ( \
           SELECT 1 FROM relation AS pending WHERE pending.to_id IS NULL \
             AND pending.from_id = relation.from_id \
             AND pending.relation_type = relation.relation_type \
             AND pending.to_name = relation.to_name \
             AND pending.merged_into IS NULL)",
        params![entity_id.0],
    )?;
    let reverted = conn.execute(
        "UPDATE relation SET to_id = NULL WHERE to_id = ?1 AND from_id != ?1",
        params![entity_id.0],
    )?;
    Ok(released + merged + reverted)
}

impl GraphRepository {
    /// Create or update the entity backing `snapshot.file_path`, replacing
    /// its observations and relations, its search row and its sync record in
    /// one transaction. An existing entity keeps its id and (unless the
    /// frontmatter sets one) its permalink.
    ///
    /// # Errors
    /// `ConstraintViolation` when an explicit permalink is taken; nothing is
    /// written in that case.
    pub fn upsert_file(&self, snapshot: &FileSnapshot) -> Result<UpsertOutcome, RepositoryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let current = rows::entity_where(&tx, "file_path", &snapshot.file_path.as_str())?;
        let fragment = &snapshot.fragment;
        let (permalink, explicit) =
            choose_permalink(&tx, fragment, &snapshot.file_path, current.as_ref())?;
        let now = now_millis();
        let tags_json = serde_json::to_string(&fragment.tags)?;
        let metadata_json = serde_json::to_string(&fragment.metadata)?;

        let outcome = if let Some(entity) = current {
            tx.execute(
                "UPDATE entity SET title = ?1, entity_type = ?2, permalink = ?3, \
                 permalink_explicit = ?4, content_type = ?5, checksum = ?6, tags_json = ?7, \
                 metadata_json = ?8, updated_at_ms = ?9 WHERE id = ?10",
                params![
                    fragment.title,
                    fragment.entity_type,
                    permalink,
                    explicit,
                    snapshot.content_type.as_str(),
                    snapshot.checksum,
                    tags_json,
                    metadata_json,
                    now,
                    entity.id.0
                ],
            )
            .map_err(constraint)?;
            sync_observations(&tx, entity.id, &fragment.observations)?;
            sync_relations(&tx, entity.id, &fragment.relations)?;
            UpsertOutcome::Updated(entity.id)
        } else {
            tx.execute(
                "INSERT INTO entity (title, entity_type, permalink, permalink_explicit, file_path, \
                 content_type, checksum, tags_json, metadata_json, created_at_ms, updated_at_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    fragment.title,
                    fragment.entity_type,
                    permalink,
                    explicit,
                    snapshot.file_path,
                    snapshot.content_type.as_str(),
                    snapshot.checksum,
                    tags_json,
                    metadata_json,
                    now
                ],
            )
            .map_err(constraint)?;
            let id = EntityId(tx.last_insert_rowid());
            insert_observations(&tx, id, &fragment.observations)?;
            sync_relations(&tx, id, &fragment.relations)?;
            UpsertOutcome::Created(id)
        };

        let id = outcome.id();
        search::index_entity(
            &tx,
            id,
            &fragment.title,
            &snapshot.search_text,
            &search_tags(fragment),
            &permalink,
        )?;
        upsert_record(&tx, &snapshot.file_path, &snapshot.checksum, id)?;
        tx.commit()?;
        debug!(path = %snapshot.file_path, id = %id, ?outcome, "entity upserted");
        Ok(outcome)
    }

    /// Re-point the entity at `from` to `to`, keeping its id, observations
    /// and relations. A path-derived permalink follows the move when
    /// `update_permalink` is set; explicit permalinks never change.
    ///
    /// # Errors
    /// `NotFound` when nothing is recorded at `from`, `ConstraintViolation`
    /// when `to` is already tracked.
    pub fn move_file(
        &self,
        from: &str,
        to: &str,
        update_permalink: bool,
    ) -> Result<EntityId, RepositoryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let entity = rows::entity_where(&tx, "file_path", &from)?
            .ok_or_else(|| RepositoryError::NotFound(from.to_string()))?;
        if rows::entity_where(&tx, "file_path", &to)?.is_some() {
            return Err(RepositoryError::ConstraintViolation(format!(
                "{to} is already tracked"
            )));
        }

        let permalink = if update_permalink && !entity.permalink_explicit {
            unique_derived_permalink(&tx, to, Some(entity.id))?
        } else {
            entity.permalink.clone()
        };
        // Opaque files are titled by their name, which just changed.
        let title = match entity.content_type {
            ContentType::Binary => file_stem(to).to_string(),
            ContentType::Markdown => entity.title.clone(),
        };

        tx.execute(
            "UPDATE entity SET file_path = ?1, permalink = ?2, title = ?3, updated_at_ms = ?4 \
             WHERE id = ?5",
            params![to, permalink, title, now_millis(), entity.id.0],
        )
        .map_err(constraint)?;
        tx.execute(
            "DELETE FROM sync_record WHERE file_path = ?1",
            params![from],
        )?;
        upsert_record(&tx, to, &entity.checksum, entity.id)?;
        if permalink != entity.permalink || title != entity.title {
            search::update_identity(&tx, entity.id, &title, &permalink)?;
        }
        tx.commit()?;
        debug!(from, to, id = %entity.id, "entity moved");
        Ok(entity.id)
    }

    /// Delete the entity at `file_path` with its observations and outgoing
    /// relations. Relations from other entities that pointed at it become
    /// forward references again.
    ///
    /// Returns the deleted id, or `None` when nothing was tracked there.
    ///
    /// # Errors
    /// `Database` on storage failures.
    pub fn delete_file(&self, file_path: &str) -> Result<Option<EntityId>, RepositoryError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let Some(entity) = rows::entity_where(&tx, "file_path", &file_path)? else {
            let removed = tx.execute(
                "DELETE FROM sync_record WHERE file_path = ?1",
                params![file_path],
            )?;
            if removed > 0 {
                tx.commit()?;
            }
            return Ok(None);
        };

        let reverted = unresolve_incoming(&tx, entity.id)?;
        tx.execute("DELETE FROM entity WHERE id = ?1", params![entity.id.0])?;
        tx.execute(
            "DELETE FROM sync_record WHERE file_path = ?1",
            params![file_path],
        )?;
        search::remove_entity(&tx, entity.id)?;
        tx.commit()?;
        debug!(path = file_path, id = %entity.id, reverted, "entity deleted");
        Ok(Some(entity.id))
    }
}
