use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::entity::{
    ContentType, Entity, EntityId, Metadata, Observation, Relation, RelationTarget,
};
use crate::error::RepositoryError;

pub(super) const ENTITY_COLUMNS: &str = "id, title, entity_type, permalink, permalink_explicit, \
     file_path, content_type, checksum, tags_json, metadata_json, created_at_ms, updated_at_ms";

pub(super) const RELATION_COLUMNS: &str =
    "id, from_id, to_id, to_name, relation_type, context";

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Raw entity row; JSON columns are decoded outside the rusqlite closure.
pub(super) struct EntityRow {
    id: i64,
    title: String,
    entity_type: String,
    permalink: String,
    permalink_explicit: bool,
    file_path: String,
    content_type: String,
    checksum: String,
    tags_json: String,
    metadata_json: String,
    created_at_ms: i64,
    updated_at_ms: i64,
}

impl EntityRow {
    pub(super) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            entity_type: row.get(2)?,
            permalink: row.get(3)?,
            permalink_explicit: row.get(4)?,
            file_path: row.get(5)?,
            content_type: row.get(6)?,
            checksum: row.get(7)?,
            tags_json: row.get(8)?,
            metadata_json: row.get(9)?,
            created_at_ms: row.get(10)?,
            updated_at_ms: row.get(11)?,
        })
    }

    pub(super) fn into_entity(self) -> Result<Entity, RepositoryError> {
        let tags: Vec<String> = serde_json::from_str(&self.tags_json)?;
        let metadata: Metadata = serde_json::from_str(&self.metadata_json)?;
        Ok(Entity {
            id: EntityId(self.id),
            title: self.title,
            entity_type: self.entity_type,
            permalink: self.permalink,
            permalink_explicit: self.permalink_explicit,
            file_path: self.file_path,
            content_type: ContentType::from_db(&self.content_type),
            checksum: self.checksum,
            tags,
            metadata,
            created_at: millis_to_datetime(self.created_at_ms),
            updated_at: millis_to_datetime(self.updated_at_ms),
        })
    }
}

/// Fetch at most one entity matching `column = value`.
pub(super) fn entity_where(
    conn: &Connection,
    column: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<Entity>, RepositoryError> {
    let sql = format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE {column} = ?1");
    conn.query_row(&sql, [value], EntityRow::from_row)
        .optional()?
        .map(EntityRow::into_entity)
        .transpose()
}

pub(super) fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<Relation> {
    let to_id: Option<i64> = row.get(2)?;
    let to_name: String = row.get(3)?;
    Ok(Relation {
        id: row.get(0)?,
        from_id: EntityId(row.get(1)?),
        relation_type: row.get(4)?,
        target: match to_id {
            Some(id) => RelationTarget::Resolved(EntityId(id)),
            None => RelationTarget::Unresolved(to_name.clone()),
        },
        to_name,
        context: row.get(5)?,
    })
}

pub(super) fn load_observations(
    conn: &Connection,
    entity_id: EntityId,
) -> Result<Vec<Observation>, RepositoryError> {
    let mut stmt = conn.prepare_cached(
        "SELECT category, content, tags_json, context FROM observation \
         WHERE entity_id = ?1 ORDER BY position, id",
    )?;
    let raw = stmt
        .query_map(params![entity_id.0], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter()
        .map(|(category, content, tags_json, context)| {
            Ok(Observation {
                category,
                content,
                tags: serde_json::from_str(&tags_json)?,
                context,
            })
        })
        .collect()
}

pub(super) fn load_outgoing(
    conn: &Connection,
    entity_id: EntityId,
) -> Result<Vec<Relation>, RepositoryError> {
    let sql = format!(
        "SELECT {RELATION_COLUMNS} FROM relation WHERE from_id = ?1 AND merged_into IS NULL \
         ORDER BY position, id"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![entity_id.0], relation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(super) fn load_incoming(
    conn: &Connection,
    entity_id: EntityId,
) -> Result<Vec<Relation>, RepositoryError> {
    let sql =
        format!("SELECT {RELATION_COLUMNS} FROM relation WHERE to_id = ?1 ORDER BY from_id, id");
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![entity_id.0], relation_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
