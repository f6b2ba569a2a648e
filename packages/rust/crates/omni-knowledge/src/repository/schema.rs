use rusqlite::Connection;

use crate::error::RepositoryError;

/// Bumped when the layout changes incompatibly.
pub(crate) const SCHEMA_VERSION: i64 = 2;

pub(crate) fn init_schema(conn: &Connection) -> Result<(), RepositoryError> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;

        CREATE TABLE IF NOT EXISTS meta (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entity (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          title TEXT NOT NULL,
          entity_type TEXT NOT NULL,
          permalink TEXT NOT NULL UNIQUE,
          permalink_explicit INTEGER NOT NULL DEFAULT 0,
          file_path TEXT NOT NULL UNIQUE,
          content_type TEXT NOT NULL,
          checksum TEXT NOT NULL,
          tags_json TEXT NOT NULL DEFAULT '[]',
          metadata_json TEXT NOT NULL DEFAULT '{}',
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_entity_title ON entity(title COLLATE NOCASE);
        CREATE INDEX IF NOT EXISTS idx_entity_checksum ON entity(checksum);
        CREATE INDEX IF NOT EXISTS idx_entity_updated ON entity(updated_at_ms);

        CREATE TABLE IF NOT EXISTS observation (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          entity_id INTEGER NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
          position INTEGER NOT NULL,
          category TEXT NOT NULL,
          content TEXT NOT NULL,
          tags_json TEXT NOT NULL DEFAULT '[]',
          context TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_observation_entity ON observation(entity_id, position);

        -- to_id NULL = forward reference by to_name
        -- merged_into set = another name for that resolved relation
        CREATE TABLE IF NOT EXISTS relation (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          from_id INTEGER NOT NULL REFERENCES entity(id) ON DELETE CASCADE,
          to_id INTEGER REFERENCES entity(id) ON DELETE SET NULL,
          to_name TEXT NOT NULL,
          relation_type TEXT NOT NULL,
          context TEXT,
          position INTEGER NOT NULL DEFAULT 0,
          merged_into INTEGER
        );
        CREATE UNIQUE INDEX IF NOT EXISTS uq_relation_resolved
          ON relation(from_id, relation_type, to_id) WHERE to_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS uq_relation_unresolved
          ON relation(from_id, relation_type, to_name) WHERE to_id IS NULL;
        CREATE INDEX IF NOT EXISTS idx_relation_to ON relation(to_id);
        CREATE INDEX IF NOT EXISTS idx_relation_pending ON relation(to_id) WHERE to_id IS NULL;

        CREATE TABLE IF NOT EXISTS sync_record (
          file_path TEXT PRIMARY KEY,
          checksum TEXT NOT NULL,
          entity_id INTEGER REFERENCES entity(id) ON DELETE CASCADE
        );
        CREATE INDEX IF NOT EXISTS idx_sync_record_checksum ON sync_record(checksum);

        CREATE VIRTUAL TABLE IF NOT EXISTS search_index USING fts5(
          title,
          content,
          tags,
          permalink UNINDEXED,
          tokenize = 'unicode61 remove_diacritics 2'
        );
        ",
    )?;
    if !has_column(conn, "relation", "merged_into")? {
        conn.execute_batch("ALTER TABLE relation ADD COLUMN merged_into INTEGER;")?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_relation_merged ON relation(merged_into) \
         WHERE merged_into IS NOT NULL;",
    )?;
    conn.execute(
        "INSERT INTO meta(key, value) VALUES ('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, RepositoryError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_one_database_gains_alias_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE relation (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               from_id INTEGER NOT NULL,
               to_id INTEGER,
               to_name TEXT NOT NULL,
               relation_type TEXT NOT NULL,
               context TEXT,
               position INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
             INSERT INTO meta VALUES ('schema_version', '1');",
        )
        .unwrap();

        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert!(has_column(&conn, "relation", "merged_into").unwrap());
        let version: String = conn
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, "2");
    }
}
