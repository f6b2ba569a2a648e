//! Full-text search over entities (SQLite FTS5).
//!
//! The `search_index` table shares the graph database; rows are keyed by
//! entity id and written inside the same transaction as the entity itself.
//!
//! Query syntax accepted by [`SearchIndex::search`]:
//! - bare words, implicitly AND-ed; a trailing `*` makes a prefix match
//! - `"quoted phrases"`
//! - `AND`, `OR`, `NOT` (upper case) and parentheses
//! - `title:word` / `tags:word` (also with a quoted phrase) to scope a term
//!
//! Anything FTS5 would choke on (stray operators, unbalanced parentheses,
//! punctuation inside words) is cleaned up before the query reaches SQLite.

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use crate::entity::EntityId;
use crate::error::RepositoryError;
use crate::repository::GraphRepository;

/// Default page size.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// A search request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text.
    pub text: String,
    /// Restrict to these entity types (empty = all).
    pub entity_types: Vec<String>,
    /// Only entities updated at or after this instant.
    pub updated_after: Option<DateTime<Utc>>,
    /// Page size.
    pub limit: usize,
    /// Rows to skip.
    pub offset: usize,
}

impl SearchQuery {
    /// Query with default paging and no filters.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            entity_types: Vec::new(),
            updated_after: None,
            limit: DEFAULT_SEARCH_LIMIT,
            offset: 0,
        }
    }

    /// Restrict to an entity type; may be called repeatedly.
    #[must_use]
    pub fn with_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_types.push(entity_type.into());
        self
    }

    /// Restrict to recently updated entities.
    #[must_use]
    pub fn updated_after(mut self, since: DateTime<Utc>) -> Self {
        self.updated_after = Some(since);
        self
    }

    /// Set page size and offset.
    #[must_use]
    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matching entity.
    pub entity_id: EntityId,
    /// Entity title.
    pub title: String,
    /// Entity permalink.
    pub permalink: String,
    /// Backing file.
    pub file_path: String,
    /// Entity type.
    pub entity_type: String,
    /// Relevance, higher is better.
    pub score: f64,
    /// Content excerpt with matches wrapped in `[` `]`.
    pub snippet: String,
}

/// Read handle over the search index of one project.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    conn: Arc<Mutex<Connection>>,
}

impl SearchIndex {
    /// Search handle sharing `repository`'s connection.
    #[must_use]
    pub fn new(repository: &GraphRepository) -> Self {
        Self {
            conn: repository.shared_connection(),
        }
    }

    /// Run a ranked full-text query.
    ///
    /// Returns an empty list when the query has no searchable terms.
    ///
    /// # Errors
    /// `InvalidQuery` when FTS5 still rejects the cleaned query,
    /// `Database` on storage failures.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, RepositoryError> {
        let Some(expression) = prepare_query(&query.text) else {
            return Ok(Vec::new());
        };
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT e.id, e.title, e.permalink, e.file_path, e.entity_type, \
             bm25(search_index, 10.0, 1.0, 5.0, 0.0) AS score, \
             snippet(search_index, 1, '[', ']', '…', 12) \
             FROM search_index JOIN entity e ON e.id = search_index.rowid \
             WHERE search_index MATCH ?",
        );
        let mut values: Vec<Value> = vec![Value::Text(expression.clone())];
        if !query.entity_types.is_empty() {
            let marks = vec!["?"; query.entity_types.len()].join(", ");
            sql.push_str(&format!(" AND e.entity_type IN ({marks})"));
            values.extend(query.entity_types.iter().cloned().map(Value::Text));
        }
        if let Some(since) = query.updated_after {
            sql.push_str(" AND e.updated_at_ms >= ?");
            values.push(Value::Integer(since.timestamp_millis()));
        }
        sql.push_str(" ORDER BY score, e.id LIMIT ? OFFSET ?");
        values.push(Value::Integer(i64::try_from(query.limit).unwrap_or(i64::MAX)));
        values.push(Value::Integer(i64::try_from(query.offset).unwrap_or(i64::MAX)));

        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok(SearchHit {
                entity_id: EntityId(row.get(0)?),
                title: row.get(1)?,
                permalink: row.get(2)?,
                file_path: row.get(3)?,
                entity_type: row.get(4)?,
                score: -row.get::<_, f64>(5)?,
                snippet: row.get(6)?,
            })
        });
        let hits = rows
            .and_then(|mapped| mapped.collect::<Result<Vec<_>, _>>())
            .map_err(|err| invalid_query(err, &expression))?;
        Ok(hits)
    }
}

fn invalid_query(err: rusqlite::Error, expression: &str) -> RepositoryError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, Some(message))
            if failure.code == ErrorCode::Unknown && message.contains("fts5") =>
        {
            RepositoryError::InvalidQuery(format!("{expression}: {message}"))
        }
        _ => RepositoryError::Database(err),
    }
}

// ----------------------------------------------------------------------
// Index maintenance (called inside repository transactions)
// ----------------------------------------------------------------------

pub(crate) fn index_entity(
    conn: &Connection,
    id: EntityId,
    title: &str,
    content: &str,
    tags: &[String],
    permalink: &str,
) -> Result<(), RepositoryError> {
    remove_entity(conn, id)?;
    conn.execute(
        "INSERT INTO search_index (rowid, title, content, tags, permalink) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id.0, title, content, tags.join(" "), permalink],
    )?;
    Ok(())
}

pub(crate) fn update_identity(
    conn: &Connection,
    id: EntityId,
    title: &str,
    permalink: &str,
) -> Result<(), RepositoryError> {
    conn.execute(
        "UPDATE search_index SET title = ?1, permalink = ?2 WHERE rowid = ?3",
        params![title, permalink, id.0],
    )?;
    Ok(())
}

pub(crate) fn remove_entity(conn: &Connection, id: EntityId) -> Result<(), RepositoryError> {
    conn.execute("DELETE FROM search_index WHERE rowid = ?1", params![id.0])?;
    Ok(())
}

// ----------------------------------------------------------------------
// Query preparation
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Term(String),
    Op(&'static str),
    Open,
    Close,
}

fn quote(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

/// `word` or `word*` as an FTS5 string, `None` when nothing searchable remains.
fn term(raw: &str) -> Option<String> {
    let (body, prefix) = match raw.strip_suffix('*') {
        Some(body) => (body, true),
        None => (raw, false),
    };
    let body = body.trim_matches('*');
    if !body.chars().any(char::is_alphanumeric) {
        return None;
    }
    let quoted = quote(body);
    Some(if prefix { format!("{quoted}*") } else { quoted })
}

fn read_phrase(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut phrase = String::new();
    for c in chars.by_ref() {
        if c == '"' {
            break;
        }
        phrase.push(c);
    }
    phrase
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' => {
                chars.next();
                let phrase = read_phrase(&mut chars);
                if phrase.chars().any(char::is_alphanumeric) {
                    tokens.push(Token::Term(quote(phrase.trim())));
                }
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' {
                        break;
                    }
                    chars.next();
                    if c == '"' && word.ends_with(':') {
                        word.push('"');
                        word.push_str(&read_phrase(&mut chars));
                        break;
                    }
                    word.push(c);
                }
                tokens.extend(word_token(&word));
            }
        }
    }
    tokens
}

fn word_token(word: &str) -> Option<Token> {
    match word {
        "AND" => return Some(Token::Op("AND")),
        "OR" => return Some(Token::Op("OR")),
        "NOT" => return Some(Token::Op("NOT")),
        _ => {}
    }
    for column in ["title", "tags"] {
        if let Some(rest) = word.strip_prefix(column).and_then(|r| r.strip_prefix(':')) {
            let scoped = match rest.strip_prefix('"') {
                Some(phrase) if phrase.chars().any(char::is_alphanumeric) => {
                    Some(quote(phrase.trim()))
                }
                Some(_) => None,
                None => term(rest),
            };
            return scoped.map(|t| Token::Term(format!("{column} : {t}")));
        }
    }
    term(word).map(Token::Term)
}

/// Drop operators without operands and balance parentheses.
fn sanitize(tokens: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut depth = 0usize;
    for token in tokens {
        match token {
            Token::Term(_) => out.push(token),
            Token::Op(_) => {
                if matches!(out.last(), Some(Token::Term(_) | Token::Close)) {
                    out.push(token);
                }
            }
            Token::Open => {
                depth += 1;
                out.push(token);
            }
            Token::Close => {
                if depth == 0 {
                    continue;
                }
                while matches!(out.last(), Some(Token::Op(_))) {
                    out.pop();
                }
                depth -= 1;
                if matches!(out.last(), Some(Token::Open)) {
                    out.pop();
                } else {
                    out.push(Token::Close);
                }
            }
        }
    }
    loop {
        match out.last() {
            Some(Token::Op(_)) => {
                out.pop();
            }
            Some(Token::Open) => {
                out.pop();
                depth -= 1;
            }
            _ => break,
        }
    }
    out.extend(std::iter::repeat_n(Token::Close, depth));
    out
}

/// Turn user input into an FTS5 expression, `None` when nothing is searchable.
#[must_use]
pub fn prepare_query(raw: &str) -> Option<String> {
    let tokens = sanitize(tokenize(raw));
    if !tokens.iter().any(|t| matches!(t, Token::Term(_))) {
        return None;
    }
    let parts: Vec<String> = tokens
        .into_iter()
        .map(|token| match token {
            Token::Term(t) => t,
            Token::Op(op) => op.to_string(),
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
        })
        .collect();
    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ContentType, NoteFragment};
    use crate::repository::FileSnapshot;

    #[test]
    fn test_prepare_plain_and_operators() {
        assert_eq!(prepare_query("rust sync").as_deref(), Some("\"rust\" \"sync\""));
        assert_eq!(
            prepare_query("rust OR go").as_deref(),
            Some("\"rust\" OR \"go\"")
        );
        assert_eq!(
            prepare_query("alpha NOT beta").as_deref(),
            Some("\"alpha\" NOT \"beta\"")
        );
        assert_eq!(prepare_query("sync*").as_deref(), Some("\"sync\"*"));
    }

    #[test]
    fn test_prepare_phrases_and_fields() {
        assert_eq!(
            prepare_query("\"knowledge graph\" title:alpha").as_deref(),
            Some("\"knowledge graph\" title : \"alpha\"")
        );
        assert_eq!(
            prepare_query("tags:\"deep work\"").as_deref(),
            Some("tags : \"deep work\"")
        );
        assert_eq!(
            prepare_query("c++ node.js").as_deref(),
            Some("\"c++\" \"node.js\"")
        );
    }

    #[test]
    fn test_prepare_repairs_broken_input() {
        assert_eq!(prepare_query("AND rust OR").as_deref(), Some("\"rust\""));
        assert_eq!(
            prepare_query("(rust OR go").as_deref(),
            Some("( \"rust\" OR \"go\" )")
        );
        assert_eq!(prepare_query("rust ) ()").as_deref(), Some("\"rust\""));
        assert_eq!(prepare_query("NOT rust").as_deref(), Some("\"rust\""));
        assert_eq!(prepare_query("   "), None);
        assert_eq!(prepare_query("AND OR ( )"), None);
        assert_eq!(prepare_query("title:"), None);
    }

    fn add(repo: &GraphRepository, path: &str, title: &str, text: &str, tags: &[&str]) -> EntityId {
        let mut fragment = NoteFragment::new(title);
        fragment.tags = tags.iter().map(ToString::to_string).collect();
        repo.upsert_file(&FileSnapshot {
            file_path: path.to_string(),
            checksum: format!("sum-{path}"),
            content_type: ContentType::Markdown,
            fragment,
            search_text: text.to_string(),
        })
        .unwrap()
        .id()
    }

    #[test]
    fn test_search_ranks_title_matches_first() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let body_hit = add(&repo, "a.md", "Notes", "we discuss the tokio runtime here", &[]);
        let title_hit = add(&repo, "b.md", "Tokio", "scheduler details", &[]);
        let index = SearchIndex::new(&repo);

        let hits = index.search(&SearchQuery::new("tokio")).unwrap();
        let ids: Vec<EntityId> = hits.iter().map(|h| h.entity_id).collect();
        assert_eq!(ids, vec![title_hit, body_hit]);
        assert!(hits[1].snippet.contains("[tokio]"));
        assert_eq!(hits[0].permalink, "b");
    }

    #[test]
    fn test_search_field_scopes_and_filters() {
        let repo = GraphRepository::open_in_memory().unwrap();
        let tagged = add(&repo, "a.md", "Alpha", "plain text", &["rust"]);
        add(&repo, "b.md", "Beta", "rust in the body", &[]);
        let index = SearchIndex::new(&repo);

        let hits = index.search(&SearchQuery::new("tags:rust")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, tagged);

        let hits = index.search(&SearchQuery::new("title:beta OR title:alpha")).unwrap();
        assert_eq!(hits.len(), 2);

        assert!(index
            .search(&SearchQuery::new("rust").with_type("file"))
            .unwrap()
            .is_empty());
        let future = Utc::now() + chrono::Duration::days(1);
        assert!(index
            .search(&SearchQuery::new("rust").updated_after(future))
            .unwrap()
            .is_empty());
        assert_eq!(index.search(&SearchQuery::new("rust").page(1, 1)).unwrap().len(), 1);
    }

    #[test]
    fn test_index_follows_delete() {
        let repo = GraphRepository::open_in_memory().unwrap();
        add(&repo, "a.md", "Alpha", "unique marker", &[]);
        let index = SearchIndex::new(&repo);
        assert_eq!(index.search(&SearchQuery::new("marker")).unwrap().len(), 1);
        repo.delete_file("a.md").unwrap();
        assert!(index.search(&SearchQuery::new("marker")).unwrap().is_empty());
    }
}
