//! Entity types for the knowledge graph.
//!
//! One [`Entity`] per tracked file. Markdown files carry [`Observation`]s and
//! outgoing [`Relation`]s; opaque files carry neither.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stable entity identifier (SQLite rowid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a file's content is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Parsed for frontmatter, observations and relations.
    #[default]
    Markdown,
    /// Tracked by path and checksum only.
    Binary,
}

impl ContentType {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Binary => "binary",
        }
    }

    /// Parse the storage representation; unknown values are treated as binary.
    #[must_use]
    pub fn from_db(raw: &str) -> Self {
        if raw == "markdown" {
            Self::Markdown
        } else {
            Self::Binary
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A frontmatter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Boolean scalar.
    Bool(bool),
    /// Any numeric scalar.
    Number(f64),
    /// Text scalar.
    String(String),
    /// Sequence of scalars, stringified.
    List(Vec<String>),
}

impl MetadataValue {
    /// The value as text, when it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered frontmatter metadata (keys other than title/type/permalink/tags).
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A categorized fact written as `- [category] content #tag (context)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Text between the square brackets.
    pub category: String,
    /// Fact text without tags and context.
    pub content: String,
    /// `#tags` found in the line, in order of appearance.
    pub tags: Vec<String>,
    /// Trailing parenthesized context.
    pub context: Option<String>,
}

impl Observation {
    /// Observation without tags or context.
    #[must_use]
    pub fn new(category: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            content: content.into(),
            tags: Vec::new(),
            context: None,
        }
    }
}

/// Relation type used for bare inline `[[links]]`.
pub const IMPLICIT_LINK_TYPE: &str = "links_to";

/// A relation as written in a note: `- relation_type [[Target]] (context)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDraft {
    /// Relation keyword.
    pub relation_type: String,
    /// Target as written between `[[` and `]]`.
    pub target: String,
    /// Trailing parenthesized context.
    pub context: Option<String>,
}

impl RelationDraft {
    /// Draft without context.
    #[must_use]
    pub fn new(relation_type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            relation_type: relation_type.into(),
            target: target.into(),
            context: None,
        }
    }
}

/// Where a stored relation points.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RelationTarget {
    /// Target entity exists.
    Resolved(EntityId),
    /// Forward reference by name.
    Unresolved(String),
}

impl RelationTarget {
    /// Resolved target id, if any.
    #[must_use]
    pub fn entity_id(&self) -> Option<EntityId> {
        match self {
            Self::Resolved(id) => Some(*id),
            Self::Unresolved(_) => None,
        }
    }

    /// Whether this is a forward reference.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Unresolved(_))
    }
}

/// A persisted relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Row id.
    pub id: i64,
    /// Owning (source) entity.
    pub from_id: EntityId,
    /// Relation keyword.
    pub relation_type: String,
    /// Resolved id or forward reference.
    pub target: RelationTarget,
    /// Target name as written in the source note.
    pub to_name: String,
    /// Optional context.
    pub context: Option<String>,
}

/// The graph content parsed from one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteFragment {
    /// Display title.
    pub title: String,
    /// Free-form type (`type:` frontmatter key).
    pub entity_type: String,
    /// Explicit `permalink:` frontmatter value, if any.
    pub permalink: Option<String>,
    /// Frontmatter tags, sorted and deduplicated.
    pub tags: Vec<String>,
    /// Remaining frontmatter keys.
    pub metadata: Metadata,
    /// Observations in document order.
    pub observations: Vec<Observation>,
    /// Explicit relations in document order, then implicit links.
    pub relations: Vec<RelationDraft>,
}

/// Default `entity_type` for markdown notes.
pub const DEFAULT_NOTE_TYPE: &str = "note";
/// `entity_type` for opaque files.
pub const FILE_ENTITY_TYPE: &str = "file";

impl NoteFragment {
    /// Empty note fragment with the given title.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            entity_type: DEFAULT_NOTE_TYPE.to_string(),
            permalink: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
            observations: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Fragment for an opaque file: title only.
    #[must_use]
    pub fn opaque(file_name: impl Into<String>) -> Self {
        Self {
            entity_type: FILE_ENTITY_TYPE.to_string(),
            ..Self::new(file_name)
        }
    }
}

/// Result of parsing one markdown file.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNote {
    /// Graph content.
    pub fragment: NoteFragment,
    /// Text after the frontmatter block.
    pub body: String,
    /// Recoverable problems (e.g. malformed frontmatter).
    pub warnings: Vec<String>,
}

/// A persisted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier.
    pub id: EntityId,
    /// Display title.
    pub title: String,
    /// Free-form type.
    pub entity_type: String,
    /// URL-safe identifier, unique within the project.
    pub permalink: String,
    /// Whether the permalink came from frontmatter.
    pub permalink_explicit: bool,
    /// Project-relative path with forward slashes.
    pub file_path: String,
    /// Markdown or opaque.
    pub content_type: ContentType,
    /// Last applied checksum.
    pub checksum: String,
    /// Frontmatter tags.
    pub tags: Vec<String>,
    /// Remaining frontmatter keys.
    pub metadata: Metadata,
    /// First time the file was seen.
    pub created_at: DateTime<Utc>,
    /// Last applied change.
    pub updated_at: DateTime<Utc>,
}

/// An entity with everything attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The entity row.
    pub entity: Entity,
    /// Observations in document order.
    pub observations: Vec<Observation>,
    /// Relations owned by this entity.
    pub outgoing: Vec<Relation>,
    /// Resolved relations pointing at this entity.
    pub incoming: Vec<Relation>,
}

/// Graph statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    /// Number of entities.
    pub entities: usize,
    /// Number of observations.
    pub observations: usize,
    /// Number of relations.
    pub relations: usize,
    /// Relations still waiting for their target.
    pub unresolved_relations: usize,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Project-relative path.
    pub path: String,
    /// Last path segment.
    pub name: String,
    /// Whether this entry is a directory (derived from tracked files).
    pub is_dir: bool,
    /// Entity backing a file entry.
    pub entity_id: Option<EntityId>,
    /// Title of the backing entity.
    pub title: Option<String>,
}
