use regex::Regex;
use serde_yaml::Value;
use std::sync::LazyLock;

use super::compile_regex;
use crate::entity::{DEFAULT_NOTE_TYPE, Metadata, MetadataValue};

static FRONTMATTER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n(?:---|\.\.\.)[ \t]*(?:\r?\n|\z)"));

/// Keys with a dedicated field; everything else lands in [`Metadata`].
pub const RESERVED_KEYS: &[&str] = &["title", "type", "permalink", "tags"];

#[derive(Debug, Default)]
pub(super) struct Frontmatter {
    pub title: Option<String>,
    pub entity_type: Option<String>,
    pub permalink: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

/// Split `---` delimited YAML from the body. Returns `(yaml, body)`.
pub(super) fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(caps) = FRONTMATTER_REGEX.captures(content) else {
        return (None, content);
    };
    let body = caps.get(0).map_or(content, |m| &content[m.end()..]);
    (caps.get(1).map(|m| m.as_str()), body)
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(scalar_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn clean_tag(raw: &str) -> Option<String> {
    let tag = raw.trim().trim_start_matches('#').trim();
    (!tag.is_empty()).then(|| tag.to_string())
}

fn extract_tags(value: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = match value {
        Some(Value::String(s)) => s.split(',').filter_map(clean_tag).collect(),
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(scalar_to_string)
            .filter_map(|s| clean_tag(&s))
            .collect(),
        _ => Vec::new(),
    };
    out.sort();
    out.dedup();
    out
}

fn to_metadata_value(value: &Value) -> Option<MetadataValue> {
    match value {
        Value::Null | Value::Tagged(_) => None,
        Value::Bool(b) => Some(MetadataValue::Bool(*b)),
        Value::Number(n) => n.as_f64().map(MetadataValue::Number),
        Value::String(s) => Some(MetadataValue::String(s.clone())),
        Value::Sequence(seq) => Some(MetadataValue::List(
            seq.iter().filter_map(scalar_to_string).collect(),
        )),
        Value::Mapping(_) => serde_yaml::to_string(value)
            .ok()
            .map(|s| MetadataValue::String(s.trim_end().to_string())),
    }
}

/// Parse the YAML block. Problems are pushed to `warnings` and yield defaults.
pub(super) fn parse_frontmatter(raw: &str, warnings: &mut Vec<String>) -> Frontmatter {
    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(err) => {
            warnings.push(format!("invalid frontmatter: {err}"));
            return Frontmatter::default();
        }
    };
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => return Frontmatter::default(),
        _ => {
            warnings.push("frontmatter is not a key/value mapping".to_string());
            return Frontmatter::default();
        }
    };

    let mut out = Frontmatter {
        title: non_empty(mapping.get("title")),
        entity_type: non_empty(mapping.get("type")),
        permalink: non_empty(mapping.get("permalink")),
        tags: extract_tags(mapping.get("tags")),
        metadata: Metadata::new(),
    };
    for (key, value) in &mapping {
        let Some(key) = scalar_to_string(key) else {
            continue;
        };
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = to_metadata_value(value) {
            out.metadata.insert(key, value);
        }
    }
    out
}

/// Serialize the frontmatter block (without delimiters).
pub(super) fn render_frontmatter(
    title: &str,
    entity_type: &str,
    permalink: Option<&str>,
    tags: &[String],
    metadata: &Metadata,
) -> String {
    let mut mapping = serde_yaml::Mapping::new();
    mapping.insert("title".into(), Value::String(title.to_string()));
    let entity_type = if entity_type.trim().is_empty() {
        DEFAULT_NOTE_TYPE
    } else {
        entity_type
    };
    mapping.insert("type".into(), Value::String(entity_type.to_string()));
    if let Some(permalink) = permalink {
        mapping.insert("permalink".into(), Value::String(permalink.to_string()));
    }
    if !tags.is_empty() {
        mapping.insert(
            "tags".into(),
            Value::Sequence(tags.iter().cloned().map(Value::String).collect()),
        );
    }
    for (key, value) in metadata {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match value {
            MetadataValue::Bool(b) => Value::Bool(*b),
            MetadataValue::Number(n) => Value::Number((*n).into()),
            MetadataValue::String(s) => Value::String(s.clone()),
            MetadataValue::List(items) => {
                Value::Sequence(items.iter().cloned().map(Value::String).collect())
            }
        };
        mapping.insert(Value::String(key.clone()), value);
    }
    // Serializing a mapping of plain values cannot fail; fall back to the
    // title alone if it ever does.
    serde_yaml::to_string(&Value::Mapping(mapping))
        .unwrap_or_else(|_| format!("title: {title}\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frontmatter() {
        let (yaml, body) = split_frontmatter("---\ntitle: Alpha\n---\n# Body\n");
        assert_eq!(yaml, Some("title: Alpha"));
        assert_eq!(body, "# Body\n");

        let (yaml, body) = split_frontmatter("# No frontmatter\n");
        assert!(yaml.is_none());
        assert_eq!(body, "# No frontmatter\n");

        // Unterminated block is plain body.
        let (yaml, _) = split_frontmatter("---\ntitle: Alpha\n# Body\n");
        assert!(yaml.is_none());
    }

    #[test]
    fn test_parse_fields_and_metadata() {
        let mut warnings = Vec::new();
        let fm = parse_frontmatter(
            "title: Alpha\ntype: concept\ntags: [b, a, '#a']\nstatus: draft\npriority: 2\npinned: true\naliases: [x, 1]\nempty:",
            &mut warnings,
        );
        assert!(warnings.is_empty());
        assert_eq!(fm.title.as_deref(), Some("Alpha"));
        assert_eq!(fm.entity_type.as_deref(), Some("concept"));
        assert_eq!(fm.tags, vec!["a", "b"]);
        assert_eq!(
            fm.metadata.get("status"),
            Some(&MetadataValue::String("draft".into()))
        );
        assert_eq!(
            fm.metadata.get("priority"),
            Some(&MetadataValue::Number(2.0))
        );
        assert_eq!(fm.metadata.get("pinned"), Some(&MetadataValue::Bool(true)));
        assert_eq!(
            fm.metadata.get("aliases"),
            Some(&MetadataValue::List(vec!["x".into(), "1".into()]))
        );
        assert!(!fm.metadata.contains_key("empty"));
        assert!(!fm.metadata.contains_key("title"));
    }

    #[test]
    fn test_comma_separated_tags() {
        let mut warnings = Vec::new();
        let fm = parse_frontmatter("tags: rust, sync ,rust", &mut warnings);
        assert_eq!(fm.tags, vec!["rust", "sync"]);
    }

    #[test]
    fn test_malformed_yaml_degrades() {
        let mut warnings = Vec::new();
        let fm = parse_frontmatter("title: [unclosed", &mut warnings);
        assert_eq!(warnings.len(), 1);
        assert!(fm.title.is_none());

        let mut warnings = Vec::new();
        parse_frontmatter("- just\n- a list", &mut warnings);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_render_then_parse() {
        let mut metadata = Metadata::new();
        metadata.insert("status".into(), MetadataValue::String("true".into()));
        metadata.insert("score".into(), MetadataValue::Number(1.5));
        let yaml = render_frontmatter(
            "Alpha: the first",
            "concept",
            Some("notes/alpha"),
            &["x".to_string()],
            &metadata,
        );
        let mut warnings = Vec::new();
        let fm = parse_frontmatter(&yaml, &mut warnings);
        assert!(warnings.is_empty());
        assert_eq!(fm.title.as_deref(), Some("Alpha: the first"));
        assert_eq!(fm.permalink.as_deref(), Some("notes/alpha"));
        assert_eq!(fm.metadata, metadata);
    }
}
