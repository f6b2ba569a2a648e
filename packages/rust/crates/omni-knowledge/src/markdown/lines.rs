use regex::Regex;
use std::sync::LazyLock;

use super::compile_regex;
use crate::entity::{Observation, RelationDraft};

static OBSERVATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^\s*[-*+]\s+\[([^\[\]]+)\]\s+(.+?)\s*$"));
static RELATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex(r"^\s*[-*+]\s+([^\[\]\s#][^\[\]#]*?)\s*\[\[([^\[\]]+)\]\](?:\s*\(([^()]*)\))?\s*$")
});
static CONTEXT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"\s*\(([^()]*)\)\s*$"));
static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"(?:^|\s)#([\p{L}\p{N}_/\-]+)"));

pub(crate) const OBSERVATIONS_HEADING: &str = "## Observations";
pub(crate) const RELATIONS_HEADING: &str = "## Relations";

/// Observations, relations and the body with relation lines blanked out.
#[derive(Debug, Default)]
pub(super) struct LineScan {
    pub observations: Vec<Observation>,
    pub relations: Vec<RelationDraft>,
    /// Body with relation lines removed, for inline link extraction.
    pub prose: String,
}

/// Tracks fenced code blocks (``` and ~~~).
#[derive(Debug, Default)]
struct FenceState {
    open: Option<(char, usize)>,
}

impl FenceState {
    /// Feed one line; returns true when the line is part of a fence
    /// (including the delimiters).
    fn consume(&mut self, line: &str) -> bool {
        let trimmed = line.trim_start();
        let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~');
        let run = marker.map_or(0, |c| trimmed.chars().take_while(|x| *x == c).count());
        match (self.open, marker) {
            (None, Some(c)) if run >= 3 => {
                self.open = Some((c, run));
                true
            }
            (Some((c, len)), Some(m)) if m == c && run >= len && trimmed[run..].trim().is_empty() => {
                self.open = None;
                true
            }
            (Some(_), _) => true,
            _ => false,
        }
    }
}

fn is_checkbox(category: &str) -> bool {
    let trimmed = category.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("x")
}

fn split_context(text: &str) -> (&str, Option<String>) {
    match CONTEXT_REGEX.captures(text) {
        Some(caps) => {
            let start = caps.get(0).map_or(text.len(), |m| m.start());
            let context = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .filter(|c| !c.is_empty());
            (&text[..start], context)
        }
        None => (text, None),
    }
}

fn parse_observation(line: &str) -> Option<Observation> {
    let caps = OBSERVATION_REGEX.captures(line)?;
    let category = caps.get(1)?.as_str();
    if is_checkbox(category) {
        return None;
    }
    let (text, context) = split_context(caps.get(2)?.as_str());

    let mut tags: Vec<String> = Vec::new();
    for cap in TAG_REGEX.captures_iter(text) {
        if let Some(tag) = cap.get(1).map(|m| m.as_str().to_string())
            && !tags.contains(&tag)
        {
            tags.push(tag);
        }
    }
    let content = TAG_REGEX
        .replace_all(text, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if content.is_empty() {
        return None;
    }
    Some(Observation {
        category: category.trim().to_string(),
        content,
        tags,
        context,
    })
}

fn parse_relation(line: &str) -> Option<RelationDraft> {
    let caps = RELATION_REGEX.captures(line)?;
    let relation_type = caps.get(1)?.as_str().trim();
    let raw_target = caps.get(2)?.as_str();
    let target = raw_target
        .split_once('|')
        .map_or(raw_target, |(left, _alias)| left)
        .trim();
    if relation_type.is_empty() || target.is_empty() {
        return None;
    }
    Some(RelationDraft {
        relation_type: relation_type.to_string(),
        target: target.to_string(),
        context: caps
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .filter(|c| !c.is_empty()),
    })
}

/// Extract structured lines, skipping fenced code.
pub(super) fn scan_lines(body: &str) -> LineScan {
    let mut scan = LineScan::default();
    let mut fence = FenceState::default();
    let mut prose_lines: Vec<&str> = Vec::new();
    for line in body.lines() {
        if fence.consume(line) {
            prose_lines.push(line);
            continue;
        }
        if let Some(observation) = parse_observation(line) {
            scan.observations.push(observation);
            prose_lines.push(line);
        } else if let Some(relation) = parse_relation(line) {
            let duplicate = scan.relations.iter().any(|existing| {
                existing.relation_type == relation.relation_type
                    && existing.target == relation.target
            });
            if !duplicate {
                scan.relations.push(relation);
            }
            prose_lines.push("");
        } else {
            prose_lines.push(line);
        }
    }
    scan.prose = prose_lines.join("\n");
    scan
}

/// Remove observation/relation lines and their section headings, leaving the
/// free prose that [`super::render_markdown`] writes before its sections.
pub(super) fn strip_structured_lines(body: &str) -> String {
    let mut fence = FenceState::default();
    let mut kept: Vec<&str> = Vec::new();
    for line in body.lines() {
        if fence.consume(line) {
            kept.push(line);
            continue;
        }
        let trimmed = line.trim();
        if trimmed == OBSERVATIONS_HEADING
            || trimmed == RELATIONS_HEADING
            || parse_observation(line).is_some()
            || parse_relation(line).is_some()
        {
            continue;
        }
        kept.push(line);
    }

    // Collapse the blank runs left behind.
    let mut out: Vec<&str> = Vec::new();
    for line in kept {
        if line.trim().is_empty() && out.last().is_none_or(|prev| prev.trim().is_empty()) {
            continue;
        }
        out.push(line);
    }
    while out.last().is_some_and(|line| line.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Render one observation line.
pub(super) fn render_observation(observation: &Observation) -> String {
    let mut line = format!("- [{}] {}", observation.category, observation.content);
    for tag in &observation.tags {
        line.push_str(" #");
        line.push_str(tag);
    }
    if let Some(context) = &observation.context {
        line.push_str(&format!(" ({context})"));
    }
    line
}

/// Render one relation line.
pub(super) fn render_relation(relation: &RelationDraft) -> String {
    let mut line = format!("- {} [[{}]]", relation.relation_type, relation.target);
    if let Some(context) = &relation.context {
        line.push_str(&format!(" ({context})"));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_with_tags_and_context() {
        let obs = parse_observation("- [idea] Use SQLite #storage #fts (decided 2024)").unwrap();
        assert_eq!(obs.category, "idea");
        assert_eq!(obs.content, "Use SQLite");
        assert_eq!(obs.tags, vec!["storage", "fts"]);
        assert_eq!(obs.context.as_deref(), Some("decided 2024"));
    }

    #[test]
    fn test_checkboxes_are_not_observations() {
        assert!(parse_observation("- [ ] todo item").is_none());
        assert!(parse_observation("- [x] done item").is_none());
        assert!(parse_observation("- [X] done item").is_none());
        assert!(parse_observation("- [[Beta]] plain link").is_none());
    }

    #[test]
    fn test_hash_inside_word_is_not_a_tag() {
        let obs = parse_observation("- [lang] C# and F# are fine").unwrap();
        assert!(obs.tags.is_empty());
        assert_eq!(obs.content, "C# and F# are fine");
    }

    #[test]
    fn test_relation_lines() {
        let rel = parse_relation("- relates_to [[Beta]]").unwrap();
        assert_eq!(rel.relation_type, "relates_to");
        assert_eq!(rel.target, "Beta");
        assert!(rel.context.is_none());

        let rel = parse_relation("* depends on [[Gamma|the gamma note]] (since v2)").unwrap();
        assert_eq!(rel.relation_type, "depends on");
        assert_eq!(rel.target, "Gamma");
        assert_eq!(rel.context.as_deref(), Some("since v2"));

        assert!(parse_relation("- [[Beta]]").is_none());
        assert!(parse_relation("- see [[Beta]] and more text").is_none());
    }

    #[test]
    fn test_fenced_code_is_skipped() {
        let body = "- [a] real\n```\n- [b] in code\n- uses [[Nope]]\n```\n- uses [[Yes]]\n";
        let scan = scan_lines(body);
        assert_eq!(scan.observations.len(), 1);
        assert_eq!(scan.relations.len(), 1);
        assert_eq!(scan.relations[0].target, "Yes");
        assert!(!scan.prose.contains("[[Yes]]"));
        assert!(scan.prose.contains("[[Nope]]"));
    }

    #[test]
    fn test_duplicate_relations_collapse() {
        let scan = scan_lines("- uses [[A]]\n- uses [[A]] (again)\n- cites [[A]]\n");
        assert_eq!(scan.relations.len(), 2);
    }

    #[test]
    fn test_strip_structured_lines() {
        let body = "# Alpha\n\nSome prose.\n\n## Observations\n- [a] one\n\n## Relations\n- uses [[B]]\n";
        assert_eq!(strip_structured_lines(body), "# Alpha\n\nSome prose.");
    }

    #[test]
    fn test_render_lines_reparse() {
        let obs = Observation {
            category: "fact".into(),
            content: "Water boils".into(),
            tags: vec!["physics".into()],
            context: Some("at sea level".into()),
        };
        assert_eq!(parse_observation(&render_observation(&obs)), Some(obs));

        let rel = RelationDraft {
            relation_type: "part_of".into(),
            target: "Chemistry".into(),
            context: Some("intro".into()),
        };
        assert_eq!(parse_relation(&render_relation(&rel)), Some(rel));
    }
}
