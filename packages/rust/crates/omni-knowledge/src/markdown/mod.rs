//! Markdown note parsing and rendering.
//!
//! A note is an optional YAML frontmatter block followed by a body. The body
//! carries two kinds of structured lines, everything else is prose:
//!
//! ```text
//! - [category] content #tag (context)      observation
//! - relation_type [[Target]] (context)     relation
//! ```
//!
//! Bare `[[Target]]` links inside prose become implicit `links_to`
//! relations. Lines inside fenced code blocks are never interpreted.
//!
//! Modules:
//! - `frontmatter.rs`: YAML split / parse / render
//! - `lines.rs`: Observation and relation line grammar
//! - `links.rs`: Inline wikilink extraction (comrak AST)
//! - `permalink.rs`: Path-derived permalinks

mod frontmatter;
mod lines;
mod links;
pub mod permalink;

use regex::Regex;

use crate::entity::{
    DEFAULT_NOTE_TYPE, IMPLICIT_LINK_TYPE, NoteFragment, ParsedNote, RelationDraft,
};

pub use frontmatter::RESERVED_KEYS;

pub(crate) fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(_compile_err) => match Regex::new(r"$^") {
            Ok(fallback) => fallback,
            Err(fallback_err) => panic!("hardcoded fallback regex must compile: {fallback_err}"),
        },
    }
}

fn heading_title(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        line.trim()
            .strip_prefix("# ")
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .map(str::to_string)
    })
}

/// Parse a markdown note. `rel_path` supplies the fallback title.
///
/// Never fails: malformed frontmatter is reported in
/// [`ParsedNote::warnings`] and replaced by defaults.
#[must_use]
pub fn parse_note(text: &str, rel_path: &str) -> ParsedNote {
    let mut warnings = Vec::new();
    let (yaml, body) = frontmatter::split_frontmatter(text);
    let fm = yaml
        .map(|raw| frontmatter::parse_frontmatter(raw, &mut warnings))
        .unwrap_or_default();

    let title = fm
        .title
        .or_else(|| heading_title(body))
        .unwrap_or_else(|| permalink::file_stem(rel_path).to_string());

    let scan = lines::scan_lines(body);
    let mut relations = scan.relations;
    for target in links::extract_wikilinks(&scan.prose) {
        let exists = relations
            .iter()
            .any(|r| r.relation_type == IMPLICIT_LINK_TYPE && r.target == target);
        if !exists {
            relations.push(RelationDraft::new(IMPLICIT_LINK_TYPE, target));
        }
    }

    ParsedNote {
        fragment: NoteFragment {
            title,
            entity_type: fm
                .entity_type
                .unwrap_or_else(|| DEFAULT_NOTE_TYPE.to_string()),
            permalink: fm.permalink,
            tags: fm.tags,
            metadata: fm.metadata,
            observations: scan.observations,
            relations,
        },
        body: body.to_string(),
        warnings,
    }
}

/// Render a note in canonical layout: frontmatter, `# Title` (unless the
/// prose already has a top-level heading), prose, `## Observations`,
/// `## Relations`.
///
/// Structured lines already present in `body` are dropped and replaced by
/// the fragment's, so `render_markdown(&parsed.fragment, &parsed.body)`
/// rewrites a note without duplicating anything. Parsing the output yields
/// `fragment` again.
#[must_use]
pub fn render_markdown(fragment: &NoteFragment, body: &str) -> String {
    let mut out = String::from("---\n");
    out.push_str(&frontmatter::render_frontmatter(
        &fragment.title,
        &fragment.entity_type,
        fragment.permalink.as_deref(),
        &fragment.tags,
        &fragment.metadata,
    ));
    out.push_str("---\n\n");

    let prose = lines::strip_structured_lines(body);
    if heading_title(&prose).is_none() {
        out.push_str("# ");
        out.push_str(&fragment.title);
        out.push_str("\n\n");
    }
    if !prose.trim().is_empty() {
        out.push_str(prose.trim_start_matches('\n'));
        out.push_str("\n\n");
    }

    if !fragment.observations.is_empty() {
        out.push_str(lines::OBSERVATIONS_HEADING);
        out.push('\n');
        for observation in &fragment.observations {
            out.push_str(&lines::render_observation(observation));
            out.push('\n');
        }
        out.push('\n');
    }

    if !fragment.relations.is_empty() {
        out.push_str(lines::RELATIONS_HEADING);
        out.push('\n');
        for relation in &fragment.relations {
            out.push_str(&lines::render_relation(relation));
            out.push('\n');
        }
        out.push('\n');
    }

    while out.ends_with("\n\n") {
        out.pop();
    }
    out
}
