use comrak::{Arena, Options, nodes::NodeValue, parse_document};

fn normalize_wikilink_target(raw: &str) -> Option<String> {
    let mut candidate = raw.trim();
    if let Some((left, _alias)) = candidate.split_once('|') {
        candidate = left.trim();
    }
    if let Some((left, _heading)) = candidate.split_once('#') {
        candidate = left.trim();
    }
    (!candidate.is_empty()).then(|| candidate.to_string())
}

/// Inline `[[wikilink]]` targets in document order, deduplicated.
///
/// Code spans and fenced blocks are ignored by construction: comrak does not
/// produce wikilink nodes inside them.
pub(super) fn extract_wikilinks(prose: &str) -> Vec<String> {
    let mut options = Options::default();
    options.extension.wikilinks_title_after_pipe = true;

    let arena = Arena::new();
    let root = parse_document(&arena, prose, &options);

    let mut out: Vec<String> = Vec::new();
    for node in root.descendants() {
        let data = node.data();
        let NodeValue::WikiLink(link) = &data.value else {
            continue;
        };
        if let Some(target) = normalize_wikilink_target(&link.url)
            && !out.contains(&target)
        {
            out.push(target);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_links_in_order() {
        let prose = "See [[Beta]] and [[Gamma|the third]], then [[Beta]] again.";
        assert_eq!(extract_wikilinks(prose), vec!["Beta", "Gamma"]);
    }

    #[test]
    fn test_code_is_ignored() {
        let prose = "Real [[One]].\n\n```\n[[Two]]\n```\n\nInline `[[Three]]` code.";
        assert_eq!(extract_wikilinks(prose), vec!["One"]);
    }

    #[test]
    fn test_heading_anchor_dropped() {
        assert_eq!(extract_wikilinks("Go to [[Alpha#Setup]]."), vec!["Alpha"]);
    }
}
