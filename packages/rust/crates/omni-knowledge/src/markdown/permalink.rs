//! Permalink derivation.
//!
//! A permalink is the project-relative path, lowercased, transliterated to
//! ASCII where Unicode decomposition allows it, with every run of other
//! characters collapsed to `-` and the markdown extension removed:
//! `Notes/Café Ideas.md` -> `notes/cafe-ideas`.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

const MARKDOWN_EXTENSIONS: &[&str] = &[".md", ".markdown", ".mdx"];

/// Fallback used when nothing slug-worthy remains.
pub const UNTITLED_PERMALINK: &str = "untitled";

/// Whether the path names a markdown note.
#[must_use]
pub fn is_markdown_path(path: &str) -> bool {
    trim_markdown_extension(path).len() != path.len()
}

/// Path with a trailing markdown extension (any case) removed.
#[must_use]
pub fn trim_markdown_extension(path: &str) -> &str {
    for ext in MARKDOWN_EXTENSIONS {
        if let Some(split) = path.len().checked_sub(ext.len())
            && let Some(tail) = path.get(split..)
            && tail.eq_ignore_ascii_case(ext)
        {
            return &path[..split];
        }
    }
    path
}

/// File name without directories or markdown extension.
#[must_use]
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    trim_markdown_extension(name)
}

/// Slug for a single path segment.
#[must_use]
pub fn slugify_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.nfkd().filter(|c| !is_combining_mark(*c)) {
        if ch.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Slug for a `/`-separated path; empty segments are dropped.
#[must_use]
pub fn slugify_path(raw: &str) -> String {
    let slug = raw
        .replace('\\', "/")
        .split('/')
        .map(slugify_segment)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    if slug.is_empty() {
        UNTITLED_PERMALINK.to_string()
    } else {
        slug
    }
}

/// Permalink derived from a project-relative file path.
#[must_use]
pub fn derive_permalink(rel_path: &str) -> String {
    slugify_path(trim_markdown_extension(rel_path))
}

/// Normalize an explicit `permalink:` value.
#[must_use]
pub fn normalize_permalink(raw: &str) -> String {
    slugify_path(trim_markdown_extension(raw.trim().trim_matches('/')))
}

/// Candidate permalinks for a base: `base`, `base-1`, `base-2`, ...
pub fn permalink_candidates(base: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(base.to_string()).chain((1u32..).map(move |n| format!("{base}-{n}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_from_path() {
        assert_eq!(derive_permalink("notes/alpha.md"), "notes/alpha");
        assert_eq!(derive_permalink("Notes/Café Ideas.md"), "notes/cafe-ideas");
        assert_eq!(derive_permalink("a//b/  --x--.MD"), "a/b/x");
        assert_eq!(derive_permalink("images/Logo.PNG"), "images/logo-png");
        assert_eq!(derive_permalink("???.md"), UNTITLED_PERMALINK);
    }

    #[test]
    fn test_non_latin_is_kept() {
        assert_eq!(slugify_segment("日本語 メモ"), "日本語-メモ");
        assert_eq!(slugify_segment("Straße"), "straße");
    }

    #[test]
    fn test_explicit_permalink_normalized() {
        assert_eq!(normalize_permalink("/Docs/My Page/"), "docs/my-page");
        assert_eq!(normalize_permalink("guide.md"), "guide");
    }

    #[test]
    fn test_candidates() {
        let got: Vec<String> = permalink_candidates("a").take(3).collect();
        assert_eq!(got, vec!["a", "a-1", "a-2"]);
    }

    #[test]
    fn test_stem_and_extension() {
        assert_eq!(file_stem("notes/Alpha Note.md"), "Alpha Note");
        assert_eq!(file_stem("logo.png"), "logo.png");
        assert!(is_markdown_path("x/y.Markdown"));
        assert!(!is_markdown_path("x/y.txt"));
    }
}
