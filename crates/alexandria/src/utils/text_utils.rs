//! Text processing utilities shared by search previews, extraction
//! normalization, and log deduplication.

use lazy_static::lazy_static;
use regex::Regex;
use std::borrow::Cow;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
    if WHITESPACE_REGEX.is_match(text) {
        Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
    } else {
        Cow::Borrowed(text)
    }
}

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut. Always cuts on a char boundary.
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
    match text.char_indices().nth(max_chars) {
        None => Cow::Borrowed(text),
        Some((idx, _)) => {
            let mut cut = text[..idx].to_string();
            cut.push('…');
            Cow::Owned(cut)
        }
    }
}

/// First `max_chars` characters without an ellipsis marker.
pub fn head_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Canonical form used to deduplicate log lines and error patterns:
/// lowercased, quotes stripped, whitespace collapsed.
pub fn normalize_for_dedup(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '"' | '\'' | '`' | '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}'))
        .collect();
    normalize_whitespace(&stripped).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_appends_marker_only_when_cut() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("abcdef", 3), "abc…");
    }

    #[test]
    fn truncation_is_char_safe() {
        let text = "ééééé";
        let cut = truncate_with_ellipsis(text, 2);
        assert_eq!(cut.as_ref(), "éé…");
    }

    #[test]
    fn dedup_key_ignores_case_quotes_and_spacing() {
        let a = normalize_for_dedup("Use  \"WAL\"   mode");
        let b = normalize_for_dedup("use 'wal' MODE");
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_normalization_borrows_when_clean() {
        assert!(matches!(normalize_whitespace("clean"), Cow::Borrowed(_)));
        assert_eq!(normalize_whitespace("a\t b\n\nc"), "a b c");
    }
}
