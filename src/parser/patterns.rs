//! Labeled extraction patterns, compiled once and shared read-only by every scan.
//!
//! Line patterns operate on a single line with its terminator already removed.
//! Node patterns operate on the text content of a selected page element.

use std::sync::LazyLock;

use regex::Regex;

use super::FieldKind;

static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Date: ((?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\s*\d{2},\s*\d{4})",
    )
    .unwrap()
});
static PERMALINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"Permalink: (.*)").unwrap());
static DOC_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/docview/([0-9]+)").unwrap());
static FULL_TEXT_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*full text\s*$").unwrap());
static FULL_TEXT_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:Graph|Photograph|Illustration|Details)\s*$|Subject|Copyright New York Times|Copyright USA Today|Copyright \(c\)|\(c\) [0-9]+|Credit: By",
    )
    .unwrap()
});
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Single-line value for `kind`, if this line carries one.
///
/// Multi-line and page-only kinds never match here; see [`opens_block`] and [`match_node`].
pub fn match_line(kind: FieldKind, line: &str) -> Option<String> {
    let re: &Regex = match kind {
        FieldKind::Date => &DATE_RE,
        FieldKind::Permalink => &PERMALINK_RE,
        FieldKind::DocumentId => &DOC_ID_RE,
        _ => return None,
    };
    let value = re.captures(line)?.get(1)?.as_str().trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Whether `line` starts the multi-line value of `kind`.
pub fn opens_block(kind: FieldKind, line: &str) -> bool {
    match kind {
        FieldKind::FullText => FULL_TEXT_START_RE.is_match(line),
        _ => false,
    }
}

/// Whether `line` ends the multi-line value of `kind`.
pub fn is_terminator(kind: FieldKind, line: &str) -> bool {
    match kind {
        FieldKind::FullText => FULL_TEXT_END_RE.is_match(line),
        _ => false,
    }
}

pub fn is_multi_line(kind: FieldKind) -> bool {
    matches!(kind, FieldKind::FullText)
}

/// Kinds that can be found in a flat text export.
pub fn is_line_kind(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::Date | FieldKind::Permalink | FieldKind::DocumentId | FieldKind::FullText
    )
}

/// Value for `kind` from an element's text content. Whitespace runs collapse to one space.
pub fn match_node(kind: FieldKind, text: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(text.trim(), " ");
    if collapsed.is_empty() {
        return None;
    }
    match kind {
        FieldKind::DocumentId => match_line(kind, &collapsed),
        _ => Some(collapsed.into_owned()),
    }
}
