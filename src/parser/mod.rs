pub mod accumulator;
pub mod assembler;
pub mod patterns;
pub mod scanner;
pub mod source;

use std::fmt;

use serde::Serialize;

/// Field types the extraction engine knows how to locate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Date,
    Permalink,
    DocumentId,
    FullText,
    Title,
    Committee,
    Meta,
}

impl FieldKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Date => "date",
            FieldKind::Permalink => "permalink",
            FieldKind::DocumentId => "document_id",
            FieldKind::FullText => "full_text",
            FieldKind::Title => "title",
            FieldKind::Committee => "committee",
            FieldKind::Meta => "meta",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a field value was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourcePosition {
    /// 1-based line number inside a text export.
    Line(usize),
    /// CSS selector on a rendered page.
    Node(String),
    /// Value carried over from a row persisted by an earlier pass.
    Row,
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourcePosition::Line(n) => write!(f, "line {}", n),
            SourcePosition::Node(sel) => write!(f, "node '{}'", sel),
            SourcePosition::Row => f.write_str("stored row"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEvent {
    pub field: FieldKind,
    pub value: String,
    pub position: SourcePosition,
}

impl FieldEvent {
    pub fn new(field: FieldKind, value: impl Into<String>, position: SourcePosition) -> Self {
        FieldEvent {
            field,
            value: value.into(),
            position,
        }
    }
}
