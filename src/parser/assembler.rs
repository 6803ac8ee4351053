use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use super::{FieldEvent, FieldKind};

/// Which record a scan is assembling, and which fields make it complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordShape {
    /// Congressional index pass: publication date + permalink.
    Meta,
    /// News body pass: document id + full text.
    Document,
    /// Portal page pass: title, committee, meta, full text + permalink.
    Congress,
}

impl RecordShape {
    pub fn required(self) -> &'static [FieldKind] {
        match self {
            RecordShape::Meta => &[FieldKind::Date, FieldKind::Permalink],
            RecordShape::Document => &[FieldKind::DocumentId, FieldKind::FullText],
            RecordShape::Congress => &[
                FieldKind::Title,
                FieldKind::Committee,
                FieldKind::Meta,
                FieldKind::FullText,
                FieldKind::Permalink,
            ],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RecordShape::Meta => "meta",
            RecordShape::Document => "document",
            RecordShape::Congress => "congress",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaRecord {
    pub pubdate: String,
    pub permalink: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRecord {
    pub doc_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CongressRecord {
    pub title: String,
    pub committee: String,
    pub meta: String,
    pub full_text: String,
    pub permalink: String,
}

/// A fully populated, persist-ready field set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Record {
    Meta(MetaRecord),
    Document(DocumentRecord),
    Congress(CongressRecord),
}

impl Record {
    /// Natural key used in logs.
    pub fn key(&self) -> &str {
        match self {
            Record::Meta(r) => &r.permalink,
            Record::Document(r) => &r.doc_id,
            Record::Congress(r) => &r.permalink,
        }
    }
}

/// What was left in the assembler when its source ran out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Leftover {
    /// Every started record was emitted.
    Clean,
    /// No required field was ever seen in this source.
    NeverStarted,
    /// Some fields were seen but the record never completed; it is dropped.
    Incomplete {
        present: Vec<FieldKind>,
        missing: Vec<FieldKind>,
    },
}

/// Holds the partial field set for one source and emits a record once complete.
///
/// Later values for a field overwrite earlier ones. Emission clears all state so
/// nothing leaks into the next record.
#[derive(Debug)]
pub struct RecordAssembler {
    shape: RecordShape,
    partial: BTreeMap<FieldKind, String>,
    seen_any: bool,
    emitted: usize,
    overwritten: usize,
}

impl RecordAssembler {
    pub fn new(shape: RecordShape) -> Self {
        RecordAssembler {
            shape,
            partial: BTreeMap::new(),
            seen_any: false,
            emitted: 0,
            overwritten: 0,
        }
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Fields replaced before their record completed; each one drops the earlier value.
    pub fn overwritten(&self) -> usize {
        self.overwritten
    }

    /// True while no field of the current record has been seen.
    pub fn is_empty(&self) -> bool {
        self.partial.is_empty()
    }

    pub fn missing(&self) -> Vec<FieldKind> {
        self.shape
            .required()
            .iter()
            .copied()
            .filter(|k| !self.partial.contains_key(k))
            .collect()
    }

    /// Merge one field event; returns the record when this event completes it.
    pub fn feed(&mut self, event: FieldEvent) -> Option<Record> {
        if !self.shape.required().contains(&event.field) {
            debug!(field = %event.field, shape = self.shape.name(), "field not used by shape");
            return None;
        }
        self.seen_any = true;
        if let Some(old) = self.partial.insert(event.field, event.value) {
            self.overwritten += 1;
            warn!(field = %event.field, at = %event.position, replaced = %truncate(&old, 40), "field overwritten before record completed");
        }
        if !self.missing().is_empty() {
            return None;
        }
        let record = self.build();
        self.partial.clear();
        self.emitted += 1;
        Some(record)
    }

    /// Close out the source and report what was left behind.
    pub fn finish(self) -> Leftover {
        if !self.is_empty() {
            let missing = self.missing();
            return Leftover::Incomplete {
                present: self.partial.keys().copied().collect(),
                missing,
            };
        }
        if !self.seen_any {
            return Leftover::NeverStarted;
        }
        Leftover::Clean
    }

    fn take(&mut self, kind: FieldKind) -> String {
        self.partial.remove(&kind).unwrap_or_default()
    }

    fn build(&mut self) -> Record {
        match self.shape {
            RecordShape::Meta => Record::Meta(MetaRecord {
                pubdate: self.take(FieldKind::Date),
                permalink: self.take(FieldKind::Permalink),
            }),
            RecordShape::Document => Record::Document(DocumentRecord {
                doc_id: self.take(FieldKind::DocumentId),
                text: self.take(FieldKind::FullText),
            }),
            RecordShape::Congress => Record::Congress(CongressRecord {
                title: self.take(FieldKind::Title),
                committee: self.take(FieldKind::Committee),
                meta: self.take(FieldKind::Meta),
                full_text: self.take(FieldKind::FullText),
                permalink: self.take(FieldKind::Permalink),
            }),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
