use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::{RecordSink, SinkFactory};
use crate::error::IngestError;
use crate::parser::assembler::{Leftover, Record, RecordAssembler, RecordShape};
use crate::parser::patterns;
use crate::parser::scanner::LineScanner;
use crate::parser::source::LineSource;
use crate::parser::FieldKind;

/// Data-quality counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub sources_total: usize,
    pub sources_failed: usize,
    /// Sources in which no required field was ever found.
    pub sources_without_fields: usize,
    pub records_persisted: usize,
    /// Records the sink refused (duplicate key, constraint, type mismatch).
    pub records_rejected: usize,
    /// Records that started but never completed; dropped.
    pub incomplete_records: usize,
    pub unterminated_bodies: usize,
    pub discarded_bodies: usize,
    pub field_timeouts: usize,
    /// Required fields seen twice within one record; the earlier partial record is lost.
    pub fields_overwritten: usize,
}

impl IngestReport {
    pub fn print(&self) {
        println!(
            "Sources: {} ({} failed, {} without fields)",
            self.sources_total, self.sources_failed, self.sources_without_fields
        );
        println!(
            "Records: {} persisted, {} rejected, {} incomplete",
            self.records_persisted, self.records_rejected, self.incomplete_records
        );
        if self.fields_overwritten > 0 {
            println!("Overwritten fields: {}", self.fields_overwritten);
        }
        if self.unterminated_bodies > 0 || self.field_timeouts > 0 {
            println!(
                "Warnings: {} unterminated bodies ({} discarded), {} field timeouts",
                self.unterminated_bodies, self.discarded_bodies, self.field_timeouts
            );
        }
    }
}

/// Hand one completed record to the sink. Rejections are logged and counted;
/// only a lost sink comes back as an error.
pub fn deliver<S: RecordSink>(
    sink: &mut S,
    record: &Record,
    origin: &str,
    report: &mut IngestReport,
) -> Result<(), IngestError> {
    match sink.persist(record) {
        Ok(()) => {
            report.records_persisted += 1;
            Ok(())
        }
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!(source = %origin, key = %record.key(), error = %e, "record skipped");
            report.records_rejected += 1;
            Ok(())
        }
    }
}

/// Log and count whatever the assembler still held when its source ended.
pub fn note_leftover(leftover: Leftover, origin: &str, report: &mut IngestReport) {
    match leftover {
        Leftover::Clean => {}
        Leftover::NeverStarted => {
            report.sources_without_fields += 1;
            warn!(source = %origin, "no fields found in source");
        }
        Leftover::Incomplete { present, missing } => {
            report.incomplete_records += 1;
            warn!(
                source = %origin,
                present = ?present,
                missing = ?missing,
                "incomplete record dropped"
            );
        }
    }
}

/// `*.txt` files directly under `dir`, sorted by name.
pub fn list_sources(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| IngestError::source_unavailable(dir.display().to_string(), e))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("txt"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Field kinds a line scan has to look for to build `shape`.
pub fn line_kinds(shape: RecordShape) -> Vec<FieldKind> {
    shape
        .required()
        .iter()
        .copied()
        .filter(|&k| patterns::is_line_kind(k))
        .collect()
}

/// Scan every file in order, persisting each record as it completes.
///
/// A file that cannot be opened or read is logged and skipped. Returns early only
/// when the sink is lost; records committed before that stay committed.
pub fn ingest_files<F: SinkFactory>(
    paths: &[PathBuf],
    shape: RecordShape,
    factory: &F,
    accept_unterminated: bool,
    report: &mut IngestReport,
) -> Result<(), IngestError> {
    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    let kinds = line_kinds(shape);
    for path in paths {
        report.sources_total += 1;
        let result = ingest_file(path, shape, &kinds, factory, accept_unterminated, report);
        pb.inc(1);
        if let Err(e) = result {
            pb.abandon();
            return Err(e);
        }
    }
    pb.finish_and_clear();
    Ok(())
}

fn ingest_file<F: SinkFactory>(
    path: &Path,
    shape: RecordShape,
    kinds: &[FieldKind],
    factory: &F,
    accept_unterminated: bool,
    report: &mut IngestReport,
) -> Result<(), IngestError> {
    let origin = path.display().to_string();
    let source = match LineSource::open(path) {
        Ok(s) => s,
        Err(e) => {
            let err = IngestError::source_unavailable(&origin, e);
            warn!(error = %err, "skipping source");
            report.sources_failed += 1;
            return Ok(());
        }
    };
    let mut sink = factory.open()?;

    let mut scanner = LineScanner::new(source, kinds, &origin).accept_unterminated(accept_unterminated);
    let mut assembler = RecordAssembler::new(shape);
    let persisted_before = report.records_persisted;

    for event in scanner.by_ref() {
        let event = match event {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "source read failed, moving on");
                report.sources_failed += 1;
                break;
            }
        };
        if let Some(record) = assembler.feed(event) {
            deliver(&mut sink, &record, &origin, report)?;
        }
    }

    let stats = scanner.stats();
    report.unterminated_bodies += stats.unterminated_bodies;
    report.discarded_bodies += stats.discarded_bodies;
    report.fields_overwritten += assembler.overwritten();
    let emitted = assembler.emitted();
    note_leftover(assembler.finish(), &origin, report);

    info!(
        source = %origin,
        lines = stats.lines,
        emitted,
        persisted = report.records_persisted - persisted_before,
        "source done"
    );
    Ok(())
}
