use std::collections::VecDeque;
use std::io;

use tracing::warn;

use super::accumulator::accumulate;
use super::patterns;
use super::source::Line;
use super::{FieldEvent, FieldKind, SourcePosition};
use crate::error::IngestError;

/// Counters a scan collects about its own source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub lines: usize,
    pub unterminated_bodies: usize,
    pub discarded_bodies: usize,
}

/// Walks one source forward, turning matching lines into field events.
///
/// Every line is looked at exactly once. When a line opens a multi-line field the
/// scanner hands the same line stream to the accumulator, so body lines (and the
/// terminator) are never pattern-matched on their own.
pub struct LineScanner<I> {
    lines: I,
    kinds: Vec<FieldKind>,
    origin: String,
    accept_unterminated: bool,
    pending: VecDeque<FieldEvent>,
    stats: ScanStats,
    failed: bool,
}

impl<I> LineScanner<I>
where
    I: Iterator<Item = io::Result<Line>>,
{
    pub fn new(lines: I, kinds: &[FieldKind], origin: impl Into<String>) -> Self {
        LineScanner {
            lines,
            kinds: kinds.to_vec(),
            origin: origin.into(),
            accept_unterminated: true,
            pending: VecDeque::new(),
            stats: ScanStats::default(),
            failed: false,
        }
    }

    /// Whether a body cut off by end of file still counts as a value.
    pub fn accept_unterminated(mut self, accept: bool) -> Self {
        self.accept_unterminated = accept;
        self
    }

    pub fn stats(&self) -> ScanStats {
        self.stats
    }

    fn scan_line(&mut self, line: Line) -> io::Result<()> {
        self.stats.lines += 1;
        for i in 0..self.kinds.len() {
            let kind = self.kinds[i];
            if patterns::is_multi_line(kind) {
                if !patterns::opens_block(kind, &line.text) {
                    continue;
                }
                let acc = accumulate(kind, &mut self.lines)?;
                self.stats.lines += acc.lines + usize::from(acc.terminated);
                if !acc.terminated {
                    self.stats.unterminated_bodies += 1;
                    warn!(
                        source = %self.origin,
                        field = %kind,
                        start_line = line.number,
                        lines = acc.lines,
                        kept = self.accept_unterminated,
                        "source ended before body terminator"
                    );
                    if !self.accept_unterminated {
                        self.stats.discarded_bodies += 1;
                        continue;
                    }
                }
                self.pending.push_back(FieldEvent::new(
                    kind,
                    acc.text,
                    SourcePosition::Line(line.number),
                ));
            } else if let Some(value) = patterns::match_line(kind, &line.text) {
                self.pending
                    .push_back(FieldEvent::new(kind, value, SourcePosition::Line(line.number)));
            }
        }
        Ok(())
    }
}

impl<I> Iterator for LineScanner<I>
where
    I: Iterator<Item = io::Result<Line>>,
{
    type Item = Result<FieldEvent, IngestError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }
            if self.failed {
                return None;
            }
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(IngestError::source_unavailable(&self.origin, e)));
                }
            };
            if let Err(e) = self.scan_line(line) {
                self.failed = true;
                self.pending.clear();
                return Some(Err(IngestError::source_unavailable(&self.origin, e)));
            }
        }
    }
}
