use std::io;

use super::patterns;
use super::source::Line;
use super::FieldKind;

/// A multi-line value collected after its opening header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accumulated {
    pub text: String,
    /// Lines concatenated into `text`.
    pub lines: usize,
    /// False when the source ran out before a terminator line.
    pub terminated: bool,
}

/// Consume lines after a block header until `kind`'s terminator matches.
///
/// Intermediate lines are concatenated as-is (terminators were already stripped by
/// the source). The terminator line is consumed and dropped. Exhaustion returns what
/// was collected with `terminated: false`.
pub fn accumulate<I>(kind: FieldKind, lines: &mut I) -> io::Result<Accumulated>
where
    I: Iterator<Item = io::Result<Line>>,
{
    let mut text = String::new();
    let mut count = 0;

    for line in lines {
        let line = line?;
        if patterns::is_terminator(kind, &line.text) {
            return Ok(Accumulated {
                text,
                lines: count,
                terminated: true,
            });
        }
        text.push_str(&line.text);
        count += 1;
    }

    Ok(Accumulated {
        text,
        lines: count,
        terminated: false,
    })
}
