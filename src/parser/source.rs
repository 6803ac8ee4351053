use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use encoding_rs::WINDOWS_1252;

/// One line of a text export, terminator removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: usize,
    pub text: String,
}

/// Forward-only reader over a Windows-1252 export, yielding every line exactly once.
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
    number: usize,
    done: bool,
}

impl LineSource<BufReader<File>> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(LineSource::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        LineSource {
            reader,
            buf: Vec::new(),
            number: 0,
            done: false,
        }
    }
}

impl<R: BufRead> Iterator for LineSource<R> {
    type Item = io::Result<Line>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                // Single-byte encoding: decoding line by line is lossless.
                let (text, _) = WINDOWS_1252.decode_without_bom_handling(&self.buf);
                self.number += 1;
                Some(Ok(Line {
                    number: self.number,
                    text: text.into_owned(),
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
