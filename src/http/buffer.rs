//! Accumulates raw socket bytes and hands them out by line or by length.
//!
//! Nothing here blocks. Every extractor answers `None` when the bytes it
//! needs haven't arrived yet, and the caller tries again after the next read.

use crate::errors::{Error, Result};

/// Once this many consumed bytes pile up at the front, they're dropped.
const COMPACT_THRESHOLD: usize = 4096;

#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    /// Start of the unconsumed bytes within `data`
    pos: usize,
    max_line: usize,
}

impl Buffer {
    /// A buffer whose lines may be at most `max_line` bytes, terminator
    /// excluded.
    pub fn new(max_line: usize) -> Buffer {
        Buffer {
            data: Vec::with_capacity(4096),
            pos: 0,
            max_line: max_line,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.compact();
        self.data.extend_from_slice(bytes);
    }

    /// The next CRLF-terminated line, without its terminator.
    ///
    /// A line that grows past the limit without a terminator in sight is a
    /// framing error; so is one that ends in a terminator past the limit.
    pub fn take_line(&mut self) -> Result<Option<Vec<u8>>> {
        let pending = self.peek();
        match find_crlf(pending) {
            Some(end) => {
                if end > self.max_line {
                    return Err(Error::LineTooLong);
                }
                let line = pending[.. end].to_vec();
                self.consume(end + 2);
                Ok(Some(line))
            },
            None => {
                // A trailing CR might be the first half of a terminator
                let partial = pending.len().saturating_sub(1);
                if partial > self.max_line {
                    Err(Error::LineTooLong)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Exactly `n` bytes, once that many are buffered.
    pub fn take_exact(&mut self, n: usize) -> Option<Vec<u8>> {
        if self.len() < n {
            return None;
        }

        let out = self.peek()[.. n].to_vec();
        self.consume(n);
        Some(out)
    }

    /// Whatever is buffered, up to `n` bytes. Used for streaming bodies.
    pub fn take_up_to(&mut self, n: usize) -> Vec<u8> {
        let n = n.min(self.len());
        let out = self.peek()[.. n].to_vec();
        self.consume(n);
        out
    }

    /// The unconsumed bytes.
    pub fn peek(&self) -> &[u8] {
        &self.data[self.pos ..]
    }

    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
        if self.pos == self.data.len() {
            self.data.clear();
            self.pos = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    fn compact(&mut self) {
        if self.pos >= COMPACT_THRESHOLD && self.pos * 2 >= self.data.len() {
            self.data.drain(.. self.pos);
            self.pos = 0;
        }
    }
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|w| w == b"\r\n")
}
