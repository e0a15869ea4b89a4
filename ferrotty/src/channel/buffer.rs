//! Pattern buffer holding received-but-unconsumed bytes.
//!
//! Unlike a text scraper this buffer never rewrites what it receives: ANSI
//! sequences and NUL bytes may well be protocol data.

use super::patterns::{Expectation, Found};

/// Buffer for accumulating output and searching it for an expectation.
///
/// An optional search window restricts matching to the last N bytes, which
/// keeps repeated searches cheap when the target floods the channel.
#[derive(Debug, Default)]
pub struct PatternBuffer {
    /// The accumulated output buffer.
    buffer: Vec<u8>,

    /// How many bytes from the end to search. `None` searches everything.
    search_window: Option<usize>,
}

impl PatternBuffer {
    /// Create a new pattern buffer.
    ///
    /// # Arguments
    ///
    /// * `search_window` - Number of bytes from the end to search for
    ///   patterns, or `None` for the whole buffer.
    pub fn new(search_window: Option<usize>) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_window,
        }
    }

    /// Append received bytes as-is.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Offset where searching starts.
    fn search_start(&self) -> usize {
        self.search_window
            .map_or(0, |window| self.buffer.len().saturating_sub(window))
    }

    /// Search the buffer (or its tail) for the expectation.
    ///
    /// Returned offsets are relative to the whole buffer.
    pub fn search(&self, expectation: &Expectation) -> Option<Found> {
        let start = self.search_start();
        expectation.find(&self.buffer[start..]).map(|found| Found {
            index: found.index,
            start: found.start + start,
            end: found.end + start,
        })
    }

    /// Remove everything up to `found.end`, returning `(before, matched)`.
    ///
    /// Bytes after the match stay buffered for the next expectation.
    pub fn consume(&mut self, found: &Found) -> (Vec<u8>, Vec<u8>) {
        let rest = self.buffer.split_off(found.end);
        let mut before = std::mem::replace(&mut self.buffer, rest);
        let matched = before.split_off(found.start);
        (before, matched)
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }
}
