//! Incremental newline splitter.
//!
//! This is the buffered-reader primitive shared by both event kinds: every
//! call to [`LineSplitter::feed`] yields the complete lines the new bytes
//! closed, plus a chunk describing whatever tail of the read is still
//! unterminated. The tail also stays buffered until a newline (or the end of
//! the stream) resolves it into a line, so the same partial-line bytes are
//! seen by chunk consumers immediately and by line consumers later.

use std::sync::Arc;

use super::events::{Chunk, OutputEvent};

/// Splits raw reads into [`OutputEvent`]s on the ASCII newline byte.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered since the last line boundary.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Consume one read's worth of bytes.
    ///
    /// Emits a `Line` for each newline found (with a `\r` directly before the
    /// newline stripped), then a single `Chunk` for the bytes after the last
    /// newline if there are any.
    pub fn feed(&mut self, data: &[u8]) -> Vec<OutputEvent> {
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(pos) = data[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            self.pending.extend_from_slice(&data[start..end]);
            events.push(self.take_line(true));
            start = end + 1;
        }

        if start < data.len() {
            self.pending.extend_from_slice(&data[start..]);
            events.push(OutputEvent::Chunk(Chunk::new(
                Arc::from(data),
                start,
                data.len() - start,
            )));
        }

        events
    }

    /// Flush the unterminated remainder at end of stream.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn finish(&mut self) -> Option<OutputEvent> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take_line(false))
        }
    }

    fn take_line(&mut self, terminated: bool) -> OutputEvent {
        if terminated && self.pending.last() == Some(&b'\r') {
            self.pending.pop();
        }
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        OutputEvent::Line { text }
    }
}
