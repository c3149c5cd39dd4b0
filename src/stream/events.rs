//! Output event types produced by a [`StreamDemultiplexer`](super::StreamDemultiplexer).

use std::fmt;
use std::sync::Arc;

/// Which standard stream of the child process produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// A raw fragment of output not yet resolved into a line.
///
/// The chunk views `length` bytes of the read buffer that produced it,
/// starting at `offset`. The range always lies within the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    bytes: Arc<[u8]>,
    offset: usize,
    length: usize,
}

impl Chunk {
    /// Create a chunk viewing `length` bytes of `bytes` starting at `offset`.
    ///
    /// The range is clamped to the buffer.
    #[must_use]
    pub fn new(bytes: Arc<[u8]>, offset: usize, length: usize) -> Self {
        let offset = offset.min(bytes.len());
        let length = length.min(bytes.len() - offset);
        Self {
            bytes,
            offset,
            length,
        }
    }

    /// The fragment bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
            .get(self.offset..self.offset + self.length)
            .unwrap_or_default()
    }

    /// The whole read buffer the fragment points into.
    #[must_use]
    pub fn buffer(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the fragment contains a newline byte.
    #[must_use]
    pub fn contains_newline(&self) -> bool {
        self.as_bytes().contains(&b'\n')
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// One event demultiplexed from a raw output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// A complete line with its terminator (`\n` or `\r\n`) stripped.
    Line { text: String },
    /// A partial-line fragment, used for progress output that never emits a newline.
    Chunk(Chunk),
}

impl OutputEvent {
    /// Get the line text if this is a `Line` event.
    #[must_use]
    pub fn as_line(&self) -> Option<&str> {
        match self {
            Self::Line { text } => Some(text),
            Self::Chunk(_) => None,
        }
    }

    /// Get the chunk if this is a `Chunk` event.
    #[must_use]
    pub fn as_chunk(&self) -> Option<&Chunk> {
        match self {
            Self::Chunk(chunk) => Some(chunk),
            Self::Line { .. } => None,
        }
    }
}
