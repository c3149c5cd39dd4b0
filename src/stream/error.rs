//! Stream demultiplexer error types.

use super::StreamKind;

/// Errors that can occur when driving a stream demultiplexer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// `start` was called on a demultiplexer that is already reading.
    #[error("{0} demultiplexer already started")]
    AlreadyStarted(StreamKind),
}
