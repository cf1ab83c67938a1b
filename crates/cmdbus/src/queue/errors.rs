//! Error types for queue operations.

use std::io;
use std::str::Utf8Error;

use thiserror::Error;

/// Errors surfaced by framed queues and other message sinks.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No complete message arrived before the timeout.
    #[error("no complete message available")]
    Empty,
    /// The payload was not UTF-8 text. Buffered state is left untouched.
    #[error("queue payload is not text: {source}")]
    TypeMismatch {
        /// Position of the first invalid byte.
        #[source]
        source: Utf8Error,
    },
    /// The readiness descriptor could not be created or updated.
    #[error("failed to prepare queue readiness signal: {source}")]
    Readiness {
        /// Underlying socket-pair error.
        #[source]
        source: io::Error,
    },
    /// A socket-backed sink lost its peer.
    #[error("message sink disconnected: {source}")]
    Disconnected {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
