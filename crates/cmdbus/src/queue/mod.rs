//! Line-framed queues and the traits that connect producers to consumers.
//!
//! [`FramedQueue`] is the only queue implementation; it buffers partial
//! writes and hands out whole lines. [`MessageSink`] and [`MessageSource`]
//! are the seams used by the command loop and the relays, so a sink may also
//! be a [`FanOut`] replicating into several queues.

mod errors;
mod fanout;
mod framed;
mod readiness;
#[cfg(test)]
mod tests;

use std::time::Duration;

pub use self::errors::QueueError;
pub use self::fanout::FanOut;
pub use self::framed::FramedQueue;

use crate::message::Message;

const QUEUE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::queue");

/// Destination for outgoing text.
pub trait MessageSink: Send + Sync {
    /// Delivers text. It may contain several lines or part of one.
    ///
    /// # Errors
    ///
    /// Implementations return [`QueueError`] when the text cannot be
    /// delivered.
    fn send(&self, text: &str) -> Result<(), QueueError>;

    /// Delivers raw bytes, which must be UTF-8.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TypeMismatch`] for non-UTF-8 input, or whatever
    /// [`send`](Self::send) returns.
    fn send_bytes(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let text =
            std::str::from_utf8(bytes).map_err(|source| QueueError::TypeMismatch { source })?;
        self.send(text)
    }
}

/// Origin of complete messages.
pub trait MessageSource: Send + Sync {
    /// Blocks until a message is available.
    #[must_use]
    fn receive(&self) -> Message;

    /// Waits at most `timeout` for a message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] when nothing arrived in time.
    fn receive_timeout(&self, timeout: Duration) -> Result<Message, QueueError>;
}
