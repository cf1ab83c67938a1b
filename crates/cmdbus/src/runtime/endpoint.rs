//! The queue pair handed to each side of a topology.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::message::Message;
use crate::queue::{FramedQueue, MessageSink, QueueError};

use super::Shutdown;

/// Inbox, outbox and shutdown token of one participant.
///
/// The task's outbox is the consumer's inbox and the other way around, or a
/// [`FanOut`](crate::queue::FanOut) when several consumers listen.
#[derive(Clone)]
pub struct Endpoint {
    inbox: Arc<FramedQueue>,
    outbox: Arc<dyn MessageSink>,
    shutdown: Shutdown,
}

impl Endpoint {
    /// Assembles an endpoint from its parts.
    #[must_use]
    pub fn new(
        inbox: Arc<FramedQueue>,
        outbox: Arc<dyn MessageSink>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            inbox,
            outbox,
            shutdown,
        }
    }

    /// Builds two endpoints joined back to back by a fresh pair of queues.
    #[must_use]
    pub fn pair(shutdown: &Shutdown) -> (Self, Self) {
        let left = Arc::new(FramedQueue::new());
        let right = Arc::new(FramedQueue::new());
        (
            Self::new(
                Arc::clone(&left),
                Arc::clone(&right) as Arc<dyn MessageSink>,
                shutdown.clone(),
            ),
            Self::new(right, left, shutdown.clone()),
        )
    }

    /// Sends one line to the peer, adding the terminator when missing.
    ///
    /// # Errors
    ///
    /// Returns whatever the outbox reports.
    pub fn send(&self, text: &str) -> Result<(), QueueError> {
        self.outbox.send(&terminated(text))
    }

    /// Queues one line into this participant's own inbox.
    pub fn send_to_self(&self, text: &str) {
        self.inbox.put(&terminated(text));
    }

    /// Blocks until a message arrives.
    #[must_use]
    pub fn receive(&self) -> Message {
        self.inbox.get()
    }

    /// Waits at most `timeout` for a message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] when nothing arrived in time.
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Message, QueueError> {
        self.inbox.get_timeout(timeout)
    }

    /// Queue this participant reads from.
    #[must_use]
    pub fn inbox(&self) -> &Arc<FramedQueue> {
        &self.inbox
    }

    /// Shutdown token of the topology.
    #[must_use]
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Endpoint")
            .field("inbox", &self.inbox)
            .field("shutdown", &self.shutdown)
            .finish_non_exhaustive()
    }
}

fn terminated(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}
