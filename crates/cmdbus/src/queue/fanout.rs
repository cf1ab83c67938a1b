//! Replicating sink feeding several consumers from one producer.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::{MessageSink, QUEUE_TARGET, QueueError};

/// Sink that forwards every message to each of its branches.
///
/// A failing branch does not stop delivery to the others; the first error is
/// returned once every branch has been tried.
#[derive(Default, Clone)]
pub struct FanOut {
    branches: Vec<Arc<dyn MessageSink>>,
}

impl FanOut {
    /// Creates a fan-out with no branches.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a branch.
    pub fn push(&mut self, branch: Arc<dyn MessageSink>) {
        self.branches.push(branch);
    }

    /// Builder form of [`push`](Self::push).
    #[must_use]
    pub fn with_branch(mut self, branch: Arc<dyn MessageSink>) -> Self {
        self.push(branch);
        self
    }

    /// Number of branches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// True when no branch is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

impl fmt::Debug for FanOut {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FanOut")
            .field("branches", &self.branches.len())
            .finish()
    }
}

impl MessageSink for FanOut {
    fn send(&self, text: &str) -> Result<(), QueueError> {
        let mut first_error = None;
        for (index, branch) in self.branches.iter().enumerate() {
            if let Err(error) = branch.send(text) {
                warn!(
                    target: QUEUE_TARGET,
                    branch = index,
                    %error,
                    "fan-out branch rejected message"
                );
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
