//! Newline-framed, blocking, thread-safe message queue.

use std::collections::VecDeque;
use std::os::fd::BorrowedFd;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use tracing::warn;

use super::readiness::Readiness;
use super::{MessageSink, MessageSource, QUEUE_TARGET, QueueError};
use crate::message::Message;

/// Queue that only ever hands out complete, newline-terminated messages.
///
/// Text may be put in arbitrary chunks. Complete lines become retrievable in
/// order; a trailing fragment stays buffered until a later `put` completes
/// it. The queue is shared between the two ends of a pipe through `Arc`.
#[derive(Debug, Default)]
pub struct FramedQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    readiness: OnceCell<Readiness>,
}

#[derive(Debug, Default)]
struct QueueState {
    lines: VecDeque<Message>,
    fragment: String,
}

impl FramedQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text, enqueueing every line it completes.
    pub fn put(&self, text: &str) {
        let mut state = self.lock();
        let was_empty = state.lines.is_empty();

        let mut combined = std::mem::take(&mut state.fragment);
        combined.push_str(text);
        let mut rest = combined.as_str();
        while let Some(index) = rest.find('\n') {
            let (line, tail) = rest.split_at(index + 1);
            state
                .lines
                .push_back(Message::from_complete(line.to_owned()));
            rest = tail;
        }
        state.fragment = rest.to_owned();

        if state.lines.is_empty() {
            return;
        }
        if was_empty
            && let Some(readiness) = self.readiness.get()
            && let Err(error) = readiness.raise()
        {
            warn!(target: QUEUE_TARGET, %error, "failed to raise queue readiness");
        }
        self.available.notify_all();
    }

    /// Appends raw bytes, which must be UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::TypeMismatch`] for non-UTF-8 input; nothing is
    /// buffered in that case.
    pub fn put_bytes(&self, bytes: &[u8]) -> Result<(), QueueError> {
        let text =
            std::str::from_utf8(bytes).map_err(|source| QueueError::TypeMismatch { source })?;
        self.put(text);
        Ok(())
    }

    /// Blocks until a complete message is available.
    #[must_use]
    pub fn get(&self) -> Message {
        let mut state = self.lock();
        loop {
            if let Some(message) = self.pop(&mut state) {
                return message;
            }
            state = self
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Waits up to `timeout` for a complete message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] when the timeout elapses first.
    pub fn get_timeout(&self, timeout: Duration) -> Result<Message, QueueError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(message) = self.pop(&mut state) {
                return Ok(message);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(QueueError::Empty);
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }

    /// Returns the next message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Empty`] when no complete message is buffered.
    pub fn try_get(&self) -> Result<Message, QueueError> {
        let mut state = self.lock();
        self.pop(&mut state).ok_or(QueueError::Empty)
    }

    /// Number of complete messages not yet retrieved.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().lines.len()
    }

    /// Length in bytes of the buffered, unterminated fragment.
    #[must_use]
    pub fn fragment_len(&self) -> usize {
        self.lock().fragment.len()
    }

    /// Descriptor that polls readable while [`pending`](Self::pending) is
    /// non-zero.
    ///
    /// The underlying socket pair is created on first use.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Readiness`] when the socket pair cannot be
    /// created.
    pub fn readiness_fd(&self) -> Result<BorrowedFd<'_>, QueueError> {
        let state = self.lock();
        let readiness = self
            .readiness
            .get_or_try_init(|| {
                let readiness = Readiness::new()?;
                if !state.lines.is_empty() {
                    readiness.raise()?;
                }
                Ok(readiness)
            })
            .map_err(|source| QueueError::Readiness { source })?;
        Ok(readiness.as_fd())
    }

    fn pop(&self, state: &mut QueueState) -> Option<Message> {
        let message = state.lines.pop_front()?;
        if state.lines.is_empty()
            && let Some(readiness) = self.readiness.get()
            && let Err(error) = readiness.lower()
        {
            warn!(target: QUEUE_TARGET, %error, "failed to lower queue readiness");
        }
        Some(message)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageSink for FramedQueue {
    fn send(&self, text: &str) -> Result<(), QueueError> {
        self.put(text);
        Ok(())
    }
}

impl MessageSource for FramedQueue {
    fn receive(&self) -> Message {
        self.get()
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<Message, QueueError> {
        self.get_timeout(timeout)
    }
}
