//! Cooperative shutdown token shared by every loop of one topology.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// One-shot flag that, once triggered, stays triggered.
///
/// Clones share the same flag. Loops poll [`is_triggered`](Self::is_triggered)
/// between bounded waits, or sleep in [`wait_timeout`](Self::wait_timeout) so
/// that a trigger wakes them early.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownState>,
}

#[derive(Debug, Default)]
struct ShutdownState {
    triggered: Mutex<bool>,
    changed: Condvar,
}

impl Shutdown {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers shutdown. Later calls are no-ops.
    pub fn trigger(&self) {
        let mut triggered = self.lock();
        if !*triggered {
            *triggered = true;
            self.inner.changed.notify_all();
        }
    }

    /// True once any clone has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.lock()
    }

    /// Sleeps up to `timeout`, returning early with `true` when shutdown is
    /// triggered.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.lock();
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .changed
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            triggered = guard;
        }
        true
    }

    /// Blocks until shutdown is triggered.
    pub fn wait(&self) {
        let mut triggered = self.lock();
        while !*triggered {
            triggered = self
                .inner
                .changed
                .wait(triggered)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner
            .triggered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn trigger_is_shared_and_one_shot() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_triggered());
        shutdown.trigger();
        clone.trigger();
        assert!(clone.is_triggered());
        assert!(shutdown.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn wait_timeout_expires_when_untriggered() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn trigger_wakes_waiters_early() {
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });

        assert!(shutdown.wait_timeout(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().expect("trigger thread");
    }
}
