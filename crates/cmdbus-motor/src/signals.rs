//! Termination signals mapped onto the launcher's shutdown token.

use std::io;
use std::thread::{self, JoinHandle};

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::{info, warn};

use cmdbus::Shutdown;
use cmdbus::telemetry::thread_name;

use crate::MOTOR_TARGET;

/// Watches for termination signals until dropped.
pub(crate) struct SignalWatcher {
    handle: Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalWatcher {
    /// Installs handlers for SIGTERM, SIGINT, SIGQUIT and SIGHUP. The first
    /// signal received triggers `shutdown`.
    pub(crate) fn install(shutdown: Shutdown) -> io::Result<Self> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name(thread_name("signals"))
            .spawn(move || {
                for signal in signals.forever() {
                    info!(target: MOTOR_TARGET, signal, "shutdown signal received");
                    shutdown.trigger();
                }
            });
        match thread {
            Ok(thread) => Ok(Self {
                handle,
                thread: Some(thread),
            }),
            Err(error) => {
                handle.close();
                Err(error)
            }
        }
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!(target: MOTOR_TARGET, "signal watcher panicked");
        }
    }
}
