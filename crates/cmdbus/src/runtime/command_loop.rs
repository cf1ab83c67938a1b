//! Single-threaded command loop driving a dispatcher from an inbox.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::message::{Command, PERIODIC_VERB, QUIT_VERB};
use crate::telemetry::thread_name;

use super::{Endpoint, RUNTIME_TARGET};

/// Upper bound on how long the loop sleeps before rechecking shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Runs handlers for every message that reaches an endpoint's inbox.
///
/// Handlers run one at a time on the thread that calls [`run`](Self::run).
/// `quit` is built in: it runs the registered `quit` handler, if any, sends
/// `quit` downstream and triggers shutdown.
pub struct CommandLoop<S> {
    endpoint: Endpoint,
    state: S,
    dispatcher: Dispatcher<S>,
    period: Option<Duration>,
}

impl<S> CommandLoop<S> {
    /// Creates a loop over `endpoint` owning `state`.
    #[must_use]
    pub fn new(endpoint: Endpoint, state: S, dispatcher: Dispatcher<S>) -> Self {
        Self {
            endpoint,
            state,
            dispatcher,
            period: None,
        }
    }

    /// Injects a `periodic` command into the inbox every `period`.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    /// Runs until `quit` arrives or shutdown is triggered elsewhere, and
    /// returns the final state.
    #[must_use = "the final state is only available from the return value"]
    pub fn run(mut self) -> S {
        let ticker = self
            .period
            .and_then(|period| spawn_ticker(&self.endpoint, period));
        info!(
            target: RUNTIME_TARGET,
            verbs = ?self.dispatcher.verbs(),
            "command loop started"
        );

        let shutdown = self.endpoint.shutdown().clone();
        loop {
            match self.endpoint.receive_timeout(POLL_INTERVAL) {
                Ok(message) => {
                    let Some(command) = message.command() else {
                        continue;
                    };
                    if command.is(QUIT_VERB) {
                        self.quit(&command);
                        break;
                    }
                    self.dispatch(&command);
                }
                Err(_) if shutdown.is_triggered() => {
                    self.drain_for_quit();
                    break;
                }
                Err(_) => {}
            }
        }

        if let Some(handle) = ticker
            && handle.join().is_err()
        {
            warn!(target: RUNTIME_TARGET, "periodic ticker panicked");
        }
        info!(target: RUNTIME_TARGET, "command loop stopped");
        self.state
    }

    fn dispatch(&mut self, command: &Command) {
        if let Err(error) = self
            .dispatcher
            .dispatch(&mut self.state, command.verb(), command.argument())
        {
            warn!(
                target: RUNTIME_TARGET,
                verb = %command.verb(),
                %error,
                "command dispatch failed"
            );
        }
    }

    fn quit(&mut self, command: &Command) {
        if self.dispatcher.contains(QUIT_VERB) {
            self.dispatch(command);
        }
        if let Err(error) = self.endpoint.send(QUIT_VERB) {
            debug!(target: RUNTIME_TARGET, %error, "could not forward quit downstream");
        }
        self.endpoint.shutdown().trigger();
    }

    /// Shutdown came from outside. A `quit` already queued still gets its
    /// handler run so the owner can release resources.
    fn drain_for_quit(&mut self) {
        while let Ok(message) = self.endpoint.inbox().try_get() {
            if let Some(command) = message.command()
                && command.is(QUIT_VERB)
            {
                self.quit(&command);
                return;
            }
        }
    }
}

fn spawn_ticker(endpoint: &Endpoint, period: Duration) -> Option<JoinHandle<()>> {
    let inbox = Arc::clone(endpoint.inbox());
    let shutdown = endpoint.shutdown().clone();
    let tick = format!("{PERIODIC_VERB}\n");
    thread::Builder::new()
        .name(thread_name("periodic"))
        .spawn(move || {
            while !shutdown.wait_timeout(period) {
                inbox.put(&tick);
            }
        })
        .inspect_err(|error| {
            warn!(target: RUNTIME_TARGET, %error, "failed to spawn periodic ticker");
        })
        .ok()
}
