//! Wiring of task, relays and foreground consumer into one topology.
//!
//! The launcher owns startup and shutdown ordering. It validates the
//! topology before any thread starts, runs the consumer on the calling
//! thread and joins every background thread before returning.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use cmdbus_config::{
    Config, DEFAULT_FANOUT_CAPACITY, DEFAULT_RECONNECT_BACKOFF, RelayEndpoint,
};

use crate::dispatch::panic_message;
use crate::message::QUIT_VERB;
use crate::queue::{FanOut, FramedQueue, MessageSink, MessageSource};
use crate::relay::{
    RelayClient, RelayError, RelayReporter, RelayServer, RelayServerHandle,
    StructuredRelayReporter,
};
use crate::runtime::{Endpoint, Shutdown};
use crate::telemetry::thread_name;

const LAUNCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::launcher");

type Task = Box<dyn FnOnce(Endpoint) + Send + 'static>;
type Consumer = Box<dyn FnOnce(Endpoint)>;

/// Topologies the launcher refuses to start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Relay servers were requested but there is no task to expose.
    #[error("relay servers require a task to expose")]
    ServersWithoutTask,
    /// A relay client replaces the local task; both were given.
    #[error("a relay client cannot be combined with a local task")]
    ClientWithTask,
    /// A relay client was requested but nothing would consume its messages.
    #[error("a relay client requires a consumer")]
    ClientWithoutConsumer,
    /// Neither a task nor a relay client was configured.
    #[error("nothing to run: configure a task or a relay client")]
    NothingToRun,
}

/// Errors returned by [`Launcher::run`].
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The topology was rejected before any thread started.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A relay could not be bound or started.
    #[error(transparent)]
    Relay(#[from] RelayError),
    /// A launcher thread could not be spawned.
    #[error("failed to spawn thread '{thread}': {source}")]
    Spawn {
        /// Thread name.
        thread: &'static str,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A participant panicked. Reported after every thread was joined.
    #[error("thread '{thread}' panicked: {message}")]
    ThreadPanic {
        /// Participant name.
        thread: &'static str,
        /// Panic payload, when it was a string.
        message: String,
    },
}

enum PendingServer {
    Endpoint(RelayEndpoint),
    Bound(RelayServer),
}

/// Builder and runner for a task / relay / consumer topology.
pub struct Launcher {
    task: Option<Task>,
    consumer: Option<Consumer>,
    servers: Vec<PendingServer>,
    client: Option<RelayEndpoint>,
    capacity: usize,
    backoff: Duration,
    shutdown: Shutdown,
    reporter: Arc<dyn RelayReporter>,
}

impl Default for Launcher {
    fn default() -> Self {
        Self {
            task: None,
            consumer: None,
            servers: Vec::new(),
            client: None,
            capacity: DEFAULT_FANOUT_CAPACITY,
            backoff: DEFAULT_RECONNECT_BACKOFF,
            shutdown: Shutdown::new(),
            reporter: Arc::new(StructuredRelayReporter::new()),
        }
    }
}

impl fmt::Debug for Launcher {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Launcher")
            .field("task", &self.task.is_some())
            .field("consumer", &self.consumer.is_some())
            .field("servers", &self.servers.len())
            .field("client", &self.client)
            .field("capacity", &self.capacity)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Launcher {
    /// Creates an empty launcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a launcher carrying the relay settings from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new().with_config(config)
    }

    /// Applies relay endpoints, fan-out capacity and reconnect backoff.
    #[must_use]
    pub fn with_config(mut self, config: &Config) -> Self {
        self.servers.extend(
            config
                .relay_servers
                .iter()
                .cloned()
                .map(PendingServer::Endpoint),
        );
        if let Some(client) = &config.relay_client {
            self.client = Some(client.clone());
        }
        self.capacity = config.fanout_capacity;
        self.backoff = config.reconnect_backoff();
        self
    }

    /// Sets the background task. It runs on its own thread.
    #[must_use]
    pub fn task<F>(mut self, task: F) -> Self
    where
        F: FnOnce(Endpoint) + Send + 'static,
    {
        self.task = Some(Box::new(task));
        self
    }

    /// Sets the foreground consumer. It runs on the thread calling
    /// [`run`](Self::run).
    #[must_use]
    pub fn consumer<F>(mut self, consumer: F) -> Self
    where
        F: FnOnce(Endpoint) + 'static,
    {
        self.consumer = Some(Box::new(consumer));
        self
    }

    /// Adds a relay server to bind at launch.
    #[must_use]
    pub fn relay_server(mut self, endpoint: RelayEndpoint) -> Self {
        self.servers.push(PendingServer::Endpoint(endpoint));
        self
    }

    /// Adds a relay server that is already bound.
    #[must_use]
    pub fn bound_relay_server(mut self, server: RelayServer) -> Self {
        self.servers.push(PendingServer::Bound(server));
        self
    }

    /// Connects the consumer to a remote task instead of a local one.
    #[must_use]
    pub fn relay_client(mut self, endpoint: RelayEndpoint) -> Self {
        self.client = Some(endpoint);
        self
    }

    /// Shares an externally owned shutdown token, for example one fired by a
    /// signal handler.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Replaces the relay lifecycle reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn RelayReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Shutdown token of the topology.
    #[must_use]
    pub fn shutdown_token(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Checks the topology without starting anything.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigurationError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match (&self.task, &self.client) {
            (Some(_), Some(_)) => Err(ConfigurationError::ClientWithTask),
            (None, _) if !self.servers.is_empty() => {
                Err(ConfigurationError::ServersWithoutTask)
            }
            (None, Some(_)) if self.consumer.is_none() => {
                Err(ConfigurationError::ClientWithoutConsumer)
            }
            (None, None) => Err(ConfigurationError::NothingToRun),
            _ => Ok(()),
        }
    }

    /// Starts every participant, runs the consumer and tears everything
    /// down once it returns (or, without a consumer, once shutdown fires).
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Configuration`] or [`LaunchError::Relay`]
    /// before any thread starts, and [`LaunchError::ThreadPanic`] after the
    /// final join when a participant panicked.
    pub fn run(self) -> Result<(), LaunchError> {
        self.validate()?;
        let Self {
            task,
            consumer,
            servers,
            client,
            capacity,
            backoff,
            shutdown,
            reporter,
        } = self;

        let servers = servers
            .into_iter()
            .map(|pending| match pending {
                PendingServer::Endpoint(endpoint) => RelayServer::bind(&endpoint),
                PendingServer::Bound(server) => Ok(server),
            })
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|server| {
                server
                    .with_capacity(capacity)
                    .with_reporter(Arc::clone(&reporter))
            })
            .collect::<Vec<_>>();

        let mut running = Running::new(shutdown.clone());
        let consumer_inbox = Arc::new(FramedQueue::new());

        let consumer_endpoint = match (task, client) {
            (Some(task), _) => {
                running.start_task(task, servers, &consumer_inbox, consumer.is_some())?
            }
            (None, Some(endpoint)) => {
                let client = RelayClient::new(endpoint)
                    .with_backoff(backoff)
                    .with_capacity(capacity)
                    .with_reporter(Arc::clone(&reporter));
                running.start_client(client, &consumer_inbox)?
            }
            (None, None) => return Err(ConfigurationError::NothingToRun.into()),
        };

        match consumer {
            Some(consumer) => {
                info!(target: LAUNCHER_TARGET, "running consumer");
                let outcome = catch_unwind(AssertUnwindSafe(|| consumer(consumer_endpoint)));
                if let Err(payload) = outcome {
                    running.record_panic("consumer", payload.as_ref());
                }
            }
            None => {
                info!(target: LAUNCHER_TARGET, "running headless until shutdown");
                shutdown.wait();
            }
        }

        running.stop()
    }
}

/// Background participants of a launched topology.
struct Running {
    shutdown: Shutdown,
    task: Option<(JoinHandle<()>, Arc<FramedQueue>)>,
    servers: Vec<RelayServerHandle>,
    client: Option<(JoinHandle<()>, Arc<FramedQueue>)>,
    panic: Option<LaunchError>,
}

impl Running {
    fn new(shutdown: Shutdown) -> Self {
        Self {
            shutdown,
            task: None,
            servers: Vec::new(),
            client: None,
            panic: None,
        }
    }

    /// Starts the task and its relay servers and returns the consumer's
    /// endpoint.
    fn start_task(
        &mut self,
        task: Task,
        servers: Vec<RelayServer>,
        consumer_inbox: &Arc<FramedQueue>,
        with_consumer: bool,
    ) -> Result<Endpoint, LaunchError> {
        let task_inbox = Arc::new(FramedQueue::new());
        let mut fan_out = FanOut::new();
        if with_consumer {
            fan_out.push(Arc::clone(consumer_inbox) as Arc<dyn MessageSink>);
        }
        let mut server_queues = Vec::with_capacity(servers.len());
        for _ in &servers {
            let queue = Arc::new(FramedQueue::new());
            fan_out.push(Arc::clone(&queue) as Arc<dyn MessageSink>);
            server_queues.push(queue);
        }

        let task_endpoint = Endpoint::new(
            Arc::clone(&task_inbox),
            Arc::new(fan_out),
            self.shutdown.clone(),
        );
        let shutdown = self.shutdown.clone();
        let handle = thread::Builder::new()
            .name(thread_name("task"))
            .spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| task(task_endpoint)));
                shutdown.trigger();
                if let Err(payload) = outcome {
                    resume_unwind(payload);
                }
            })
            .map_err(|source| LaunchError::Spawn {
                thread: "task",
                source,
            })?;
        self.task = Some((handle, Arc::clone(&task_inbox)));

        for (server, queue) in servers.into_iter().zip(server_queues) {
            let endpoint = server.endpoint().clone();
            let handle = server.start(
                Arc::clone(&task_inbox) as Arc<dyn MessageSink>,
                queue as Arc<dyn MessageSource>,
                self.shutdown.clone(),
            );
            match handle {
                Ok(handle) => {
                    info!(
                        target: LAUNCHER_TARGET,
                        %endpoint,
                        addr = %handle.local_addr(),
                        "relay server listening"
                    );
                    self.servers.push(handle);
                }
                Err(error) => return Err(self.fail(error.into())),
            }
        }

        Ok(Endpoint::new(
            Arc::clone(consumer_inbox),
            task_inbox,
            self.shutdown.clone(),
        ))
    }

    /// Starts the relay client and returns the consumer's endpoint.
    fn start_client(
        &mut self,
        client: RelayClient,
        consumer_inbox: &Arc<FramedQueue>,
    ) -> Result<Endpoint, LaunchError> {
        let outbound = Arc::new(FramedQueue::new());
        let inbound = Arc::clone(consumer_inbox);
        let queue = Arc::clone(&outbound);
        let shutdown = self.shutdown.clone();
        info!(
            target: LAUNCHER_TARGET,
            endpoint = %client.endpoint(),
            "starting relay client"
        );
        let handle = thread::Builder::new()
            .name(thread_name("relay-client"))
            .spawn(move || match client.run(inbound.as_ref(), &queue, &shutdown) {
                Ok(exit) => info!(target: LAUNCHER_TARGET, ?exit, "relay client finished"),
                Err(error) => {
                    warn!(target: LAUNCHER_TARGET, %error, "relay client failed");
                    shutdown.trigger();
                }
            })
            .map_err(|source| LaunchError::Spawn {
                thread: "relay-client",
                source,
            })?;
        self.client = Some((handle, Arc::clone(&outbound)));

        Ok(Endpoint::new(
            Arc::clone(consumer_inbox),
            outbound,
            self.shutdown.clone(),
        ))
    }

    fn record_panic(&mut self, thread: &'static str, payload: &(dyn Any + Send)) {
        warn!(target: LAUNCHER_TARGET, thread, "participant panicked");
        self.panic.get_or_insert_with(|| LaunchError::ThreadPanic {
            thread,
            message: panic_message(payload),
        });
    }

    fn abort(&mut self) {
        self.shutdown.trigger();
        if let Some((_, inbox)) = &self.task {
            inbox.put(&format!("{QUIT_VERB}\n"));
        }
    }

    /// Tears down whatever already started after a failed launch step and
    /// hands `error` back. Teardown failures are logged, not returned.
    fn fail(&mut self, error: LaunchError) -> LaunchError {
        warn!(target: LAUNCHER_TARGET, %error, "launch failed, stopping started participants");
        if let Err(teardown) = self.teardown() {
            warn!(
                target: LAUNCHER_TARGET,
                error = %teardown,
                "teardown after failed launch reported an error"
            );
        }
        error
    }

    /// Triggers shutdown, wakes every participant and joins them all.
    fn stop(mut self) -> Result<(), LaunchError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), LaunchError> {
        self.abort();
        if let Some((_, outbound)) = &self.client {
            outbound.put(&format!("{QUIT_VERB}\n"));
        }

        if let Some((handle, _)) = self.task.take()
            && let Err(payload) = handle.join()
        {
            self.record_panic("task", payload.as_ref());
        }
        let mut relay_error = None;
        for server in std::mem::take(&mut self.servers) {
            server.shutdown();
            if let Err(error) = server.join() {
                warn!(
                    target: LAUNCHER_TARGET,
                    %error,
                    "relay server did not stop cleanly"
                );
                relay_error.get_or_insert(error);
            }
        }
        if let Some((handle, _)) = self.client.take()
            && let Err(payload) = handle.join()
        {
            self.record_panic("relay-client", payload.as_ref());
        }

        info!(target: LAUNCHER_TARGET, "all participants stopped");
        match (self.panic.take(), relay_error) {
            (Some(panic), _) => Err(panic),
            (None, Some(error)) => Err(error.into()),
            (None, None) => Ok(()),
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.abort();
    }
}
