//! TCP relay server exposing a task to any number of remote consumers.

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use cmdbus_config::{DEFAULT_FANOUT_CAPACITY, RelayEndpoint};

use crate::queue::{MessageSink, MessageSource};
use crate::runtime::Shutdown;
use crate::telemetry::thread_name;

use super::reporter::{RelayReporter, StructuredRelayReporter};
use super::session::{Session, SessionTable};
use super::{RELAY_TARGET, RelayError, resolve};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);
const DISTRIBUTOR_POLL: Duration = Duration::from_millis(100);

/// Bound relay server, ready to start.
pub struct RelayServer {
    endpoint: RelayEndpoint,
    listener: TcpListener,
    capacity: usize,
    reporter: Arc<dyn RelayReporter>,
}

impl fmt::Debug for RelayServer {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RelayServer")
            .field("endpoint", &self.endpoint)
            .field("listener", &self.listener)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    /// Resolves and binds `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] when the host does not resolve or the address
    /// cannot be bound.
    pub fn bind(endpoint: &RelayEndpoint) -> Result<Self, RelayError> {
        let addr = resolve(endpoint)?;
        let listener =
            TcpListener::bind(addr).map_err(|source| RelayError::Bind { addr, source })?;
        Ok(Self {
            endpoint: endpoint.clone(),
            listener,
            capacity: DEFAULT_FANOUT_CAPACITY,
            reporter: Arc::new(StructuredRelayReporter::new()),
        })
    }

    /// Sets the capacity of each session's outbound sub-queue.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Replaces the lifecycle reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn RelayReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    /// Address actually bound, useful with port 0.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Socket`] when the socket cannot report it.
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener
            .local_addr()
            .map_err(|source| RelayError::Socket { source })
    }

    /// Starts the accept loop and the fan-out distributor.
    ///
    /// Lines read from any client go to `inbound`. Messages taken from
    /// `outbound` are offered to every client. The server stops when it reads
    /// `quit` from `outbound`, when `shutdown` fires, or through the returned
    /// handle.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] when the listener cannot be made non-blocking
    /// or a thread cannot be spawned.
    pub fn start(
        self,
        inbound: Arc<dyn MessageSink>,
        outbound: Arc<dyn MessageSource>,
        shutdown: Shutdown,
    ) -> Result<RelayServerHandle, RelayError> {
        self.listener
            .set_nonblocking(true)
            .map_err(|source| RelayError::Socket { source })?;
        let local_addr = self.local_addr()?;
        let stop = Shutdown::new();
        let table = Arc::new(SessionTable::new(self.capacity));

        let distributor = {
            let table = Arc::clone(&table);
            let stop = stop.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name(thread_name("relay-distributor"))
                .spawn(move || distribute(outbound.as_ref(), &table, &stop, &shutdown))
                .map_err(|source| RelayError::Spawn {
                    thread: "distributor",
                    source,
                })?
        };

        let accept = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(thread_name("relay-accept"))
                .spawn(move || run_accept_loop(&self, &table, &inbound, &stop, &shutdown))
        };
        let accept = match accept {
            Ok(handle) => handle,
            Err(source) => {
                stop.trigger();
                if distributor.join().is_err() {
                    warn!(target: RELAY_TARGET, "distributor panicked during startup");
                }
                return Err(RelayError::Spawn {
                    thread: "accept",
                    source,
                });
            }
        };

        Ok(RelayServerHandle {
            local_addr,
            stop,
            accept: Some(accept),
            distributor: Some(distributor),
        })
    }
}

/// Handle to a running relay server.
#[derive(Debug)]
pub struct RelayServerHandle {
    local_addr: SocketAddr,
    stop: Shutdown,
    accept: Option<JoinHandle<()>>,
    distributor: Option<JoinHandle<()>>,
}

impl RelayServerHandle {
    /// Address the server listens on.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Asks the server to stop.
    pub fn shutdown(&self) {
        self.stop.trigger();
    }

    /// True once the server has begun stopping.
    #[must_use]
    pub fn is_stopping(&self) -> bool {
        self.stop.is_triggered()
    }

    /// Waits for the server threads, including every session, to finish.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ThreadPanic`] when a server thread panicked.
    pub fn join(mut self) -> Result<(), RelayError> {
        let distributor = self.distributor.take().map(JoinHandle::join);
        let accept = self.accept.take().map(JoinHandle::join);
        if matches!(distributor, Some(Err(_))) {
            return Err(RelayError::ThreadPanic {
                thread: "distributor",
            });
        }
        if matches!(accept, Some(Err(_))) {
            return Err(RelayError::ThreadPanic { thread: "accept" });
        }
        Ok(())
    }
}

impl Drop for RelayServerHandle {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

fn distribute(
    outbound: &dyn MessageSource,
    table: &SessionTable,
    stop: &Shutdown,
    shutdown: &Shutdown,
) {
    while !stop.is_triggered() && !shutdown.is_triggered() {
        let Ok(message) = outbound.receive_timeout(DISTRIBUTOR_POLL) else {
            continue;
        };
        if message.is_quit() {
            info!(target: RELAY_TARGET, "quit observed, stopping relay server");
            break;
        }
        table.broadcast(&message);
    }
    stop.trigger();
    table.close_all();
}

fn run_accept_loop(
    server: &RelayServer,
    table: &Arc<SessionTable>,
    inbound: &Arc<dyn MessageSink>,
    stop: &Shutdown,
    shutdown: &Shutdown,
) {
    info!(
        target: RELAY_TARGET,
        endpoint = %server.endpoint,
        "relay server active"
    );
    let mut sessions: Vec<Session> = Vec::new();
    let mut last_error = None::<io::ErrorKind>;
    while !stop.is_triggered() && !shutdown.is_triggered() {
        match server.listener.accept() {
            Ok((stream, peer)) => {
                last_error = None;
                start_session(server, stream, peer, table, inbound, &mut sessions);
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                reap_finished(&mut sessions);
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(target: RELAY_TARGET, %error, "relay accept error");
                }
                last_error = Some(kind);
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }

    stop.trigger();
    table.close_all();
    for session in sessions {
        if !session.join() {
            warn!(target: RELAY_TARGET, "relay session thread panicked");
        }
    }
    info!(target: RELAY_TARGET, endpoint = %server.endpoint, "relay server stopped");
}

fn start_session(
    server: &RelayServer,
    stream: TcpStream,
    peer: SocketAddr,
    table: &Arc<SessionTable>,
    inbound: &Arc<dyn MessageSink>,
    sessions: &mut Vec<Session>,
) {
    match Session::spawn(stream, peer, table, inbound, &server.reporter) {
        Ok(session) => {
            sessions.push(session);
            debug!(target: RELAY_TARGET, live = table.len(), "session registered");
        }
        Err(error) => {
            warn!(
                target: RELAY_TARGET,
                peer = %peer,
                %error,
                "failed to start relay session"
            );
        }
    }
}

fn reap_finished(sessions: &mut Vec<Session>) {
    let (finished, live): (Vec<Session>, Vec<Session>) = std::mem::take(sessions)
        .into_iter()
        .partition(Session::is_finished);
    *sessions = live;
    for session in finished {
        if !session.join() {
            warn!(target: RELAY_TARGET, "relay session thread panicked");
        }
    }
}
