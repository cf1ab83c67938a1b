//! Auto-reconnecting TCP relay client.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown as SocketShutdown, TcpStream};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use tracing::{debug, warn};

use cmdbus_config::{DEFAULT_FANOUT_CAPACITY, DEFAULT_RECONNECT_BACKOFF, RelayEndpoint};

use crate::message::Message;
use crate::queue::{FramedQueue, MessageSink, QueueError};
use crate::runtime::Shutdown;

use super::framing::LineBuffer;
use super::reporter::{RelayReporter, StructuredRelayReporter};
use super::{RELAY_TARGET, RelayError, resolve};

/// Bound on a single connection attempt.
pub(crate) const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_TIMEOUT_MS: u16 = 100;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 4096;

/// Why [`RelayClient::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// `quit` was read from the local outbound queue.
    Quit,
    /// The shared shutdown token fired.
    Shutdown,
}

enum Outcome {
    Exit(ClientExit),
    Lost(String),
}

/// Bridges a local queue pair to a remote relay server.
///
/// Lines the server sends are put into the inbound sink. Lines taken from
/// the outbound queue are written to the server, except `quit`, which ends
/// the client without being forwarded. Lost connections are retried forever
/// with a fixed backoff; outbound lines produced meanwhile wait in a bounded
/// backlog.
pub struct RelayClient {
    endpoint: RelayEndpoint,
    backoff: Duration,
    capacity: usize,
    reporter: Arc<dyn RelayReporter>,
}

impl fmt::Debug for RelayClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RelayClient")
            .field("endpoint", &self.endpoint)
            .field("backoff", &self.backoff)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl RelayClient {
    /// Creates a client for `endpoint` with default backoff and backlog.
    #[must_use]
    pub fn new(endpoint: RelayEndpoint) -> Self {
        Self {
            endpoint,
            backoff: DEFAULT_RECONNECT_BACKOFF,
            capacity: DEFAULT_FANOUT_CAPACITY,
            reporter: Arc::new(StructuredRelayReporter::new()),
        }
    }

    /// Sets the pause between connection attempts.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets how many outbound lines are kept while disconnected.
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

    /// Remote endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &RelayEndpoint {
        &self.endpoint
    }

    /// Runs until `quit` is read from `outbound` or `shutdown` fires.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] when the outbound queue cannot be watched or
    /// `poll(2)` fails. Connection failures are retried, not returned.
    pub fn run(
        &self,
        inbound: &dyn MessageSink,
        outbound: &FramedQueue,
        shutdown: &Shutdown,
    ) -> Result<ClientExit, RelayError> {
        let mut backlog = VecDeque::new();
        let mut attempt = 0_u64;
        loop {
            if shutdown.is_triggered() {
                return Ok(ClientExit::Shutdown);
            }
            attempt += 1;
            self.reporter.connect_attempt(&self.endpoint, attempt);
            match self.connect() {
                Ok(stream) => {
                    attempt = 0;
                    match self.serve(&stream, inbound, outbound, &mut backlog, shutdown)? {
                        Outcome::Exit(exit) => {
                            shutdown_socket(&stream);
                            return Ok(exit);
                        }
                        Outcome::Lost(reason) => {
                            shutdown_socket(&stream);
                            self.reporter.disconnected(&self.endpoint, &reason);
                        }
                    }
                }
                Err(error) => self.reporter.connect_failed(&self.endpoint, &error),
            }
            if let Some(exit) = self.wait_backoff(outbound, &mut backlog, shutdown) {
                return Ok(exit);
            }
        }
    }

    fn connect(&self) -> io::Result<TcpStream> {
        let addr = resolve(&self.endpoint).map_err(io::Error::other)?;
        let stream = TcpStream::connect_timeout(&addr, CONNECTION_TIMEOUT)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(CONNECTION_TIMEOUT))?;
        self.reporter
            .connected(&self.endpoint, stream.peer_addr().unwrap_or(addr));
        Ok(stream)
    }

    fn serve(
        &self,
        stream: &TcpStream,
        inbound: &dyn MessageSink,
        outbound: &FramedQueue,
        backlog: &mut VecDeque<Message>,
        shutdown: &Shutdown,
    ) -> Result<Outcome, RelayError> {
        while let Some(message) = backlog.front() {
            if let Err(error) = write_line(stream, message) {
                return Ok(Outcome::Lost(error.to_string()));
            }
            backlog.pop_front();
        }

        let mut framing = LineBuffer::default();
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            if shutdown.is_triggered() {
                return Ok(Outcome::Exit(ClientExit::Shutdown));
            }
            let (socket_ready, queue_ready) = wait_readable(stream, outbound)?;

            if queue_ready {
                while let Ok(message) = outbound.try_get() {
                    if message.is_quit() {
                        return Ok(Outcome::Exit(ClientExit::Quit));
                    }
                    if let Err(error) = write_line(stream, &message) {
                        backlog.push_back(message);
                        return Ok(Outcome::Lost(error.to_string()));
                    }
                }
            }

            if socket_ready {
                let read = match read_chunk(stream, &mut chunk) {
                    Ok(0) => {
                        return Ok(Outcome::Lost("server closed the connection".into()));
                    }
                    Ok(read) => read,
                    Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                    Err(error) => return Ok(Outcome::Lost(error.to_string())),
                };
                let data = chunk.get(..read).unwrap_or_default();
                let fed = framing.feed(data, |line| forward_line(inbound, line));
                if let Err(error) = fed {
                    return Ok(Outcome::Lost(error.to_string()));
                }
            }
        }
    }

    /// Sleeps for the backoff while still honouring a local `quit`.
    fn wait_backoff(
        &self,
        outbound: &FramedQueue,
        backlog: &mut VecDeque<Message>,
        shutdown: &Shutdown,
    ) -> Option<ClientExit> {
        let deadline = Instant::now() + self.backoff;
        loop {
            if shutdown.is_triggered() {
                return Some(ClientExit::Shutdown);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match outbound.get_timeout(remaining.min(POLL_INTERVAL)) {
                Ok(message) if message.is_quit() => return Some(ClientExit::Quit),
                Ok(message) => self.hold(backlog, message),
                Err(_) => {}
            }
        }
    }

    fn hold(&self, backlog: &mut VecDeque<Message>, message: Message) {
        if backlog.len() >= self.capacity {
            debug!(
                target: RELAY_TARGET,
                endpoint = %self.endpoint,
                "backlog full while disconnected, dropping message"
            );
            return;
        }
        backlog.push_back(message);
    }
}

fn wait_readable(
    stream: &TcpStream,
    outbound: &FramedQueue,
) -> Result<(bool, bool), RelayError> {
    let readiness = outbound
        .readiness_fd()
        .map_err(|source| RelayError::Readiness { source })?;
    let mut fds = [
        PollFd::new(stream.as_fd(), PollFlags::POLLIN),
        PollFd::new(readiness, PollFlags::POLLIN),
    ];
    match poll(&mut fds, PollTimeout::from(POLL_TIMEOUT_MS)) {
        Ok(_) => {}
        Err(Errno::EINTR) => return Ok((false, false)),
        Err(source) => return Err(RelayError::Poll { source }),
    }
    let [socket, queue] = &fds;
    let wake = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    let socket_ready = socket
        .revents()
        .is_some_and(|events| events.intersects(wake));
    let queue_ready = queue
        .revents()
        .is_some_and(|events| events.contains(PollFlags::POLLIN));
    Ok((socket_ready, queue_ready))
}

fn read_chunk(mut stream: &TcpStream, chunk: &mut [u8]) -> io::Result<usize> {
    stream.read(chunk)
}

fn write_line(mut stream: &TcpStream, message: &Message) -> io::Result<()> {
    stream.write_all(message.as_bytes())?;
    stream.flush()
}

fn forward_line(inbound: &dyn MessageSink, line: &[u8]) {
    match inbound.send_bytes(line) {
        Ok(()) => {}
        Err(error @ QueueError::TypeMismatch { .. }) => {
            warn!(target: RELAY_TARGET, %error, "dropping non-text line from server");
        }
        Err(error) => {
            warn!(target: RELAY_TARGET, %error, "failed to deliver line from server");
        }
    }
}

fn shutdown_socket(stream: &TcpStream) {
    if let Err(error) = stream.shutdown(SocketShutdown::Both)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(target: RELAY_TARGET, %error, "socket shutdown failed");
    }
}
