//! Shared helpers for the behavioural suites.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use cmdbus_config::RelayEndpoint;

use crate::relay::RelayReporter;

pub(crate) const DEADLINE: Duration = Duration::from_secs(5);

/// Relay event captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RelayEvent {
    Attempt,
    Connected,
    Failed,
    Disconnected,
    SessionOpened,
    SessionClosed,
}

/// Reporter that timestamps every relay event.
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<(Instant, RelayEvent)>>,
}

impl RecordingReporter {
    fn record(&self, event: RelayEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), event));
    }

    pub(crate) fn events(&self) -> Vec<(Instant, RelayEvent)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&RelayEvent) -> bool) -> usize {
        self.events()
            .iter()
            .filter(|(_, event)| matches(event))
            .count()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.events()
            .into_iter()
            .filter_map(|(at, event)| matches!(event, RelayEvent::Attempt).then_some(at))
            .collect()
    }

    /// Polls until `matches` holds for at least `expected` events.
    pub(crate) fn wait_for(
        &self,
        expected: usize,
        matches: impl Fn(&RelayEvent) -> bool,
    ) -> bool {
        wait_until(|| self.count(&matches) >= expected)
    }
}

impl RelayReporter for RecordingReporter {
    fn connect_attempt(&self, _endpoint: &RelayEndpoint, _attempt: u64) {
        self.record(RelayEvent::Attempt);
    }

    fn connected(&self, _endpoint: &RelayEndpoint, _peer: SocketAddr) {
        self.record(RelayEvent::Connected);
    }

    fn connect_failed(&self, _endpoint: &RelayEndpoint, _error: &std::io::Error) {
        self.record(RelayEvent::Failed);
    }

    fn disconnected(&self, _endpoint: &RelayEndpoint, _reason: &str) {
        self.record(RelayEvent::Disconnected);
    }

    fn session_opened(&self, _session: u64, _peer: SocketAddr) {
        self.record(RelayEvent::SessionOpened);
    }

    fn session_closed(&self, _session: u64, _peer: SocketAddr) {
        self.record(RelayEvent::SessionClosed);
    }
}

/// Raw TCP peer of a relay server.
pub(crate) struct TestClient {
    stream: TcpStream,
    lines: Option<Receiver<String>>,
}

impl TestClient {
    /// Connects and starts a thread that forwards every received line.
    pub(crate) fn reading(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect test client");
        let reader = stream.try_clone().expect("clone test client stream");
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(reader).lines() {
                let Ok(line) = line else { break };
                if sender.send(line).is_err() {
                    break;
                }
            }
        });
        Self {
            stream,
            lines: Some(receiver),
        }
    }

    /// Connects without ever reading, so the server's writes back up.
    pub(crate) fn stalled(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect stalled client");
        Self {
            stream,
            lines: None,
        }
    }

    pub(crate) fn send(&self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes());
    }

    /// Writes `bytes` as they are, terminated or not.
    pub(crate) fn send_raw(&self, bytes: &[u8]) {
        (&self.stream)
            .write_all(bytes)
            .expect("write to relay server");
    }

    /// Waits for `expected`, skipping other lines.
    pub(crate) fn wait_for_line(&self, expected: &str) -> bool {
        let lines = self.lines.as_ref().expect("client was started reading");
        let deadline = Instant::now() + DEADLINE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(line) if line == expected => return true,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    }

    /// Waits for the server to close the connection.
    pub(crate) fn wait_for_close(&self) -> bool {
        let lines = self.lines.as_ref().expect("client was started reading");
        let deadline = Instant::now() + DEADLINE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match lines.recv_timeout(remaining) {
                Ok(_) => {}
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }
}

/// Accepts one connection on `listener` within [`DEADLINE`].
pub(crate) fn accept_within_deadline(listener: &TcpListener) -> TcpStream {
    listener
        .set_nonblocking(true)
        .expect("make listener non-blocking");
    let mut accepted = None;
    let connected = wait_until(|| match listener.accept() {
        Ok((stream, _)) => {
            accepted = Some(stream);
            true
        }
        Err(_) => false,
    });
    assert!(connected, "no connection arrived at {:?}", listener.local_addr());
    let stream = accepted.expect("accepted stream");
    stream
        .set_nonblocking(false)
        .expect("make accepted stream blocking");
    stream
}

/// Polls `condition` every 10 ms until it holds or [`DEADLINE`] passes.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
