//! Per-connection sessions of a relay server and the fan-out table.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown as SocketShutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::message::Message;
use crate::queue::{MessageSink, QueueError};
use crate::telemetry::thread_name;

use super::RELAY_TARGET;
use super::framing::LineBuffer;
use super::reporter::RelayReporter;

const READ_CHUNK: usize = 4096;

/// Live sessions keyed by id, each with its bounded outbound sub-queue.
#[derive(Debug)]
pub(crate) struct SessionTable {
    sessions: Mutex<HashMap<u64, SessionEntry>>,
    next_id: AtomicU64,
    capacity: usize,
}

#[derive(Debug)]
struct SessionEntry {
    sender: SyncSender<Message>,
    stream: TcpStream,
}

impl SessionTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Registers a session and returns its id plus the receiving end of its
    /// sub-queue.
    pub(crate) fn insert(&self, stream: TcpStream) -> (u64, Receiver<Message>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::sync_channel(self.capacity);
        self.lock().insert(id, SessionEntry { sender, stream });
        (id, receiver)
    }

    /// Removes a session. Dropping its sender ends the writer thread.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Offers `message` to every session without blocking. Sessions whose
    /// sub-queue is full miss this message.
    pub(crate) fn broadcast(&self, message: &Message) -> usize {
        let sessions = self.lock();
        let mut delivered = 0;
        for (id, entry) in sessions.iter() {
            match entry.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(
                        target: RELAY_TARGET,
                        session = id,
                        "session sub-queue full, dropping message"
                    );
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        delivered
    }

    /// Shuts every session socket down and empties the table.
    pub(crate) fn close_all(&self) {
        let drained: Vec<SessionEntry> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            shutdown_socket(&entry.stream);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reader and writer threads of one accepted connection.
pub(crate) struct Session {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Session {
    /// Registers `stream` in `table` and starts its threads.
    pub(crate) fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        table: &Arc<SessionTable>,
        inbound: &Arc<dyn MessageSink>,
        reporter: &Arc<dyn RelayReporter>,
    ) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;
        let writer_stream = stream.try_clone()?;
        let (id, receiver) = table.insert(stream);
        reporter.session_opened(id, peer);

        let writer = thread::Builder::new()
            .name(thread_name(&format!("session-{id}-writer")))
            .spawn(move || write_session(id, &writer_stream, &receiver));
        let writer = match writer {
            Ok(handle) => handle,
            Err(error) => {
                table.remove(id);
                shutdown_socket(&reader_stream);
                return Err(error);
            }
        };

        let reader = {
            let table = Arc::clone(table);
            let inbound = Arc::clone(inbound);
            let reporter = Arc::clone(reporter);
            thread::Builder::new()
                .name(thread_name(&format!("session-{id}-reader")))
                .spawn(move || {
                    read_session(id, &reader_stream, inbound.as_ref());
                    table.remove(id);
                    shutdown_socket(&reader_stream);
                    reporter.session_closed(id, peer);
                })
        };
        match reader {
            Ok(reader) => Ok(Self { reader, writer }),
            Err(error) => {
                table.remove(id);
                Err(error)
            }
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.reader.is_finished() && self.writer.is_finished()
    }

    /// Joins both threads. Returns `false` when either panicked.
    pub(crate) fn join(self) -> bool {
        let reader = self.reader.join().is_ok();
        let writer = self.writer.join().is_ok();
        reader && writer
    }
}

fn read_session(id: u64, mut stream: &TcpStream, inbound: &dyn MessageSink) {
    let mut framing = LineBuffer::default();
    let mut chunk = [0_u8; READ_CHUNK];
    loop {
        let read = match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                debug!(target: RELAY_TARGET, session = id, %error, "session read ended");
                break;
            }
        };
        let data = chunk.get(..read).unwrap_or_default();
        let fed = framing.feed(data, |line| forward_line(id, inbound, line));
        if let Err(error) = fed {
            warn!(target: RELAY_TARGET, session = id, %error, "closing session");
            return;
        }
    }
    if framing.fragment_len() > 0 {
        debug!(
            target: RELAY_TARGET,
            session = id,
            bytes = framing.fragment_len(),
            "discarding unterminated fragment"
        );
    }
}

fn forward_line(id: u64, inbound: &dyn MessageSink, line: &[u8]) {
    match inbound.send_bytes(line) {
        Ok(()) => {}
        Err(error @ QueueError::TypeMismatch { .. }) => {
            warn!(target: RELAY_TARGET, session = id, %error, "dropping non-text line");
        }
        Err(error) => {
            warn!(target: RELAY_TARGET, session = id, %error, "failed to forward line");
        }
    }
}

fn write_session(id: u64, mut stream: &TcpStream, receiver: &Receiver<Message>) {
    for message in receiver {
        let written = stream
            .write_all(message.as_bytes())
            .and_then(|()| stream.flush());
        if let Err(error) = written {
            debug!(target: RELAY_TARGET, session = id, %error, "session write failed");
            shutdown_socket(stream);
            return;
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

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use rstest::rstest;

    use super::*;

    fn loopback_stream() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).expect("connect loopback");
        let (server, _) = listener.accept().expect("accept loopback");
        (server, client)
    }

    fn line(text: &str) -> Message {
        Message::line(text).expect("single line")
    }

    #[rstest]
    fn saturated_session_drops_without_affecting_others() {
        let table = SessionTable::new(2);
        let (busy, _busy_peer) = loopback_stream();
        let (idle, _idle_peer) = loopback_stream();
        let (_, busy_rx) = table.insert(busy);
        let (_, idle_rx) = table.insert(idle);

        let mut received = Vec::new();
        for index in 0..10 {
            let delivered = table.broadcast(&line(&format!("POS {index}")));
            assert!(delivered >= 1);
            received.push(busy_rx.try_recv().expect("drained session receives"));
        }

        let received: Vec<&str> = received.iter().map(Message::text).collect();
        assert_eq!(received.len(), 10);
        assert_eq!(received.last(), Some(&"POS 9"));
        let kept: Vec<String> = idle_rx
            .try_iter()
            .map(|message| message.text().to_owned())
            .collect();
        assert_eq!(kept, ["POS 0", "POS 1"]);
    }

    #[rstest]
    fn close_all_empties_table_and_ends_receivers() {
        let table = SessionTable::new(4);
        let (stream, _peer) = loopback_stream();
        let (_, receiver) = table.insert(stream);
        assert_eq!(table.len(), 1);

        table.close_all();

        assert_eq!(table.len(), 0);
        assert!(receiver.recv().is_err());
    }
}
