//! Level-triggered readiness descriptor for framed queues.
//!
//! A connected Unix socket pair mirrors whether a queue holds complete
//! messages: one byte sits in the pair while the pending count is non-zero,
//! none otherwise. That makes a queue look exactly like a readable socket to
//! `poll(2)`.
//!
//! The descriptor does not carry one byte per queued message. A consumer
//! therefore cannot count messages by reading it: it polls for readability
//! and then drains the queue with `try_get` until it reports empty. Readable
//! means "at least one message", and that state holds for exactly as long
//! as the queue is non-empty, so `poll(2)` observes the same readiness a
//! one-byte-per-message pipe would give.

use std::io::{self, Read, Write};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixStream;

#[derive(Debug)]
pub(super) struct Readiness {
    reader: UnixStream,
    writer: UnixStream,
}

impl Readiness {
    pub(super) fn new() -> io::Result<Self> {
        let (writer, reader) = UnixStream::pair()?;
        writer.set_nonblocking(true)?;
        reader.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    /// Marks the queue readable. Called on the empty → non-empty edge.
    pub(super) fn raise(&self) -> io::Result<()> {
        (&self.writer).write_all(&[1])
    }

    /// Marks the queue idle. Called on the non-empty → empty edge.
    pub(super) fn lower(&self) -> io::Result<()> {
        let mut byte = [0_u8; 1];
        match (&self.reader).read(&mut byte) {
            Ok(_) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(error) => Err(error),
        }
    }

    pub(super) fn as_fd(&self) -> BorrowedFd<'_> {
        self.reader.as_fd()
    }
}
