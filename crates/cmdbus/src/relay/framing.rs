//! Byte-level line framing for relay sockets.

use std::io;

/// Longest line a relay peer may send, terminator included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Accumulates socket reads and yields complete lines.
///
/// Lines are kept as bytes so that UTF-8 validation happens once per line
/// and a multi-byte character split across two reads is reassembled first.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Appends `chunk` and hands every completed line to `emit`.
    ///
    /// Fails with [`io::ErrorKind::InvalidData`] once a line grows past
    /// [`MAX_LINE_BYTES`]; the buffer is unusable afterwards.
    pub(crate) fn feed(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) -> io::Result<()> {
        let mut rest = chunk;
        while let Some(index) = rest.iter().position(|byte| *byte == b'\n') {
            let (line, tail) = rest.split_at(index + 1);
            if self.pending.is_empty() {
                enforce_line_limit(line.len())?;
                emit(line);
            } else {
                self.pending.extend_from_slice(line);
                enforce_line_limit(self.pending.len())?;
                emit(&self.pending);
                self.pending.clear();
            }
            rest = tail;
        }
        self.pending.extend_from_slice(rest);
        enforce_line_limit(self.pending.len())
    }

    /// Bytes of the unterminated trailing fragment.
    pub(crate) fn fragment_len(&self) -> usize {
        self.pending.len()
    }
}

fn enforce_line_limit(size: usize) -> io::Result<()> {
    if size > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE_BYTES} byte limit"),
        ));
    }
    Ok(())
}
