//! Per-connection record loop.
//!
//! One accepted connection is driven to completion:
//! receive -> frame -> append -> echo the whole log, repeated until the peer
//! closes, an I/O error ends the session, or shutdown is requested.
//!
//! The socket and packet buffer are owned by `Connection` and released when
//! it is dropped, whichever way `serve` returns.

use crate::runtime::buffer::{BufferError, PacketBuffer};
use crate::runtime::lifecycle::Lifecycle;
use crate::storage::LogStore;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::io::AsRawFd;
use tracing::{debug, trace};

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The client closed its side.
    PeerClosed,
    /// Shutdown was requested while the session was active.
    Shutdown,
}

/// Error that ends a single connection.
#[derive(Debug)]
pub enum ConnectionError {
    Receive(io::Error),
    Buffer(BufferError),
    Append(io::Error),
    Echo(io::Error),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Receive(e) => write!(f, "recv failed: {e}"),
            ConnectionError::Buffer(e) => write!(f, "dropping connection: {e}"),
            ConnectionError::Append(e) => write!(f, "append to record log failed: {e}"),
            ConnectionError::Echo(e) => write!(f, "sending record log failed: {e}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Receive(e) | ConnectionError::Append(e) | ConnectionError::Echo(e) => {
                Some(e)
            }
            ConnectionError::Buffer(e) => Some(e),
        }
    }
}

/// A single client connection and its pending bytes.
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    buffer: PacketBuffer,
    recv_chunk_size: usize,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        recv_chunk_size: usize,
        max_pending_bytes: Option<usize>,
    ) -> Self {
        Self {
            stream,
            peer,
            buffer: PacketBuffer::with_limit(max_pending_bytes),
            recv_chunk_size,
        }
    }

    /// Process the connection until it ends.
    pub fn serve(
        mut self,
        store: &LogStore,
        lifecycle: &Lifecycle,
    ) -> Result<SessionOutcome, ConnectionError> {
        // Dropped before `self`, so the slot is cleared before the socket closes
        let _registration = lifecycle.watch_client(self.stream.as_raw_fd());
        let mut chunk = vec![0u8; self.recv_chunk_size];

        loop {
            if lifecycle.is_shutting_down() {
                return Ok(SessionOutcome::Shutdown);
            }

            let n = match self.stream.read(&mut chunk) {
                Ok(0) if lifecycle.is_shutting_down() => return Ok(SessionOutcome::Shutdown),
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        debug!(
                            peer = %self.peer,
                            pending = self.buffer.len(),
                            "Discarding unterminated bytes"
                        );
                    }
                    return Ok(SessionOutcome::PeerClosed);
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) if lifecycle.is_shutting_down() => return Ok(SessionOutcome::Shutdown),
                Err(e) => return Err(ConnectionError::Receive(e)),
            };
            trace!(peer = %self.peer, len = n, "Received bytes");

            self.buffer
                .feed(&chunk[..n])
                .map_err(ConnectionError::Buffer)?;

            for record in self.buffer.records() {
                store.append(&record).map_err(ConnectionError::Append)?;

                let mut out = EchoWriter {
                    stream: &mut self.stream,
                    lifecycle,
                };
                let sent = match store.read_all_into(&mut out) {
                    Ok(sent) => sent,
                    Err(_) if lifecycle.is_shutting_down() => {
                        return Ok(SessionOutcome::Shutdown)
                    }
                    Err(e) => return Err(ConnectionError::Echo(e)),
                };
                debug!(peer = %self.peer, record_len = record.len(), sent, "Echoed record log");
            }
        }
    }
}

/// Socket writer that finishes short writes and retries interrupted ones,
/// unless the interruption is the shutdown request.
struct EchoWriter<'a, W> {
    stream: &'a mut W,
    lifecycle: &'a Lifecycle,
}

impl<W: Write> Write for EchoWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn write_all(&mut self, mut buf: &[u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.stream.write(buf) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ))
                }
                Ok(n) => buf = &buf[n..],
                Err(ref e)
                    if e.kind() == io::ErrorKind::Interrupted
                        && !self.lifecycle.is_shutting_down() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
