//! Per-connection packet accumulation and record framing.
//!
//! Received bytes are appended to a `PacketBuffer`; complete records (runs of
//! bytes ending in `\n`, delimiter included) are pulled off the front by the
//! `Records` iterator. Anything after the last delimiter stays buffered until
//! the next `feed`.
//!
//! ## Growth
//!
//! The backing `Vec` at least doubles whenever it runs out of room, starting
//! from `INITIAL_CAPACITY`. Reservations are fallible, so running out of
//! memory surfaces as `BufferError::AllocFailed` and only costs the
//! connection that hit it. Consumed bytes are compacted away once per `feed`
//! rather than once per record.

use bytes::Bytes;
use std::fmt;

/// Capacity of the first allocation.
pub const INITIAL_CAPACITY: usize = 2048;

/// Record delimiter.
pub const DELIMITER: u8 = b'\n';

/// Error returned when buffered data cannot grow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The allocator refused to grow the buffer.
    AllocFailed { requested: usize },
    /// An unterminated record outgrew the configured cap.
    LimitExceeded { limit: usize },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::AllocFailed { requested } => {
                write!(f, "failed to grow packet buffer to {requested} bytes")
            }
            BufferError::LimitExceeded { limit } => {
                write!(f, "unterminated packet exceeds {limit} bytes")
            }
        }
    }
}

impl std::error::Error for BufferError {}

/// Growable accumulator for one connection's received bytes.
///
/// The buffer exclusively owns its storage. `data[start..]` is pending;
/// `data[start..scanned]` is known to hold no delimiter.
#[derive(Debug, Default)]
pub struct PacketBuffer {
    data: Vec<u8>,
    start: usize,
    scanned: usize,
    limit: Option<usize>,
}

impl PacketBuffer {
    /// Create an empty, unbounded buffer. Nothing is allocated until the
    /// first `feed`.
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer that rejects unterminated records longer than
    /// `limit` bytes. `None` means unbounded.
    pub fn with_limit(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Number of pending bytes (not yet extracted as records).
    pub fn len(&self) -> usize {
        self.data.len() - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity of the backing storage.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// The pending bytes.
    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.data[self.start..]
    }

    /// Append a received chunk.
    ///
    /// The limit check assumes records were drained since the previous feed,
    /// which is how the connection loop uses the buffer. On error the buffer
    /// is left unchanged.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), BufferError> {
        if chunk.is_empty() {
            return Ok(());
        }

        if let Some(limit) = self.limit {
            let tail = match memchr::memrchr(DELIMITER, chunk) {
                Some(pos) => chunk.len() - pos - 1,
                None => self.len().saturating_add(chunk.len()),
            };
            if tail > limit {
                return Err(BufferError::LimitExceeded { limit });
            }
        }

        self.compact();
        self.reserve_for(chunk.len())?;
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Iterate over the complete records currently buffered.
    ///
    /// Each yielded record is removed from the buffer. Dropping the iterator
    /// early leaves the remaining records in place for the next call.
    pub fn records(&mut self) -> Records<'_> {
        Records { buf: self }
    }

    /// Move pending bytes to the front of the storage.
    fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        if self.start == self.data.len() {
            self.data.clear();
        } else {
            self.data.drain(..self.start);
        }
        self.scanned -= self.start;
        self.start = 0;
    }

    /// Make room for `additional` more bytes, at least doubling on growth.
    fn reserve_for(&mut self, additional: usize) -> Result<(), BufferError> {
        let needed = self
            .data
            .len()
            .checked_add(additional)
            .ok_or(BufferError::AllocFailed {
                requested: usize::MAX,
            })?;
        let capacity = self.data.capacity();
        if needed <= capacity {
            return Ok(());
        }

        let target = needed
            .max(capacity.saturating_mul(2))
            .max(INITIAL_CAPACITY);
        self.data
            .try_reserve_exact(target - self.data.len())
            .map_err(|_| BufferError::AllocFailed { requested: target })
    }
}

/// Iterator over complete records, see [`PacketBuffer::records`].
pub struct Records<'a> {
    buf: &'a mut PacketBuffer,
}

impl Iterator for Records<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        let buf = &mut *self.buf;
        let from = buf.scanned.max(buf.start);

        let Some(pos) = memchr::memchr(DELIMITER, &buf.data[from..]) else {
            buf.scanned = buf.data.len();
            return None;
        };

        let end = from + pos + 1;
        let record = Bytes::copy_from_slice(&buf.data[buf.start..end]);
        buf.start = end;
        buf.scanned = end;

        if buf.start == buf.data.len() {
            buf.data.clear();
            buf.start = 0;
            buf.scanned = 0;
        }

        Some(record)
    }
}
