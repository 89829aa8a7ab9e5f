//! Independent read cursors over a [`RingBuffer`](crate::RingBuffer).
//!
//! A [`Reader`] is a lightweight handle: its cursor lives in the buffer's
//! registry so the writer can test it on every write, and the handle keeps only
//! a weak reference to the buffer.
//!
//! # Read protocol
//!
//! Each read runs the same check under the buffer's shared lock:
//!
//! 1. Invalidated? Fail with [`RingError::Invalidated`], now and forever.
//! 2. Cursor equal to the write cursor? Nothing new: wait for the next write
//!    and start over at step 1. Wake-ups are broadcast, so a wake never implies
//!    there is data for *this* reader.
//! 3. Otherwise copy `min(available, dst.len())` bytes (two segments if the
//!    read crosses the end of storage) and advance the cursor.
//!
//! The blocking variants ([`Reader::read`], [`Reader::read_timeout`]) park the
//! thread; [`Reader::read_async`] awaits instead and is cancellation safe: the
//! cursor only moves when bytes are copied into `dst`.

use serde::{Deserialize, Serialize};
use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::error::{RingError, RingResult};
use crate::registry::ReaderId;
use crate::ring_buffer::Shared;

/// Where a new reader's cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// At the write cursor: only bytes written after registration are read.
    #[default]
    Latest,
    /// At the oldest byte still readable.
    ///
    /// After the buffer has wrapped this is `capacity - 1` bytes back; the byte
    /// under the write cursor can never be read because `read == write` means
    /// "nothing new".
    Oldest,
    /// `n` bytes back from the write cursor, clamped like [`StartPosition::Oldest`].
    Back(usize),
}

/// Per-reader counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    /// Bytes copied out by successful reads
    pub bytes_read: u64,
    /// Reads that returned data
    pub reads: u64,
    /// Times a read had to wait for the writer
    pub waits: u64,
}

/// A reader with its own cursor into a ring buffer.
///
/// Not `Sync`-shared in practice: every read takes `&mut self`. Create one
/// reader per consumer.
#[derive(Debug)]
pub struct Reader {
    id: ReaderId,
    shared: Weak<Shared>,
    invalidated: bool,
    read_timeout: Option<Duration>,
    stats: ReaderStats,
}

impl Reader {
    pub(crate) fn new(id: ReaderId, shared: Weak<Shared>, read_timeout: Option<Duration>) -> Self {
        Self {
            id,
            shared,
            invalidated: false,
            read_timeout,
            stats: ReaderStats::default(),
        }
    }

    /// Registry id of this reader.
    pub fn id(&self) -> ReaderId {
        self.id
    }

    /// Counters for this reader.
    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    /// Whether the reader is still registered and may read.
    pub fn is_valid(&self) -> bool {
        if self.invalidated {
            return false;
        }
        match self.shared.upgrade() {
            Some(shared) => {
                let live = shared.state.read().readers.is_live(self.id);
                live && !shared.is_closed()
            }
            None => false,
        }
    }

    /// Bytes ready to be read without waiting.
    pub fn available(&self) -> RingResult<usize> {
        if self.invalidated {
            return Err(self.invalidated_error());
        }
        let shared = self.upgrade()?;

        let state = shared.state.read();
        let cursor = state
            .readers
            .cursor(self.id)
            .ok_or_else(|| self.invalidated_error())?
            .load(Ordering::Relaxed);

        Ok((state.write_cursor + shared.capacity - cursor) % shared.capacity)
    }

    /// Read whatever is available without waiting. `Ok(0)` means nothing new.
    pub fn try_read(&mut self, dst: &mut [u8]) -> RingResult<usize> {
        if self.invalidated {
            return Err(self.invalidated_error());
        }
        let shared = self.upgrade()?;
        Ok(self.poll_read(&shared, dst)?.unwrap_or(0))
    }

    /// Read at least one byte, blocking until the writer provides some.
    ///
    /// An empty `dst` returns `Ok(0)` immediately once validity is checked.
    /// Waits at most the buffer's configured read timeout
    /// ([`RingBuffer::with_read_timeout`](crate::RingBuffer::with_read_timeout)),
    /// or indefinitely when none is set.
    pub fn read(&mut self, dst: &mut [u8]) -> RingResult<usize> {
        let deadline = self.read_timeout.map(|timeout| Instant::now() + timeout);
        self.read_until(dst, deadline)
    }

    /// Like [`Reader::read`] but gives up with [`RingError::TimedOut`] after `timeout`.
    pub fn read_timeout(&mut self, dst: &mut [u8], timeout: Duration) -> RingResult<usize> {
        self.read_until(dst, Some(Instant::now() + timeout))
    }

    /// Like [`Reader::read`] but gives up with [`RingError::TimedOut`] at `deadline`.
    pub fn read_deadline(&mut self, dst: &mut [u8], deadline: Instant) -> RingResult<usize> {
        self.read_until(dst, Some(deadline))
    }

    /// Async [`Reader::read`].
    ///
    /// Wrap in `tokio::time::timeout` for a deadline; dropping the future never
    /// loses data.
    ///
    /// ```
    /// use daq_ring::RingBuffer;
    ///
    /// # tokio_test::block_on(async {
    /// let ring = RingBuffer::new(16);
    /// let mut reader = ring.new_reader();
    /// ring.write(b"frame");
    ///
    /// let mut buf = [0u8; 16];
    /// let n = reader.read_async(&mut buf).await.unwrap();
    /// assert_eq!(&buf[..n], b"frame");
    /// # });
    /// ```
    pub async fn read_async(&mut self, dst: &mut [u8]) -> RingResult<usize> {
        if self.invalidated {
            return Err(self.invalidated_error());
        }
        let shared = self.upgrade()?;
        let mut changes = shared.signal.subscribe();

        loop {
            changes.borrow_and_update();
            if let Some(n) = self.poll_read(&shared, dst)? {
                return Ok(n);
            }

            self.stats.waits += 1;
            trace!(reader = %self.id, "Awaiting next ring buffer write");
            if changes.changed().await.is_err() {
                return Err(RingError::Closed { reader: self.id });
            }
        }
    }

    fn read_until(&mut self, dst: &mut [u8], deadline: Option<Instant>) -> RingResult<usize> {
        if self.invalidated {
            return Err(self.invalidated_error());
        }
        let started = Instant::now();
        let shared = self.upgrade()?;

        loop {
            let seen = shared.signal.sequence();
            if let Some(n) = self.poll_read(&shared, dst)? {
                return Ok(n);
            }

            self.stats.waits += 1;
            trace!(reader = %self.id, "Waiting for next ring buffer write");
            if !shared.signal.wait_past(seen, deadline) {
                return Err(RingError::TimedOut {
                    reader: self.id,
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// One pass of the read protocol. `Ok(None)` means "nothing new, wait".
    fn poll_read(&mut self, shared: &Shared, dst: &mut [u8]) -> RingResult<Option<usize>> {
        if self.invalidated {
            return Err(self.invalidated_error());
        }

        let state = shared.state.read();
        let Some(cursor_cell) = state.readers.cursor(self.id) else {
            self.invalidated = true;
            debug!(reader = %self.id, "Reader observed its invalidation");
            return Err(self.invalidated_error());
        };

        if shared.is_closed() {
            return Err(RingError::Closed { reader: self.id });
        }
        if dst.is_empty() {
            return Ok(Some(0));
        }

        let cursor = cursor_cell.load(Ordering::Relaxed);
        if cursor == state.write_cursor {
            return Ok(None);
        }

        let capacity = shared.capacity;
        let available = (state.write_cursor + capacity - cursor) % capacity;
        let n = available.min(dst.len());
        state.copy_out(cursor, &mut dst[..n]);
        cursor_cell.store((cursor + n) % capacity, Ordering::Relaxed);

        self.stats.reads += 1;
        self.stats.bytes_read += n as u64;
        Ok(Some(n))
    }

    fn upgrade(&self) -> RingResult<Arc<Shared>> {
        self.shared
            .upgrade()
            .ok_or(RingError::Closed { reader: self.id })
    }

    fn invalidated_error(&self) -> RingError {
        RingError::Invalidated { reader: self.id }
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            if shared.state.write().readers.release(self.id) {
                debug!(reader = %self.id, "Released ring buffer reader");
            }
        }
    }
}

impl io::Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Reader::read(self, buf).map_err(Into::into)
    }
}
