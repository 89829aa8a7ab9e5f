//! Fixed-capacity overwriting byte ring with invalidating readers.
//!
//! One writer copies bytes in at the write cursor, wrapping at the end of
//! storage and overwriting the oldest bytes. Any number of [`Reader`]s follow
//! behind, each with its own cursor. A reader that the writer laps is not
//! silently moved forward: it is invalidated and every later read on it fails
//! with [`RingError::Invalidated`].
//!
//! # Architecture
//!
//! ```text
//!            write(&[u8])                       Reader::read(&mut [u8])
//!                 |                                     |
//!                 v                                     v
//!   +---------------------------+   shared    +------------------+
//!   |  RwLock<State>  exclusive |<------------|  registry cursor |
//!   |   storage / write_cursor  |             |  (per reader)    |
//!   |   total_written / readers |             +------------------+
//!   +---------------------------+                       ^
//!                 |                                     |
//!                 +------ WriteSignal::notify() --------+
//!                          (broadcast wake)
//! ```
//!
//! # Thread Safety
//!
//! - **Writes**: Exclusive lock; strictly serialized. Never blocks on readers.
//! - **Observers**: `capacity`, `total_written`, `snapshot` take the shared lock.
//! - **Readers**: Copy under the shared lock and only move their own cursor.
//! - **Wake-ups**: Every write wakes every waiting reader; each one re-checks
//!   validity and data before returning.
//! - **Scope**: Each buffer owns its own lock and signal. Unrelated buffers never
//!   contend.

use parking_lot::RwLock;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::config::RingConfig;
use crate::error::{RingError, RingResult};
use crate::reader::{Reader, StartPosition};
use crate::registry::{ReaderId, ReaderRegistry};
use crate::signal::WriteSignal;
use crate::span::OverwrittenSpan;

/// Mutable state guarded by the buffer's lock.
#[derive(Debug)]
pub(crate) struct State {
    pub(crate) storage: Box<[u8]>,
    /// Index of the next byte to be written, always in `[0, capacity)`.
    pub(crate) write_cursor: usize,
    /// Every byte ever submitted, including truncated and overwritten ones.
    pub(crate) total_written: u64,
    pub(crate) readers: ReaderRegistry,
}

impl State {
    fn has_wrapped(&self) -> bool {
        self.total_written >= self.storage.len() as u64
    }

    /// Bytes a new reader could still consume. One slot is never readable
    /// because `read_cursor == write_cursor` means "nothing new".
    fn readable_backlog(&self) -> usize {
        let capacity = self.storage.len();
        if self.has_wrapped() {
            capacity - 1
        } else {
            self.total_written as usize
        }
    }

    fn check_consistency(&self) -> RingResult<()> {
        if !self.has_wrapped() && self.total_written != self.write_cursor as u64 {
            error!(
                total_written = self.total_written,
                write_cursor = self.write_cursor,
                "Ring buffer cursor no longer matches byte count before first wrap"
            );
            return Err(RingError::Inconsistent {
                total_written: self.total_written,
                write_cursor: self.write_cursor,
            });
        }
        Ok(())
    }

    /// Copy `dst.len()` bytes starting at circular position `start`.
    pub(crate) fn copy_out(&self, start: usize, dst: &mut [u8]) {
        let capacity = self.storage.len();
        debug_assert!(start < capacity);
        debug_assert!(dst.len() <= capacity);

        let first = dst.len().min(capacity - start);
        dst[..first].copy_from_slice(&self.storage[start..start + first]);
        let rest = dst.len() - first;
        dst[first..].copy_from_slice(&self.storage[..rest]);
    }
}

/// Everything a reader needs to reach: lock, signal and closed flag.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) capacity: usize,
    pub(crate) state: RwLock<State>,
    pub(crate) signal: WriteSignal,
    pub(crate) closed: AtomicBool,
}

impl Shared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy)]
enum InvalidationCause {
    Overwrite,
    Truncation,
    Reset,
}

impl InvalidationCause {
    fn as_str(self) -> &'static str {
        match self {
            InvalidationCause::Overwrite => "overwrite",
            InvalidationCause::Truncation => "oversized_write",
            InvalidationCause::Reset => "reset",
        }
    }
}

/// Overwriting circular byte buffer with one writer and many readers.
///
/// The buffer owns storage, cursor state and the reader registry. Readers hold
/// only a weak back-reference; dropping the buffer wakes and closes them.
///
/// # Example
///
/// ```
/// use daq_ring::RingBuffer;
///
/// let ring = RingBuffer::new(10);
/// let mut reader = ring.new_reader();
///
/// assert_eq!(ring.write(&[0, 1, 2, 3, 4, 5, 6, 7]), 8);
///
/// let mut out = [0u8; 20];
/// let n = reader.read(&mut out).unwrap();
/// assert_eq!(&out[..n], &[0, 1, 2, 3, 4, 5, 6, 7]);
/// ```
pub struct RingBuffer {
    shared: Arc<Shared>,
    default_start: StartPosition,
    read_timeout: Option<Duration>,
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.shared.capacity)
            .field("write_cursor", &state.write_cursor)
            .field("total_written", &state.total_written)
            .field("reader_count", &state.readers.len())
            .field("default_start", &self.default_start)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl RingBuffer {
    /// Create a buffer holding `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` is 0. Use [`RingBuffer::try_new`] to get an error instead.
    #[allow(clippy::panic)]
    pub fn new(capacity: usize) -> Self {
        match Self::try_new(capacity) {
            Ok(ring) => ring,
            Err(err) => panic!("{err}"),
        }
    }

    /// Create a buffer holding `capacity` bytes, rejecting a zero capacity.
    pub fn try_new(capacity: usize) -> RingResult<Self> {
        if capacity == 0 {
            return Err(RingError::ZeroCapacity);
        }

        debug!(capacity, "Creating ring buffer");

        let state = State {
            storage: vec![0u8; capacity].into_boxed_slice(),
            write_cursor: 0,
            total_written: 0,
            readers: ReaderRegistry::new(),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                capacity,
                state: RwLock::new(state),
                signal: WriteSignal::new(),
                closed: AtomicBool::new(false),
            }),
            default_start: StartPosition::default(),
            read_timeout: None,
        })
    }

    /// Create a buffer from validated configuration.
    pub fn from_config(config: &RingConfig) -> RingResult<Self> {
        config.validate()?;
        Ok(Self::try_new(config.capacity)?
            .with_reader_start(config.reader_start)
            .with_read_timeout(config.read_timeout()))
    }

    /// Set where readers from [`RingBuffer::new_reader`] start.
    #[must_use]
    pub fn with_reader_start(mut self, start: StartPosition) -> Self {
        self.default_start = start;
        self
    }

    /// Bound how long [`Reader::read`] blocks for readers created afterwards.
    ///
    /// `None` (the default) waits indefinitely.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Write `data`, overwriting the oldest bytes as needed.
    ///
    /// If `data` is longer than the capacity only its final `capacity` bytes are
    /// retained. Readers whose unread bytes were overwritten are invalidated and
    /// unregistered, then every waiting reader is woken.
    ///
    /// # Returns
    /// Always `data.len()`: truncation limits what is retained, not what is accepted.
    pub fn write(&self, data: &[u8]) -> usize {
        let capacity = self.shared.capacity;
        let submitted = data.len();

        let (invalidated, cause) = {
            let mut guard = self.shared.state.write();
            let state = &mut *guard;

            state.total_written += submitted as u64;

            let retained = if submitted > capacity {
                &data[submitted - capacity..]
            } else {
                data
            };

            let from = state.write_cursor;
            let first = retained.len().min(capacity - from);
            state.storage[from..from + first].copy_from_slice(&retained[..first]);
            let rest = retained.len() - first;
            state.storage[..rest].copy_from_slice(&retained[first..]);

            state.write_cursor = (from + retained.len()) % capacity;

            let span = OverwrittenSpan::of_write(from, state.write_cursor, submitted, capacity);
            let cause = if submitted > capacity {
                InvalidationCause::Truncation
            } else {
                InvalidationCause::Overwrite
            };
            let invalidated = match span {
                OverwrittenSpan::Empty => Vec::new(),
                span => state.readers.invalidate_where(|cursor| span.contains(cursor)),
            };

            trace!(
                submitted,
                retained = retained.len(),
                write_cursor = state.write_cursor,
                total_written = state.total_written,
                "Ring buffer write"
            );

            (invalidated, cause)
        };

        log_invalidated(&invalidated, cause);
        self.shared.signal.notify();

        submitted
    }

    /// Copy of the retained content, oldest byte first.
    ///
    /// Once the buffer has wrapped this is always `capacity` bytes; before that
    /// it is every byte written so far.
    ///
    /// # Errors
    /// [`RingError::Inconsistent`] if the cursor does not match the byte count
    /// before the first wrap. This is an internal fault, not a retryable state.
    pub fn snapshot(&self) -> RingResult<Vec<u8>> {
        let state = self.shared.state.read();

        if state.has_wrapped() {
            let mut out = Vec::with_capacity(self.shared.capacity);
            out.extend_from_slice(&state.storage[state.write_cursor..]);
            out.extend_from_slice(&state.storage[..state.write_cursor]);
            return Ok(out);
        }

        state.check_consistency()?;
        Ok(state.storage[..state.write_cursor].to_vec())
    }

    /// The snapshot rendered as text, replacing invalid UTF-8.
    pub fn snapshot_string(&self) -> RingResult<String> {
        let bytes = self.snapshot()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Configured size in bytes, fixed for the buffer's lifetime.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Cumulative bytes submitted to [`RingBuffer::write`] since creation or reset.
    pub fn total_written(&self) -> u64 {
        self.shared.state.read().total_written
    }

    /// Storage index where the next write begins.
    pub fn write_position(&self) -> usize {
        self.shared.state.read().write_cursor
    }

    /// Number of bytes a snapshot would currently return.
    pub fn retained_len(&self) -> usize {
        let state = self.shared.state.read();
        if state.has_wrapped() {
            self.shared.capacity
        } else {
            state.total_written as usize
        }
    }

    /// Whether the writer has gone all the way around at least once.
    pub fn is_full(&self) -> bool {
        self.shared.state.read().has_wrapped()
    }

    /// Number of live (valid, registered) readers.
    pub fn reader_count(&self) -> usize {
        self.shared.state.read().readers.len()
    }

    /// Ids of all live readers.
    pub fn reader_ids(&self) -> Vec<ReaderId> {
        self.shared.state.read().readers.ids()
    }

    /// Zero the write cursor and byte counter.
    ///
    /// Every registered reader is invalidated and unregistered, and waiting
    /// readers are woken so they observe it. Readers must re-subscribe.
    pub fn reset(&self) {
        let invalidated = {
            let mut state = self.shared.state.write();
            state.write_cursor = 0;
            state.total_written = 0;
            state.readers.invalidate_all()
        };

        info!(
            capacity = self.shared.capacity,
            invalidated = invalidated.len(),
            "Ring buffer reset"
        );
        log_invalidated(&invalidated, InvalidationCause::Reset);
        self.shared.signal.notify();
    }

    /// Register a reader at the buffer's default start position.
    ///
    /// Unless changed with [`RingBuffer::with_reader_start`] this is
    /// [`StartPosition::Latest`]: the reader sees exactly the writes made after
    /// this call.
    pub fn new_reader(&self) -> Reader {
        self.new_reader_at(self.default_start)
    }

    /// Register a reader at an explicit start position.
    ///
    /// Registration and cursor assignment happen under the exclusive lock, so
    /// every write either completed before the reader existed or is checked
    /// against its cursor.
    pub fn new_reader_at(&self, start: StartPosition) -> Reader {
        let capacity = self.shared.capacity;

        let (id, cursor) = {
            let mut state = self.shared.state.write();
            let back = match start {
                StartPosition::Latest => 0,
                StartPosition::Oldest => state.readable_backlog(),
                StartPosition::Back(n) => n.min(state.readable_backlog()),
            };
            let cursor = (state.write_cursor + capacity - back) % capacity;
            (state.readers.register(cursor), cursor)
        };

        debug!(reader = %id, cursor, ?start, "Registered ring buffer reader");

        Reader::new(id, Arc::downgrade(&self.shared), self.read_timeout)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.signal.notify();
        debug!(capacity = self.shared.capacity, "Ring buffer closed");
    }
}

impl io::Write for RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(RingBuffer::write(self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &RingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(RingBuffer::write(*self, buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn log_invalidated(invalidated: &[ReaderId], cause: InvalidationCause) {
    for reader in invalidated {
        warn!(
            reader = %reader,
            cause = cause.as_str(),
            "Invalidated ring buffer reader: unread data discarded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tracing_test::traced_test;

    #[test]
    fn test_create_ring_buffer() {
        let ring = RingBuffer::new(16);
        assert_eq!(ring.capacity(), 16);
        assert_eq!(ring.total_written(), 0);
        assert_eq!(ring.write_position(), 0);
        assert!(!ring.is_full());
        assert!(ring.snapshot().unwrap().is_empty());
    }

    #[test]
    #[should_panic(expected = "capacity must be greater than 0")]
    fn test_zero_capacity_panics() {
        let _ = RingBuffer::new(0);
    }

    #[test]
    fn test_try_new_rejects_zero() {
        assert!(matches!(RingBuffer::try_new(0), Err(RingError::ZeroCapacity)));
    }

    #[test]
    fn test_write_and_snapshot() {
        let ring = RingBuffer::new(32);
        let test_data = b"Hello, ring buffer!";
        assert_eq!(ring.write(test_data), test_data.len());
        assert_eq!(ring.snapshot().unwrap(), test_data);
        assert_eq!(ring.write_position(), test_data.len());
    }

    #[test]
    fn test_wrap_preserves_latest_bytes() {
        let ring = RingBuffer::new(10);
        ring.write(&[1, 2, 3, 4, 5, 6, 7]);
        ring.write(&[8, 9, 10, 11, 12]);

        assert!(ring.is_full());
        assert_eq!(ring.write_position(), 2);
        assert_eq!(ring.snapshot().unwrap(), vec![3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn test_exact_capacity_write() {
        let ring = RingBuffer::new(4);
        ring.write(&[9, 9]);
        ring.write(&[1, 2, 3, 4]);
        assert_eq!(ring.write_position(), 2);
        assert_eq!(ring.snapshot().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let ring = RingBuffer::new(4);
        ring.write(&[0xAA]);
        let data: Vec<u8> = (0..11).collect();
        assert_eq!(ring.write(&data), 11);
        assert_eq!(ring.snapshot().unwrap(), vec![7, 8, 9, 10]);
        assert_eq!(ring.total_written(), 12);
    }

    #[test]
    fn test_empty_write_is_noop() {
        let ring = RingBuffer::new(4);
        ring.write(&[1, 2]);
        assert_eq!(ring.write(&[]), 0);
        assert_eq!(ring.snapshot().unwrap(), vec![1, 2]);
        assert_eq!(ring.total_written(), 2);
    }

    #[test]
    fn test_inconsistent_state_is_reported() {
        let ring = RingBuffer::new(8);
        ring.write(&[1, 2, 3]);
        ring.shared.state.write().write_cursor = 1;

        let err = ring.snapshot().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            RingError::Inconsistent {
                total_written: 3,
                write_cursor: 1
            }
        ));
    }

    #[test]
    fn test_snapshot_string_is_lossy() {
        let ring = RingBuffer::new(8);
        ring.write(b"ok");
        ring.write(&[0xFF]);
        assert_eq!(ring.snapshot_string().unwrap(), "ok\u{FFFD}");
    }

    #[test]
    fn test_io_write_impls() {
        let mut ring = RingBuffer::new(8);
        write!(ring, "abc").unwrap();
        ring.flush().unwrap();

        let mut by_ref = &ring;
        by_ref.write_all(b"de").unwrap();

        assert_eq!(ring.snapshot().unwrap(), b"abcde");
    }

    #[test]
    fn test_reader_start_positions() {
        let ring = RingBuffer::new(10);
        ring.write(&[0, 1, 2, 3, 4]);

        let latest = ring.new_reader_at(StartPosition::Latest);
        let oldest = ring.new_reader_at(StartPosition::Oldest);
        let back = ring.new_reader_at(StartPosition::Back(2));
        let clamped = ring.new_reader_at(StartPosition::Back(100));

        assert_eq!(latest.available().unwrap(), 0);
        assert_eq!(oldest.available().unwrap(), 5);
        assert_eq!(back.available().unwrap(), 2);
        assert_eq!(clamped.available().unwrap(), 5);
    }

    #[test]
    fn test_oldest_reader_after_wrap_reserves_one_slot() {
        let ring = RingBuffer::new(10);
        ring.write(&(0..14).collect::<Vec<u8>>());

        let mut reader = ring.new_reader_at(StartPosition::Oldest);
        let mut out = [0u8; 16];
        let n = reader.try_read(&mut out).unwrap();
        assert_eq!(&out[..n], &[5, 6, 7, 8, 9, 10, 11, 12, 13]);
    }

    #[test]
    fn test_reset_invalidates_readers() {
        let ring = RingBuffer::new(8);
        let reader = ring.new_reader();
        ring.write(&[1, 2, 3]);

        ring.reset();

        assert_eq!(ring.total_written(), 0);
        assert_eq!(ring.write_position(), 0);
        assert_eq!(ring.reader_count(), 0);
        assert!(!reader.is_valid());
        assert!(ring.snapshot().unwrap().is_empty());
    }

    #[test]
    fn test_debug_reports_state() {
        let ring = RingBuffer::new(8);
        let _reader = ring.new_reader();
        ring.write(&[1, 2, 3]);
        let debug = format!("{ring:?}");
        assert!(debug.contains("capacity: 8"));
        assert!(debug.contains("total_written: 3"));
        assert!(debug.contains("reader_count: 1"));
    }

    #[test]
    fn test_from_config_applies_start_policy() {
        let config = RingConfig {
            capacity: 6,
            reader_start: StartPosition::Oldest,
            read_timeout_ms: None,
        };
        let ring = RingBuffer::from_config(&config).unwrap();
        ring.write(&[1, 2, 3]);
        let reader = ring.new_reader();
        assert_eq!(reader.available().unwrap(), 3);
    }

    #[test]
    fn test_from_config_bounds_blocking_reads() {
        let config = RingConfig {
            capacity: 16,
            reader_start: StartPosition::Latest,
            read_timeout_ms: Some(20),
        };
        let ring = RingBuffer::from_config(&config).unwrap();
        let mut reader = ring.new_reader();

        let started = std::time::Instant::now();
        let mut out = [0u8; 4];
        match reader.read(&mut out) {
            Err(RingError::TimedOut { waited, .. }) => assert!(waited >= Duration::from_millis(20)),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_read_timeout_applies_to_later_readers_only() {
        let ring = RingBuffer::new(16);
        let mut unbounded = ring.new_reader();
        let ring = ring.with_read_timeout(Some(Duration::from_millis(10)));
        let mut bounded = ring.new_reader();

        let mut out = [0u8; 4];
        assert!(matches!(bounded.read(&mut out), Err(RingError::TimedOut { .. })));

        ring.write(b"ok");
        assert_eq!(unbounded.read(&mut out).unwrap(), 2);
    }

    #[test]
    #[traced_test]
    fn test_invalidation_is_logged() {
        let ring = RingBuffer::new(4);
        let reader = ring.new_reader();
        ring.write(&[0u8; 9]);

        assert!(logs_contain("Invalidated ring buffer reader"));
        assert!(logs_contain("oversized_write"));
        assert!(logs_contain(&reader.id().to_string()));
    }

    #[test]
    #[traced_test]
    fn test_reset_is_logged() {
        let ring = RingBuffer::new(4);
        let _reader = ring.new_reader();
        ring.reset();

        assert!(logs_contain("Ring buffer reset"));
        assert!(logs_contain("Invalidated ring buffer reader"));
    }
}
