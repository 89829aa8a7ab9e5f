//! Error types for the overwriting ring.
//!
//! `RingError` separates the one recoverable reader-state failure
//! ([`RingError::Invalidated`]) from internal faults and from the ambient
//! failures (configuration, deadlines, a dropped buffer). Callers decide on a
//! recovery policy with [`RingError::is_invalidated`] and [`RingError::is_fatal`].
//!
//! ## Error Categories
//!
//! 1. **Reader state** - `Invalidated`
//!    - The writer overwrote bytes the reader had not consumed
//!    - Permanent for that reader
//!    - Recovery: create a new reader (the gap is lost)
//!
//! 2. **Internal faults** - `Inconsistent`
//!    - Cursor bookkeeping no longer matches the byte counter
//!    - Never retried; continuing risks returning corrupted data
//!
//! 3. **Ambient** - `ZeroCapacity`, `TimedOut`, `Closed`, `Config`, `InvalidConfig`

use std::time::Duration;
use thiserror::Error;

use crate::registry::ReaderId;

/// Convenience alias for results using the ring error type.
pub type RingResult<T> = std::result::Result<T, RingError>;

/// Primary error type for ring buffer and reader operations.
#[derive(Error, Debug)]
pub enum RingError {
    /// A buffer was requested with zero capacity.
    #[error("Ring buffer capacity must be greater than 0")]
    ZeroCapacity,

    /// The writer overwrote data this reader had not consumed yet.
    ///
    /// This state is sticky: every later call on the same reader fails the
    /// same way.
    #[error("Reader {reader} was invalidated: unread data was overwritten")]
    Invalidated {
        /// The reader that fell behind
        reader: ReaderId,
    },

    /// The write cursor and the total-written counter disagree while the buffer
    /// has never wrapped.
    #[error(
        "Ring buffer inconsistency: total_written={total_written} but write_cursor={write_cursor} before first wrap"
    )]
    Inconsistent {
        /// Bytes submitted since construction or the last reset
        total_written: u64,
        /// Position of the next byte to be written
        write_cursor: usize,
    },

    /// A blocking read reached its deadline with nothing new to read.
    #[error("Reader {reader} timed out after {waited:?} waiting for data")]
    TimedOut {
        /// The waiting reader
        reader: ReaderId,
        /// How long the read waited in total
        waited: Duration,
    },

    /// The owning buffer was dropped.
    #[error("Ring buffer backing reader {reader} has been dropped")]
    Closed {
        /// The orphaned reader
        reader: ReaderId,
    },

    /// Configuration could not be extracted from its sources.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds an unusable value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl RingError {
    /// Whether this is the recoverable "reader fell behind" signal.
    pub fn is_invalidated(&self) -> bool {
        matches!(self, RingError::Invalidated { .. })
    }

    /// Whether this signals an internal-consistency fault.
    ///
    /// Fatal errors must not be retried at the buffer level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RingError::Inconsistent { .. })
    }
}

impl From<figment::Error> for RingError {
    fn from(err: figment::Error) -> Self {
        RingError::Config(Box::new(err))
    }
}

impl From<RingError> for std::io::Error {
    fn from(err: RingError) -> Self {
        use std::io::ErrorKind;

        let kind = match &err {
            RingError::TimedOut { .. } => ErrorKind::TimedOut,
            RingError::Closed { .. } => ErrorKind::BrokenPipe,
            RingError::ZeroCapacity | RingError::InvalidConfig(_) | RingError::Config(_) => {
                ErrorKind::InvalidInput
            }
            RingError::Invalidated { .. } | RingError::Inconsistent { .. } => ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
