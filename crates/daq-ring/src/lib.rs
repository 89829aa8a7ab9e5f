//! # daq-ring - overwriting multi-reader byte ring
//!
//! A fixed-capacity circular byte buffer with one writer and any number of
//! independent readers, each tracking its own position.
//!
//! ## Design
//!
//! - The writer never blocks and never fails: once full, new bytes overwrite
//!   the oldest ones
//! - A reader whose unread bytes get overwritten is invalidated permanently
//!   instead of silently skipping ahead; consumers learn they lost data
//! - Readers block (or `.await`) until the next write, re-checking validity on
//!   every wake-up
//! - Each buffer owns its own `RwLock` and wake-up signal
//!
//! ## Example
//!
//! ```
//! use daq_ring::{RingBuffer, RingError};
//!
//! let ring = RingBuffer::new(10);
//!
//! // Readers see writes made after they are created.
//! let mut r1 = ring.new_reader();
//! ring.write(&[0, 1, 2, 3, 4]);
//! let mut r2 = ring.new_reader();
//! ring.write(&[5, 6, 7]);
//!
//! let mut buf = [0u8; 16];
//! let n = r1.read(&mut buf)?;
//! assert_eq!(&buf[..n], &[0, 1, 2, 3, 4, 5, 6, 7]);
//! let n = r2.read(&mut buf)?;
//! assert_eq!(&buf[..n], &[5, 6, 7]);
//!
//! // Lapping a reader invalidates it for good.
//! ring.write(&[0u8; 13]);
//! assert!(r1.read(&mut buf).unwrap_err().is_invalidated());
//! assert!(r1.read(&mut buf).unwrap_err().is_invalidated());
//! # Ok::<(), RingError>(())
//! ```

pub mod config;
pub mod error;
pub mod reader;
pub mod registry;
pub mod ring_buffer;

mod signal;
mod span;

pub use config::RingConfig;
pub use error::{RingError, RingResult};
pub use reader::{Reader, ReaderStats, StartPosition};
pub use registry::ReaderId;
pub use ring_buffer::RingBuffer;
