//! Circular span of storage positions touched by one write.
//!
//! A reader is invalidated when its cursor lands inside the span. The span runs
//! from the write cursor before the write (exclusive) to the write cursor after
//! it (inclusive):
//!
//! ```text
//! capacity 10, cursor 7 -> 1 after a 4-byte write
//!
//!   0   1   2   3   4   5   6   7   8   9
//! [ x | x |   |   |   |   |   |   | x | x ]
//!                               ^from     (wrapped: pos > 7 || pos <= 1)
//! ```
//!
//! Excluding `from` spares a reader that had consumed everything. Including `to`
//! catches a reader exactly one lap behind, whose cursor would otherwise read as
//! "nothing new" after the write.

/// Positions overwritten by one write, as seen by the invalidation test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OverwrittenSpan {
    /// Zero-length write; nothing changed.
    Empty,
    /// The write covered the whole ring; every unread byte is gone.
    Full,
    /// `from` exclusive, `to` inclusive, cyclic.
    Range { from: usize, to: usize },
}

impl OverwrittenSpan {
    /// Span of a write of `submitted` bytes that moved the cursor `from -> to`.
    pub fn of_write(from: usize, to: usize, submitted: usize, capacity: usize) -> Self {
        if submitted == 0 {
            OverwrittenSpan::Empty
        } else if submitted >= capacity {
            OverwrittenSpan::Full
        } else {
            debug_assert_ne!(from, to, "partial write must move the cursor");
            OverwrittenSpan::Range { from, to }
        }
    }

    /// Whether a reader at `cursor` lost unread data to this write.
    pub fn contains(&self, cursor: usize) -> bool {
        match *self {
            OverwrittenSpan::Empty => false,
            OverwrittenSpan::Full => true,
            OverwrittenSpan::Range { from, to } if from < to => cursor > from && cursor <= to,
            OverwrittenSpan::Range { from, to } => cursor > from || cursor <= to,
        }
    }
}
