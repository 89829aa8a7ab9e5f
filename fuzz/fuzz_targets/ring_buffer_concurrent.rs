//! Fuzz target for concurrent writes and blocking reads.
//!
//! Tests:
//! - Readers never observe bytes out of order, even while being lapped
//! - A lapped reader ends with an invalidation error, not skipped data
//! - Blocked readers are released when the buffer is dropped

#![no_main]

use arbitrary::Arbitrary;
use daq_ring::{RingBuffer, RingError};
use libfuzzer_sys::fuzz_target;
use std::thread;
use std::time::Duration;

#[derive(Debug, Arbitrary)]
struct ConcurrentInput {
    capacity: u16,
    /// Number of reader threads (1-4)
    num_readers: u8,
    /// Read chunk size per reader
    read_sizes: Vec<u8>,
    writer_ops: Vec<WriterOp>,
}

#[derive(Debug, Clone, Arbitrary)]
enum WriterOp {
    Write { size: u16 },
    Yield,
}

/// Byte at absolute stream offset `i`.
fn byte_at(i: u64) -> u8 {
    (i % 251) as u8
}

fuzz_target!(|input: ConcurrentInput| {
    let capacity = usize::from(input.capacity).clamp(2, 8192);
    let num_readers = usize::from(input.num_readers % 4) + 1;

    let ring = RingBuffer::new(capacity);

    let consumers: Vec<_> = (0..num_readers)
        .map(|i| {
            let mut reader = ring.new_reader();
            let chunk = usize::from(input.read_sizes.get(i).copied().unwrap_or(64)).max(1);
            thread::spawn(move || {
                let mut buf = vec![0u8; chunk];
                let mut position = 0u64;
                loop {
                    match reader.read_timeout(&mut buf, Duration::from_secs(5)) {
                        Ok(n) => {
                            for &byte in &buf[..n] {
                                assert_eq!(byte, byte_at(position), "out-of-order byte");
                                position += 1;
                            }
                        }
                        Err(RingError::Invalidated { .. }) | Err(RingError::Closed { .. }) => {
                            return position;
                        }
                        Err(err) => panic!("unexpected reader error: {err}"),
                    }
                }
            })
        })
        .collect();

    let mut written = 0u64;
    for op in input.writer_ops.iter().take(128) {
        match op {
            WriterOp::Write { size } => {
                let data: Vec<u8> = (0..u64::from(*size % 4096))
                    .map(|i| byte_at(written + i))
                    .collect();
                ring.write(&data);
                written += data.len() as u64;
            }
            WriterOp::Yield => thread::yield_now(),
        }
    }

    drop(ring);

    for consumer in consumers {
        let seen = consumer.join().expect("reader thread panicked");
        assert!(seen <= written);
    }
});
