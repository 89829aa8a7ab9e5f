//! Fuzz target for the RingBuffer write path.
//!
//! Tests:
//! - Snapshot always equals the last `capacity` bytes of the stream
//! - Oversized writes keep only their tail
//! - `total_written` and `write_position` track every submitted byte
//! - `reset` restores the empty state

#![no_main]

use arbitrary::Arbitrary;
use daq_ring::RingBuffer;
use libfuzzer_sys::fuzz_target;
use std::collections::VecDeque;

#[derive(Debug, Arbitrary)]
struct WriteInput {
    /// Ring capacity (kept small so wrap-around happens constantly)
    capacity: u8,
    operations: Vec<WriteOp>,
}

#[derive(Debug, Arbitrary)]
enum WriteOp {
    Write(Vec<u8>),
    /// Fill with a single byte value
    Fill { value: u8, len: u16 },
    Snapshot,
    Reset,
}

fuzz_target!(|input: WriteInput| {
    let capacity = usize::from(input.capacity).max(1);
    let rb = RingBuffer::new(capacity);

    let mut model: VecDeque<u8> = VecDeque::with_capacity(capacity);
    let mut total: u64 = 0;

    for op in input.operations.into_iter().take(256) {
        match op {
            WriteOp::Write(data) => {
                apply(&rb, &mut model, &mut total, capacity, &data);
            }
            WriteOp::Fill { value, len } => {
                let data = vec![value; usize::from(len) % 4096];
                apply(&rb, &mut model, &mut total, capacity, &data);
            }
            WriteOp::Snapshot => {
                let snapshot = rb.snapshot().expect("snapshot must be consistent");
                assert_eq!(snapshot, model.iter().copied().collect::<Vec<_>>());
            }
            WriteOp::Reset => {
                rb.reset();
                model.clear();
                total = 0;
            }
        }

        assert_eq!(rb.total_written(), total);
        assert_eq!(rb.write_position(), (total % capacity as u64) as usize);
        assert_eq!(rb.retained_len(), model.len());
    }

    let snapshot = rb.snapshot().expect("snapshot must be consistent");
    assert_eq!(snapshot, model.into_iter().collect::<Vec<_>>());
});

fn apply(rb: &RingBuffer, model: &mut VecDeque<u8>, total: &mut u64, capacity: usize, data: &[u8]) {
    assert_eq!(rb.write(data), data.len());
    *total += data.len() as u64;

    for &byte in data {
        if model.len() == capacity {
            model.pop_front();
        }
        model.push_back(byte);
    }
}
