//! Fuzz target for reader ordering and invalidation.
//!
//! Each reader is modelled by its absolute position in the written stream.
//! A reader is lapped as soon as its unread byte count reaches the capacity;
//! until then every read must return the next bytes of the stream in order.

#![no_main]

use arbitrary::Arbitrary;
use daq_ring::{Reader, RingBuffer, StartPosition};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct ReaderInput {
    capacity: u8,
    operations: Vec<ReaderOp>,
}

#[derive(Debug, Arbitrary)]
enum ReaderOp {
    Write(Vec<u8>),
    Oversized { value: u8, extra: u8 },
    AddReader(Start),
    Read { reader: u8, len: u8 },
    DropReader(u8),
    Reset,
}

#[derive(Debug, Clone, Copy, Arbitrary)]
enum Start {
    Latest,
    Oldest,
    Back(u8),
}

struct Tracked {
    reader: Reader,
    /// Absolute stream offset of the next unread byte, `None` once lapped
    position: Option<u64>,
}

struct Model {
    capacity: usize,
    stream: Vec<u8>,
    readers: Vec<Tracked>,
}

impl Model {
    fn total(&self) -> u64 {
        self.stream.len() as u64
    }

    fn write(&mut self, ring: &RingBuffer, data: &[u8]) {
        ring.write(data);
        self.stream.extend_from_slice(data);

        let total = self.total();
        let capacity = self.capacity as u64;
        for tracked in &mut self.readers {
            if let Some(position) = tracked.position {
                if total - position >= capacity {
                    tracked.position = None;
                }
            }
        }
    }

    fn add_reader(&mut self, ring: &RingBuffer, start: Start) {
        let backlog = self.stream.len().min(self.capacity - 1);
        let (start, back) = match start {
            Start::Latest => (StartPosition::Latest, 0),
            Start::Oldest => (StartPosition::Oldest, backlog),
            Start::Back(n) => (StartPosition::Back(usize::from(n)), usize::from(n).min(backlog)),
        };
        self.readers.push(Tracked {
            reader: ring.new_reader_at(start),
            position: Some(self.total() - back as u64),
        });
    }

    fn read(&mut self, index: usize, len: usize) {
        let tracked = &mut self.readers[index];
        let mut buf = vec![0u8; len];
        let result = tracked.reader.try_read(&mut buf);

        match tracked.position {
            None => {
                let err = result.expect_err("lapped reader must stay invalidated");
                assert!(err.is_invalidated());
                assert!(!tracked.reader.is_valid());
            }
            Some(position) => {
                let n = result.expect("reader within one lap must be readable");
                let start = position as usize;
                let expected = len.min(self.stream.len() - start);
                assert_eq!(n, expected);
                assert_eq!(&buf[..n], &self.stream[start..start + n]);
                tracked.position = Some(position + n as u64);
            }
        }
    }
}

fuzz_target!(|input: ReaderInput| {
    let capacity = usize::from(input.capacity).max(2);
    let ring = RingBuffer::new(capacity);
    let mut model = Model {
        capacity,
        stream: Vec::new(),
        readers: Vec::new(),
    };

    for op in input.operations.into_iter().take(256) {
        match op {
            ReaderOp::Write(data) => model.write(&ring, &data),
            ReaderOp::Oversized { value, extra } => {
                let data = vec![value; capacity + usize::from(extra)];
                model.write(&ring, &data);
            }
            ReaderOp::AddReader(start) => {
                if model.readers.len() < 16 {
                    model.add_reader(&ring, start);
                }
            }
            ReaderOp::Read { reader, len } => {
                if !model.readers.is_empty() {
                    let index = usize::from(reader) % model.readers.len();
                    model.read(index, usize::from(len));
                }
            }
            ReaderOp::DropReader(reader) => {
                if !model.readers.is_empty() {
                    let index = usize::from(reader) % model.readers.len();
                    model.readers.swap_remove(index);
                }
            }
            ReaderOp::Reset => {
                ring.reset();
                model.stream.clear();
                for tracked in &mut model.readers {
                    tracked.position = None;
                }
            }
        }

        let live = model.readers.iter().filter(|t| t.position.is_some()).count();
        assert_eq!(ring.reader_count(), live);
    }
});
