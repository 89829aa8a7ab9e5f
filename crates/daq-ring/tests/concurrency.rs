//! Multi-threaded and async reader behaviour.

use daq_ring::{RingBuffer, RingError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Deterministic byte stream: position `i` holds `i % 251`.
fn pattern(start: usize, len: usize) -> Vec<u8> {
    (start..start + len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn readers_see_every_byte_in_order() {
    const TOTAL: usize = 200_000;
    const CHUNK: usize = 97;

    let ring = Arc::new(RingBuffer::new(1 << 20));
    let readers: Vec<_> = (0..4).map(|_| ring.new_reader()).collect();

    let consumers: Vec<_> = readers
        .into_iter()
        .map(|mut reader| {
            thread::spawn(move || {
                let mut seen = 0usize;
                let mut buf = vec![0u8; 4096];
                while seen < TOTAL {
                    let n = reader
                        .read_timeout(&mut buf, Duration::from_secs(5))
                        .unwrap();
                    assert_eq!(&buf[..n], pattern(seen, n).as_slice());
                    seen += n;
                }
                seen
            })
        })
        .collect();

    let mut written = 0;
    while written < TOTAL {
        let len = CHUNK.min(TOTAL - written);
        ring.write(&pattern(written, len));
        written += len;
    }

    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), TOTAL);
    }
    assert_eq!(ring.total_written(), TOTAL as u64);
}

/// Writes `total` pattern bytes, holding each chunk back until it cannot lap
/// the reader that reports progress through `consumed`.
fn paced_write(ring: &RingBuffer, consumed: &AtomicU64, start: usize, total: usize) {
    let capacity = ring.capacity() as u64;
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut written = start;
    let mut step = 0;

    while written < start + total {
        let len = (1 + step % 40).min(start + total - written);
        while written as u64 - consumed.load(Ordering::Acquire) + len as u64 >= capacity {
            assert!(Instant::now() < deadline, "reader stalled");
            thread::yield_now();
        }
        ring.write(&pattern(written, len));
        written += len;
        step += 1;
    }
}

#[test]
fn reader_keeps_order_while_writer_wraps() {
    const CAPACITY: usize = 64;
    const TOTAL: usize = 100_000;

    let ring = Arc::new(RingBuffer::new(CAPACITY));
    let consumed = Arc::new(AtomicU64::new(0));
    let mut reader = ring.new_reader();

    let consumer = {
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut seen = 0usize;
            let mut buf = [0u8; 13];
            while seen < TOTAL {
                let n = reader
                    .read_timeout(&mut buf, Duration::from_secs(5))
                    .unwrap();
                assert_eq!(&buf[..n], pattern(seen, n).as_slice());
                seen += n;
                consumed.store(seen as u64, Ordering::Release);
            }
            seen
        })
    };

    paced_write(&ring, &consumed, 0, TOTAL);

    assert_eq!(consumer.join().unwrap(), TOTAL);
    assert!(ring.total_written() > 1000 * CAPACITY as u64);
}

#[test]
fn lapped_reader_yields_stream_prefix_then_invalidation() {
    const CAPACITY: usize = 64;
    const PACED: usize = 20 * CAPACITY;

    let ring = Arc::new(RingBuffer::new(CAPACITY));
    let consumed = Arc::new(AtomicU64::new(0));
    let mut reader = ring.new_reader();

    let consumer = {
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            let mut collected = Vec::new();
            let mut buf = [0u8; 9];
            loop {
                match reader.read_timeout(&mut buf, Duration::from_secs(5)) {
                    Ok(n) => {
                        collected.extend_from_slice(&buf[..n]);
                        consumed.store(collected.len() as u64, Ordering::Release);
                    }
                    Err(err) => return (collected, err),
                }
            }
        })
    };

    paced_write(&ring, &consumed, 0, PACED);

    let deadline = Instant::now() + Duration::from_secs(10);
    while consumed.load(Ordering::Acquire) < PACED as u64 {
        assert!(Instant::now() < deadline, "reader stalled");
        thread::yield_now();
    }

    // One full lap with nothing consumed.
    ring.write(&pattern(PACED, CAPACITY));

    let (collected, err) = consumer.join().unwrap();
    assert!(err.is_invalidated(), "unexpected error: {err:?}");
    assert_eq!(collected.len(), PACED);
    assert_eq!(collected, pattern(0, PACED));
}

#[test]
fn slow_reader_is_invalidated_not_skipped() {
    let ring = Arc::new(RingBuffer::new(64));
    let mut slow = ring.new_reader();

    let writer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for i in 0..100 {
                ring.write(&pattern(i * 16, 16));
            }
        })
    };
    writer.join().unwrap();

    let mut buf = [0u8; 8];
    let mut collected = Vec::new();
    loop {
        match slow.try_read(&mut buf) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&buf[..n]),
            Err(err) => {
                assert!(err.is_invalidated());
                break;
            }
        }
    }

    // Whatever was read before invalidation is a prefix of the stream.
    assert_eq!(collected, pattern(0, collected.len()));
    assert!(!slow.is_valid());
}

#[test]
fn blocked_readers_all_wake_on_single_write() {
    let ring = Arc::new(RingBuffer::new(32));
    let barrier = Arc::new(Barrier::new(5));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let mut reader = ring.new_reader();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut buf = [0u8; 8];
                let n = reader.read_timeout(&mut buf, Duration::from_secs(5)).unwrap();
                buf[..n].to_vec()
            })
        })
        .collect();

    barrier.wait();
    thread::sleep(Duration::from_millis(20));
    ring.write(b"wake");

    for handle in handles {
        assert_eq!(handle.join().unwrap(), b"wake");
    }
}

#[test]
fn blocked_reader_wakes_into_invalidation() {
    let ring = Arc::new(RingBuffer::new(8));
    let mut reader = ring.new_reader();

    let waiter = thread::spawn(move || {
        let mut buf = [0u8; 4];
        reader.read_timeout(&mut buf, Duration::from_secs(5))
    });

    thread::sleep(Duration::from_millis(20));
    ring.write(&[0u8; 20]);

    assert!(matches!(
        waiter.join().unwrap(),
        Err(RingError::Invalidated { .. })
    ));
}

#[test]
fn blocked_reader_wakes_on_reset() {
    let ring = Arc::new(RingBuffer::new(8));
    let mut reader = ring.new_reader();

    let waiter = thread::spawn(move || {
        let mut buf = [0u8; 4];
        reader.read_timeout(&mut buf, Duration::from_secs(5))
    });

    thread::sleep(Duration::from_millis(20));
    ring.reset();

    assert!(waiter.join().unwrap().unwrap_err().is_invalidated());
}

#[test]
fn blocked_reader_wakes_when_buffer_dropped() {
    let ring = RingBuffer::new(8);
    let mut reader = ring.new_reader();

    let waiter = thread::spawn(move || {
        let mut buf = [0u8; 4];
        reader.read_timeout(&mut buf, Duration::from_secs(5))
    });

    thread::sleep(Duration::from_millis(20));
    drop(ring);

    assert!(matches!(
        waiter.join().unwrap(),
        Err(RingError::Closed { .. })
    ));
}

#[test]
fn independent_buffers_do_not_share_wakeups() {
    let quiet = RingBuffer::new(8);
    let noisy = RingBuffer::new(8);
    let mut reader = quiet.new_reader();

    for _ in 0..10 {
        noisy.write(b"x");
    }

    let mut buf = [0u8; 4];
    assert!(matches!(
        reader.read_timeout(&mut buf, Duration::from_millis(20)),
        Err(RingError::TimedOut { .. })
    ));
    assert_eq!(reader.stats().reads, 0);
}

#[test]
fn concurrent_snapshots_during_writes() {
    let ring = Arc::new(RingBuffer::new(128));

    let writer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for i in 0..5_000 {
                ring.write(&pattern(i * 7, 7));
            }
        })
    };

    let observer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for _ in 0..1_000 {
                let snapshot = ring.snapshot().unwrap();
                assert!(snapshot.len() <= ring.capacity());
            }
        })
    };

    writer.join().unwrap();
    observer.join().unwrap();
    assert_eq!(ring.snapshot().unwrap(), pattern(5_000 * 7 - 128, 128));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn async_readers_follow_writer() {
    let ring = Arc::new(RingBuffer::new(1 << 16));
    let mut reader = ring.new_reader();

    let consumer = tokio::spawn(async move {
        let mut seen = 0usize;
        let mut buf = [0u8; 256];
        while seen < 10_000 {
            let n = reader.read_async(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], pattern(seen, n).as_slice());
            seen += n;
        }
        seen
    });

    let mut written = 0;
    while written < 10_000 {
        ring.write(&pattern(written, 100));
        written += 100;
        tokio::task::yield_now().await;
    }

    let seen = tokio::time::timeout(Duration::from_secs(5), consumer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen, 10_000);
}

#[tokio::test]
async fn async_reader_reports_closed_buffer() {
    let ring = RingBuffer::new(8);
    let mut reader = ring.new_reader();
    drop(ring);

    let mut buf = [0u8; 4];
    assert!(matches!(
        reader.read_async(&mut buf).await,
        Err(RingError::Closed { .. })
    ));
}
