//! Broadcast wake-up for readers waiting on the next write.
//!
//! Every write bumps a sequence number and wakes *all* waiters: blocking readers
//! through a parking_lot condvar, async readers through a `tokio::sync::watch`
//! channel carrying the same sequence. A waiter samples the sequence before
//! checking for data and only sleeps while it is unchanged, so a write landing
//! between the check and the sleep is never missed.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::watch;

#[derive(Debug)]
pub(crate) struct WriteSignal {
    seq: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
    watch: watch::Sender<u64>,
}

impl WriteSignal {
    pub fn new() -> Self {
        let (watch, _rx) = watch::channel(0);
        Self {
            seq: AtomicU64::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            watch,
        }
    }

    /// Current sequence; sample this before checking for data.
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Wake every waiter. Call after the state change is visible.
    pub fn notify(&self) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        // Taking the lock orders the bump against a waiter that has checked
        // the sequence but not yet parked.
        drop(self.lock.lock());
        self.cond.notify_all();
        self.watch.send_replace(seq);
    }

    /// Block until the sequence moves past `seen` or `deadline` passes.
    ///
    /// Returns false on timeout.
    pub fn wait_past(&self, seen: u64, deadline: Option<Instant>) -> bool {
        let mut guard = self.lock.lock();
        while self.sequence() == seen {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return self.sequence() != seen;
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        }
        true
    }

    /// Receiver for async waiters; starts with the current sequence marked seen.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.watch.subscribe()
    }
}
