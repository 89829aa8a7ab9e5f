//! Generational arena of live readers.
//!
//! The buffer owns every reader's cursor; a [`Reader`](crate::Reader) handle
//! only carries a [`ReaderId`]. Invalidation marks the slot dead and frees it in
//! one step, bumping the slot generation so the stale id can never resolve to
//! whichever reader reuses the slot later.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opaque handle of a registered reader: slot index plus generation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId {
    index: u32,
    generation: u32,
}

impl ReaderId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the owning buffer's registry.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this reader was registered.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    live: bool,
    /// Advanced by the owning reader under the shared lock; read and reset by
    /// the writer under the exclusive lock.
    cursor: AtomicUsize,
}

/// Registry of readers the writer must check on every write.
#[derive(Debug, Default)]
pub(crate) struct ReaderRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reader positioned at `cursor`.
    pub fn register(&mut self, cursor: usize) -> ReaderId {
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.live = true;
            slot.cursor.store(cursor, Ordering::Relaxed);
            return ReaderId::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            live: true,
            cursor: AtomicUsize::new(cursor),
        });
        ReaderId::new(index, 0)
    }

    /// Cursor cell of a live reader, or `None` once the id is dead or stale.
    pub fn cursor(&self, id: ReaderId) -> Option<&AtomicUsize> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.live && slot.generation == id.generation)
            .map(|slot| &slot.cursor)
    }

    pub fn is_live(&self, id: ReaderId) -> bool {
        self.cursor(id).is_some()
    }

    /// Free the slot held by `id`. Returns false if it was already dead.
    pub fn release(&mut self, id: ReaderId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        self.kill(id.index);
        true
    }

    /// Kill every live reader whose cursor satisfies `pred`.
    pub fn invalidate_where<F>(&mut self, mut pred: F) -> Vec<ReaderId>
    where
        F: FnMut(usize) -> bool,
    {
        let doomed: Vec<ReaderId> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live && pred(slot.cursor.load(Ordering::Relaxed)))
            .map(|(index, slot)| ReaderId::new(index as u32, slot.generation))
            .collect();

        for id in &doomed {
            self.kill(id.index);
        }
        doomed
    }

    pub fn invalidate_all(&mut self) -> Vec<ReaderId> {
        self.invalidate_where(|_| true)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn ids(&self) -> Vec<ReaderId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.live)
            .map(|(index, slot)| ReaderId::new(index as u32, slot.generation))
            .collect()
    }

    fn kill(&mut self, index: u32) {
        let slot = &mut self.slots[index as usize];
        slot.live = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index);
        self.live -= 1;
    }
}
