//! Bounded frame-index -> cell table with lock-aware LRU eviction.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::{CacheError, Result};
use crate::frame::frame_ref::FrameCell;
use crate::frame::FrameState;

struct Slot<T> {
    cell: Arc<FrameCell<T>>,
    locks: usize,
    last_touch: u64,
}

impl<T> Slot<T> {
    fn evictable(&self) -> bool {
        self.locks == 0 && self.cell.is_settled()
    }
}

/// Result of [`SlotTable::acquire`].
pub(crate) struct Acquired<T> {
    pub cell: Arc<FrameCell<T>>,
    pub hit: bool,
    /// Index whose slot was evicted to make room.
    pub evicted: Option<usize>,
}

/// Every entry counts toward `capacity`, decoded or not. The table holds
/// one reference on each cell it stores.
pub(crate) struct SlotTable<T> {
    capacity: usize,
    slots: HashMap<usize, Slot<T>>,
    clock: u64,
}

impl<T> SlotTable<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: HashMap::with_capacity(capacity),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Slots holding a decoded payload.
    pub fn resident(&self) -> usize {
        self.slots
            .values()
            .filter(|s| s.cell.payload().is_some())
            .count()
    }

    pub fn lookup(&self, index: usize) -> Option<Arc<FrameCell<T>>> {
        self.slots.get(&index).map(|s| Arc::clone(&s.cell))
    }

    /// Whether `cell` is the one currently stored for its index.
    pub fn holds(&self, cell: &Arc<FrameCell<T>>) -> bool {
        cell.index()
            .and_then(|i| self.slots.get(&i))
            .is_some_and(|s| Arc::ptr_eq(&s.cell, cell))
    }

    /// Returns the slot for `index`, creating it with `make` on a miss.
    ///
    /// A full table evicts its least recently touched evictable slot; when
    /// every slot is locked or has a decode in flight this fails with
    /// `SystemResources`. A slot whose decode failed is replaced rather
    /// than returned. With `pin` the slot gains a lock before the table is
    /// released.
    pub fn acquire<F>(&mut self, index: usize, pin: bool, make: F) -> Result<Acquired<T>>
    where
        F: FnOnce() -> FrameCell<T>,
    {
        self.clock += 1;
        let now = self.clock;

        if let Some(slot) = self.slots.get_mut(&index) {
            if matches!(slot.cell.state(), FrameState::Failed(_)) {
                trace!(index, "Replacing failed slot");
                if let Some(failed) = self.slots.remove(&index) {
                    failed.cell.release();
                }
            } else {
                slot.last_touch = now;
                if pin {
                    slot.locks += 1;
                }
                return Ok(Acquired {
                    cell: Arc::clone(&slot.cell),
                    hit: true,
                    evicted: None,
                });
            }
        }

        let mut evicted = None;
        if self.slots.len() >= self.capacity {
            let victim = self
                .slots
                .iter()
                .filter(|(_, s)| s.evictable())
                .min_by_key(|(_, s)| s.last_touch)
                .map(|(i, _)| *i)
                .ok_or(CacheError::SystemResources)?;
            if let Some(slot) = self.slots.remove(&victim) {
                slot.cell.release();
            }
            evicted = Some(victim);
        }

        let cell = Arc::new(make());
        cell.retain();
        self.slots.insert(
            index,
            Slot {
                cell: Arc::clone(&cell),
                locks: usize::from(pin),
                last_touch: now,
            },
        );
        Ok(Acquired {
            cell,
            hit: false,
            evicted,
        })
    }

    /// Adds a lock. Returns false when `cell` is no longer stored.
    pub fn pin(&mut self, cell: &Arc<FrameCell<T>>) -> bool {
        self.clock += 1;
        let now = self.clock;
        match self.slot_of(cell) {
            Some(slot) => {
                slot.locks += 1;
                slot.last_touch = now;
                true
            }
            None => false,
        }
    }

    pub fn unpin(&mut self, cell: &Arc<FrameCell<T>>) {
        self.clock += 1;
        let now = self.clock;
        if let Some(slot) = self.slot_of(cell) {
            slot.locks = slot.locks.saturating_sub(1);
            slot.last_touch = now;
        }
    }

    /// Drops every slot and the table's reference on it.
    pub fn clear(&mut self) {
        for (_, slot) in self.slots.drain() {
            slot.cell.release();
        }
    }

    fn slot_of(&mut self, cell: &Arc<FrameCell<T>>) -> Option<&mut Slot<T>> {
        let index = cell.index()?;
        self.slots
            .get_mut(&index)
            .filter(|s| Arc::ptr_eq(&s.cell, cell))
    }
}

impl<T> Drop for SlotTable<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acquire(table: &mut SlotTable<u32>, index: usize, pin: bool) -> Result<Acquired<u32>> {
        table.acquire(index, pin, || FrameCell::detached(index))
    }

    #[test]
    fn hit_returns_same_cell() {
        let mut table = SlotTable::new(4);
        let first = acquire(&mut table, 3, false).unwrap();
        assert!(!first.hit);
        assert_eq!(first.cell.ref_count(), 1);

        let again = acquire(&mut table, 3, false).unwrap();
        assert!(again.hit);
        assert!(Arc::ptr_eq(&first.cell, &again.cell));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn evicts_least_recently_touched() {
        let mut table = SlotTable::new(2);
        acquire(&mut table, 0, false).unwrap();
        acquire(&mut table, 1, false).unwrap();
        acquire(&mut table, 0, false).unwrap();

        let third = acquire(&mut table, 2, false).unwrap();
        assert_eq!(third.evicted, Some(1));
        assert!(table.lookup(0).is_some());
        assert!(table.lookup(1).is_none());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn locked_slots_are_never_evicted() {
        let mut table = SlotTable::new(2);
        let a = acquire(&mut table, 0, true).unwrap();
        acquire(&mut table, 1, true).unwrap();
        assert_eq!(
            acquire(&mut table, 2, false).err(),
            Some(CacheError::SystemResources)
        );

        table.unpin(&a.cell);
        let c = acquire(&mut table, 2, false).unwrap();
        assert_eq!(c.evicted, Some(0));
        // The table's reference went with the slot.
        assert_eq!(a.cell.ref_count(), 0);
    }

    #[test]
    fn queued_slots_are_not_evictable() {
        let mut table = SlotTable::new(1);
        let a = acquire(&mut table, 0, false).unwrap();
        assert!(a.cell.try_enqueue());
        assert_eq!(
            acquire(&mut table, 1, false).err(),
            Some(CacheError::SystemResources)
        );
        a.cell.cancel_queued();
        assert!(acquire(&mut table, 1, false).is_ok());
    }

    #[test]
    fn failed_slot_is_replaced() {
        let mut table = SlotTable::new(1);
        let a = acquire(&mut table, 5, false).unwrap();
        assert!(a.cell.publish(Err(CacheError::FileRead)).is_err());

        let b = acquire(&mut table, 5, false).unwrap();
        assert!(!b.hit);
        assert!(!Arc::ptr_eq(&a.cell, &b.cell));
        assert_eq!(b.cell.state(), FrameState::Empty);
    }

    #[test]
    fn pin_ignores_orphaned_cells() {
        let mut table = SlotTable::new(1);
        let a = acquire(&mut table, 0, false).unwrap();
        acquire(&mut table, 1, false).unwrap();
        assert!(!table.holds(&a.cell));
        assert!(!table.pin(&a.cell));
    }

    #[test]
    fn clear_releases_table_references() {
        let mut table = SlotTable::new(3);
        let a = acquire(&mut table, 0, false).unwrap();
        a.cell.retain();
        assert_eq!(a.cell.ref_count(), 2);
        table.clear();
        assert_eq!(a.cell.ref_count(), 1);
        assert_eq!(table.len(), 0);
        assert_eq!(table.capacity(), 3);
    }
}
