//! Reference-counted frame handle.
//!
//! A [`FrameRef`] points at a [`FrameCell`], which holds the payload (once
//! decoded), an intrusive reference count and the decode state. Cells made
//! by a cache carry a weak link back to it so that `lock`, `unlock` and
//! `prefetch` can be forwarded; standalone cells have no link and those
//! calls are no-ops.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use crate::error::{CacheError, Result};

/// Decode state of a frame cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Slot exists, nothing requested yet.
    Empty,
    /// Waiting in the prefetch queue.
    PrefetchQueued,
    /// A thread is decoding the payload.
    Decoding,
    Ready,
    /// Terminal; the decode collaborator reported an error.
    Failed(CacheError),
}

/// Cache-side operations a handle forwards to the cache that created it.
pub(crate) trait FrameOwner<T>: Send + Sync {
    /// Pins `cell` if it is still resident. Returns false for orphaned cells.
    fn pin(&self, cell: &Arc<FrameCell<T>>) -> bool;
    fn unpin(&self, cell: &Arc<FrameCell<T>>);
    fn prefetch(&self, cell: &Arc<FrameCell<T>>);
    /// Blocks until the payload is decoded, decoding on the calling thread
    /// when nobody else has claimed it.
    fn materialize(&self, cell: &FrameCell<T>) -> Result<()>;
}

/// Outcome of trying to take ownership of a decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    Claimed,
    Busy,
    Ready,
    Failed(CacheError),
}

pub(crate) struct FrameCell<T> {
    index: Option<usize>,
    refs: AtomicUsize,
    payload: OnceCell<T>,
    state: Mutex<FrameState>,
    ready: Condvar,
    owner: Option<Weak<dyn FrameOwner<T>>>,
}

impl<T> FrameCell<T> {
    pub(crate) fn cached(index: usize, owner: Weak<dyn FrameOwner<T>>) -> Self {
        Self {
            index: Some(index),
            refs: AtomicUsize::new(0),
            payload: OnceCell::new(),
            state: Mutex::new(FrameState::Empty),
            ready: Condvar::new(),
            owner: Some(owner),
        }
    }

    fn standalone(payload: T) -> Self {
        Self {
            index: None,
            refs: AtomicUsize::new(0),
            payload: OnceCell::with_value(payload),
            state: Mutex::new(FrameState::Ready),
            ready: Condvar::new(),
            owner: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn detached(index: usize) -> Self {
        Self {
            index: Some(index),
            refs: AtomicUsize::new(0),
            payload: OnceCell::new(),
            state: Mutex::new(FrameState::Empty),
            ready: Condvar::new(),
            owner: None,
        }
    }

    pub(crate) fn index(&self) -> Option<usize> {
        self.index
    }

    pub(crate) fn state(&self) -> FrameState {
        *self.state.lock()
    }

    pub(crate) fn payload(&self) -> Option<&T> {
        self.payload.get()
    }

    pub(crate) fn owner(&self) -> Option<Arc<dyn FrameOwner<T>>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn retain(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        let released = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        debug_assert!(released.is_ok(), "frame reference released twice");
    }

    /// A cell with a decode queued or in flight must stay in the table.
    pub(crate) fn is_settled(&self) -> bool {
        !matches!(
            *self.state.lock(),
            FrameState::PrefetchQueued | FrameState::Decoding
        )
    }

    /// `Empty -> PrefetchQueued`. Returns false if the cell was in any other
    /// state, which makes re-enqueueing a no-op.
    pub(crate) fn try_enqueue(&self) -> bool {
        let mut state = self.state.lock();
        if *state == FrameState::Empty {
            *state = FrameState::PrefetchQueued;
            true
        } else {
            false
        }
    }

    /// Returns a queued cell to `Empty` when its prefetch is abandoned.
    pub(crate) fn cancel_queued(&self) {
        let mut state = self.state.lock();
        if *state == FrameState::PrefetchQueued {
            *state = FrameState::Empty;
        }
    }

    /// Moves the cell to `Decoding` if it is unclaimed. With `queued_only`
    /// only a `PrefetchQueued` cell is taken.
    pub(crate) fn claim(&self, queued_only: bool) -> Claim {
        let mut state = self.state.lock();
        let current = *state;
        match current {
            FrameState::PrefetchQueued => {
                *state = FrameState::Decoding;
                Claim::Claimed
            }
            FrameState::Empty if !queued_only => {
                *state = FrameState::Decoding;
                Claim::Claimed
            }
            FrameState::Empty | FrameState::Decoding => Claim::Busy,
            FrameState::Ready => Claim::Ready,
            FrameState::Failed(e) => Claim::Failed(e),
        }
    }

    /// Stores the decode outcome and wakes every waiter.
    pub(crate) fn publish(&self, result: Result<T>) -> Result<()> {
        let next = match result {
            Ok(frame) => {
                // Only the claimant publishes, so the cell is still unset.
                let _ = self.payload.set(frame);
                FrameState::Ready
            }
            Err(e) => FrameState::Failed(e),
        };
        let mut state = self.state.lock();
        *state = next;
        self.ready.notify_all();
        match next {
            FrameState::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }

    /// Claims and runs `decode` unless the payload is already available or
    /// another thread is decoding it, in which case this waits.
    pub(crate) fn materialize_with<F>(&self, decode: F) -> Result<()>
    where
        F: FnOnce(usize) -> Result<T>,
    {
        {
            let mut state = self.state.lock();
            loop {
                let current = *state;
                match current {
                    FrameState::Ready => return Ok(()),
                    FrameState::Failed(e) => return Err(e),
                    FrameState::Decoding => self.ready.wait(&mut state),
                    FrameState::Empty | FrameState::PrefetchQueued => {
                        *state = FrameState::Decoding;
                        break;
                    }
                }
            }
        }
        let index = self.index.ok_or(CacheError::Internal)?;
        self.publish(decode(index))
    }
}

/// Handle to a frame payload, either cache-resident or standalone.
///
/// The reference count observed through [`ref_count`](Self::ref_count)
/// equals the number of live handles on the payload, plus one while a
/// cache keeps the payload resident.
///
/// A handle may hold one lock on its cache slot. Locked slots are never
/// evicted; dropping the handle releases its lock. Clones alias the payload
/// but start unlocked.
pub struct FrameRef<T> {
    cell: Option<Arc<FrameCell<T>>>,
    // Held across the table update so lock and unlock on one handle
    // apply in order.
    pinned: Mutex<bool>,
}

impl<T> FrameRef<T> {
    /// A handle that references nothing.
    pub fn null() -> Self {
        Self {
            cell: None,
            pinned: Mutex::new(false),
        }
    }

    /// Wraps a payload that is not owned by any cache.
    pub fn new(payload: T) -> Self {
        Self::from_cell(Arc::new(FrameCell::standalone(payload)))
    }

    pub(crate) fn from_cell(cell: Arc<FrameCell<T>>) -> Self {
        cell.retain();
        Self {
            cell: Some(cell),
            pinned: Mutex::new(false),
        }
    }

    /// Handle created holding one of the slot's locks.
    pub(crate) fn from_pinned_cell(cell: Arc<FrameCell<T>>) -> Self {
        let handle = Self::from_cell(cell);
        *handle.pinned.lock() = true;
        handle
    }

    pub fn is_null(&self) -> bool {
        self.cell.is_none()
    }

    /// Live references to the payload, 0 for a null handle.
    pub fn ref_count(&self) -> usize {
        self.cell.as_ref().map_or(0, |c| c.ref_count())
    }

    /// Frame index for cache-created handles.
    pub fn frame_index(&self) -> Option<usize> {
        self.cell.as_ref().and_then(|c| c.index())
    }

    pub fn state(&self) -> Option<FrameState> {
        self.cell.as_ref().map(|c| c.state())
    }

    pub fn is_ready(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.payload().is_some())
    }

    /// Whether the handle was created by a cache that is still alive.
    pub fn is_cached(&self) -> bool {
        self.cell.as_ref().is_some_and(|c| c.owner().is_some())
    }

    /// Whether this handle currently holds a lock on its slot.
    pub fn is_locked(&self) -> bool {
        *self.pinned.lock()
    }

    /// Pins the slot and waits until its payload is decoded.
    ///
    /// No-op for null and standalone handles. A slot that has been evicted
    /// since the handle was created is materialized for this handle without
    /// being pinned.
    pub fn lock(&self) -> Result<()> {
        let Some(cell) = self.cell.as_ref() else {
            return Ok(());
        };
        let Some(owner) = cell.owner() else {
            return self.resolve().map(|_| ());
        };
        {
            let mut pinned = self.pinned.lock();
            if !*pinned {
                *pinned = owner.pin(cell);
            }
        }
        if let Err(e) = owner.materialize(cell) {
            self.unlock();
            return Err(e);
        }
        Ok(())
    }

    /// Releases this handle's lock, making the slot evictable again once no
    /// other handle holds one. The payload stays referenced by the handle.
    pub fn unlock(&self) {
        let mut pinned = self.pinned.lock();
        if !std::mem::take(&mut *pinned) {
            return;
        }
        if let Some(cell) = self.cell.as_ref() {
            if let Some(owner) = cell.owner() {
                owner.unpin(cell);
            }
        }
    }

    /// Asks the cache to decode the payload in the background. Never
    /// blocks; a no-op when the payload is present or no prefetch worker
    /// runs.
    pub fn prefetch(&self) {
        if let Some(cell) = self.cell.as_ref() {
            if cell.payload().is_none() {
                if let Some(owner) = cell.owner() {
                    owner.prefetch(cell);
                }
            }
        }
    }

    /// Borrows the payload, waiting for or performing its decode.
    pub fn get(&self) -> Result<&T> {
        self.resolve()
    }

    fn resolve(&self) -> Result<&T> {
        let cell = self.cell.as_ref().ok_or(CacheError::UnInitialized)?;
        if let Some(payload) = cell.payload() {
            return Ok(payload);
        }
        match cell.owner() {
            Some(owner) => owner.materialize(cell)?,
            None => {
                return Err(match cell.state() {
                    FrameState::Failed(e) => e,
                    _ => CacheError::CacheInvalid,
                })
            }
        }
        cell.payload().ok_or(CacheError::Internal)
    }

    /// Address of the payload, null when absent or not decoded yet.
    pub fn as_ptr(&self) -> *const T {
        self.cell
            .as_ref()
            .and_then(|c| c.payload())
            .map_or(std::ptr::null(), |p| p as *const T)
    }

    /// Whether both handles reference the same payload.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.cell, &other.cell) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T> Default for FrameRef<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> Clone for FrameRef<T> {
    fn clone(&self) -> Self {
        match &self.cell {
            Some(cell) => Self::from_cell(Arc::clone(cell)),
            None => Self::null(),
        }
    }
}

impl<T> Drop for FrameRef<T> {
    fn drop(&mut self) {
        self.unlock();
        if let Some(cell) = self.cell.take() {
            cell.release();
        }
    }
}

impl<T> Deref for FrameRef<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics on a null handle or when the payload failed to decode; use
    /// [`FrameRef::get`] to handle those cases.
    fn deref(&self) -> &T {
        match self.resolve() {
            Ok(payload) => payload,
            Err(e) => panic!("dereferenced unavailable frame: {e}"),
        }
    }
}

impl<T> PartialEq for FrameRef<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T> Eq for FrameRef<T> {}

impl<T> PartialEq<*const T> for FrameRef<T> {
    fn eq(&self, other: &*const T) -> bool {
        std::ptr::eq(self.as_ptr(), *other)
    }
}

impl<T> fmt::Debug for FrameRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameRef")
            .field("index", &self.frame_index())
            .field("state", &self.state())
            .field("refs", &self.ref_count())
            .field("locked", &self.is_locked())
            .finish()
    }
}
