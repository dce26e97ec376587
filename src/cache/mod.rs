//! Frame cache facade.
//!
//! [`FrameCache`] ties together a [`FrameSource`], the bounded slot table,
//! the optional prefetch worker and the lazily built [`TimeIndex`].
//! Construction never fails outright: a cache that could not be set up
//! reports `is_valid() == false` and answers every request with
//! `CacheInvalid`.

pub mod observer;
pub(crate) mod prefetch;
pub(crate) mod slots;
pub mod stats;

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{CacheError, Result};
use crate::frame::frame_ref::{FrameCell, FrameOwner};
use crate::frame::FrameRef;
use crate::source::{FrameSource, RawVideoFile};
use crate::time_index::TimeIndex;
use crate::CacheOptions;

pub use observer::{CacheEvent, CacheObserver, ChannelObserver};
pub use stats::CacheStatsSnapshot;

use prefetch::PrefetchScheduler;
use slots::SlotTable;
use stats::CacheStats;

/// Number of slots a cache gets.
///
/// `requested == 0` asks for the whole sequence; `max_memory == 0` (or an
/// unknown frame size) means no budget. A budget too small for a single
/// frame fails with `SystemResources`.
pub fn derive_capacity(
    frame_count: usize,
    bytes_per_frame: usize,
    requested: usize,
    max_memory: usize,
) -> Result<usize> {
    let wanted = if requested == 0 {
        frame_count
    } else {
        requested.min(frame_count)
    };
    let capacity = if max_memory > 0 && bytes_per_frame > 0 {
        (max_memory / bytes_per_frame).min(wanted)
    } else {
        wanted
    };
    if capacity == 0 && frame_count > 0 {
        return Err(CacheError::SystemResources);
    }
    Ok(capacity)
}

struct CacheShared<S: FrameSource> {
    me: Weak<CacheShared<S>>,
    source: S,
    table: Mutex<SlotTable<S::Frame>>,
    time_index: OnceCell<TimeIndex>,
    prefetcher: OnceCell<PrefetchScheduler<S::Frame>>,
    observers: ArcSwap<Vec<Arc<dyn CacheObserver>>>,
    stats: CacheStats,
}

impl<S: FrameSource> CacheShared<S> {
    fn new_cell(&self, index: usize) -> FrameCell<S::Frame> {
        let owner: Weak<dyn FrameOwner<S::Frame>> = self.me.clone();
        FrameCell::cached(index, owner)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.source.frame_count() {
            Ok(())
        } else {
            Err(CacheError::NoSuchFrame)
        }
    }

    /// `lookup` counts the request toward hit/miss statistics.
    fn acquire(
        &self,
        index: usize,
        pin: bool,
        lookup: bool,
    ) -> Result<Arc<FrameCell<S::Frame>>> {
        self.check_index(index)?;
        let acquired = self
            .table
            .lock()
            .acquire(index, pin, || self.new_cell(index))
            .map_err(|e| {
                debug!(index, "No evictable slot");
                e
            })?;
        if let Some(evicted) = acquired.evicted {
            debug!(index, evicted, "Evicted frame");
            self.stats.record_eviction();
            for observer in self.observers.load().iter() {
                observer.on_frame_evicted(evicted);
            }
        }
        if lookup {
            self.stats.record_lookup(acquired.hit);
        }
        Ok(acquired.cell)
    }

    fn decode(&self, index: usize) -> Result<S::Frame> {
        let started = Instant::now();
        let result = self.source.decode(index);
        self.stats.record_decode(started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!(index, "Decode failed: {}", e);
        }
        result
    }

    fn notify_ready(&self, index: usize) {
        for observer in self.observers.load().iter() {
            observer.on_frame_ready(index);
        }
    }

    /// Publishes a decode the prefetch worker already claimed.
    fn complete_prefetch(&self, cell: &FrameCell<S::Frame>) {
        let Some(index) = cell.index() else {
            let _ = cell.publish(Err(CacheError::Internal));
            return;
        };
        if cell.publish(self.decode(index)).is_ok() {
            self.notify_ready(index);
        }
    }

    fn time_index(&self) -> Result<&TimeIndex> {
        self.time_index
            .get_or_try_init(|| TimeIndex::new(self.source.timestamps()?))
    }
}

impl<S: FrameSource> FrameOwner<S::Frame> for CacheShared<S> {
    fn pin(&self, cell: &Arc<FrameCell<S::Frame>>) -> bool {
        self.table.lock().pin(cell)
    }

    fn unpin(&self, cell: &Arc<FrameCell<S::Frame>>) {
        self.table.lock().unpin(cell)
    }

    fn prefetch(&self, cell: &Arc<FrameCell<S::Frame>>) {
        let Some(scheduler) = self.prefetcher.get() else {
            return;
        };
        // Holding the table until the job is queued keeps the slot from
        // being evicted and recreated in between.
        let table = self.table.lock();
        if !table.holds(cell) {
            return;
        }
        let queued = scheduler.enqueue(cell);
        drop(table);
        if queued {
            self.stats.record_prefetch();
        }
    }

    fn materialize(&self, cell: &FrameCell<S::Frame>) -> Result<()> {
        let mut decoded = false;
        cell.materialize_with(|index| {
            decoded = true;
            self.decode(index)
        })?;
        if decoded {
            if let Some(index) = cell.index() {
                self.notify_ready(index);
            }
        }
        Ok(())
    }
}

/// Bounded cache of decoded frames over a [`FrameSource`].
///
/// Safe to share between threads; every method takes `&self`. Handles
/// returned by [`get_frame`](Self::get_frame) may outlive the cache and
/// keep their payload alive.
pub struct FrameCache<S: FrameSource> {
    shared: std::result::Result<Arc<CacheShared<S>>, CacheError>,
}

impl FrameCache<RawVideoFile> {
    /// Opens a frame file. Failure to open it yields an invalid cache whose
    /// `fatal_error()` is the open error.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, options: CacheOptions) -> Self {
        match RawVideoFile::open(path) {
            Ok(source) => Self::with_source(source, options),
            Err(e) => {
                warn!("Frame cache unusable: {}", e);
                Self { shared: Err(e) }
            }
        }
    }
}

impl<S: FrameSource> FrameCache<S> {
    #[instrument(skip_all, fields(source = source.name()))]
    pub fn with_source(source: S, options: CacheOptions) -> Self {
        let shared = Self::build(source, &options).map_err(|e| {
            warn!("Frame cache unusable: {}", e);
            e
        });
        Self { shared }
    }

    fn build(source: S, options: &CacheOptions) -> Result<Arc<CacheShared<S>>> {
        let frame_count = source.frame_count();
        let capacity = derive_capacity(
            frame_count,
            source.bytes_per_frame(),
            options.requested_frames,
            options.max_memory,
        )?;

        let shared = Arc::new_cyclic(|me| CacheShared {
            me: me.clone(),
            source,
            table: Mutex::new(SlotTable::new(capacity)),
            time_index: OnceCell::new(),
            prefetcher: OnceCell::new(),
            observers: ArcSwap::from_pointee(Vec::new()),
            stats: CacheStats::new(),
        });

        if options.build_time_index {
            shared.time_index()?;
        }

        if options.prefetch && capacity > 0 {
            let worker: Weak<CacheShared<S>> = Arc::downgrade(&shared);
            let scheduler = PrefetchScheduler::start(shared.source.name(), move |cell| {
                match worker.upgrade() {
                    Some(cache) => cache.complete_prefetch(cell),
                    None => {
                        let _ = cell.publish(Err(CacheError::CacheInvalid));
                    }
                }
            })?;
            let _ = shared.prefetcher.set(scheduler);
        }

        info!(
            "Frame cache ready: {} frames, {} slots, prefetch {}",
            frame_count,
            capacity,
            shared.prefetcher.get().is_some()
        );
        Ok(shared)
    }

    fn shared(&self) -> Result<&Arc<CacheShared<S>>> {
        self.shared.as_ref().map_err(|_| CacheError::CacheInvalid)
    }

    pub fn is_valid(&self) -> bool {
        self.shared.is_ok()
    }

    /// Why construction failed, `None` for a valid cache.
    pub fn fatal_error(&self) -> Option<CacheError> {
        self.shared.as_ref().err().copied()
    }

    /// Frames in the sequence; 0 for an invalid cache.
    pub fn frame_count(&self) -> usize {
        self.shared().map_or(0, |s| s.source.frame_count())
    }

    /// Slot capacity; 0 for an invalid cache.
    pub fn cache_size(&self) -> usize {
        self.shared().map_or(0, |s| s.table.lock().capacity())
    }

    /// Slots currently holding a decoded payload.
    pub fn resident_count(&self) -> usize {
        self.shared().map_or(0, |s| s.table.lock().resident())
    }

    pub fn source(&self) -> Result<&S> {
        self.shared().map(|s| &s.source)
    }

    pub fn source_name(&self) -> Option<&str> {
        self.shared().ok().map(|s| s.source.name())
    }

    pub fn prefetch_running(&self) -> bool {
        self.shared()
            .ok()
            .and_then(|s| s.prefetcher.get())
            .is_some_and(PrefetchScheduler::is_running)
    }

    /// Returns a handle on frame `index`.
    ///
    /// With `wait` the handle comes back locked and decoded, the decode
    /// happening on this thread unless the prefetch worker already has it.
    /// Without `wait` the handle is unlocked and its payload may not exist
    /// yet; call [`FrameRef::lock`] before reading it.
    ///
    /// Fails with `NoSuchFrame` for an out-of-range index and with
    /// `SystemResources` when every slot is locked or being decoded.
    pub fn get_frame(&self, index: usize, wait: bool) -> Result<FrameRef<S::Frame>> {
        let shared = self.shared()?;
        if !wait {
            return Ok(FrameRef::from_cell(shared.acquire(index, false, true)?));
        }
        let cell = shared.acquire(index, true, true)?;
        let handle = FrameRef::from_pinned_cell(Arc::clone(&cell));
        shared.materialize(&cell)?;
        Ok(handle)
    }

    /// [`get_frame`](Self::get_frame) for the frame recorded at
    /// `timestamp`, within the time index's match tolerance.
    pub fn get_frame_at(&self, timestamp: Duration, wait: bool) -> Result<FrameRef<S::Frame>> {
        let index = self.timestamp_to_frame_index(timestamp)?;
        self.get_frame(index, wait)
    }

    /// Queues frame `index` for background decode, claiming a slot for it.
    /// Only claims the slot when prefetching is disabled.
    pub fn prefetch(&self, index: usize) -> Result<()> {
        let shared = self.shared()?;
        let cell = shared.acquire(index, false, false)?;
        shared.prefetch(&cell);
        Ok(())
    }

    /// Blocks until frame `index` is decoded, decoding it here if nobody
    /// else is.
    pub fn wait_for(&self, index: usize) -> Result<()> {
        let shared = self.shared()?;
        shared.check_index(index)?;
        let resident = shared.table.lock().lookup(index);
        let cell = match resident {
            Some(cell) => cell,
            None => shared.acquire(index, false, false)?,
        };
        shared.materialize(&cell)
    }

    /// The frame time table, read from the source on first use.
    pub fn time_index(&self) -> Result<&TimeIndex> {
        self.shared()?.time_index()
    }

    pub fn frame_index_to_timestamp(&self, index: usize) -> Result<Duration> {
        self.time_index()?.frame_index_to_timestamp(index)
    }

    pub fn timestamp_to_frame_index(&self, timestamp: Duration) -> Result<usize> {
        self.time_index()?.timestamp_to_frame_index(timestamp)
    }

    pub fn first_timestamp(&self) -> Result<Duration> {
        self.time_index()?.first_timestamp()
    }

    pub fn last_timestamp(&self) -> Result<Duration> {
        self.time_index()?.last_timestamp()
    }

    pub fn closest_timestamp(&self, timestamp: Duration) -> Result<Duration> {
        self.time_index()?.closest_timestamp(timestamp)
    }

    pub fn closest_frame_index(&self, timestamp: Duration) -> Result<usize> {
        self.time_index()?.closest_index(timestamp)
    }

    pub fn prev_timestamp(&self, timestamp: Duration) -> Result<Duration> {
        self.time_index()?.prev_timestamp(timestamp)
    }

    pub fn next_timestamp(&self, timestamp: Duration) -> Result<Duration> {
        self.time_index()?.next_timestamp(timestamp)
    }

    pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
        if let Ok(shared) = self.shared() {
            shared.observers.rcu(|current| {
                let mut next = Vec::clone(current);
                next.push(Arc::clone(&observer));
                next
            });
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.shared()
            .map(|s| s.stats.snapshot())
            .unwrap_or_default()
    }

    pub fn cache_hits(&self) -> u64 {
        self.stats().hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.stats().misses
    }
}

impl<S: FrameSource> Drop for FrameCache<S> {
    fn drop(&mut self) {
        let Ok(shared) = self.shared.as_ref() else {
            return;
        };
        if let Some(scheduler) = shared.prefetcher.get() {
            scheduler.shutdown();
        }
        let mut table = shared.table.lock();
        let released = table.len();
        table.clear();
        debug!(
            "Frame cache for {} closed, {} slots released",
            shared.source.name(),
            released
        );
    }
}
