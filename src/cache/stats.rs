//! Cache counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    decodes: AtomicU64,
    decode_failures: AtomicU64,
    prefetch_requests: AtomicU64,
}

/// Counters shared by consumer threads and the prefetch worker. Every
/// update is mirrored to the `metrics` facade.
pub(crate) struct CacheStats {
    counters: CachePadded<Counters>,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub decodes: u64,
    pub decode_failures: u64,
    pub prefetch_requests: u64,
}

impl CacheStatsSnapshot {
    /// Fraction of `get_frame` calls served from a resident slot.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub fn new() -> Self {
        Self {
            counters: CachePadded::new(Counters::default()),
        }
    }

    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framecache_hits").increment(1);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framecache_misses").increment(1);
        }
    }

    pub fn record_eviction(&self) {
        self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("framecache_evictions").increment(1);
    }

    pub fn record_decode(&self, elapsed: Duration, ok: bool) {
        metrics::histogram!("framecache_decode_us").record(elapsed.as_micros() as f64);
        if ok {
            self.counters.decodes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("framecache_decode_failures").increment(1);
        }
    }

    pub fn record_prefetch(&self) {
        self.counters.prefetch_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let c = &self.counters;
        CacheStatsSnapshot {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            decodes: c.decodes.load(Ordering::Relaxed),
            decode_failures: c.decode_failures.load(Ordering::Relaxed),
            prefetch_requests: c.prefetch_requests.load(Ordering::Relaxed),
        }
    }
}
