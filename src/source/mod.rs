//! Decode collaborators consumed by the cache.

pub mod file;
pub mod memory;

use std::time::Duration;

use crate::error::{CacheError, Result};

pub use file::RawVideoFile;
pub use memory::MemorySource;

/// Random-access frame decoder.
///
/// Decoding is synchronous; the cache's prefetch worker is what makes it
/// asynchronous for consumers. Implementations are shared between the
/// calling threads and the worker, so `decode` takes `&self`.
pub trait FrameSource: Send + Sync + 'static {
    type Frame: Send + Sync + 'static;

    /// Identity of the source, used in logs.
    fn name(&self) -> &str;

    fn frame_count(&self) -> usize;

    /// Storage of one decoded frame, used for memory budget sizing.
    fn bytes_per_frame(&self) -> usize;

    fn timestamp(&self, index: usize) -> Result<Duration>;

    fn decode(&self, index: usize) -> Result<Self::Frame>;

    /// Decodes the frame recorded exactly at `timestamp`.
    fn decode_at(&self, timestamp: Duration) -> Result<Self::Frame> {
        let (mut lo, mut hi) = (0, self.frame_count());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.timestamp(mid)? < timestamp {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < self.frame_count() && self.timestamp(lo)? == timestamp {
            self.decode(lo)
        } else {
            Err(CacheError::NoSuchFrame)
        }
    }

    /// The full timestamp table in frame order.
    fn timestamps(&self) -> Result<Vec<Duration>> {
        (0..self.frame_count()).map(|i| self.timestamp(i)).collect()
    }
}
