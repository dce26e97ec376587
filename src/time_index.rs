//! Frame index <-> timestamp table.
//!
//! Timestamps are stored in frame order and must be non-decreasing, so
//! every lookup is a binary search over the table.

use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default tolerance for exact timestamp matches.
pub const DEFAULT_MATCH_TOLERANCE: Duration = Duration::from_micros(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeIndex {
    times: Vec<Duration>,
    tolerance: Duration,
}

impl TimeIndex {
    /// Builds the table. Fails with `FileFormat` if timestamps decrease.
    pub fn new(times: Vec<Duration>) -> Result<Self> {
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(CacheError::FileFormat);
        }
        Ok(Self {
            times,
            tolerance: DEFAULT_MATCH_TOLERANCE,
        })
    }

    /// Evenly spaced table starting at zero.
    pub fn uniform(frame_count: usize, fps: f64) -> Self {
        let times = (0..frame_count)
            .map(|i| {
                if fps > 0.0 {
                    Duration::from_secs_f64(i as f64 / fps)
                } else {
                    Duration::ZERO
                }
            })
            .collect();
        Self {
            times,
            tolerance: DEFAULT_MATCH_TOLERANCE,
        }
    }

    /// Sets the window within which [`timestamp_to_frame_index`] treats a
    /// query as matching a recorded timestamp.
    ///
    /// [`timestamp_to_frame_index`]: Self::timestamp_to_frame_index
    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn timestamps(&self) -> &[Duration] {
        &self.times
    }

    pub fn first_timestamp(&self) -> Result<Duration> {
        self.times.first().copied().ok_or(CacheError::NoSuchFrame)
    }

    pub fn last_timestamp(&self) -> Result<Duration> {
        self.times.last().copied().ok_or(CacheError::NoSuchFrame)
    }

    pub fn frame_index_to_timestamp(&self, index: usize) -> Result<Duration> {
        self.times.get(index).copied().ok_or(CacheError::NoSuchFrame)
    }

    /// Index of the frame recorded at `timestamp`, within the match
    /// tolerance. Unlike [`closest_timestamp`](Self::closest_timestamp) this
    /// fails with `NoSuchFrame` when no frame is close enough.
    pub fn timestamp_to_frame_index(&self, timestamp: Duration) -> Result<usize> {
        let index = self.closest_index(timestamp)?;
        let recorded = self.times[index];
        let distance = if recorded > timestamp {
            recorded - timestamp
        } else {
            timestamp - recorded
        };
        if distance <= self.tolerance {
            Ok(index)
        } else {
            Err(CacheError::NoSuchFrame)
        }
    }

    /// Index of the frame nearest to `timestamp`. Ties go to the earlier
    /// frame; queries outside the table clamp to its endpoints.
    pub fn closest_index(&self, timestamp: Duration) -> Result<usize> {
        if self.times.is_empty() {
            return Err(CacheError::NoSuchFrame);
        }
        // First frame strictly after the goal.
        let after = self.times.partition_point(|t| *t <= timestamp);
        if after == self.times.len() {
            return Ok(after - 1);
        }
        if after == 0 {
            return Ok(0);
        }
        let before = after - 1;
        if self.times[after] - timestamp < timestamp - self.times[before] {
            Ok(after)
        } else {
            Ok(before)
        }
    }

    pub fn closest_timestamp(&self, timestamp: Duration) -> Result<Duration> {
        self.closest_index(timestamp).map(|i| self.times[i])
    }

    /// Latest timestamp strictly before `timestamp`.
    pub fn prev_timestamp(&self, timestamp: Duration) -> Result<Duration> {
        let at_or_after = self.times.partition_point(|t| *t < timestamp);
        match at_or_after {
            0 => Err(CacheError::NoSuchFrame),
            i => Ok(self.times[i - 1]),
        }
    }

    /// Earliest timestamp strictly after `timestamp`.
    pub fn next_timestamp(&self, timestamp: Duration) -> Result<Duration> {
        let after = self.times.partition_point(|t| *t <= timestamp);
        self.times.get(after).copied().ok_or(CacheError::NoSuchFrame)
    }
}
