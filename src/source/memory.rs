//! In-memory frame source for tests, benches and synthetic content.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::FrameSource;
use crate::error::{CacheError, Result};
use crate::frame::{PixelDepth, RawFrame};

/// Pixel value used for the lit squares of [`checkerboard`].
pub const CHECKER_VALUE: u32 = 138;

/// 8-bit test pattern. Pixel (0, 0) of frame 0 is dark; the phase flips
/// with every frame so neighbouring frames differ.
pub fn checkerboard(index: usize, width: u32, height: u32) -> RawFrame {
    let mut frame = RawFrame::new(width, height, PixelDepth::Depth8);
    for y in 0..height {
        for x in 0..width {
            let lit = (x as usize + y as usize + index) % 2 == 1;
            frame.set_pixel(x, y, if lit { CHECKER_VALUE } else { 0 });
        }
    }
    frame
}

fn frame_time(index: usize, fps: f64) -> Duration {
    if fps > 0.0 {
        Duration::from_secs_f64(index as f64 / fps)
    } else {
        Duration::ZERO
    }
}

pub struct MemorySource {
    name: String,
    frames: Vec<RawFrame>,
    times: Vec<Duration>,
    decode_delay: Duration,
    failing: HashSet<usize>,
    decodes: AtomicUsize,
}

impl MemorySource {
    /// Fails with `FileFormat` if `frames` and `times` differ in length.
    pub fn new(frames: Vec<RawFrame>, times: Vec<Duration>) -> Result<Self> {
        if frames.len() != times.len() {
            return Err(CacheError::FileFormat);
        }
        Ok(Self {
            name: "memory".to_string(),
            frames,
            times,
            decode_delay: Duration::ZERO,
            failing: HashSet::new(),
            decodes: AtomicUsize::new(0),
        })
    }

    /// `frame_count` checkerboard frames at a constant rate.
    pub fn synthetic(frame_count: usize, width: u32, height: u32, fps: f64) -> Self {
        Self {
            name: format!("synthetic {}x{}", width, height),
            frames: (0..frame_count)
                .map(|i| checkerboard(i, width, height))
                .collect(),
            times: (0..frame_count)
                .map(|i| frame_time(i, fps))
                .collect(),
            decode_delay: Duration::ZERO,
            failing: HashSet::new(),
            decodes: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep this long inside every decode.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = delay;
        self
    }

    /// Decoding any of `indices` fails with `FileRead`.
    pub fn with_failing(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing.extend(indices);
        self
    }

    /// Number of decode calls made so far, failed ones included.
    pub fn decode_count(&self) -> usize {
        self.decodes.load(Ordering::Acquire)
    }
}

impl FrameSource for MemorySource {
    type Frame = RawFrame;

    fn name(&self) -> &str {
        &self.name
    }

    fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn bytes_per_frame(&self) -> usize {
        self.frames.first().map_or(0, RawFrame::byte_len)
    }

    fn timestamp(&self, index: usize) -> Result<Duration> {
        self.times.get(index).copied().ok_or(CacheError::NoSuchFrame)
    }

    fn decode(&self, index: usize) -> Result<RawFrame> {
        let frame = self.frames.get(index).ok_or(CacheError::NoSuchFrame)?;
        self.decodes.fetch_add(1, Ordering::AcqRel);
        if !self.decode_delay.is_zero() {
            std::thread::sleep(self.decode_delay);
        }
        if self.failing.contains(&index) {
            return Err(CacheError::FileRead);
        }
        Ok(frame.clone().with_index(index, self.times[index]))
    }
}
