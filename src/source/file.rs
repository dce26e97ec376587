//! Memory-mapped uncompressed frame files.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! "RFV1" | width u32 | height u32 | depth u8 | 3 reserved | frame_count u32
//! frame_count x timestamp u64 (microseconds)
//! frame_count x frame (row-aligned, stride * height bytes)
//! ```

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use memmap2::Mmap;
use tracing::{debug, info, instrument, warn};

use super::FrameSource;
use crate::error::{CacheError, Result};
use crate::frame::{PixelDepth, RawFrame};
use crate::utils;

const MAGIC: &[u8; 4] = b"RFV1";
const HEADER_LEN: usize = 20;

/// Read-only frame file backed by a memory map.
pub struct RawVideoFile {
    name: String,
    map: Mmap,
    width: u32,
    height: u32,
    depth: PixelDepth,
    frame_count: usize,
    frame_bytes: usize,
}

impl RawVideoFile {
    /// Maps and validates `path`. Missing or unreadable files fail with
    /// `FileInit`, malformed contents with `FileFormat`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            warn!("Failed to open frame file: {}", e);
            CacheError::FileInit
        })?;
        let len = file.metadata().map_err(|_| CacheError::FileInit)?.len();
        if (len as usize) < HEADER_LEN {
            return Err(CacheError::FileFormat);
        }

        // SAFETY: the map is read-only and private to this value; frame
        // files are not expected to be modified while open.
        let map = unsafe { Mmap::map(&file) }.map_err(|_| CacheError::FileInit)?;

        let mut header = &map[..HEADER_LEN];
        if &header[..4] != MAGIC {
            return Err(CacheError::FileFormat);
        }
        header.advance(4);
        let width = header.get_u32_le();
        let height = header.get_u32_le();
        let depth = PixelDepth::try_from(header.get_u8())?;
        header.advance(3);
        let frame_count = header.get_u32_le() as usize;

        let frame_bytes =
            utils::checked_frame_bytes(width, height, depth.bytes()).ok_or_else(|| {
                debug!("Frame geometry {}x{} overflows", width, height);
                CacheError::FileFormat
            })?;
        let expected = frame_bytes
            .checked_add(8)
            .and_then(|per_frame| per_frame.checked_mul(frame_count))
            .and_then(|body| body.checked_add(HEADER_LEN))
            .ok_or(CacheError::FileFormat)?;
        if map.len() < expected {
            debug!("Frame file truncated: {} < {} bytes", map.len(), expected);
            return Err(CacheError::FileFormat);
        }

        info!(
            "Opened frame file: {}x{} {:?}, {} frames",
            width, height, depth, frame_count
        );

        Ok(Self {
            name: path.display().to_string(),
            map,
            width,
            height,
            depth,
            frame_count,
            frame_bytes,
        })
    }

    /// Writes `frames` with their timestamps. All frames must share the
    /// first frame's geometry.
    pub fn write(path: impl AsRef<Path>, frames: &[(RawFrame, Duration)]) -> Result<()> {
        let (width, height, depth) = match frames.first() {
            Some((f, _)) => (f.width(), f.height(), f.depth()),
            None => (0, 0, PixelDepth::Depth8),
        };
        if frames
            .iter()
            .any(|(f, _)| f.width() != width || f.height() != height || f.depth() != depth)
        {
            return Err(CacheError::FileFormat);
        }

        let frame_bytes = utils::frame_bytes(width, height, depth.bytes());
        let mut out = BytesMut::with_capacity(HEADER_LEN + frames.len() * (8 + frame_bytes));
        out.put_slice(MAGIC);
        out.put_u32_le(width);
        out.put_u32_le(height);
        out.put_u8(depth.bytes() as u8);
        out.put_bytes(0, 3);
        out.put_u32_le(frames.len() as u32);
        for (_, ts) in frames {
            out.put_u64_le(ts.as_micros() as u64);
        }
        for (frame, _) in frames {
            out.put_slice(frame.as_bytes());
        }

        let mut file = File::create(path)?;
        file.write_all(&out)?;
        file.sync_all()?;
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> PixelDepth {
        self.depth
    }

    fn frame_slice(&self, index: usize) -> &[u8] {
        let start = HEADER_LEN + self.frame_count * 8 + index * self.frame_bytes;
        &self.map[start..start + self.frame_bytes]
    }
}

impl FrameSource for RawVideoFile {
    type Frame = RawFrame;

    fn name(&self) -> &str {
        &self.name
    }

    fn frame_count(&self) -> usize {
        self.frame_count
    }

    fn bytes_per_frame(&self) -> usize {
        self.frame_bytes
    }

    fn timestamp(&self, index: usize) -> Result<Duration> {
        if index >= self.frame_count {
            return Err(CacheError::NoSuchFrame);
        }
        let mut at = &self.map[HEADER_LEN + index * 8..HEADER_LEN + index * 8 + 8];
        Ok(Duration::from_micros(at.get_u64_le()))
    }

    fn decode(&self, index: usize) -> Result<RawFrame> {
        let timestamp = self.timestamp(index)?;
        let frame = RawFrame::from_bytes(
            self.width,
            self.height,
            self.depth,
            self.frame_slice(index),
        )?;
        Ok(frame.with_index(index, timestamp))
    }
}
