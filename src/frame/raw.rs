use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CacheError;
use crate::utils;

/// Decoded frame with row-aligned pixel storage.
///
/// Producers fill it through [`set_pixel`](Self::set_pixel) or
/// [`fill`](Self::fill); once handed to the cache it is only read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    width: u32,
    height: u32,
    depth: PixelDepth,
    stride: usize,
    data: BytesMut,

    /// Frame metadata
    pub index: Option<usize>,
    pub timestamp: Option<Duration>,
}

/// Pixel depths we support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelDepth {
    Depth8,
    Depth16,
    Depth32,
}

impl PixelDepth {
    pub fn bytes(&self) -> usize {
        match self {
            PixelDepth::Depth8 => 1,
            PixelDepth::Depth16 => 2,
            PixelDepth::Depth32 => 4,
        }
    }
}

impl TryFrom<u8> for PixelDepth {
    type Error = CacheError;

    fn try_from(bytes: u8) -> Result<Self, Self::Error> {
        match bytes {
            1 => Ok(PixelDepth::Depth8),
            2 => Ok(PixelDepth::Depth16),
            4 => Ok(PixelDepth::Depth32),
            _ => Err(CacheError::DepthUnsupported),
        }
    }
}

impl RawFrame {
    /// Zero-filled frame.
    pub fn new(width: u32, height: u32, depth: PixelDepth) -> Self {
        let stride = utils::row_bytes(width, depth.bytes());
        Self {
            width,
            height,
            depth,
            stride,
            data: BytesMut::zeroed(stride * height as usize),
            index: None,
            timestamp: None,
        }
    }

    /// Wrap already row-aligned bytes. Fails with `FileFormat` when the
    /// length does not match the geometry.
    pub fn from_bytes(
        width: u32,
        height: u32,
        depth: PixelDepth,
        bytes: &[u8],
    ) -> Result<Self, CacheError> {
        let stride = utils::row_bytes(width, depth.bytes());
        if bytes.len() != stride * height as usize {
            return Err(CacheError::FileFormat);
        }
        Ok(Self {
            width,
            height,
            depth,
            stride,
            data: BytesMut::from(bytes),
            index: None,
            timestamp: None,
        })
    }

    pub fn with_index(mut self, index: usize, timestamp: Duration) -> Self {
        self.index = Some(index);
        self.timestamp = Some(timestamp);
        self
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

    /// Bytes per row including alignment padding.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.depth.bytes()]
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        assert!(
            x < self.width && y < self.height,
            "pixel ({x}, {y}) outside {}x{} frame",
            self.width,
            self.height
        );
        y as usize * self.stride + x as usize * self.depth.bytes()
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> u32 {
        let at = self.offset(x, y);
        let px = &self.data[at..at + self.depth.bytes()];
        match self.depth {
            PixelDepth::Depth8 => px[0] as u32,
            PixelDepth::Depth16 => u16::from_le_bytes([px[0], px[1]]) as u32,
            PixelDepth::Depth32 => u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
        }
    }

    /// Values wider than the pixel depth are truncated.
    pub fn set_pixel(&mut self, x: u32, y: u32, value: u32) {
        let at = self.offset(x, y);
        let n = self.depth.bytes();
        self.data[at..at + n].copy_from_slice(&value.to_le_bytes()[..n]);
    }

    pub fn fill(&mut self, value: u32) {
        for y in 0..self.height {
            for x in 0..self.width {
                self.set_pixel(x, y, value);
            }
        }
    }
}
