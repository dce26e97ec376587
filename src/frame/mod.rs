pub mod frame_ref;
pub mod raw;

pub use frame_ref::{FrameRef, FrameState};
pub use raw::{PixelDepth, RawFrame};

/// Handle type returned by caches over [`RawFrame`] sources.
pub type FrameHandle = FrameRef<RawFrame>;
