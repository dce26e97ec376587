//! Frame geometry helpers.

/// Row alignment applied to every frame buffer, in bytes.
pub const ROW_ALIGNMENT: usize = 16;

/// Bytes needed to store one row of `width` pixels of `bytes_per_pixel`,
/// padded up to [`ROW_ALIGNMENT`].
pub fn row_bytes(width: u32, bytes_per_pixel: usize) -> usize {
    checked_row_bytes(width, bytes_per_pixel).unwrap_or(usize::MAX)
}

/// Total storage of a `width` x `height` frame with aligned rows.
pub fn frame_bytes(width: u32, height: u32, bytes_per_pixel: usize) -> usize {
    checked_frame_bytes(width, height, bytes_per_pixel).unwrap_or(usize::MAX)
}

/// [`row_bytes`], `None` when the size does not fit in `usize`.
pub fn checked_row_bytes(width: u32, bytes_per_pixel: usize) -> Option<usize> {
    let raw = (width as usize).checked_mul(bytes_per_pixel)?;
    match raw % ROW_ALIGNMENT {
        0 => Some(raw),
        pad => raw.checked_add(ROW_ALIGNMENT - pad),
    }
}

/// [`frame_bytes`], `None` when the size does not fit in `usize`.
/// Use this on geometry read from untrusted input.
pub fn checked_frame_bytes(width: u32, height: u32, bytes_per_pixel: usize) -> Option<usize> {
    checked_row_bytes(width, bytes_per_pixel)?.checked_mul(height as usize)
}
