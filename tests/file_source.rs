use std::path::{Path, PathBuf};
use std::time::Duration;

use framecache::source::memory::checkerboard;
use framecache::{
    CacheError, CacheOptions, FrameCache, FrameSource, PixelDepth, RawFrame, RawVideoFile,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn write_movie(dir: &TempDir, frames: usize) -> PathBuf {
    let path = dir.path().join("movie.rfv");
    let contents: Vec<(RawFrame, Duration)> = (0..frames)
        .map(|i| (checkerboard(i, 16, 16), Duration::from_micros(33_333 * i as u64)))
        .collect();
    RawVideoFile::write(&path, &contents).unwrap();
    path
}

fn corrupt_header(path: &Path, offset: usize, byte: u8) {
    let mut bytes = std::fs::read(path).unwrap();
    bytes[offset] = byte;
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn cache_over_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_movie(&dir, 56);

    let cache = FrameCache::open(&path, CacheOptions {
        requested_frames: 5,
        ..CacheOptions::default()
    });
    assert!(cache.is_valid());
    assert_eq!(cache.frame_count(), 56);
    assert_eq!(cache.cache_size(), 5);
    assert_eq!(cache.source_name(), Some(path.display().to_string().as_str()));

    let frame = cache.get_frame(0, true).unwrap();
    assert_eq!(frame.ref_count(), 2);
    assert_eq!(frame.get_pixel(0, 0), 0);
    assert_eq!(frame.depth(), PixelDepth::Depth8);

    let t = cache.frame_index_to_timestamp(10).unwrap();
    assert_eq!(t, Duration::from_micros(333_330));
    assert_eq!(cache.get_frame_at(t, true).unwrap().frame_index(), Some(10));
}

#[test]
fn budget_uses_file_frame_size() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_movie(&dir, 56);
    let cache = FrameCache::open(&path, CacheOptions {
        max_memory: 28 * 256,
        ..CacheOptions::default()
    });
    assert_eq!(cache.source().unwrap().bytes_per_frame(), 256);
    assert_eq!(cache.cache_size(), 28);
}

#[test]
fn bad_magic_is_file_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_movie(&dir, 4);
    corrupt_header(&path, 0, b'X');
    let cache = FrameCache::open(&path, CacheOptions::default());
    assert!(!cache.is_valid());
    assert_eq!(cache.fatal_error(), Some(CacheError::FileFormat));
}

#[test]
fn unsupported_depth() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_movie(&dir, 4);
    // depth byte follows magic, width and height
    corrupt_header(&path, 12, 3);
    assert_eq!(
        RawVideoFile::open(&path).err(),
        Some(CacheError::DepthUnsupported)
    );
}

#[test]
fn decreasing_timestamps_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backwards.rfv");
    let contents = vec![
        (checkerboard(0, 8, 8), Duration::from_millis(40)),
        (checkerboard(1, 8, 8), Duration::from_millis(0)),
    ];
    RawVideoFile::write(&path, &contents).unwrap();

    let eager = FrameCache::open(&path, CacheOptions::default());
    assert_eq!(eager.fatal_error(), Some(CacheError::FileFormat));

    let lazy = FrameCache::open(&path, CacheOptions {
        build_time_index: false,
        ..CacheOptions::default()
    });
    assert!(lazy.is_valid());
    assert!(lazy.get_frame(1, true).is_ok());
    assert_eq!(lazy.first_timestamp(), Err(CacheError::FileFormat));
}

#[test]
fn mixed_geometry_is_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mixed.rfv");
    let contents = vec![
        (checkerboard(0, 8, 8), Duration::ZERO),
        (checkerboard(1, 16, 8), Duration::from_millis(40)),
    ];
    assert_eq!(
        RawVideoFile::write(&path, &contents),
        Err(CacheError::FileFormat)
    );
    assert!(!path.exists());
}
