use framecache::{
    CacheError, CacheOptions, FrameCache, FrameRef, FrameState, MemorySource, PixelDepth, RawFrame,
};
use pretty_assertions::{assert_eq, assert_ne};

const UNCACHED_PIXEL: u32 = 0xA;
const CACHED_PIXEL: u32 = 0x0;

fn cache(slots: usize) -> FrameCache<MemorySource> {
    FrameCache::with_source(
        MemorySource::synthetic(56, 16, 16, 30.0),
        CacheOptions {
            requested_frames: slots,
            prefetch: false,
            ..CacheOptions::default()
        },
    )
}

fn uncached_frame() -> FrameRef<RawFrame> {
    let mut frame = RawFrame::new(16, 16, PixelDepth::Depth8);
    frame.fill(UNCACHED_PIXEL);
    FrameRef::new(frame)
}

#[test]
fn reassigning_between_cached_and_uncached() {
    let cache = cache(5);
    let cached = cache.get_frame(0, true).unwrap();
    assert_eq!(cached.ref_count(), 2);
    assert_eq!(cached.get_pixel(0, 0), CACHED_PIXEL);

    let uncached = uncached_frame();
    assert_eq!(uncached.ref_count(), 1);
    assert_ne!(uncached, cached);

    let window = uncached.clone();
    assert_eq!(uncached.ref_count(), 2);

    let mut changing: FrameRef<RawFrame> = FrameRef::null();
    assert_eq!(changing.ref_count(), 0);
    assert_ne!(uncached, changing);
    changing = uncached.clone();
    assert_eq!(changing.ref_count(), 3);
    assert_eq!(uncached.ref_count(), 3);
    assert_eq!(uncached, changing);
    assert_eq!(changing.get_pixel(0, 0), UNCACHED_PIXEL);

    // Point at the cached frame
    changing = cached.clone();
    assert_eq!(cached.ref_count(), 3);
    assert_eq!(changing.ref_count(), 3);
    assert_eq!(uncached.ref_count(), 2);
    assert_eq!(changing.get_pixel(0, 0), CACHED_PIXEL);
    assert_eq!(uncached.get_pixel(0, 0), UNCACHED_PIXEL);
    assert_eq!(cached, changing);
    assert_ne!(uncached, changing);

    // And back
    changing = uncached.clone();
    assert_eq!(cached.ref_count(), 2);
    assert_eq!(changing.ref_count(), 3);
    assert_eq!(cached.get_pixel(0, 0), CACHED_PIXEL);
    assert_ne!(cached, changing);
    assert_eq!(uncached, changing);

    // Null handles ignore lock and unlock
    changing = cached.clone();
    changing = FrameRef::null();
    assert_eq!(cached.ref_count(), 2);
    assert_eq!(changing.ref_count(), 0);
    assert_eq!(uncached.ref_count(), 2);
    assert!(changing.is_null());
    assert!(changing == std::ptr::null::<RawFrame>());

    changing.lock().unwrap();
    changing.unlock();
    assert_eq!(cached.ref_count(), 2);
    assert_eq!(changing.ref_count(), 0);
    assert_eq!(uncached.ref_count(), 2);
    assert_ne!(cached, changing);

    drop(window);
    assert_eq!(uncached.ref_count(), 1);
}

#[test]
fn clones_do_not_carry_locks() {
    let cache = cache(5);
    let cached = cache.get_frame(0, true).unwrap();
    assert!(cached.is_locked());

    let alias = cached.clone();
    assert!(!alias.is_locked());
    assert_eq!(cached.ref_count(), 3);

    alias.unlock();
    assert!(cached.is_locked());
    assert_eq!(alias.ref_count(), 3);

    alias.lock().unwrap();
    assert!(alias.is_locked());
    drop(alias);
    assert!(cached.is_locked());
    assert_eq!(cached.ref_count(), 2);
}

#[test]
fn construction_cases() {
    let cache = cache(5);

    let null: FrameRef<RawFrame> = FrameRef::null();
    let null2 = null.clone();
    assert_eq!(null2.ref_count(), 0);
    assert!(null2 == std::ptr::null::<RawFrame>());

    let standalone = uncached_frame();
    let address = standalone.as_ptr();
    assert!(standalone == address);
    assert_eq!(standalone.ref_count(), 1);
    let standalone2 = standalone.clone();
    assert_eq!(standalone2, standalone);
    assert_eq!(standalone2.ref_count(), 2);

    {
        let locked = cache.get_frame(1, true).unwrap();
        let copy = locked.clone();
        assert_eq!(copy, locked);
        assert_eq!(copy.ref_count(), 3);
        assert_eq!(copy.frame_index(), Some(1));
    }
    {
        let handle = cache.get_frame(1, true).unwrap();
        let copy = handle.clone();
        handle.unlock();
        let copy2 = handle.clone();
        assert_eq!(copy2, handle);
        assert_eq!(copy.ref_count(), 4);
        assert!(!copy2.is_locked());
    }
}

#[test]
fn payload_outlives_cache() {
    let cache = cache(5);
    let handle = cache.get_frame(0, true).unwrap();
    assert_eq!(handle.ref_count(), 2);
    assert!(handle.is_cached());

    drop(cache);
    assert_eq!(handle.ref_count(), 1);
    assert!(!handle.is_cached());
    assert_eq!(handle.get_pixel(0, 0), CACHED_PIXEL);
    handle.lock().unwrap();
    handle.unlock();
    assert_eq!(handle.state(), Some(FrameState::Ready));
}

#[test]
fn undecoded_handle_of_dropped_cache_is_invalid() {
    let cache = cache(5);
    let handle = cache.get_frame(3, false).unwrap();
    assert!(!handle.is_ready());
    drop(cache);
    assert_eq!(handle.ref_count(), 1);
    assert_eq!(handle.get().err(), Some(CacheError::CacheInvalid));
    assert_eq!(handle.lock(), Err(CacheError::CacheInvalid));
}

#[test]
fn dropping_a_handle_releases_its_lock() {
    let cache = cache(1);
    let first = cache.get_frame(0, true).unwrap();
    assert_eq!(
        cache.get_frame(1, true).err(),
        Some(CacheError::SystemResources)
    );
    drop(first);
    let second = cache.get_frame(1, true).unwrap();
    assert_eq!(second.frame_index(), Some(1));
}

#[test]
fn evicted_handle_still_resolves() {
    let cache = cache(1);
    let early = cache.get_frame(0, false).unwrap();
    assert_eq!(early.ref_count(), 2);

    let later = cache.get_frame(1, true).unwrap();
    assert_eq!(early.ref_count(), 1);
    drop(later);

    // Evicted before decode: lock decodes for this handle without pinning.
    early.lock().unwrap();
    assert!(!early.is_locked());
    assert_eq!(early.frame_index(), Some(0));
    assert_eq!(early.get_pixel(0, 0), CACHED_PIXEL);
}

#[test]
fn shared_handle_lock_unlock_leaves_slot_evictable() {
    let cache = cache(1);
    let handle = std::sync::Arc::new(cache.get_frame(0, false).unwrap());
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let handle = std::sync::Arc::clone(&handle);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    handle.lock().unwrap();
                    handle.unlock();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(!handle.is_locked());

    // The only slot must be free for another frame.
    let other = cache.get_frame(1, true).unwrap();
    assert_eq!(other.frame_index(), Some(1));
}
