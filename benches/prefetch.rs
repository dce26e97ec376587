use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use framecache::{CacheOptions, FrameCache, MemorySource};

const FRAMES: usize = 32;

fn source() -> MemorySource {
    MemorySource::synthetic(FRAMES, 64, 64, 30.0).with_decode_delay(Duration::from_micros(200))
}

fn options(prefetch: bool) -> CacheOptions {
    CacheOptions {
        prefetch,
        ..CacheOptions::default()
    }
}

fn bench_sequential_playback(c: &mut Criterion) {
    c.bench_function("playback_sync_32", |b| {
        b.iter(|| {
            let cache = FrameCache::with_source(source(), options(false));
            for i in 0..FRAMES {
                let frame = cache.get_frame(i, true).unwrap();
                black_box(frame.get_pixel(0, 0));
            }
        });
    });

    c.bench_function("playback_prefetch_4_ahead_32", |b| {
        b.iter(|| {
            let cache = FrameCache::with_source(source(), options(true));
            for i in 0..FRAMES {
                for next in i + 1..(i + 5).min(FRAMES) {
                    let _ = cache.prefetch(next);
                }
                let frame = cache.get_frame(i, true).unwrap();
                black_box(frame.get_pixel(0, 0));
            }
        });
    });
}

fn bench_hits(c: &mut Criterion) {
    let cache = FrameCache::with_source(source(), options(false));
    for i in 0..FRAMES {
        cache.wait_for(i).unwrap();
    }

    c.bench_function("get_frame_hit", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % FRAMES;
            black_box(cache.get_frame(black_box(i), true).unwrap());
        });
    });

    c.bench_function("handle_clone_drop", |b| {
        let frame = cache.get_frame(0, true).unwrap();
        b.iter(|| black_box(frame.clone()));
    });
}

fn bench_time_lookup(c: &mut Criterion) {
    let cache = FrameCache::with_source(source(), options(false));

    c.bench_function("closest_timestamp", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7) % FRAMES as u64;
            let t = Duration::from_micros(i * 33_000 + 1_000);
            black_box(cache.closest_timestamp(black_box(t)).unwrap());
        });
    });
}

criterion_group!(benches, bench_sequential_playback, bench_hits, bench_time_lookup);
criterion_main!(benches);
