//! Frame cache inspection tool

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use color_eyre::{
    eyre::{bail, eyre, WrapErr},
    Result,
};
use tracing::{debug, info, warn};

use framecache::{
    CacheEvent, ChannelObserver, Config, FrameCache, FrameSource, MemorySource, RawVideoFile,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play a frame file through the cache and print statistics
    Inspect {
        /// Frame file to read
        file: PathBuf,
        /// Optional TOML configuration
        config: Option<PathBuf>,
    },
    /// Write a synthetic checkerboard frame file
    Synth {
        file: PathBuf,
        frames: usize,
        width: u32,
        height: u32,
    },
}

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let args = Args::parse();
    init_tracing();

    match args.command {
        Command::Inspect { file, config } => inspect(&file, config),
        Command::Synth {
            file,
            frames,
            width,
            height,
        } => synth(&file, frames, width, height),
    }
}

#[cfg(not(feature = "profiling"))]
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framecache=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();
}

#[cfg(feature = "profiling")]
fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "framecache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::uptime()))
        .with(tracing_tracy::TracyLayer::default())
        .init();
}

/// Walks every frame the way a player would: prefetch a window ahead,
/// then block on the current frame.
fn inspect(path: &Path, config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref()).wrap_err("Failed to load configuration")?;
    debug!("Configuration: {:?}", config);

    let cache = FrameCache::open(path, config.cache.clone());
    if let Some(e) = cache.fatal_error() {
        bail!("cannot open {}: {}", path.display(), e);
    }

    let (observer, events) = ChannelObserver::unbounded();
    cache.add_observer(observer);

    info!(
        "{}: {} frames, {} cache slots, prefetch {}",
        path.display(),
        cache.frame_count(),
        cache.cache_size(),
        if cache.prefetch_running() { "on" } else { "off" }
    );

    let ahead = config.playback.prefetch_ahead;
    let started = Instant::now();
    let mut slowest = Duration::ZERO;

    for index in 0..cache.frame_count() {
        for next in index + 1..(index + 1 + ahead).min(cache.frame_count()) {
            if let Err(e) = cache.prefetch(next) {
                debug!(next, "Prefetch skipped: {}", e);
            }
        }

        let wait = Instant::now();
        let frame = cache
            .get_frame(index, true)
            .wrap_err_with(|| format!("frame {}", index))?;
        let waited = wait.elapsed();
        slowest = slowest.max(waited);

        let every = config.playback.log_every;
        if every > 0 && index % every == 0 {
            info!(
                "frame {:>5} @ {:>8.3}s  {}x{}  waited {:?}",
                index,
                frame.timestamp.unwrap_or_default().as_secs_f64(),
                frame.width(),
                frame.height(),
                waited
            );
        }
    }

    let (mut ready, mut evicted) = (0usize, 0usize);
    for event in events.drain() {
        match event {
            CacheEvent::Ready(_) => ready += 1,
            CacheEvent::Evicted(_) => evicted += 1,
        }
    }

    let stats = cache.stats();
    println!("frames:            {}", cache.frame_count());
    println!("elapsed:           {:?}", started.elapsed());
    println!("slowest wait:      {:?}", slowest);
    println!("hits / misses:     {} / {}", stats.hits, stats.misses);
    println!("hit ratio:         {:.2}", stats.hit_ratio());
    println!("decodes:           {} ({} failed)", stats.decodes, stats.decode_failures);
    println!("prefetch requests: {}", stats.prefetch_requests);
    println!("evictions:         {}", stats.evictions);
    println!("ready events:      {} ({} evicted)", ready, evicted);
    Ok(())
}

fn synth(path: &Path, frames: usize, width: u32, height: u32) -> Result<()> {
    if frames == 0 || width == 0 || height == 0 {
        bail!("frames, width and height must be non-zero");
    }
    let source = MemorySource::synthetic(frames, width, height, 30.0);
    let mut out = Vec::with_capacity(frames);
    for index in 0..frames {
        let frame = source.decode(index)?;
        let timestamp = frame
            .timestamp
            .ok_or_else(|| eyre!("frame {} has no timestamp", index))?;
        out.push((frame, timestamp));
    }
    RawVideoFile::write(path, &out)?;

    let written = RawVideoFile::open(path)?;
    if written.frame_count() != frames {
        warn!("Wrote {} frames, read back {}", frames, written.frame_count());
    }
    info!("Wrote {} frames of {}x{} to {}", frames, width, height, path.display());
    Ok(())
}
