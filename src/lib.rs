pub mod cache;
pub mod error;
pub mod frame;
pub mod source;
pub mod time_index;
pub mod utils;

use std::path::Path;

use serde::{Deserialize, Serialize};

pub use cache::{
    derive_capacity, CacheEvent, CacheObserver, CacheStatsSnapshot, ChannelObserver, FrameCache,
};
pub use error::{CacheError, Result};
pub use frame::{FrameHandle, FrameRef, FrameState, PixelDepth, RawFrame};
pub use source::{FrameSource, MemorySource, RawVideoFile};
pub use time_index::TimeIndex;

/// Construction options for a [`FrameCache`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Slot count hint, 0 = whole sequence
    pub requested_frames: usize,
    /// Build the time index at construction instead of on first use
    pub build_time_index: bool,
    /// Run the background decode worker
    pub prefetch: bool,
    /// Byte cap on decoded frames, 0 = unbounded
    pub max_memory: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            requested_frames: 0,
            build_time_index: true,
            prefetch: true,
            max_memory: 0,
        }
    }
}

/// Settings of the `framecache` binary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheOptions,
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Frames prefetched ahead of the one being shown
    pub prefetch_ahead: usize,
    /// Log timing every this many frames, 0 = never
    pub log_every: usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            prefetch_ahead: 4,
            log_every: 10,
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `FRAMECACHE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, config::ConfigError> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("FRAMECACHE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn load_defaults() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.cache, CacheOptions::default());
        assert_eq!(config.playback.prefetch_ahead, 4);
    }

    #[test]
    fn load_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("framecache.toml");
        std::fs::write(
            &path,
            "[cache]\nrequested_frames = 12\nprefetch = false\n\n[playback]\nlog_every = 0\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(
            config.cache,
            CacheOptions {
                requested_frames: 12,
                prefetch: false,
                ..CacheOptions::default()
            }
        );
        assert_eq!(config.playback.log_every, 0);
        assert_eq!(config.playback.prefetch_ahead, 4);
    }
}
