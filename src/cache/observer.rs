use std::sync::Arc;

use flume::{Receiver, Sender};

/// Receives cache lifecycle notifications.
///
/// Callbacks run on whichever thread completed the decode or performed the
/// eviction, without any cache lock held. Keep them short.
pub trait CacheObserver: Send + Sync {
    fn on_frame_ready(&self, _index: usize) {}
    fn on_frame_evicted(&self, _index: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Ready(usize),
    Evicted(usize),
}

/// Observer that forwards events into a channel.
pub struct ChannelObserver {
    tx: Sender<CacheEvent>,
}

impl ChannelObserver {
    pub fn unbounded() -> (Arc<Self>, Receiver<CacheEvent>) {
        let (tx, rx) = flume::unbounded();
        (Arc::new(Self { tx }), rx)
    }
}

impl CacheObserver for ChannelObserver {
    fn on_frame_ready(&self, index: usize) {
        // Receiver gone means nobody is listening anymore
        let _ = self.tx.send(CacheEvent::Ready(index));
    }

    fn on_frame_evicted(&self, index: usize) {
        let _ = self.tx.send(CacheEvent::Evicted(index));
    }
}
