//! Invalidation notifications owned by the cache store.
//!
//! Invalidation itself is a direct call ([`super::CacheStore::invalidate`]);
//! this channel only tells interested parties what was removed.

use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub event: String,
    pub key_pattern: Option<String>,
    pub keys_removed: Vec<String>,
}

#[derive(Debug)]
pub(super) struct InvalidationChannel {
    tx: broadcast::Sender<Invalidation>,
}

impl InvalidationChannel {
    pub(super) fn new() -> Self {
        let (tx, _rx) = broadcast::channel(64);
        Self { tx }
    }

    pub(super) fn publish(&self, invalidation: Invalidation) {
        let _ = self.tx.send(invalidation);
    }

    pub(super) fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }
}
