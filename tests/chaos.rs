//! Chaos testing for the offline engine.
//!
//! Failure scenarios built from:
//! 1. **FailingKvStore** - persistence that errors on demand
//! 2. **Scripted transport faults** - timeouts, resets, flapping servers
//! 3. **Data corruption** - garbage rows in persistence
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use offline_sync::{
    ActionKind, ActionOutcome, ActionRequest, CacheStore, EngineConfig, EngineState, KvStore, MemoryKvStore,
    NetworkMonitor, OfflineEngine, Response, ScriptedTransport, StorageError, TransportError,
};

// =============================================================================
// Failing Store Wrapper
// =============================================================================

/// Wraps a store and fails every call while `failing` is set.
pub struct FailingKvStore {
    inner: MemoryKvStore,
    failing: AtomicBool,
    failures: AtomicU64,
}

impl FailingKvStore {
    pub fn new(failing: bool) -> Self {
        Self {
            inner: MemoryKvStore::new(),
            failing: AtomicBool::new(failing),
            failures: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::Backend("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        self.check()?;
        self.inner.scan_prefix(prefix).await
    }
}

fn engine_over(store: Arc<dyn KvStore>, transport: Arc<ScriptedTransport>, online: bool) -> OfflineEngine {
    OfflineEngine::with_network(EngineConfig::without_delays(), store, transport, NetworkMonitor::new(online))
}

// =============================================================================
// Persistence failures
// =============================================================================

#[tokio::test]
async fn chaos_cache_serves_from_memory_when_persistence_is_down() {
    let store = Arc::new(FailingKvStore::new(true));
    let cache = CacheStore::new(&EngineConfig::without_delays(), store.clone());

    cache.set("players:a@x.com", &json!({"overall": 80}), "players").await.unwrap();

    assert_eq!(cache.get("players:a@x.com").await, Some(json!({"overall": 80})));
    assert!(store.failures() > 0);
}

#[tokio::test]
async fn chaos_engine_starts_with_unreadable_persistence() {
    let store = Arc::new(FailingKvStore::new(true));
    let engine = engine_over(store, Arc::new(ScriptedTransport::new()), false);

    engine.start().await.unwrap();
    assert_eq!(engine.state(), EngineState::Running);
    assert!(engine.cache().is_empty());
    assert!(engine.queue().is_empty());

    engine.shutdown().await;
}

#[tokio::test]
async fn chaos_queue_delivers_despite_persistence_outage() {
    let store = Arc::new(FailingKvStore::new(true));
    let transport = Arc::new(ScriptedTransport::new());
    transport.push("/api/votes", Response::ok(json!({"id": "v1"})));
    let engine = engine_over(store.clone(), transport, true);

    let (_, done) = engine
        .queue()
        .enqueue_tracked(ActionRequest::new(ActionKind::VoteSubmit, json!({"choice": "A"}), "/api/votes"))
        .await;
    engine.queue().drain().await;

    assert_eq!(done.await.unwrap(), ActionOutcome::Delivered(json!({"id": "v1"})));
    assert!(engine.queue().is_empty());
}

#[tokio::test]
async fn chaos_queue_recovers_persistence_after_outage() {
    let store = Arc::new(FailingKvStore::new(true));
    let engine = engine_over(store.clone(), Arc::new(ScriptedTransport::new()), false);

    engine
        .queue()
        .enqueue(ActionRequest::new(ActionKind::StatsUpdate, json!({"goals": 3}), "/api/stats"))
        .await;

    store.set_failing(false);
    engine
        .queue()
        .enqueue(ActionRequest::new(ActionKind::StatsUpdate, json!({"goals": 4}), "/api/stats"))
        .await;

    // Second persist carries the whole list, including the first action
    let restarted = engine_over(store, Arc::new(ScriptedTransport::new()), false);
    assert_eq!(restarted.queue().load().await, 2);
}

// =============================================================================
// Data corruption
// =============================================================================

#[tokio::test]
async fn chaos_corrupt_rows_are_purged_on_start() {
    let store = Arc::new(MemoryKvStore::new());
    store.put("cache:players:bad", b"\x00\x01not json").await.unwrap();
    store.put("queue:pending", b"{{{{").await.unwrap();
    store.put("sync:items", b"[1,2,3]").await.unwrap();

    let engine = engine_over(store.clone(), Arc::new(ScriptedTransport::new()), false);
    engine.start().await.unwrap();

    assert!(engine.cache().is_empty());
    assert!(engine.queue().is_empty());
    assert_eq!(engine.sync().items().len(), engine.config().sync_resources.len());
    assert!(store.get("cache:players:bad").await.unwrap().is_none());

    engine.shutdown().await;
}

// =============================================================================
// Transport faults
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_slow_server_counts_as_transient() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_delayed("/api/votes", Duration::from_secs(60), Response::ok(json!({})));
    transport.push("/api/votes", Response::ok(json!({"id": "v1"})));
    let engine = engine_over(Arc::new(MemoryKvStore::new()), transport.clone(), true);

    let id = engine
        .queue()
        .enqueue(ActionRequest::new(ActionKind::VoteSubmit, json!({"choice": "A"}), "/api/votes"))
        .await;

    let first = engine.queue().drain().await;
    assert_eq!(first.retried, 1);
    assert_eq!(engine.queue().get(&id).unwrap().retry_count, 1);

    let second = engine.queue().drain().await;
    assert_eq!(second.delivered, 1);
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn chaos_flapping_network_eventually_delivers() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.push_error("/api/matches/m1", TransportError::Network("connection reset".into()));
    transport.push("/api/matches/m1", Response::new(502, json!(null)));
    transport.push("/api/matches/m1", Response::ok(json!({"id": "m1"})));
    let engine = engine_over(Arc::new(MemoryKvStore::new()), transport.clone(), true);

    let (_, done) = engine
        .queue()
        .enqueue_tracked(ActionRequest::new(ActionKind::MatchUpdate, json!({"score": "2-1"}), "/api/matches/m1"))
        .await;

    for _ in 0..3 {
        engine.queue().drain().await;
    }

    assert_eq!(done.await.unwrap(), ActionOutcome::Delivered(json!({"id": "m1"})));
    assert_eq!(engine.queue().stats().processed, 1);
}

#[tokio::test]
async fn chaos_offline_mid_session_defers_everything() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine_over(Arc::new(MemoryKvStore::new()), transport.clone(), true);
    engine.network().set_online(false);

    engine
        .queue()
        .enqueue(ActionRequest::new(ActionKind::VoteSubmit, json!({"choice": "B"}), "/api/votes"))
        .await;
    let report = engine.queue().drain().await;
    let sync = engine.sync().priority_sync(None).await;

    assert_eq!(report.attempted, 0);
    assert!(sync.outcomes.is_empty());
    assert_eq!(transport.request_count(), 0);
    assert_eq!(engine.queue().len(), 1);
}
