//! Integration tests for the offline engine.
//!
//! End-to-end scenarios over the public API with [`MemoryKvStore`] (or a
//! temporary SQLite file) and a [`ScriptedTransport`] standing in for the
//! server. No external services are needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//! - `happy_*` - offline replay, confirmation, restart hydration
//! - `invariant_*` - TTL, ordering, retry budget, rollback, conflict surfacing

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use offline_sync::{
    ActionKind, ActionPriority, ActionRequest, CacheStrategy, ConflictStatus, EngineConfig, EngineState,
    KvStore, MemoryKvStore, NetworkMonitor, OfflineEngine, OperationType, Resolution, Response,
    RollbackReason, ScriptedTransport, SettleOutcome, SqliteKvStore, StrategyPriority, SyncEvent,
    SyncOutcome,
};

// =============================================================================
// Helpers
// =============================================================================

struct Fixture {
    engine: OfflineEngine,
    store: Arc<MemoryKvStore>,
    transport: Arc<ScriptedTransport>,
}

fn fixture(config: EngineConfig, online: bool) -> Fixture {
    let store = Arc::new(MemoryKvStore::new());
    let transport = Arc::new(ScriptedTransport::new());
    let engine = OfflineEngine::with_network(config, store.clone(), transport.clone(), NetworkMonitor::new(online));
    Fixture { engine, store, transport }
}

fn config_with_player_ttl(ttl_secs: u64) -> EngineConfig {
    let mut config = EngineConfig::without_delays();
    for strategy in &mut config.strategies {
        if strategy.name == "players" {
            *strategy = CacheStrategy::new("players", ttl_secs, StrategyPriority::High);
        }
    }
    config
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn happy_offline_vote_is_delivered_when_back_online() {
    let f = fixture(EngineConfig::without_delays(), false);
    f.engine.start().await.unwrap();

    let handle = f
        .engine
        .apply_update(OperationType::VoteSubmit, "votes", "m1", json!({"matchId": "m1", "choice": "A"}))
        .await
        .unwrap();
    assert_eq!(f.engine.queue().len(), 1);
    let action = f.engine.queue().get(&handle.action_id).unwrap();
    assert_eq!(action.priority, ActionPriority::High);

    // standing, since the sync scheduler also polls /api/votes once online
    f.transport.set_standing("/api/votes", Response::ok(json!({"id": "vote-1"})));
    f.engine.network().set_online(true);

    let outcome = tokio::time::timeout(Duration::from_secs(5), handle.settled)
        .await
        .expect("settled in time")
        .unwrap();
    assert_eq!(outcome, SettleOutcome::Confirmed);
    assert!(f.engine.queue().is_empty());

    let cached = f.engine.cache().get("votes:m1").await.unwrap();
    assert_eq!(cached["choice"], "A");
    assert_eq!(cached["id"], "vote-1");

    let sent = f.transport.requests_to("/api/votes");
    assert!(sent.iter().any(|r| r.header("X-Offline-Action-Id") == Some(handle.action_id.as_str())));

    f.engine.shutdown().await;
}

#[tokio::test]
async fn happy_state_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");

    {
        let store = Arc::new(SqliteKvStore::open(&path).await.unwrap());
        let engine = OfflineEngine::with_network(
            EngineConfig::without_delays(),
            store,
            Arc::new(ScriptedTransport::new()),
            NetworkMonitor::new(false),
        );
        engine.start().await.unwrap();
        engine
            .cache()
            .set("players:a@x.com", &json!({"overall": 80}), "players")
            .await
            .unwrap();
        engine
            .queue()
            .enqueue(
                ActionRequest::new(ActionKind::MatchCreate, json!({"date": "2026-06-01"}), "/api/matches")
                    .priority(ActionPriority::High),
            )
            .await;
        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    let store = Arc::new(SqliteKvStore::open(&path).await.unwrap());
    let engine = OfflineEngine::with_network(
        EngineConfig::without_delays(),
        store,
        Arc::new(ScriptedTransport::new()),
        NetworkMonitor::new(false),
    );
    engine.start().await.unwrap();

    assert_eq!(engine.cache().get("players:a@x.com").await, Some(json!({"overall": 80})));
    let pending = engine.queue().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, ActionKind::MatchCreate);

    engine.shutdown().await;
}

// =============================================================================
// Invariants
// =============================================================================

#[tokio::test]
async fn invariant_ttl_expiry() {
    let f = fixture(config_with_player_ttl(1), false);
    let cache = f.engine.cache();

    cache.set("player:a@x.com", &json!({"overall": 80}), "players").await.unwrap();
    assert!(cache.get("player:a@x.com").await.is_some());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(cache.get("player:a@x.com").await.is_none());

    cache.set("player:a@x.com", &json!({"overall": 81}), "players").await.unwrap();
    assert_eq!(cache.get("player:a@x.com").await, Some(json!({"overall": 81})));
}

#[tokio::test]
async fn invariant_idempotent_set() {
    let f = fixture(EngineConfig::without_delays(), false);
    let cache = f.engine.cache();
    let value = json!({"overall": 80, "nickname": "Ana"});

    cache.set("players:a@x.com", &value, "players").await.unwrap();
    let bytes = cache.stats().bytes;
    cache.set("players:a@x.com", &value, "players").await.unwrap();

    assert_eq!(cache.get("players:a@x.com").await, Some(value));
    assert_eq!(cache.stats().bytes, bytes);
    assert_eq!(cache.stats().entries, 1);
}

#[tokio::test]
async fn invariant_priority_ordering() {
    let f = fixture(EngineConfig::without_delays(), false);
    let queue = f.engine.queue();

    let mut ids = Vec::new();
    for (i, priority) in [ActionPriority::Low, ActionPriority::High, ActionPriority::Medium, ActionPriority::High]
        .into_iter()
        .enumerate()
    {
        let request = ActionRequest::new(ActionKind::Other, json!({ "n": i }), "/api/things").priority(priority);
        ids.push(queue.enqueue(request).await);
    }

    let order: Vec<String> = queue.pending().into_iter().map(|a| a.id).collect();
    assert_eq!(order, vec![ids[1].clone(), ids[3].clone(), ids[2].clone(), ids[0].clone()]);
}

#[tokio::test]
async fn invariant_retry_budget_is_exact() {
    let f = fixture(EngineConfig::without_delays(), true);
    f.transport.set_standing("/api/players/a", Response::new(503, json!(null)));
    let queue = f.engine.queue();

    let id = queue
        .enqueue(ActionRequest::new(ActionKind::ProfileUpdate, json!({"nickname": "x"}), "/api/players/a"))
        .await;
    let budget = queue.get(&id).unwrap().max_retries as usize;

    for _ in 0..budget + 5 {
        if queue.is_empty() {
            break;
        }
        queue.drain().await;
    }

    assert!(queue.is_empty());
    assert_eq!(f.transport.requests_to("/api/players/a").len(), budget);
    assert_eq!(queue.stats().failed, 1);
}

#[tokio::test(start_paused = true)]
async fn invariant_rollback_restores_exact_bytes() {
    let f = fixture(EngineConfig::without_delays(), false);
    let cache = f.engine.cache();

    cache.set("players:a@x.com", &json!({"nickname": "Old", "overall": 80}), "players").await.unwrap();
    let entry_before = cache.snapshot("players:a@x.com").unwrap();
    let row_before = f.store.get("cache:players:a@x.com").await.unwrap().unwrap();

    let handle = f
        .engine
        .apply_update(OperationType::ProfileUpdate, "players", "a@x.com", json!({"nickname": "New"}))
        .await
        .unwrap();
    assert_eq!(cache.peek("players:a@x.com").unwrap().value["nickname"], "New");

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(handle.settled.await.unwrap(), SettleOutcome::RolledBack(RollbackReason::Deadline));
    assert_eq!(cache.snapshot("players:a@x.com").unwrap(), entry_before);
    assert_eq!(f.store.get("cache:players:a@x.com").await.unwrap().unwrap(), row_before);
    assert!(f.engine.queue().is_empty());
}

#[tokio::test]
async fn invariant_conflict_surfacing() {
    let f = fixture(EngineConfig::without_delays(), true);
    let mut events = f.engine.subscribe();
    let cache = f.engine.cache();
    cache.set("stats:all", &json!({"playerId": "p1", "goals": 10}), "stats").await.unwrap();

    // Beyond tolerance: recorded, cache untouched
    f.transport.push("/api/stats", Response::ok(json!({"playerId": "p1", "goals": 14})));
    let outcome = f.engine.sync().force_sync("stats").await.unwrap();
    let SyncOutcome::Conflict { conflict_id } = outcome else {
        panic!("expected conflict, got {:?}", outcome);
    };
    assert_eq!(cache.get("stats:all").await.unwrap()["goals"], 10);
    assert!(matches!(events.recv().await.unwrap(), SyncEvent::ConflictDetected { .. }));

    let resolved = f.engine.sync().resolve_conflict(&conflict_id, Resolution::RemoteWins).await.unwrap();
    assert_eq!(resolved.status, ConflictStatus::Resolved);
    assert_eq!(cache.get("stats:all").await.unwrap()["goals"], 14);

    // Within tolerance: overwritten
    f.transport.push("/api/stats", Response::ok(json!({"playerId": "p1", "goals": 15})));
    assert_eq!(f.engine.sync().force_sync("stats").await.unwrap(), SyncOutcome::Synced);
    assert_eq!(cache.get("stats:all").await.unwrap()["goals"], 15);
}
