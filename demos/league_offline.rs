// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline league client walkthrough.
//!
//! Demonstrates:
//! 1. Starting the engine while offline
//! 2. Optimistic vote and preference updates
//! 3. Reconnecting: queued actions drain, one update is confirmed and one
//!    rolled back
//! 4. A stats sync that surfaces a conflict, then resolving it
//! 5. Health and metrics
//! 6. Clean shutdown
//!
//! The server is simulated with a scripted transport, so nothing needs to be
//! running.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=offline_sync=debug cargo run --example league_offline
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use offline_sync::{
    EngineConfig, MemoryKvStore, NetworkMonitor, OfflineEngine, OperationType, Resolution, Response,
    ScriptedTransport, SyncError, SyncEvent, SyncOutcome,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offline_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           offline-sync: League Client Walkthrough             ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Script the server and start offline
    // ─────────────────────────────────────────────────────────────────────────
    let server = Arc::new(ScriptedTransport::new());
    server.set_standing("/api/votes", Response::ok(json!({"id": "vote-981"})));
    server.set_standing("/api/preferences/me", Response::new(400, json!({"error": "unknown theme"})));
    server.set_standing("/api/matches", Response::ok(json!([{"id": "m1", "date": "2026-06-01"}])));
    server.set_standing("/api/players", Response::ok(json!([{"email": "a@x.com", "overall": 81}])));
    server.set_standing("/api/stats", Response::ok(json!({"playerId": "p1", "goals": 14})));

    let config = EngineConfig {
        drain_action_delay_ms: 10,
        ..EngineConfig::default()
    };
    let network = NetworkMonitor::new(false);
    let engine = OfflineEngine::with_network(config, Arc::new(MemoryKvStore::new()), server.clone(), network);
    let mut events = engine.subscribe();

    println!("🚀 Starting engine (offline)...");
    engine.start().await?;
    println!("   State: {}", engine.state());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Optimistic updates while offline
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Voting and changing theme while offline...");
    let vote = engine
        .apply_update(
            OperationType::VoteSubmit,
            "votes",
            "m1",
            json!({"matchId": "m1", "voterId": "u1", "choice": "home"}),
        )
        .await?;
    let theme = engine
        .apply_update(OperationType::PreferenceUpdate, "preferences", "me", json!({"theme": "neon"}))
        .await?;

    println!("   └─ votes:m1 → {}", engine.cache().get("votes:m1").await.unwrap_or_default());
    println!("   └─ preferences:me → {}", engine.cache().get("preferences:me").await.unwrap_or_default());
    println!("   └─ Queued actions: {}", engine.queue().len());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Reconnect
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📶 Back online...");
    engine.network().set_online(true);

    let vote_outcome = tokio::time::timeout(Duration::from_secs(5), vote.settled).await?;
    let theme_outcome = tokio::time::timeout(Duration::from_secs(5), theme.settled).await?;
    println!("   └─ vote: {:?}", vote_outcome);
    println!("   └─ theme: {:?}", theme_outcome);
    println!("   └─ votes:m1 → {}", engine.cache().get("votes:m1").await.unwrap_or_default());
    println!(
        "   └─ preferences:me → {}",
        engine
            .cache()
            .get("preferences:me")
            .await
            .map_or_else(|| "(rolled back)".to_string(), |v| v.to_string())
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Conflicting stats
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n⚔️  Syncing stats that drifted on the server...");
    engine
        .cache()
        .set("stats:all", &json!({"playerId": "p1", "goals": 10}), "stats")
        .await?;

    // the reconnect kicked off a scheduled pass; wait it out
    let outcome = loop {
        match engine.sync().force_sync("stats").await {
            Err(SyncError::InFlight) => tokio::time::sleep(Duration::from_millis(20)).await,
            other => break other?,
        }
    };

    if let SyncOutcome::Conflict { conflict_id } = outcome {
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::ConflictDetected { key, .. } = event {
                println!("   └─ Conflict detected on {}", key);
            }
        }
        let resolved = engine.sync().resolve_conflict(&conflict_id, Resolution::RemoteWins).await?;
        println!("   └─ Resolved {} → {:?}", resolved.id, resolved.status);
        println!("   └─ stats:all → {}", engine.cache().get("stats:all").await.unwrap_or_default());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Health and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let health = engine.health();
    println!("\n📊 Engine Health:");
    println!("   ┌─ State: {} (online: {})", health.state, health.online);
    println!("   ├─ Cache: {} entries, {} bytes, hit ratio {:.2}", health.cache.entries, health.cache.bytes, health.cache.hit_ratio());
    println!("   ├─ Queue: {} pending, {} processed, {} failed", health.queue.pending, health.queue.processed, health.queue.failed);
    println!("   └─ Conflicts pending: {}", health.pending_conflicts);

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ Shutdown complete! State: {}", engine.state());
    println!("   └─ Requests seen by the server: {}", server.request_count());

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Walkthrough complete!                      ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump captured metrics grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut counters = vec![];
    let mut gauges = vec![];
    let mut histograms = vec![];

    for (composite_key, _, _, value) in snapshotter.snapshot().into_vec() {
        let (_, key) = composite_key.into_parts();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
        let name = format!("{}{}", key.name(), label_str);

        match value {
            DebugValue::Counter(v) => counters.push((name, v)),
            DebugValue::Gauge(v) => gauges.push((name, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, count, sum));
            }
        }
    }

    counters.sort();
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters");
        for (name, value) in &counters {
            println!("   │  └─ {} = {}", name, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges");
        for (name, value) in &gauges {
            println!("   │  └─ {} = {:.2}", name, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms");
        for (name, count, sum) in &histograms {
            println!("   │  └─ {} count={} sum={:.4}", name, count, sum);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
