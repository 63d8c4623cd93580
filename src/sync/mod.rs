// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Scheduled synchronization of resource families.
//!
//! The coordinator owns one [`SyncItem`] per resource family (players,
//! stats, matches, votes by default). A pass ([`SyncCoordinator::priority_sync`])
//! services due items critical-first:
//!
//! 1. If the cached collection is still fresh, skip the network. The
//!    freshness window is the item's frequency widened by the current
//!    network's freshness multiplier.
//! 2. Otherwise fetch with retry and backoff, each attempt bounded by a
//!    priority-scaled deadline.
//! 3. Compare the fetched data with the cached copy. A disagreement beyond
//!    tolerance records a [`Conflict`] and leaves the cache untouched.
//! 4. Otherwise write the result through [`CacheStore::set`].
//!
//! Passes are single-flight. Failures leave the item in `ERROR`, which keeps
//! it due for the next tick.

pub mod detect;
pub mod item;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStore};
use crate::config::{ConflictTolerances, EngineConfig};
use crate::conflict::{Conflict, ConflictLog, ConflictSource, ConflictStatus, Resolution};
use crate::events::{EventBus, SyncEvent};
use crate::metrics;
use crate::network::{NetworkMonitor, NetworkQuality};
use crate::resilience::retry::{retry, RetryConfig};
use crate::storage::KvStore;
use crate::strategy::StrategyPriority;
use crate::time::now_millis;
use crate::transport::{dispatch, Request, Transport, TransportError, HEADER_LAST_SYNC, HEADER_SYNC_PRIORITY};

use detect::detect_conflict;
use item::{SyncItem, SyncStatus};

const PERSIST_KEY: &str = "sync:items";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unknown resource '{0}'")]
    UnknownResource(String),

    #[error("conflict {0} not found")]
    ConflictNotFound(String),

    #[error("conflict {0} already resolved")]
    AlreadyResolved(String),

    #[error("a sync pass is already running")]
    InFlight,

    #[error("offline")]
    Offline,

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Result of syncing one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Fetched and written to the cache
    Synced,
    /// Cache was fresh enough, no request made
    Fresh,
    /// Fetched data conflicted with the cache; cache left unchanged
    Conflict { conflict_id: String },
    Failed(String),
}

/// What one pass did, per resource in service order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub outcomes: Vec<(String, SyncOutcome)>,
}

impl SyncReport {
    #[must_use]
    pub fn outcome(&self, resource_type: &str) -> Option<&SyncOutcome> {
        self.outcomes
            .iter()
            .find(|(r, _)| r == resource_type)
            .map(|(_, o)| o)
    }

    #[must_use]
    pub fn count(&self, pred: impl Fn(&SyncOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }
}

/// Fetch deadline multiplier: critical data waits least.
fn priority_timeout_scale(priority: StrategyPriority) -> f64 {
    match priority {
        StrategyPriority::Critical => 0.5,
        StrategyPriority::High => 0.75,
        StrategyPriority::Medium => 1.0,
        StrategyPriority::Low => 1.5,
    }
}

pub struct SyncCoordinator {
    items: DashMap<String, SyncItem>,
    cache: Arc<CacheStore>,
    transport: Arc<dyn Transport>,
    network: NetworkMonitor,
    conflicts: Arc<ConflictLog>,
    events: EventBus,
    store: Arc<dyn KvStore>,
    tolerances: ConflictTolerances,
    base_timeout: Duration,
    fetch_attempts: usize,
    backoff_initial: Duration,
    syncing: AtomicBool,
    persist_lock: tokio::sync::Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(
        config: &EngineConfig,
        cache: Arc<CacheStore>,
        transport: Arc<dyn Transport>,
        network: NetworkMonitor,
        conflicts: Arc<ConflictLog>,
        events: EventBus,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let items = config
            .sync_resources
            .iter()
            .map(|r| (r.resource_type.clone(), SyncItem::from_config(r)))
            .collect();

        let coordinator = Self {
            items,
            cache,
            transport,
            network,
            conflicts,
            events,
            store,
            tolerances: config.conflict_tolerances.clone(),
            base_timeout: Duration::from_millis(config.sync_base_timeout_ms),
            fetch_attempts: config.sync_fetch_attempts.max(1),
            backoff_initial: Duration::from_millis(config.sync_backoff_initial_ms),
            syncing: AtomicBool::new(false),
            persist_lock: tokio::sync::Mutex::new(()),
        };
        coordinator.adapt_to_network(coordinator.network.quality());
        coordinator
    }

    /// Sync every due resource (optionally restricted to `resource_types`),
    /// critical first.
    ///
    /// Returns an empty report when offline or when another pass is running.
    #[tracing::instrument(skip(self))]
    pub async fn priority_sync(&self, resource_types: Option<&[&str]>) -> SyncReport {
        let mut report = SyncReport::default();

        if !self.network.is_online() {
            debug!("Offline, sync pass skipped");
            return report;
        }
        if self.syncing.swap(true, Ordering::AcqRel) {
            debug!("Sync pass already in flight");
            return report;
        }
        let _guard = SyncGuard(&self.syncing);

        let now = now_millis();
        let mut due: Vec<SyncItem> = self
            .items
            .iter()
            .filter(|i| resource_types.map_or(true, |only| only.contains(&i.resource_type.as_str())))
            .filter(|i| i.is_due(now))
            .map(|i| i.clone())
            .collect();
        due.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.resource_type.cmp(&b.resource_type)));

        if due.is_empty() {
            return report;
        }
        info!(due = due.len(), "Sync pass starting");

        for item in due {
            let outcome = self.sync_one(&item.resource_type, false).await;
            report.outcomes.push((item.resource_type, outcome));
        }

        self.persist().await;
        info!(
            synced = report.count(|o| matches!(o, SyncOutcome::Synced)),
            fresh = report.count(|o| matches!(o, SyncOutcome::Fresh)),
            conflicts = report.count(|o| matches!(o, SyncOutcome::Conflict { .. })),
            failed = report.count(|o| matches!(o, SyncOutcome::Failed(_))),
            "Sync pass complete"
        );
        report
    }

    /// Sync one resource now, bypassing both the schedule and the freshness check.
    #[tracing::instrument(skip(self))]
    pub async fn force_sync(&self, resource_type: &str) -> Result<SyncOutcome, SyncError> {
        if !self.items.contains_key(resource_type) {
            return Err(SyncError::UnknownResource(resource_type.to_string()));
        }
        if !self.network.is_online() {
            return Err(SyncError::Offline);
        }
        if self.syncing.swap(true, Ordering::AcqRel) {
            return Err(SyncError::InFlight);
        }
        let _guard = SyncGuard(&self.syncing);

        let outcome = self.sync_one(resource_type, true).await;
        self.persist().await;
        Ok(outcome)
    }

    /// Warm the cache for every resource whose strategy is flagged `prefetch`.
    /// Fresh entries are left alone.
    pub async fn prefetch(&self) -> SyncReport {
        let targets: Vec<String> = self
            .items
            .iter()
            .filter(|i| {
                self.cache
                    .strategies()
                    .get(&i.resource_type)
                    .is_some_and(|s| s.prefetch)
            })
            .map(|i| i.resource_type.clone())
            .collect();

        if targets.is_empty() || !self.network.is_online() {
            return SyncReport::default();
        }
        if self.syncing.swap(true, Ordering::AcqRel) {
            return SyncReport::default();
        }
        let _guard = SyncGuard(&self.syncing);

        let mut report = SyncReport::default();
        for resource_type in targets {
            let outcome = self.sync_one(&resource_type, false).await;
            report.outcomes.push((resource_type, outcome));
        }
        self.persist().await;
        debug!(resources = report.outcomes.len(), "Prefetch complete");
        report
    }

    /// Settle a pending conflict. Sync conflicts write the chosen value to
    /// the cache; once a resource has no pending conflicts it returns to
    /// `SUCCESS`.
    #[tracing::instrument(skip(self, resolution))]
    pub async fn resolve_conflict(&self, conflict_id: &str, resolution: Resolution) -> Result<Conflict, SyncError> {
        let conflict = self
            .conflicts
            .get(conflict_id)
            .ok_or_else(|| SyncError::ConflictNotFound(conflict_id.to_string()))?;
        if conflict.status == ConflictStatus::Resolved {
            return Err(SyncError::AlreadyResolved(conflict_id.to_string()));
        }

        if conflict.source == ConflictSource::Sync {
            let value = resolution.resolved_value(&conflict);
            self.cache.set(&conflict.key, &value, &conflict.resource_type).await?;
        }

        let resolved = self
            .conflicts
            .mark_resolved(conflict_id)
            .await
            .ok_or_else(|| SyncError::AlreadyResolved(conflict_id.to_string()))?;

        if self.conflicts.pending_for(&resolved.resource_type) == 0 {
            if let Some(mut item) = self.items.get_mut(&resolved.resource_type) {
                if item.status == SyncStatus::Conflict {
                    item.status = SyncStatus::Success;
                    item.last_sync_at = Some(now_millis());
                }
            }
            self.persist().await;
        }

        info!(conflict_id, "Conflict resolved");
        self.events.emit(SyncEvent::ConflictResolved {
            conflict_id: conflict_id.to_string(),
        });
        Ok(resolved)
    }

    /// Stretch (or restore) every item's cadence for the given network.
    pub fn adapt_to_network(&self, quality: NetworkQuality) {
        let multiplier = quality.frequency_multiplier();
        for mut item in self.items.iter_mut() {
            item.frequency_minutes = item.base_frequency_minutes * multiplier;
        }
        debug!(multiplier, effective_type = %quality.effective_type, "Sync cadence adapted");
    }

    /// Snapshot of all items, critical first.
    #[must_use]
    pub fn items(&self) -> Vec<SyncItem> {
        let mut items: Vec<SyncItem> = self.items.iter().map(|i| i.clone()).collect();
        items.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.resource_type.cmp(&b.resource_type)));
        items
    }

    #[must_use]
    pub fn item(&self, resource_type: &str) -> Option<SyncItem> {
        self.items.get(resource_type).map(|i| i.clone())
    }

    #[must_use]
    pub fn has_due(&self) -> bool {
        let now = now_millis();
        self.items.iter().any(|i| i.is_due(now))
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    /// Restore per-resource bookkeeping. The catalogue itself comes from
    /// config; persisted rows for unknown resources are ignored.
    pub async fn load(&self) -> usize {
        let bytes = match self.store.get(PERSIST_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "Sync state hydration failed");
                metrics::record_storage_error("sync_load");
                return 0;
            }
        };
        let saved: Vec<SyncItem> = match serde_json::from_slice(&bytes) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::error!(error = %e, "Persisted sync state is corrupt");
                return 0;
            }
        };

        let mut restored = 0;
        for saved in saved {
            if let Some(mut item) = self.items.get_mut(&saved.resource_type) {
                item.last_sync_at = saved.last_sync_at;
                item.retry_count = saved.retry_count;
                item.status = match saved.status {
                    SyncStatus::Syncing => SyncStatus::Pending,
                    other => other,
                };
                restored += 1;
            }
        }
        info!(restored, "Sync state hydrated");
        restored
    }

    /// Scheduler loop: tick, network-quality changes, online transitions.
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut network = self.network.subscribe();
        let mut last_quality = self.network.quality();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.network.is_online() && self.has_due() {
                        self.priority_sync(None).await;
                    }
                }
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *network.borrow_and_update();
                    if status.quality != last_quality {
                        last_quality = status.quality;
                        self.adapt_to_network(status.quality);
                    }
                    if status.online && self.has_due() {
                        self.priority_sync(None).await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Sync scheduler stopped");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn sync_one(&self, resource_type: &str, force: bool) -> SyncOutcome {
        let Some(item) = self.set_status(resource_type, SyncStatus::Syncing) else {
            return SyncOutcome::Failed(format!("unknown resource {}", resource_type));
        };
        let key = item.cache_key();

        if !force {
            if let Some(cached) = self.cache.peek(&key) {
                let window = (item.frequency_millis() as f64 * self.network.quality().freshness_multiplier()) as i64;
                if cached.age_millis(now_millis()) <= window {
                    debug!(resource_type, age_ms = cached.age_millis(now_millis()), "Cache fresh, skipping fetch");
                    // Only an explicit resolution clears a pending conflict
                    let status = if self.conflicts.pending_for(resource_type) > 0 {
                        SyncStatus::Conflict
                    } else {
                        SyncStatus::Success
                    };
                    self.update(resource_type, |i| {
                        i.status = status;
                        i.last_sync_at = Some(i.last_sync_at.unwrap_or(0).max(cached.created_at));
                    });
                    metrics::record_sync(resource_type, "fresh");
                    return SyncOutcome::Fresh;
                }
            }
        }

        let started = Instant::now();
        let fetched = match self.fetch(&item).await {
            Ok(value) => value,
            Err(e) => {
                warn!(resource_type, error = %e, "Sync fetch failed");
                self.update(resource_type, |i| {
                    i.status = SyncStatus::Error;
                    i.retry_count = i.retry_count.saturating_add(1);
                });
                metrics::record_sync(resource_type, "error");
                return SyncOutcome::Failed(e.to_string());
            }
        };
        metrics::record_sync_latency(resource_type, started.elapsed());

        if let Some(cached) = self.cache.peek(&key) {
            if let Some(detail) = detect_conflict(resource_type, &cached.value, &fetched, &self.tolerances) {
                info!(resource_type, detail = %detail, "Fetched data conflicts with cache");
                let conflict = self
                    .conflicts
                    .record(ConflictSource::Sync, resource_type, &key, cached.value, fetched)
                    .await;
                self.update(resource_type, |i| i.status = SyncStatus::Conflict);
                self.events.emit(SyncEvent::ConflictDetected {
                    conflict_id: conflict.id.clone(),
                    resource_type: resource_type.to_string(),
                    key,
                });
                metrics::record_sync(resource_type, "conflict");
                return SyncOutcome::Conflict { conflict_id: conflict.id };
            }
        }

        match self.cache.set(&key, &fetched, resource_type).await {
            Ok(()) => {
                self.update(resource_type, |i| {
                    i.status = SyncStatus::Success;
                    i.last_sync_at = Some(now_millis());
                    i.retry_count = 0;
                });
                metrics::record_sync(resource_type, "success");
                debug!(resource_type, "Resource synced");
                SyncOutcome::Synced
            }
            Err(e) => {
                warn!(resource_type, error = %e, "Fetched data could not be cached");
                self.update(resource_type, |i| {
                    i.status = SyncStatus::Error;
                    i.retry_count = i.retry_count.saturating_add(1);
                });
                metrics::record_sync(resource_type, "error");
                SyncOutcome::Failed(e.to_string())
            }
        }
    }

    async fn fetch(&self, item: &SyncItem) -> Result<Value, TransportError> {
        let timeout = self.base_timeout.mul_f64(priority_timeout_scale(item.priority));
        let config = RetryConfig {
            initial_delay: self.backoff_initial,
            max_retries: Some(self.fetch_attempts),
            ..RetryConfig::fetch(timeout)
        };

        let operation = format!("sync_{}", item.resource_type);
        retry(&operation, &config, || async {
            let mut request = Request::get(item.endpoint.clone())
                .with_header(HEADER_SYNC_PRIORITY, item.priority.to_string())
                .with_timeout(timeout);
            if let Some(last) = item.last_sync_at {
                request = request.with_header(HEADER_LAST_SYNC, last.to_string());
            }
            let response = dispatch(self.transport.as_ref(), request).await?;
            if response.is_success() {
                Ok(response.body)
            } else {
                Err(TransportError::Status { status: response.status })
            }
        })
        .await
    }

    fn set_status(&self, resource_type: &str, status: SyncStatus) -> Option<SyncItem> {
        let mut item = self.items.get_mut(resource_type)?;
        item.status = status;
        Some(item.clone())
    }

    fn update(&self, resource_type: &str, f: impl FnOnce(&mut SyncItem)) {
        if let Some(mut item) = self.items.get_mut(resource_type) {
            f(&mut item);
        }
    }

    pub(crate) async fn persist(&self) {
        let _write = self.persist_lock.lock().await;
        let bytes = match serde_json::to_vec(&self.items()) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Sync state not serializable");
                return;
            }
        };
        if let Err(e) = self.store.put(PERSIST_KEY, &bytes).await {
            warn!(error = %e, "Sync state persistence failed");
            metrics::record_storage_error("sync_put");
        }
    }
}

/// Resets the single-flight flag when a pass ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncResourceConfig;
    use crate::network::EffectiveType;
    use crate::storage::MemoryKvStore;
    use crate::transport::{Response, ScriptedTransport};
    use serde_json::json;

    struct Harness {
        sync: SyncCoordinator,
        cache: Arc<CacheStore>,
        transport: Arc<ScriptedTransport>,
        network: NetworkMonitor,
        conflicts: Arc<ConflictLog>,
    }

    fn harness() -> Harness {
        let kv = Arc::new(MemoryKvStore::new());
        let config = EngineConfig::without_delays();
        let cache = Arc::new(CacheStore::new(&config, kv.clone()));
        let transport = Arc::new(ScriptedTransport::new());
        let network = NetworkMonitor::new(true);
        let conflicts = Arc::new(ConflictLog::new(kv.clone()));
        let sync = SyncCoordinator::new(
            &config,
            cache.clone(),
            transport.clone(),
            network.clone(),
            conflicts.clone(),
            EventBus::default(),
            kv,
        );
        Harness { sync, cache, transport, network, conflicts }
    }

    fn serve_all(t: &ScriptedTransport) {
        for r in ["votes", "matches", "players", "stats"] {
            t.set_standing(&format!("/api/{}", r), Response::ok(json!([])));
        }
    }

    #[tokio::test]
    async fn test_critical_serviced_first() {
        let h = harness();
        serve_all(&h.transport);

        let report = h.sync.priority_sync(None).await;
        let order: Vec<&str> = report.outcomes.iter().map(|(r, _)| r.as_str()).collect();
        assert_eq!(order, vec!["votes", "matches", "players", "stats"]);

        let sent: Vec<String> = h.transport.requests().into_iter().map(|r| r.endpoint).collect();
        assert_eq!(sent, vec!["/api/votes", "/api/matches", "/api/players", "/api/stats"]);
    }

    #[tokio::test]
    async fn test_success_writes_cache_and_clears_due() {
        let h = harness();
        h.transport.set_standing("/api/players", Response::ok(json!([{"email": "a@x.com", "overall": 80}])));

        let report = h.sync.priority_sync(Some(&["players"])).await;
        assert_eq!(report.outcome("players"), Some(&SyncOutcome::Synced));
        assert_eq!(h.cache.peek("players:all").unwrap().value[0]["overall"], 80);

        let item = h.sync.item("players").unwrap();
        assert_eq!(item.status, SyncStatus::Success);
        assert!(item.last_sync_at.is_some());

        // Not due again until the frequency elapses
        assert!(h.sync.priority_sync(Some(&["players"])).await.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_network() {
        let h = harness();
        h.cache.set("votes:all", &json!([]), "votes").await.unwrap();

        let report = h.sync.priority_sync(Some(&["votes"])).await;
        assert_eq!(report.outcome("votes"), Some(&SyncOutcome::Fresh));
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_stats_conflict_preserves_cache() {
        let h = harness();
        h.cache.set("stats:all", &json!({"goals": 10}), "stats").await.unwrap();
        h.transport.set_standing("/api/stats", Response::ok(json!({"goals": 14})));

        let outcome = h.sync.force_sync("stats").await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Conflict { .. }));
        assert_eq!(h.cache.peek("stats:all").unwrap().value, json!({"goals": 10}));
        assert_eq!(h.sync.item("stats").unwrap().status, SyncStatus::Conflict);
        assert_eq!(h.conflicts.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_fresh_pass_keeps_unresolved_conflict() {
        let h = harness();
        h.cache.set("stats:all", &json!({"goals": 10}), "stats").await.unwrap();
        h.transport.set_standing("/api/stats", Response::ok(json!({"goals": 14})));
        assert!(matches!(h.sync.force_sync("stats").await.unwrap(), SyncOutcome::Conflict { .. }));

        let report = h.sync.priority_sync(Some(&["stats"])).await;
        assert_eq!(report.outcome("stats"), Some(&SyncOutcome::Fresh));
        assert_eq!(h.sync.item("stats").unwrap().status, SyncStatus::Conflict);
        assert_eq!(h.conflicts.pending_for("stats"), 1);
    }

    #[tokio::test]
    async fn test_stats_within_tolerance_overwrites() {
        let h = harness();
        h.cache.set("stats:all", &json!({"goals": 100}), "stats").await.unwrap();
        h.transport.set_standing("/api/stats", Response::ok(json!({"goals": 104})));

        assert_eq!(h.sync.force_sync("stats").await.unwrap(), SyncOutcome::Synced);
        assert_eq!(h.cache.peek("stats:all").unwrap().value, json!({"goals": 104}));
    }

    #[tokio::test]
    async fn test_resolve_conflict_remote_wins() {
        let h = harness();
        h.cache.set("stats:all", &json!({"goals": 10}), "stats").await.unwrap();
        h.transport.set_standing("/api/stats", Response::ok(json!({"goals": 14})));
        let SyncOutcome::Conflict { conflict_id } = h.sync.force_sync("stats").await.unwrap() else {
            panic!("expected conflict");
        };

        h.sync.resolve_conflict(&conflict_id, Resolution::RemoteWins).await.unwrap();

        assert_eq!(h.cache.peek("stats:all").unwrap().value, json!({"goals": 14}));
        assert_eq!(h.sync.item("stats").unwrap().status, SyncStatus::Success);
        assert!(matches!(
            h.sync.resolve_conflict(&conflict_id, Resolution::LocalWins).await,
            Err(SyncError::AlreadyResolved(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_marks_error_and_stays_due() {
        let h = harness();
        h.transport.set_standing("/api/matches", Response::new(503, Value::Null));

        let report = h.sync.priority_sync(Some(&["matches"])).await;
        assert!(matches!(report.outcome("matches"), Some(SyncOutcome::Failed(_))));
        assert_eq!(h.transport.requests_to("/api/matches").len(), 3);

        let item = h.sync.item("matches").unwrap();
        assert_eq!(item.status, SyncStatus::Error);
        assert_eq!(item.retry_count, 1);
        assert!(h.sync.has_due());
    }

    #[tokio::test]
    async fn test_offline_pass_is_noop() {
        let h = harness();
        h.network.set_online(false);
        assert!(h.sync.priority_sync(None).await.outcomes.is_empty());
        assert!(matches!(h.sync.force_sync("votes").await, Err(SyncError::Offline)));
    }

    #[tokio::test]
    async fn test_network_adaptation_stretches_frequency() {
        let h = harness();
        h.sync.adapt_to_network(NetworkQuality {
            effective_type: EffectiveType::TwoG,
            rtt_ms: 900,
            save_data: true,
        });
        let votes = h.sync.item("votes").unwrap();
        assert_eq!(votes.base_frequency_minutes, 5.0);
        assert_eq!(votes.frequency_minutes, 20.0);

        h.sync.adapt_to_network(NetworkQuality::default());
        assert_eq!(h.sync.item("votes").unwrap().frequency_minutes, 5.0);
    }

    #[tokio::test]
    async fn test_unknown_resource() {
        let h = harness();
        assert!(matches!(
            h.sync.force_sync("badges").await,
            Err(SyncError::UnknownResource(_))
        ));
    }

    #[tokio::test]
    async fn test_prefetch_only_flagged_strategies() {
        let h = harness();
        serve_all(&h.transport);

        let report = h.sync.prefetch().await;
        let mut resources: Vec<&str> = report.outcomes.iter().map(|(r, _)| r.as_str()).collect();
        resources.sort_unstable();
        assert_eq!(resources, vec!["matches", "players"]);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let kv = Arc::new(MemoryKvStore::new());
        let config = EngineConfig {
            sync_resources: vec![SyncResourceConfig::new("players", "/api/players", StrategyPriority::High, 15.0)],
            ..EngineConfig::without_delays()
        };
        let transport = Arc::new(ScriptedTransport::new());
        transport.set_standing("/api/players", Response::ok(json!([])));

        let build = || {
            SyncCoordinator::new(
                &config,
                Arc::new(CacheStore::new(&config, kv.clone())),
                transport.clone(),
                NetworkMonitor::new(true),
                Arc::new(ConflictLog::new(kv.clone())),
                EventBus::default(),
                kv.clone(),
            )
        };

        let first = build();
        first.priority_sync(None).await;
        let synced_at = first.item("players").unwrap().last_sync_at;

        let second = build();
        assert_eq!(second.load().await, 1);
        assert_eq!(second.item("players").unwrap().last_sync_at, synced_at);
        assert!(!second.has_due());
    }
}
