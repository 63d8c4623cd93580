// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Strategy-driven cache store.
//!
//! Every cached value belongs to a named [`CacheStrategy`](crate::strategy::CacheStrategy)
//! which fixes its TTL, eviction priority, entry cap and encoding. The store
//! keeps an in-memory index (DashMap) and writes rows through to the
//! [`KvStore`] under `cache:{key}` so the cache survives restarts.
//!
//! # Size accounting
//!
//! Total bytes are tracked in an atomic counter updated on every insert,
//! replace and removal. Replacing a key subtracts the old entry's size first,
//! so setting the same value twice never double-counts.
//!
//! # Eviction
//!
//! Before an insert, if usage exceeds `eviction_threshold` of the budget,
//! [`LruPolicy`] passes run until usage drops under `eviction_target`. Each
//! pass removes at most one batch and yields between passes. Expiry sweeps are
//! independent and time-driven.
//!
//! # Persistence failures
//!
//! A failing [`KvStore`] never fails a cache call. The in-memory index stays
//! authoritative and the failure is logged and counted.

pub mod budget;
pub mod codec;
pub mod entry;
pub mod eviction;
pub mod invalidation;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::metrics;
use crate::storage::KvStore;
use crate::strategy::StrategyTable;
use crate::time::now_millis;

use budget::{resolve_budget, DeviceClass};
use codec::{CodecError, StoredPayload};
use entry::CacheEntry;
use eviction::{EvictionCandidate, LruPolicy};
use invalidation::{Invalidation, InvalidationChannel};

const PERSIST_PREFIX: &str = "cache:";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("unknown cache strategy '{0}'")]
    UnknownStrategy(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub budget_bytes: usize,
    pub device_class: DeviceClass,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Hits over lookups, 0.0 before the first lookup.
    #[must_use]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    #[must_use]
    pub fn usage_ratio(&self) -> f64 {
        if self.budget_bytes == 0 {
            0.0
        } else {
            self.bytes as f64 / self.budget_bytes as f64
        }
    }
}

/// A live value read without touching access statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub strategy_name: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl CachedValue {
    #[must_use]
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.created_at).max(0)
    }
}

pub struct CacheStore {
    entries: DashMap<String, CacheEntry>,
    total_bytes: AtomicUsize,
    strategies: StrategyTable,
    policy: LruPolicy,
    device_class: DeviceClass,
    budget_bytes: usize,
    eviction_threshold: f64,
    eviction_target: f64,
    store: Arc<dyn KvStore>,
    persist: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: InvalidationChannel,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("bytes", &self.total_bytes.load(Ordering::Acquire))
            .field("budget_bytes", &self.budget_bytes)
            .field("device_class", &self.device_class)
            .finish()
    }
}

impl CacheStore {
    pub fn new(config: &EngineConfig, store: Arc<dyn KvStore>) -> Self {
        let (device_class, budget_bytes) =
            resolve_budget(config.user_agent.as_deref(), config.storage_budget_bytes);

        info!(
            device_class = %device_class,
            budget_bytes,
            strategies = config.strategies.len(),
            "Cache store created"
        );

        Self {
            entries: DashMap::new(),
            total_bytes: AtomicUsize::new(0),
            strategies: StrategyTable::new(config.strategies.clone()),
            policy: LruPolicy {
                critical_protection_millis: (config.critical_protection_secs as i64).saturating_mul(1000),
                batch_size: config.eviction_batch_size.max(1),
            },
            device_class,
            budget_bytes,
            eviction_threshold: config.eviction_threshold,
            eviction_target: config.eviction_target.min(config.eviction_threshold),
            store,
            persist: config.persist_cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            invalidations: InvalidationChannel::new(),
        }
    }

    #[must_use]
    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    /// Read a live value, recording access statistics.
    ///
    /// Expired entries are removed on the way out and count as a miss.
    /// TTL is never extended by a read.
    pub async fn get(&self, key: &str) -> Option<Value> {
        enum Lookup {
            Missing,
            Expired(String),
            Live(StoredPayload, String),
        }

        let now = now_millis();
        let lookup = match self.entries.get_mut(key) {
            None => Lookup::Missing,
            Some(entry) if entry.is_expired(now) => Lookup::Expired(entry.strategy_name.clone()),
            Some(mut entry) => {
                entry.record_access(now);
                Lookup::Live(entry.payload.clone(), entry.strategy_name.clone())
            }
        };

        let (payload, strategy_name) = match lookup {
            Lookup::Missing => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup("unknown", "miss");
                return None;
            }
            Lookup::Expired(strategy_name) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(&strategy_name, "expired");
                debug!(key, "Expired entry removed on read");
                if let Some(removed) = self.detach(key) {
                    self.unpersist(&removed.key).await;
                }
                return None;
            }
            Lookup::Live(payload, strategy_name) => (payload, strategy_name),
        };

        match payload.decode() {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(&strategy_name, "hit");
                Some(value)
            }
            Err(e) => {
                error!(key, error = %e, "Cached payload could not be decoded, dropping entry");
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_lookup(&strategy_name, "corrupt");
                if let Some(removed) = self.detach(key) {
                    self.unpersist(&removed.key).await;
                }
                None
            }
        }
    }

    /// Read a live value without recording an access.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<CachedValue> {
        let now = now_millis();
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            return None;
        }
        let value = entry.payload.decode().ok()?;
        Some(CachedValue {
            value,
            strategy_name: entry.strategy_name.clone(),
            created_at: entry.created_at,
            expires_at: entry.expires_at,
        })
    }

    /// Exact copy of the stored row, expired or not.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.clone())
    }

    /// Store `value` under `key` using the named strategy.
    ///
    /// Fails only if the strategy does not exist or the value cannot be
    /// encoded. Storage pressure triggers eviction, never a failure.
    #[tracing::instrument(skip(self, value), fields(strategy = %strategy_name))]
    pub async fn set(&self, key: &str, value: &Value, strategy_name: &str) -> Result<(), CacheError> {
        let Some(strategy) = self.strategies.get(strategy_name) else {
            warn!(key, strategy = strategy_name, "Refusing cache write for unknown strategy");
            metrics::record_cache_write(strategy_name, "rejected");
            return Err(CacheError::UnknownStrategy(strategy_name.to_string()));
        };

        let payload = StoredPayload::encode(value, strategy.compress).inspect_err(|e| {
            warn!(key, error = %e, "Failed to encode cache payload");
            metrics::record_cache_write(strategy_name, "error");
        })?;

        let now = now_millis();
        let entry = CacheEntry::new(key.to_string(), payload, strategy.name.clone(), now, strategy.ttl_millis());
        let max_entries = strategy.max_entries;

        self.ensure_capacity(key, entry.size_bytes).await;
        self.enforce_entry_cap(key, strategy_name, max_entries).await;
        self.insert_entry(entry).await;

        metrics::record_cache_write(strategy_name, "success");
        Ok(())
    }

    /// Put back a row captured with [`snapshot`](Self::snapshot), timestamps included.
    pub async fn restore(&self, entry: CacheEntry) {
        debug!(key = %entry.key, "Restoring cache row");
        self.insert_entry(entry).await;
    }

    /// Remove one key. Returns whether it was present.
    pub async fn delete(&self, key: &str) -> bool {
        match self.detach(key) {
            Some(removed) => {
                self.unpersist(&removed.key).await;
                true
            }
            None => false,
        }
    }

    /// Remove every entry whose strategy lists `event`, optionally narrowed
    /// to keys containing `key_pattern`. Returns the number removed.
    #[tracing::instrument(skip(self))]
    pub async fn invalidate(&self, event: &str, key_pattern: Option<&str>) -> usize {
        let affected: HashSet<&str> = self
            .strategies
            .iter()
            .filter(|s| s.is_invalidated_by(event))
            .map(|s| s.name.as_str())
            .collect();

        if affected.is_empty() {
            debug!("No strategy listens for this event");
            return 0;
        }

        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| affected.contains(e.strategy_name.as_str()))
            .filter(|e| key_pattern.map_or(true, |p| e.key().contains(p)))
            .map(|e| e.key().clone())
            .collect();

        let removed = self.remove_many(&keys).await;

        if !removed.is_empty() {
            info!(removed = removed.len(), "Invalidated cache entries");
            metrics::record_invalidation(event, removed.len());
        }

        let count = removed.len();
        self.invalidations.publish(Invalidation {
            event: event.to_string(),
            key_pattern: key_pattern.map(str::to_string),
            keys_removed: removed,
        });
        count
    }

    /// Delete every entry with `expires_at <= now`. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = now_millis();
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        if keys.is_empty() {
            return 0;
        }

        let removed = self.remove_many(&keys).await.len();
        debug!(removed, "Expiry sweep complete");
        metrics::record_sweep(removed);
        removed
    }

    /// Rebuild the in-memory index from persistence.
    ///
    /// Expired rows, rows for strategies no longer configured, and rows that
    /// fail to parse are deleted from the backend. Returns the number loaded.
    #[tracing::instrument(skip(self))]
    pub async fn load(&self) -> usize {
        if !self.persist {
            return 0;
        }

        let rows = match self.store.scan_prefix(PERSIST_PREFIX).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Cache hydration failed, starting empty");
                metrics::record_storage_error("cache_load");
                return 0;
            }
        };

        let now = now_millis();
        let mut stale = Vec::new();
        let mut loaded = 0usize;

        for (row_key, bytes) in rows {
            let entry: CacheEntry = match serde_json::from_slice(&bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    error!(key = %row_key, error = %e, "Corrupt cache row");
                    stale.push(row_key);
                    continue;
                }
            };
            if entry.is_expired(now) || self.strategies.get(&entry.strategy_name).is_none() {
                stale.push(row_key);
                continue;
            }
            self.insert_index(entry);
            loaded += 1;
        }

        if !stale.is_empty() {
            if let Err(e) = self.store.delete_batch(&stale).await {
                warn!(error = %e, count = stale.len(), "Failed to purge stale cache rows");
                metrics::record_storage_error("cache_purge");
            }
        }

        info!(loaded, purged = stale.len(), "Cache hydrated");
        self.ensure_capacity("", 0).await;
        self.publish_usage();
        loaded
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            bytes: self.total_bytes.load(Ordering::Acquire),
            budget_bytes: self.budget_bytes,
            device_class: self.device_class,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Receive a notice for every `invalidate` call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.invalidations.subscribe()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn insert_entry(&self, entry: CacheEntry) {
        let row = if self.persist {
            match serde_json::to_vec(&entry) {
                Ok(bytes) => Some((format!("{}{}", PERSIST_PREFIX, entry.key), bytes)),
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Cache row not serializable, keeping in memory only");
                    None
                }
            }
        } else {
            None
        };

        self.insert_index(entry);
        self.publish_usage();

        if let Some((row_key, bytes)) = row {
            if let Err(e) = self.store.put(&row_key, &bytes).await {
                warn!(key = %row_key, error = %e, "Cache write-through failed");
                metrics::record_storage_error("cache_put");
            }
        }
    }

    fn insert_index(&self, entry: CacheEntry) {
        let new_size = entry.size_bytes;
        let replaced = self
            .entries
            .insert(entry.key.clone(), entry)
            .map_or(0, |old| old.size_bytes);
        self.adjust_bytes(new_size, replaced);
    }

    /// Remove from the index and fix size accounting. Persistence is the caller's job.
    fn detach(&self, key: &str) -> Option<CacheEntry> {
        let (_, removed) = self.entries.remove(key)?;
        self.adjust_bytes(0, removed.size_bytes);
        self.publish_usage();
        Some(removed)
    }

    /// Single atomic read-modify-write, so concurrent writers never lose a delta.
    fn adjust_bytes(&self, added: usize, removed: usize) {
        let _ = self
            .total_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |total| {
                Some(total.saturating_add(added).saturating_sub(removed))
            });
    }

    async fn remove_many(&self, keys: &[String]) -> Vec<String> {
        let removed: Vec<String> = keys
            .iter()
            .filter_map(|k| self.detach(k))
            .map(|e| e.key)
            .collect();

        if self.persist && !removed.is_empty() {
            let rows: Vec<String> = removed.iter().map(|k| format!("{}{}", PERSIST_PREFIX, k)).collect();
            if let Err(e) = self.store.delete_batch(&rows).await {
                warn!(error = %e, count = rows.len(), "Cache batch delete failed");
                metrics::record_storage_error("cache_delete");
            }
        }
        removed
    }

    async fn unpersist(&self, key: &str) {
        if !self.persist {
            return;
        }
        if let Err(e) = self.store.delete(&format!("{}{}", PERSIST_PREFIX, key)).await {
            warn!(key, error = %e, "Cache row delete failed");
            metrics::record_storage_error("cache_delete");
        }
    }

    /// Evict until the incoming write fits under the target.
    async fn ensure_capacity(&self, incoming_key: &str, incoming_bytes: usize) {
        let threshold = (self.budget_bytes as f64 * self.eviction_threshold) as usize;
        let target = (self.budget_bytes as f64 * self.eviction_target) as usize;

        let replaced = self.entries.get(incoming_key).map_or(0, |e| e.size_bytes);
        let projected = |store: &Self| {
            store
                .total_bytes
                .load(Ordering::Acquire)
                .saturating_sub(replaced)
                .saturating_add(incoming_bytes)
        };

        if projected(self) <= threshold {
            return;
        }

        let mut evicted = 0usize;
        let mut evicted_bytes = 0usize;

        while projected(self) > target {
            let now = now_millis();
            let candidates: Vec<EvictionCandidate> = self
                .entries
                .iter()
                .filter(|e| e.key() != incoming_key)
                .map(|e| EvictionCandidate {
                    key: e.key().clone(),
                    size_bytes: e.size_bytes,
                    last_accessed_at: e.last_accessed_at,
                    priority: self
                        .strategies
                        .get(&e.strategy_name)
                        .map_or(crate::strategy::StrategyPriority::Low, |s| s.priority),
                })
                .collect();

            let victims = self.policy.select_victims(&candidates, now);
            if victims.is_empty() {
                warn!(
                    bytes = self.total_bytes.load(Ordering::Acquire),
                    budget = self.budget_bytes,
                    "Cache over budget but every remaining entry is protected"
                );
                break;
            }

            let bytes_before = self.total_bytes.load(Ordering::Acquire);
            let removed = self.remove_many(&victims).await;
            evicted += removed.len();
            evicted_bytes += bytes_before.saturating_sub(self.total_bytes.load(Ordering::Acquire));

            tokio::task::yield_now().await;
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            metrics::record_eviction(evicted, evicted_bytes);
            info!(evicted, evicted_bytes, budget = self.budget_bytes, "Evicted entries under storage pressure");
        }
    }

    /// Keep a strategy at or under its `max_entries` by dropping its LRU entry.
    async fn enforce_entry_cap(&self, incoming_key: &str, strategy_name: &str, max_entries: usize) {
        if max_entries == 0 || self.entries.contains_key(incoming_key) {
            return;
        }

        let mut members: Vec<(String, i64)> = self
            .entries
            .iter()
            .filter(|e| e.strategy_name == strategy_name)
            .map(|e| (e.key().clone(), e.last_accessed_at))
            .collect();

        if members.len() < max_entries {
            return;
        }

        members.sort_by_key(|(_, last)| *last);
        let excess = members.len() + 1 - max_entries;
        let victims: Vec<String> = members.into_iter().take(excess).map(|(k, _)| k).collect();

        let removed = self.remove_many(&victims).await;
        self.evictions.fetch_add(removed.len() as u64, Ordering::Relaxed);
        debug!(strategy = strategy_name, removed = removed.len(), "Strategy entry cap reached");
    }

    fn publish_usage(&self) {
        metrics::set_cache_usage(self.entries.len(), self.total_bytes.load(Ordering::Acquire));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use crate::strategy::{CacheStrategy, StrategyPriority};
    use serde_json::json;
    use std::time::Duration;

    fn config_with(strategies: Vec<CacheStrategy>) -> EngineConfig {
        EngineConfig {
            strategies,
            ..Default::default()
        }
    }

    fn store() -> (CacheStore, Arc<MemoryKvStore>) {
        let kv = Arc::new(MemoryKvStore::new());
        (CacheStore::new(&EngineConfig::default(), kv.clone()), kv)
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let (cache, _) = store();
        cache.set("player:a@x.com", &json!({"overall": 80}), "players").await.unwrap();

        assert_eq!(cache.get("player:a@x.com").await, Some(json!({"overall": 80})));
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_miss_counts() {
        let (cache, _) = store();
        assert!(cache.get("nope").await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_size_accounting_under_concurrent_writers() {
        let cache = Arc::new(CacheStore::new(&EngineConfig::default(), Arc::new(MemoryKvStore::new())));

        let mut tasks = Vec::new();
        for worker in 0..8usize {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..500usize {
                    let key = format!("api:{}", i % 10);
                    let value = json!({ "worker": worker, "payload": "x".repeat((worker + i) % 37) });
                    cache.set(&key, &value, "api").await.unwrap();
                    if i % 7 == 0 {
                        cache.delete(&format!("api:{}", (i + worker) % 10)).await;
                    }
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let live: usize = (0..10)
            .filter_map(|k| cache.snapshot(&format!("api:{}", k)))
            .map(|e| e.size_bytes)
            .sum();
        assert_eq!(cache.stats().bytes, live);
    }

    #[tokio::test]
    async fn test_unknown_strategy_fails() {
        let (cache, kv) = store();
        let result = cache.set("x", &json!(1), "no-such-strategy").await;

        assert!(matches!(result, Err(CacheError::UnknownStrategy(name)) if name == "no-such-strategy"));
        assert!(cache.is_empty());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entry_is_absent_and_removed() {
        let kv = Arc::new(MemoryKvStore::new());
        let cache = CacheStore::new(
            &config_with(vec![CacheStrategy::new("blink", 1, StrategyPriority::Low)]),
            kv.clone(),
        );

        cache.set("k", &json!("v"), "blink").await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
        assert!(kv.get("cache:k").await.unwrap().is_none());

        // Same key is writable again
        cache.set("k", &json!("v2"), "blink").await.unwrap();
        assert_eq!(cache.get("k").await, Some(json!("v2")));
    }

    #[tokio::test]
    async fn test_idempotent_set_does_not_double_count() {
        let (cache, _) = store();
        let value = json!({"overall": 80, "name": "Ana"});

        cache.set("player:1", &value, "players").await.unwrap();
        let once = cache.stats().bytes;
        cache.set("player:1", &value, "players").await.unwrap();

        assert_eq!(cache.stats().bytes, once);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("player:1").await, Some(value));
    }

    #[tokio::test]
    async fn test_delete_removes_row_and_bytes() {
        let (cache, kv) = store();
        cache.set("player:1", &json!({"overall": 70}), "players").await.unwrap();

        assert!(cache.delete("player:1").await);
        assert!(!cache.delete("player:1").await);
        assert_eq!(cache.stats().bytes, 0);
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_by_event_and_pattern() {
        let (cache, _) = store();
        cache.set("stats:season", &json!({"goals": 1}), "stats").await.unwrap();
        cache.set("stats:player:7", &json!({"goals": 2}), "stats").await.unwrap();
        cache.set("player:7", &json!({"overall": 70}), "players").await.unwrap();

        let mut rx = cache.subscribe();
        let removed = cache.invalidate("match-completed", Some("player")).await;

        assert_eq!(removed, 1);
        assert!(cache.peek("stats:player:7").is_none());
        assert!(cache.peek("stats:season").is_some());
        assert!(cache.peek("player:7").is_some());

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.event, "match-completed");
        assert_eq!(notice.keys_removed, vec!["stats:player:7".to_string()]);
    }

    #[tokio::test]
    async fn test_invalidate_unrelated_event_is_noop() {
        let (cache, _) = store();
        cache.set("player:7", &json!({"overall": 70}), "players").await.unwrap();
        assert_eq!(cache.invalidate("voting-closed", None).await, 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_expired() {
        let cache = CacheStore::new(
            &config_with(vec![
                CacheStrategy::new("blink", 1, StrategyPriority::Low),
                CacheStrategy::new("long", 3600, StrategyPriority::Low),
            ]),
            Arc::new(MemoryKvStore::new()),
        );
        cache.set("a", &json!(1), "blink").await.unwrap();
        cache.set("b", &json!(2), "blink").await.unwrap();
        cache.set("c", &json!(3), "long").await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(cache.sweep_expired().await, 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_compressed_strategy_roundtrip() {
        let (cache, _) = store();
        let table = json!({
            "rows": (0..100).map(|i| json!({"player": "p", "goals": i % 4})).collect::<Vec<_>>()
        });

        cache.set("stats:table", &table, "stats").await.unwrap();
        assert!(cache.snapshot("stats:table").unwrap().payload.is_compressed());
        assert_eq!(cache.get("stats:table").await, Some(table));
    }

    #[tokio::test]
    async fn test_pressure_eviction_keeps_recent_critical() {
        let config = EngineConfig {
            strategies: vec![
                CacheStrategy::new("votes", 3600, StrategyPriority::Critical),
                CacheStrategy::new("api", 3600, StrategyPriority::Low),
            ],
            storage_budget_bytes: Some(2_000),
            eviction_batch_size: 2,
            ..Default::default()
        };
        let cache = CacheStore::new(&config, Arc::new(MemoryKvStore::new()));

        cache.set("vote:1", &json!({"choice": "A"}), "votes").await.unwrap();
        for i in 0..30 {
            cache.set(&format!("api:{}", i), &json!({"blob": "x".repeat(40)}), "api").await.unwrap();
        }

        let stats = cache.stats();
        assert!(stats.bytes <= 2_000, "usage {} over budget", stats.bytes);
        assert!(stats.evictions > 0);
        assert!(cache.peek("vote:1").is_some());
        assert!(cache.peek("api:29").is_some());
    }

    #[tokio::test]
    async fn test_entry_cap_drops_lru_of_same_strategy() {
        let cache = CacheStore::new(
            &config_with(vec![
                CacheStrategy::new("tiny", 3600, StrategyPriority::Low).with_max_entries(2),
                CacheStrategy::new("other", 3600, StrategyPriority::Low),
            ]),
            Arc::new(MemoryKvStore::new()),
        );

        cache.set("o", &json!(0), "other").await.unwrap();
        cache.set("t1", &json!(1), "tiny").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("t2", &json!(2), "tiny").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.get("t1").await;
        cache.set("t3", &json!(3), "tiny").await.unwrap();

        assert!(cache.peek("t1").is_some());
        assert!(cache.peek("t2").is_none());
        assert!(cache.peek("t3").is_some());
        assert!(cache.peek("o").is_some());
    }

    #[tokio::test]
    async fn test_snapshot_restore_is_exact() {
        let (cache, _) = store();
        cache.set("player:1", &json!({"overall": 80}), "players").await.unwrap();
        let before = cache.snapshot("player:1").unwrap();

        cache.set("player:1", &json!({"overall": 99}), "players").await.unwrap();
        cache.restore(before.clone()).await;

        assert_eq!(cache.snapshot("player:1").unwrap(), before);
        assert_eq!(cache.stats().bytes, before.size_bytes);
    }

    #[tokio::test]
    async fn test_load_rehydrates_and_purges() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let cache = CacheStore::new(&EngineConfig::default(), kv.clone());
            cache.set("player:1", &json!({"overall": 80}), "players").await.unwrap();
            cache.set("vote:1", &json!({"choice": "B"}), "votes").await.unwrap();
        }
        kv.put("cache:garbage", b"not json").await.unwrap();

        let cache = CacheStore::new(&EngineConfig::default(), kv.clone());
        assert_eq!(cache.load().await, 2);
        assert_eq!(cache.get("player:1").await, Some(json!({"overall": 80})));
        assert!(kv.get("cache:garbage").await.unwrap().is_none());
        assert!(cache.stats().bytes > 0);
    }

    #[tokio::test]
    async fn test_no_persistence_when_disabled() {
        let kv = Arc::new(MemoryKvStore::new());
        let config = EngineConfig { persist_cache: false, ..Default::default() };
        let cache = CacheStore::new(&config, kv.clone());

        cache.set("player:1", &json!({"overall": 80}), "players").await.unwrap();
        assert!(kv.is_empty());
        assert_eq!(cache.load().await, 0);
    }

    #[test]
    fn test_hit_ratio() {
        let stats = CacheStats {
            entries: 0,
            bytes: 0,
            budget_bytes: 100,
            device_class: DeviceClass::Desktop,
            hits: 3,
            misses: 1,
            evictions: 0,
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}
