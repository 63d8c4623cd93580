// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for offline-sync.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for installing an exporter.
//!
//! # Metric Naming Convention
//! - `offline_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//! - `_bytes` suffix for sizes
//!
//! # Labels
//! - `strategy` / `resource`: cache strategy or sync resource family
//! - `kind`: queued action kind
//! - `status` / `outcome`: result of the operation

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a cache lookup (`hit`, `miss`, `expired`)
pub fn record_cache_lookup(strategy: &str, status: &str) {
    counter!(
        "offline_sync_cache_lookups_total",
        "strategy" => strategy.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a cache write (`success`, `rejected`, `error`)
pub fn record_cache_write(strategy: &str, status: &str) {
    counter!(
        "offline_sync_cache_writes_total",
        "strategy" => strategy.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record eviction event
pub fn record_eviction(count: usize, bytes: usize) {
    counter!("offline_sync_evictions_total").increment(count as u64);
    counter!("offline_sync_evicted_bytes_total").increment(bytes as u64);
}

/// Record expired entries removed by a sweep
pub fn record_sweep(removed: usize) {
    counter!("offline_sync_swept_entries_total").increment(removed as u64);
}

/// Record entries removed by event-driven invalidation
pub fn record_invalidation(event: &str, removed: usize) {
    counter!(
        "offline_sync_invalidated_entries_total",
        "event" => event.to_string()
    )
    .increment(removed as u64);
}

/// Set current cache size
pub fn set_cache_usage(entries: usize, bytes: usize) {
    gauge!("offline_sync_cache_entries").set(entries as f64);
    gauge!("offline_sync_cache_bytes").set(bytes as f64);
}

/// Set pending action count
pub fn set_queue_depth(depth: usize) {
    gauge!("offline_sync_queue_depth").set(depth as f64);
}

/// Record a delivery attempt outcome
pub fn record_delivery(kind: &str, outcome: &str) {
    counter!(
        "offline_sync_deliveries_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a dropped action
pub fn record_action_dropped(kind: &str, reason: &str) {
    counter!(
        "offline_sync_actions_dropped_total",
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// Record a resource sync result (`success`, `fresh`, `conflict`, `error`)
pub fn record_sync(resource: &str, status: &str) {
    counter!(
        "offline_sync_resource_syncs_total",
        "resource" => resource.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record resource fetch latency
pub fn record_sync_latency(resource: &str, duration: Duration) {
    histogram!(
        "offline_sync_fetch_seconds",
        "resource" => resource.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a detected conflict
pub fn record_conflict(resource: &str) {
    counter!(
        "offline_sync_conflicts_total",
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Record an optimistic update settlement (`confirmed`, `rolled_back`)
pub fn record_optimistic(operation: &str, outcome: &str) {
    counter!(
        "offline_sync_optimistic_updates_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a persistence failure that was degraded
pub fn record_storage_error(operation: &str) {
    counter!(
        "offline_sync_storage_errors_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}
