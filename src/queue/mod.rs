// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable priority queue of pending mutations.
//!
//! Actions are kept sorted by priority (`HIGH` before `MEDIUM` before `LOW`)
//! and FIFO by creation within a band. The full list is persisted under
//! `queue:pending` after every mutation, so a restart resumes exactly where
//! the previous process stopped.
//!
//! # Drain
//!
//! [`ActionQueue::drain`] is single-flight and a no-op while offline. A pass
//! snapshots the due actions and attempts each one exactly once, in service
//! order, pausing briefly between deliveries:
//!
//! ```text
//! 2xx            → removed (delivered)
//! 5xx / network  → retry_count += 1, dropped once the budget is spent
//! 4xx (not 409)  → dropped (rejected)
//! 409            → conflict policy:
//!                    OVERWRITE   resend with X-Force-Update
//!                    MERGE       kind-specific merge, resend with X-Merge-Update
//!                    USER_CHOICE conflict recorded, action dropped, listeners notified
//! ```
//!
//! Transiently failed actions also get a backoff (`next_attempt_at`); a pass
//! skips actions that are not yet due without counting an attempt. The list
//! is persisted after each attempt, so a pass cut short by a crash or an
//! aborted task neither replays delivered actions nor forgets spent retries.

pub mod action;
pub mod merge;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::conflict::{ConflictLog, ConflictSource};
use crate::events::{DropReason, EventBus, SyncEvent};
use crate::metrics;
use crate::network::NetworkMonitor;
use crate::resilience::retry::RetryConfig;
use crate::storage::KvStore;
use crate::time::now_millis;
use crate::transport::{
    dispatch, Method, Request, Response, Transport, HEADER_ACTION_ID, HEADER_FORCE_UPDATE,
    HEADER_MERGE_UPDATE, HEADER_ORIGINAL_TIMESTAMP, HEADER_SYNC_PRIORITY,
};

use action::{ActionKind, ActionOutcome, ActionPriority, ConflictPolicy, QueuedAction};
use merge::{merge_for_conflict, MergeDecision};

const PERSIST_KEY: &str = "queue:pending";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("action {0} not found")]
    NotFound(String),
}

/// Parameters for a new action. Defaults: `POST`, `MEDIUM`, `OVERWRITE`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub payload: Value,
    pub endpoint: String,
    pub method: Method,
    pub priority: ActionPriority,
    pub conflict_policy: ConflictPolicy,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, payload: Value, endpoint: impl Into<String>) -> Self {
        Self {
            kind,
            payload,
            endpoint: endpoint.into(),
            method: Method::Post,
            priority: ActionPriority::Medium,
            conflict_policy: ConflictPolicy::Overwrite,
        }
    }

    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: ActionPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

/// Queue counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub processed: u64,
    pub failed: u64,
    pub conflicts: u64,
    pub draining: bool,
}

/// What one drain pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub retried: usize,
    pub dropped: usize,
    pub conflicts: usize,
    /// Actions left alone because their backoff has not elapsed
    pub deferred: usize,
}

/// Classified result of one delivery attempt.
#[derive(Debug)]
enum DeliveryOutcome {
    Delivered(Value),
    Superseded(Value),
    Transient(String),
    Rejected(u16),
    Conflict { server: Value },
}

/// Pacing knobs taken from [`EngineConfig`].
#[derive(Debug, Clone)]
struct QueueTiming {
    action_delay: Duration,
    request_timeout: Duration,
    backoff: RetryConfig,
}

pub struct ActionQueue {
    actions: Mutex<Vec<QueuedAction>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<ActionOutcome>>>,
    store: Arc<dyn KvStore>,
    transport: Arc<dyn Transport>,
    network: NetworkMonitor,
    conflicts: Arc<ConflictLog>,
    events: EventBus,
    timing: QueueTiming,
    draining: AtomicBool,
    wake: Notify,
    /// Serializes snapshot+write so the persisted list is never older than memory
    persist_lock: tokio::sync::Mutex<()>,
    processed: AtomicU64,
    failed: AtomicU64,
    conflict_count: AtomicU64,
}

impl ActionQueue {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn KvStore>,
        transport: Arc<dyn Transport>,
        network: NetworkMonitor,
        conflicts: Arc<ConflictLog>,
        events: EventBus,
    ) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            waiters: Mutex::new(HashMap::new()),
            store,
            transport,
            network,
            conflicts,
            events,
            timing: QueueTiming {
                action_delay: Duration::from_millis(config.drain_action_delay_ms),
                request_timeout: Duration::from_millis(config.sync_base_timeout_ms),
                backoff: RetryConfig {
                    initial_delay: Duration::from_millis(config.retry_backoff_initial_ms),
                    max_delay: Duration::from_millis(config.retry_backoff_max_ms),
                    factor: 2.0,
                    max_retries: None,
                    attempt_timeout: None,
                },
            },
            draining: AtomicBool::new(false),
            wake: Notify::new(),
            persist_lock: tokio::sync::Mutex::new(()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            conflict_count: AtomicU64::new(0),
        }
    }

    /// Add an action, keeping priority/FIFO order. Returns its id.
    #[tracing::instrument(skip(self, request), fields(kind = %request.kind, priority = %request.priority))]
    pub async fn enqueue(&self, request: ActionRequest) -> String {
        let action = QueuedAction::new(
            request.kind,
            request.payload,
            request.endpoint,
            request.method,
            request.priority,
            request.conflict_policy,
            now_millis(),
        );
        let id = action.id.clone();
        self.insert(action).await;
        id
    }

    /// Like [`enqueue`](Self::enqueue), plus a receiver resolved with the
    /// action's final outcome.
    pub async fn enqueue_tracked(&self, request: ActionRequest) -> (String, oneshot::Receiver<ActionOutcome>) {
        let action = QueuedAction::new(
            request.kind,
            request.payload,
            request.endpoint,
            request.method,
            request.priority,
            request.conflict_policy,
            now_millis(),
        );
        let id = action.id.clone();
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(id.clone(), tx);
        self.insert(action).await;
        (id, rx)
    }

    /// Remove a pending action. Its tracker (if any) resolves as cancelled.
    pub async fn cancel(&self, id: &str) -> Result<QueuedAction, QueueError> {
        let removed = {
            let mut actions = self.actions.lock();
            let pos = actions
                .iter()
                .position(|a| a.id == id)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            actions.remove(pos)
        };

        self.persist().await;
        self.finish(&removed, ActionOutcome::Dropped(DropReason::Cancelled));
        info!(action_id = id, "Action cancelled");
        Ok(removed)
    }

    /// Deliver every due action once.
    ///
    /// Returns an empty report when offline or when another drain is running.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();

        if !self.network.is_online() {
            debug!("Offline, drain skipped");
            return report;
        }
        if self.draining.swap(true, Ordering::AcqRel) {
            debug!("Drain already in flight");
            return report;
        }
        let _guard = DrainGuard(&self.draining);

        let now = now_millis();
        let batch: Vec<QueuedAction> = {
            let actions = self.actions.lock();
            report.deferred = actions.iter().filter(|a| !a.is_due(now)).count();
            actions.iter().filter(|a| a.is_due(now)).cloned().collect()
        };

        if batch.is_empty() {
            return report;
        }
        info!(due = batch.len(), deferred = report.deferred, "Draining action queue");

        for (i, action) in batch.iter().enumerate() {
            if !self.network.is_online() {
                info!(remaining = batch.len() - i, "Went offline mid-drain, stopping");
                break;
            }
            if i > 0 && !self.timing.action_delay.is_zero() {
                tokio::time::sleep(self.timing.action_delay).await;
            }
            if !self.contains(&action.id) {
                // Cancelled while the pass was running
                continue;
            }

            report.attempted += 1;
            let delivery = self.deliver(action).await;
            self.apply(action, delivery, &mut report).await;
            // Every removal or retry bump reaches disk before the next send
            self.persist().await;
        }

        info!(
            attempted = report.attempted,
            delivered = report.delivered,
            retried = report.retried,
            dropped = report.dropped,
            conflicts = report.conflicts,
            "Drain pass complete"
        );
        report
    }

    /// Restore the persisted list, re-sorting to restore the ordering
    /// invariant. Actions already in memory are kept. Returns the count loaded.
    pub async fn load(&self) -> usize {
        let bytes = match self.store.get(PERSIST_KEY).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "Queue hydration failed");
                metrics::record_storage_error("queue_load");
                return 0;
            }
        };

        let restored: Vec<QueuedAction> = match serde_json::from_slice(&bytes) {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(error = %e, "Persisted queue is corrupt, starting empty");
                return 0;
            }
        };

        let loaded = {
            let mut actions = self.actions.lock();
            let mut loaded = 0;
            for action in restored {
                if !actions.iter().any(|a| a.id == action.id) {
                    actions.push(action);
                    loaded += 1;
                }
            }
            actions.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));
            metrics::set_queue_depth(actions.len());
            loaded
        };

        info!(loaded, "Action queue hydrated");
        loaded
    }

    /// Pending actions in service order.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedAction> {
        self.actions.lock().clone()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<QueuedAction> {
        self.actions.lock().iter().find(|a| a.id == id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.lock().is_empty()
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.len(),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            conflicts: self.conflict_count.load(Ordering::Relaxed),
            draining: self.is_draining(),
        }
    }

    /// Background drain loop: periodic tick, enqueue wake-ups and online
    /// transitions, until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut network = self.network.subscribe();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.network.is_online() && !self.is_empty() {
                        self.drain().await;
                    }
                }
                _ = self.wake.notified() => {
                    self.drain().await;
                }
                changed = network.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = network.borrow_and_update().online;
                    if online && !self.is_empty() {
                        info!("Back online, draining queued actions");
                        self.drain().await;
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!("Queue worker stopped");
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn insert(&self, action: QueuedAction) {
        debug!(action_id = %action.id, endpoint = %action.target_endpoint, "Enqueued action");
        {
            let mut actions = self.actions.lock();
            let pos = actions
                .iter()
                .position(|a| a.priority > action.priority)
                .unwrap_or(actions.len());
            actions.insert(pos, action);
        }
        self.persist().await;

        if self.network.is_online() && !self.is_draining() {
            self.wake.notify_one();
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.actions.lock().iter().any(|a| a.id == id)
    }

    fn build_request(&self, action: &QueuedAction, body: Value) -> Request {
        Request::new(action.method, action.target_endpoint.clone())
            .with_body(body)
            .with_header(HEADER_ACTION_ID, action.id.clone())
            .with_header(HEADER_ORIGINAL_TIMESTAMP, action.created_at.to_string())
            .with_header(HEADER_SYNC_PRIORITY, action.priority.to_string())
            .with_timeout(self.timing.request_timeout)
    }

    async fn send(&self, request: Request) -> Result<Response, String> {
        dispatch(self.transport.as_ref(), request).await.map_err(|e| e.to_string())
    }

    async fn deliver(&self, action: &QueuedAction) -> DeliveryOutcome {
        let request = self.build_request(action, action.payload.clone());
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::Transient(e),
        };

        if !response.is_conflict() {
            return classify(response);
        }

        match action.conflict_policy {
            ConflictPolicy::Overwrite => {
                debug!(action_id = %action.id, "409, resending with force-update");
                let retry = self
                    .build_request(action, action.payload.clone())
                    .with_header(HEADER_FORCE_UPDATE, "true");
                self.resend(retry).await
            }
            ConflictPolicy::Merge => match merge_for_conflict(action.kind, &action.payload, &response.body) {
                MergeDecision::Superseded(server) => {
                    debug!(action_id = %action.id, "Server holds a newer value");
                    DeliveryOutcome::Superseded(server)
                }
                MergeDecision::Resend(merged) => {
                    debug!(action_id = %action.id, "409, resending merged payload");
                    let retry = self
                        .build_request(action, merged)
                        .with_header(HEADER_MERGE_UPDATE, "true");
                    self.resend(retry).await
                }
            },
            ConflictPolicy::UserChoice => DeliveryOutcome::Conflict { server: response.body },
        }
    }

    /// Second send after a 409. Another 409 counts as a transient failure.
    async fn resend(&self, request: Request) -> DeliveryOutcome {
        match self.send(request).await {
            Ok(response) if response.is_conflict() => DeliveryOutcome::Transient("conflict persisted after resend".into()),
            Ok(response) => classify(response),
            Err(e) => DeliveryOutcome::Transient(e),
        }
    }

    async fn apply(&self, action: &QueuedAction, delivery: DeliveryOutcome, report: &mut DrainReport) {
        let kind = action.kind.as_str();
        match delivery {
            DeliveryOutcome::Delivered(body) => {
                report.delivered += 1;
                metrics::record_delivery(kind, "delivered");
                if self.take(&action.id).is_some() {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.events.emit(SyncEvent::ActionDelivered { action_id: action.id.clone() });
                    self.finish(action, ActionOutcome::Delivered(body));
                }
            }
            DeliveryOutcome::Superseded(server) => {
                report.delivered += 1;
                metrics::record_delivery(kind, "superseded");
                if self.take(&action.id).is_some() {
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.events.emit(SyncEvent::ActionDelivered { action_id: action.id.clone() });
                    self.finish(action, ActionOutcome::Superseded(server));
                }
            }
            DeliveryOutcome::Transient(reason) => {
                metrics::record_delivery(kind, "transient");
                let exhausted = {
                    let mut actions = self.actions.lock();
                    let Some(queued) = actions.iter_mut().find(|a| a.id == action.id) else {
                        return;
                    };
                    queued.retry_count += 1;
                    if queued.retries_exhausted() {
                        true
                    } else {
                        let backoff = self.timing.backoff.delay_for(queued.retry_count);
                        queued.next_attempt_at = now_millis().saturating_add(backoff.as_millis() as i64);
                        false
                    }
                };

                if exhausted {
                    warn!(action_id = %action.id, reason = %reason, "Retry budget spent, dropping action");
                    report.dropped += 1;
                    self.drop_action(action, DropReason::RetriesExhausted);
                } else {
                    debug!(action_id = %action.id, reason = %reason, "Transient failure, will retry");
                    report.retried += 1;
                }
            }
            DeliveryOutcome::Rejected(status) => {
                warn!(action_id = %action.id, status, "Remote rejected action, dropping");
                metrics::record_delivery(kind, "rejected");
                report.dropped += 1;
                self.drop_action(action, DropReason::Rejected { status });
            }
            DeliveryOutcome::Conflict { server } => {
                metrics::record_delivery(kind, "conflict");
                if self.take(&action.id).is_none() {
                    return;
                }
                let conflict = self
                    .conflicts
                    .record(ConflictSource::Delivery, kind, &action.target_endpoint, action.payload.clone(), server)
                    .await;
                report.conflicts += 1;
                self.conflict_count.fetch_add(1, Ordering::Relaxed);
                self.events.emit(SyncEvent::ConflictDetected {
                    conflict_id: conflict.id.clone(),
                    resource_type: conflict.resource_type.clone(),
                    key: conflict.key.clone(),
                });
                let reason = DropReason::ConflictSurfaced { conflict_id: conflict.id };
                self.events.emit(SyncEvent::ActionDropped {
                    action_id: action.id.clone(),
                    reason: reason.clone(),
                });
                metrics::record_action_dropped(kind, "conflict");
                self.finish(action, ActionOutcome::Dropped(reason));
            }
        }
    }

    fn drop_action(&self, action: &QueuedAction, reason: DropReason) {
        if self.take(&action.id).is_none() {
            return;
        }
        self.failed.fetch_add(1, Ordering::Relaxed);
        let label = match &reason {
            DropReason::RetriesExhausted => "retries_exhausted",
            DropReason::Rejected { .. } => "rejected",
            DropReason::ConflictSurfaced { .. } => "conflict",
            DropReason::Cancelled => "cancelled",
        };
        metrics::record_action_dropped(action.kind.as_str(), label);
        self.events.emit(SyncEvent::ActionDropped {
            action_id: action.id.clone(),
            reason: reason.clone(),
        });
        self.finish(action, ActionOutcome::Dropped(reason));
    }

    fn take(&self, id: &str) -> Option<QueuedAction> {
        let mut actions = self.actions.lock();
        let pos = actions.iter().position(|a| a.id == id)?;
        Some(actions.remove(pos))
    }

    fn finish(&self, action: &QueuedAction, outcome: ActionOutcome) {
        if let Some(tx) = self.waiters.lock().remove(&action.id) {
            let _ = tx.send(outcome);
        }
    }

    pub(crate) async fn persist(&self) {
        let _write = self.persist_lock.lock().await;
        let bytes = {
            let actions = self.actions.lock();
            metrics::set_queue_depth(actions.len());
            match serde_json::to_vec(&*actions) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "Queue not serializable, skipping persist");
                    return;
                }
            }
        };
        if let Err(e) = self.store.put(PERSIST_KEY, &bytes).await {
            warn!(error = %e, "Queue persistence failed, keeping in memory");
            metrics::record_storage_error("queue_put");
        }
    }
}

fn classify(response: Response) -> DeliveryOutcome {
    if response.is_success() {
        DeliveryOutcome::Delivered(response.body)
    } else if response.is_client_error() {
        DeliveryOutcome::Rejected(response.status)
    } else {
        DeliveryOutcome::Transient(format!("status {}", response.status))
    }
}

/// Resets the single-flight flag when a drain pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
