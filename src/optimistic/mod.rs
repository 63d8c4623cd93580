// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Optimistic updates with automatic rollback.
//!
//! ```text
//! PENDING ──enqueue──► SYNCING ──delivered──► SUCCESS   (cache reconciled)
//!                         │
//!                         ├──dropped / conflict──► FAILED ──► ROLLED_BACK
//!                         └──deadline──────────────────────► ROLLED_BACK
//! ```
//!
//! [`OptimisticCoordinator::apply`] writes the merged value to the cache at
//! once, captures the previous cache row, and enqueues the mutation with a
//! completion tracker. A settle task then waits on whichever comes first:
//! the queue reporting the action's fate, or the rollback deadline. The
//! deadline is the hard bound on divergence; when it fires the queued action
//! is cancelled so stale data is never replayed later.
//!
//! Rollback restores the captured row exactly, or deletes the key if nothing
//! was cached before.

pub mod update;

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheError, CacheStore};
use crate::events::{DropReason, EventBus, RollbackReason, SettleOutcome, SyncEvent};
use crate::metrics;
use crate::queue::action::ActionOutcome;
use crate::queue::{ActionQueue, ActionRequest};
use crate::queue::merge::shallow_merge;
use crate::time::now_millis;

use update::{OperationType, OptimisticUpdate, UpdateStatus};

#[derive(Debug, thiserror::Error)]
pub enum OptimisticError {
    #[error("speculative write failed: {0}")]
    Cache(#[from] CacheError),
}

/// Returned by [`OptimisticCoordinator::apply`].
#[derive(Debug)]
pub struct UpdateHandle {
    pub update_id: String,
    pub action_id: String,
    pub cache_key: String,
    /// Resolves once the update is confirmed or rolled back
    pub settled: oneshot::Receiver<SettleOutcome>,
}

pub struct OptimisticCoordinator {
    updates: DashMap<String, OptimisticUpdate>,
    notifiers: DashMap<String, oneshot::Sender<SettleOutcome>>,
    cache: Arc<CacheStore>,
    queue: Arc<ActionQueue>,
    events: EventBus,
}

impl OptimisticCoordinator {
    pub fn new(cache: Arc<CacheStore>, queue: Arc<ActionQueue>, events: EventBus) -> Self {
        Self {
            updates: DashMap::new(),
            notifiers: DashMap::new(),
            cache,
            queue,
            events,
        }
    }

    /// Apply `data` to `{entity_type}:{entity_id}` speculatively and queue
    /// the mutation.
    ///
    /// Fails only if the speculative cache write fails, in which case nothing
    /// is queued.
    #[tracing::instrument(skip(self, data), fields(%operation))]
    pub async fn apply(
        self: &Arc<Self>,
        operation: OperationType,
        entity_type: &str,
        entity_id: &str,
        data: Value,
    ) -> Result<UpdateHandle, OptimisticError> {
        let profile = operation.profile();
        let cache_key = format!("{}:{}", entity_type, entity_id);

        let rollback_data = self.cache.snapshot(&cache_key);
        let original_data = self.cache.peek(&cache_key).map(|c| c.value);
        let merged = profile.merge.apply(original_data.as_ref(), &data);

        self.cache.set(&cache_key, &merged, profile.strategy).await?;

        let update_id = Uuid::now_v7().to_string();
        self.updates.insert(
            update_id.clone(),
            OptimisticUpdate {
                id: update_id.clone(),
                operation_type: operation,
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
                cache_key: cache_key.clone(),
                optimistic_data: data.clone(),
                original_data,
                rollback_data,
                status: UpdateStatus::Pending,
                retry_count: 0,
                max_retries: profile.max_retries(),
                action_id: None,
                created_at: now_millis(),
            },
        );

        let request = ActionRequest::new(profile.action_kind, data, profile.endpoint(entity_id))
            .method(profile.method)
            .priority(profile.priority)
            .conflict_policy(profile.conflict_policy);
        let (action_id, completion) = self.queue.enqueue_tracked(request).await;

        if let Some(mut record) = self.updates.get_mut(&update_id) {
            record.action_id = Some(action_id.clone());
            record.status = UpdateStatus::Syncing;
        }

        let (tx, settled) = oneshot::channel();
        self.notifiers.insert(update_id.clone(), tx);

        let this = Arc::clone(self);
        let id = update_id.clone();
        let deadline = profile.rollback_timeout;
        tokio::spawn(async move {
            tokio::select! {
                outcome = completion => this.on_completion(&id, outcome.ok()).await,
                _ = tokio::time::sleep(deadline) => this.on_deadline(&id).await,
            }
        });

        debug!(update_id = %update_id, action_id = %action_id, cache_key = %cache_key, "Optimistic update applied");
        Ok(UpdateHandle {
            update_id,
            action_id,
            cache_key,
            settled,
        })
    }

    /// Updates still awaiting confirmation, with delivery attempts so far.
    #[must_use]
    pub fn pending(&self) -> Vec<OptimisticUpdate> {
        let mut pending: Vec<OptimisticUpdate> = self.updates.iter().map(|u| u.clone()).collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        pending.into_iter().map(|u| self.with_delivery_progress(u)).collect()
    }

    #[must_use]
    pub fn get(&self, update_id: &str) -> Option<OptimisticUpdate> {
        let update = self.updates.get(update_id).map(|u| u.clone())?;
        Some(self.with_delivery_progress(update))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// The queue owns the retry counter; mirror it onto the record.
    fn with_delivery_progress(&self, mut update: OptimisticUpdate) -> OptimisticUpdate {
        if let Some(action) = update.action_id.as_deref().and_then(|id| self.queue.get(id)) {
            update.retry_count = action.retry_count;
        }
        update
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    async fn on_completion(&self, update_id: &str, outcome: Option<ActionOutcome>) {
        match outcome {
            Some(ActionOutcome::Delivered(body)) => self.confirm(update_id, Some(body), false).await,
            Some(ActionOutcome::Superseded(server)) => self.confirm(update_id, Some(server), true).await,
            Some(ActionOutcome::Dropped(DropReason::ConflictSurfaced { .. })) => {
                self.roll_back(update_id, RollbackReason::Conflict).await;
            }
            Some(ActionOutcome::Dropped(reason)) => {
                debug!(update_id, ?reason, "Queued action dropped");
                if reason == DropReason::RetriesExhausted {
                    if let Some(mut record) = self.updates.get_mut(update_id) {
                        record.retry_count = record.max_retries;
                    }
                }
                self.roll_back(update_id, RollbackReason::DeliveryFailed).await;
            }
            None => {
                warn!(update_id, "Action tracker closed without an outcome");
                self.roll_back(update_id, RollbackReason::DeliveryFailed).await;
            }
        }
    }

    async fn on_deadline(&self, update_id: &str) {
        let action_id = self.updates.get(update_id).and_then(|u| u.action_id.clone());
        if let Some(action_id) = action_id {
            if self.queue.cancel(&action_id).await.is_ok() {
                debug!(update_id, action_id = %action_id, "Cancelled queued action at rollback deadline");
            }
        }
        info!(update_id, "Rollback deadline reached");
        self.roll_back(update_id, RollbackReason::Deadline).await;
    }

    /// Reconcile the cache with the server's answer and discard the record.
    ///
    /// `authoritative` replaces the cached value outright; otherwise the
    /// response body is layered over the speculative value.
    async fn confirm(&self, update_id: &str, server: Option<Value>, authoritative: bool) {
        let Some((_, mut record)) = self.updates.remove(update_id) else {
            return;
        };
        record.status = UpdateStatus::Success;
        let strategy = record.operation_type.profile().strategy;

        let reconciled = match server {
            Some(body) if authoritative => Some(body),
            Some(Value::Object(fields)) if !fields.is_empty() => {
                let current = self
                    .cache
                    .peek(&record.cache_key)
                    .map_or_else(|| record.optimistic_data.clone(), |c| c.value);
                Some(shallow_merge(&current, &Value::Object(fields)))
            }
            _ => None,
        };
        if let Some(value) = reconciled {
            if let Err(e) = self.cache.set(&record.cache_key, &value, strategy).await {
                warn!(update_id, error = %e, "Could not reconcile cache with server data");
            }
        }

        info!(update_id, cache_key = %record.cache_key, "Optimistic update confirmed");
        metrics::record_optimistic(&record.operation_type.to_string(), "confirmed");
        self.notify(&record, SettleOutcome::Confirmed);
    }

    /// Put the cache back as it was and discard the record.
    async fn roll_back(&self, update_id: &str, reason: RollbackReason) {
        let Some((_, mut record)) = self.updates.remove(update_id) else {
            return;
        };
        record.status = UpdateStatus::Failed;

        match record.rollback_data.take() {
            Some(previous) => self.cache.restore(previous).await,
            None => {
                self.cache.delete(&record.cache_key).await;
            }
        }
        record.status = UpdateStatus::RolledBack;

        warn!(update_id, cache_key = %record.cache_key, ?reason, "Optimistic update rolled back");
        metrics::record_optimistic(&record.operation_type.to_string(), "rolled_back");
        self.notify(&record, SettleOutcome::RolledBack(reason));
    }

    fn notify(&self, record: &OptimisticUpdate, outcome: SettleOutcome) {
        self.events.emit(SyncEvent::UpdateSettled {
            update_id: record.id.clone(),
            cache_key: record.cache_key.clone(),
            outcome: outcome.clone(),
        });
        if let Some((_, tx)) = self.notifiers.remove(&record.id) {
            let _ = tx.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::conflict::ConflictLog;
    use crate::network::NetworkMonitor;
    use crate::storage::MemoryKvStore;
    use crate::transport::{Response, ScriptedTransport};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        optimistic: Arc<OptimisticCoordinator>,
        cache: Arc<CacheStore>,
        queue: Arc<ActionQueue>,
        transport: Arc<ScriptedTransport>,
    }

    fn harness(online: bool) -> Harness {
        let kv = Arc::new(MemoryKvStore::new());
        let config = EngineConfig::without_delays();
        let cache = Arc::new(CacheStore::new(&config, kv.clone()));
        let transport = Arc::new(ScriptedTransport::new());
        let network = NetworkMonitor::new(online);
        let events = EventBus::default();
        let queue = Arc::new(ActionQueue::new(
            &config,
            kv.clone(),
            transport.clone(),
            network,
            Arc::new(ConflictLog::new(kv)),
            events.clone(),
        ));
        let optimistic = Arc::new(OptimisticCoordinator::new(cache.clone(), queue.clone(), events));
        Harness { optimistic, cache, queue, transport }
    }

    #[tokio::test]
    async fn test_speculative_value_visible_immediately() {
        let h = harness(false);
        let handle = h
            .optimistic
            .apply(OperationType::VoteSubmit, "votes", "m1", json!({"choice": "A"}))
            .await
            .unwrap();

        assert_eq!(h.cache.peek(&handle.cache_key).unwrap().value, json!({"choice": "A"}));
        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.optimistic.get(&handle.update_id).unwrap().status, UpdateStatus::Syncing);
    }

    #[tokio::test]
    async fn test_confirmed_update_reconciles_with_server() {
        let h = harness(true);
        h.transport.push("/api/votes", Response::ok(json!({"id": "v-123"})));
        let handle = h
            .optimistic
            .apply(OperationType::VoteSubmit, "votes", "m1", json!({"choice": "A"}))
            .await
            .unwrap();

        h.queue.drain().await;

        assert_eq!(handle.settled.await.unwrap(), SettleOutcome::Confirmed);
        assert_eq!(
            h.cache.peek("votes:m1").unwrap().value,
            json!({"choice": "A", "id": "v-123"})
        );
        assert!(h.optimistic.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_update_restores_previous_row() {
        let h = harness(true);
        h.cache.set("players:a@x.com", &json!({"nickname": "Old"}), "players").await.unwrap();
        let before = h.cache.snapshot("players:a@x.com").unwrap();
        h.transport.push("/api/players/a@x.com", Response::new(400, Value::Null));

        let handle = h
            .optimistic
            .apply(OperationType::ProfileUpdate, "players", "a@x.com", json!({"nickname": "New"}))
            .await
            .unwrap();
        assert_eq!(h.cache.peek("players:a@x.com").unwrap().value["nickname"], "New");

        h.queue.drain().await;

        assert_eq!(
            handle.settled.await.unwrap(),
            SettleOutcome::RolledBack(RollbackReason::DeliveryFailed)
        );
        assert_eq!(h.cache.snapshot("players:a@x.com").unwrap(), before);
    }

    #[tokio::test]
    async fn test_retry_count_follows_queued_action() {
        let h = harness(true);
        h.transport.set_standing("/api/votes", Response::new(503, Value::Null));
        let handle = h
            .optimistic
            .apply(OperationType::VoteSubmit, "votes", "m1", json!({"choice": "A"}))
            .await
            .unwrap();

        for _ in 0..3 {
            h.queue.drain().await;
        }

        let update = h.optimistic.get(&handle.update_id).unwrap();
        assert_eq!(update.status, UpdateStatus::Syncing);
        assert_eq!(update.retry_count, 3);
        assert_eq!(h.queue.get(&handle.action_id).unwrap().retry_count, 3);
        assert_eq!(h.optimistic.pending()[0].retry_count, 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_restore_previous_row() {
        let h = harness(true);
        let mut events = h.optimistic.events.subscribe();
        h.cache.set("players:a@x.com", &json!({"nickname": "Old", "overall": 80}), "players").await.unwrap();
        let before = h.cache.snapshot("players:a@x.com").unwrap();
        h.transport.set_standing("/api/players/a@x.com", Response::new(503, Value::Null));

        let handle = h
            .optimistic
            .apply(OperationType::ProfileUpdate, "players", "a@x.com", json!({"nickname": "New"}))
            .await
            .unwrap();
        let budget = h.queue.get(&handle.action_id).unwrap().max_retries;

        for _ in 0..budget {
            h.queue.drain().await;
        }
        assert!(h.queue.is_empty());

        assert_eq!(
            handle.settled.await.unwrap(),
            SettleOutcome::RolledBack(RollbackReason::DeliveryFailed)
        );
        assert_eq!(h.cache.snapshot("players:a@x.com").unwrap(), before);
        assert_eq!(h.transport.requests_to("/api/players/a@x.com").len(), budget as usize);

        let mut dropped_for_retries = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::ActionDropped { reason: DropReason::RetriesExhausted, .. } = event {
                dropped_for_retries = true;
            }
        }
        assert!(dropped_for_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_rolls_back_and_cancels_action() {
        let h = harness(false);
        let handle = h
            .optimistic
            .apply(OperationType::PreferenceUpdate, "preferences", "me", json!({"theme": "dark"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;

        assert_eq!(
            handle.settled.await.unwrap(),
            SettleOutcome::RolledBack(RollbackReason::Deadline)
        );
        assert!(h.cache.snapshot("preferences:me").is_none());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_user_choice_conflict_rolls_back() {
        let h = harness(true);
        h.transport.push("/api/matches", Response::new(409, json!({"id": "m9", "date": "2026-06-01"})));
        let handle = h
            .optimistic
            .apply(OperationType::MatchCreate, "matches", "m9", json!({"id": "m9", "date": "2026-06-02"}))
            .await
            .unwrap();

        h.queue.drain().await;

        assert_eq!(
            handle.settled.await.unwrap(),
            SettleOutcome::RolledBack(RollbackReason::Conflict)
        );
        assert!(h.cache.snapshot("matches:m9").is_none());
    }
}
