//! Conflict records.
//!
//! A conflict is created when local and remote data disagree beyond
//! tolerance (during a sync pass) or when the remote rejects a replayed
//! mutation under the user-choice policy. It stays `Pending` until resolved
//! explicitly. Records persist under `conflict:{id}`.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::storage::KvStore;
use crate::time::now_millis;

const PERSIST_PREFIX: &str = "conflict:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// Where a conflict was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSource {
    /// Fetched data drifted from the cached copy
    Sync,
    /// Remote answered 409 to a replayed action
    Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub resource_type: String,
    /// Cache key (sync) or endpoint (delivery) the conflict concerns
    pub key: String,
    pub local_data: Value,
    pub remote_data: Value,
    pub detected_at: i64,
    pub status: ConflictStatus,
    pub source: ConflictSource,
}

/// How a pending conflict is settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    LocalWins,
    RemoteWins,
    /// Caller-supplied merged value
    Merge(Value),
}

impl Resolution {
    /// The value that should become authoritative.
    #[must_use]
    pub fn resolved_value(&self, conflict: &Conflict) -> Value {
        match self {
            Self::LocalWins => conflict.local_data.clone(),
            Self::RemoteWins => conflict.remote_data.clone(),
            Self::Merge(value) => value.clone(),
        }
    }
}

/// Conflict registry shared by the action queue and the sync coordinator.
pub struct ConflictLog {
    conflicts: DashMap<String, Conflict>,
    store: Arc<dyn KvStore>,
}

impl ConflictLog {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            conflicts: DashMap::new(),
            store,
        }
    }

    /// Record a pending conflict and return it.
    ///
    /// A second sync conflict on a key that already has a pending one
    /// refreshes the remote side of the existing record instead of stacking.
    pub async fn record(
        &self,
        source: ConflictSource,
        resource_type: &str,
        key: &str,
        local_data: Value,
        remote_data: Value,
    ) -> Conflict {
        let existing = self
            .conflicts
            .iter()
            .find(|c| {
                c.status == ConflictStatus::Pending
                    && c.source == source
                    && c.source == ConflictSource::Sync
                    && c.key == key
            })
            .map(|c| c.id.clone());

        let conflict = match existing.and_then(|id| self.conflicts.get_mut(&id)) {
            Some(mut c) => {
                c.remote_data = remote_data;
                c.detected_at = now_millis();
                c.clone()
            }
            None => {
                let conflict = Conflict {
                    id: Uuid::now_v7().to_string(),
                    resource_type: resource_type.to_string(),
                    key: key.to_string(),
                    local_data,
                    remote_data,
                    detected_at: now_millis(),
                    status: ConflictStatus::Pending,
                    source,
                };
                self.conflicts.insert(conflict.id.clone(), conflict.clone());
                metrics::record_conflict(resource_type);
                info!(conflict_id = %conflict.id, resource_type, key, ?source, "Conflict recorded");
                conflict
            }
        };

        self.persist(&conflict).await;
        conflict
    }

    /// Mark a conflict resolved. Returns the updated record, or `None` if the
    /// id is unknown or already resolved.
    pub async fn mark_resolved(&self, id: &str) -> Option<Conflict> {
        let conflict = {
            let mut entry = self.conflicts.get_mut(id)?;
            if entry.status == ConflictStatus::Resolved {
                return None;
            }
            entry.status = ConflictStatus::Resolved;
            entry.clone()
        };
        self.persist(&conflict).await;
        Some(conflict)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Conflict> {
        self.conflicts.get(id).map(|c| c.clone())
    }

    /// Pending conflicts, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<Conflict> {
        let mut pending: Vec<Conflict> = self
            .conflicts
            .iter()
            .filter(|c| c.status == ConflictStatus::Pending)
            .map(|c| c.clone())
            .collect();
        pending.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.id.cmp(&b.id)));
        pending
    }

    #[must_use]
    pub fn pending_for(&self, resource_type: &str) -> usize {
        self.conflicts
            .iter()
            .filter(|c| c.status == ConflictStatus::Pending && c.resource_type == resource_type)
            .count()
    }

    /// Restore records from persistence. Returns the number loaded.
    pub async fn load(&self) -> usize {
        let rows = match self.store.scan_prefix(PERSIST_PREFIX).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Conflict log hydration failed");
                metrics::record_storage_error("conflict_load");
                return 0;
            }
        };

        let mut loaded = 0;
        for (key, bytes) in rows {
            match serde_json::from_slice::<Conflict>(&bytes) {
                Ok(conflict) => {
                    self.conflicts.insert(conflict.id.clone(), conflict);
                    loaded += 1;
                }
                Err(e) => error!(key = %key, error = %e, "Corrupt conflict record"),
            }
        }
        loaded
    }

    async fn persist(&self, conflict: &Conflict) {
        let bytes = match serde_json::to_vec(conflict) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(conflict_id = %conflict.id, error = %e, "Conflict not serializable");
                return;
            }
        };
        let key = format!("{}{}", PERSIST_PREFIX, conflict.id);
        if let Err(e) = self.store.put(&key, &bytes).await {
            warn!(conflict_id = %conflict.id, error = %e, "Conflict persistence failed");
            metrics::record_storage_error("conflict_put");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_resolve() {
        let log = ConflictLog::new(Arc::new(MemoryKvStore::new()));
        let c = log
            .record(ConflictSource::Sync, "stats", "stats:all", json!({"goals": 10}), json!({"goals": 14}))
            .await;

        assert_eq!(log.pending().len(), 1);
        assert_eq!(log.pending_for("stats"), 1);

        let resolved = log.mark_resolved(&c.id).await.unwrap();
        assert_eq!(resolved.status, ConflictStatus::Resolved);
        assert!(log.pending().is_empty());
        assert!(log.mark_resolved(&c.id).await.is_none());
    }

    #[tokio::test]
    async fn test_sync_conflicts_on_same_key_collapse() {
        let log = ConflictLog::new(Arc::new(MemoryKvStore::new()));
        let first = log
            .record(ConflictSource::Sync, "stats", "stats:all", json!(1), json!(2))
            .await;
        let second = log
            .record(ConflictSource::Sync, "stats", "stats:all", json!(1), json!(3))
            .await;

        assert_eq!(first.id, second.id);
        assert_eq!(log.get(&first.id).unwrap().remote_data, json!(3));
    }

    #[tokio::test]
    async fn test_delivery_conflicts_never_collapse() {
        let log = ConflictLog::new(Arc::new(MemoryKvStore::new()));
        log.record(ConflictSource::Delivery, "matches", "/api/matches", json!(1), json!(2)).await;
        log.record(ConflictSource::Delivery, "matches", "/api/matches", json!(1), json!(3)).await;
        assert_eq!(log.pending().len(), 2);
    }

    #[tokio::test]
    async fn test_load_restores_records() {
        let kv = Arc::new(MemoryKvStore::new());
        let id = {
            let log = ConflictLog::new(kv.clone());
            log.record(ConflictSource::Sync, "players", "players:all", json!(1), json!(2)).await.id
        };

        let log = ConflictLog::new(kv);
        assert_eq!(log.load().await, 1);
        assert_eq!(log.get(&id).unwrap().status, ConflictStatus::Pending);
    }

    #[test]
    fn test_resolution_value() {
        let conflict = Conflict {
            id: "c".into(),
            resource_type: "stats".into(),
            key: "stats:all".into(),
            local_data: json!("local"),
            remote_data: json!("remote"),
            detected_at: 0,
            status: ConflictStatus::Pending,
            source: ConflictSource::Sync,
        };
        assert_eq!(Resolution::LocalWins.resolved_value(&conflict), json!("local"));
        assert_eq!(Resolution::RemoteWins.resolved_value(&conflict), json!("remote"));
        assert_eq!(Resolution::Merge(json!("m")).resolved_value(&conflict), json!("m"));
    }
}
