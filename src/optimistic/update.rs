//! Optimistic update records and per-operation profiles.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::entry::CacheEntry;
use crate::queue::action::{retry_budget, ActionKind, ActionPriority, ConflictPolicy};
use crate::queue::merge::{field_merge, shallow_merge};
use crate::transport::Method;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    VoteSubmit,
    ProfileUpdate,
    MatchCreate,
    MatchUpdate,
    PreferenceUpdate,
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VoteSubmit => write!(f, "vote_submit"),
            Self::ProfileUpdate => write!(f, "profile_update"),
            Self::MatchCreate => write!(f, "match_create"),
            Self::MatchUpdate => write!(f, "match_update"),
            Self::PreferenceUpdate => write!(f, "preference_update"),
        }
    }
}

/// How speculative data combines with what is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Local fields overwrite cached ones
    ClientWins,
    /// Cached fields are kept; local only fills gaps
    ServerWins,
    /// Per-field recency
    FieldMerge,
}

impl MergeStrategy {
    /// Combine `optimistic` with the `current` cached value.
    #[must_use]
    pub fn apply(self, current: Option<&Value>, optimistic: &Value) -> Value {
        let Some(current) = current else {
            return optimistic.clone();
        };
        match self {
            Self::ClientWins => shallow_merge(current, optimistic),
            Self::ServerWins => shallow_merge(optimistic, current),
            Self::FieldMerge => field_merge(optimistic, current),
        }
    }
}

/// Everything that varies by operation type.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationProfile {
    pub merge: MergeStrategy,
    /// Hard upper bound on how long speculative data may diverge
    pub rollback_timeout: Duration,
    pub action_kind: ActionKind,
    pub priority: ActionPriority,
    pub conflict_policy: ConflictPolicy,
    pub method: Method,
    /// Cache strategy the speculative value is written under
    pub strategy: &'static str,
    /// Remote collection the mutation is sent to
    pub collection: &'static str,
}

impl OperationProfile {
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        retry_budget(self.action_kind, self.priority)
    }

    /// Creations go to the collection, edits to the entity.
    #[must_use]
    pub fn endpoint(&self, entity_id: &str) -> String {
        match self.method {
            Method::Post => self.collection.to_string(),
            _ => format!("{}/{}", self.collection, entity_id),
        }
    }
}

impl OperationType {
    /// Low-stakes writes roll back fastest, profile edits slowest.
    #[must_use]
    pub fn profile(self) -> OperationProfile {
        match self {
            Self::VoteSubmit => OperationProfile {
                merge: MergeStrategy::ClientWins,
                rollback_timeout: Duration::from_secs(30),
                action_kind: ActionKind::VoteSubmit,
                priority: ActionPriority::High,
                conflict_policy: ConflictPolicy::Merge,
                method: Method::Post,
                strategy: "votes",
                collection: "/api/votes",
            },
            Self::ProfileUpdate => OperationProfile {
                merge: MergeStrategy::FieldMerge,
                rollback_timeout: Duration::from_secs(60),
                action_kind: ActionKind::ProfileUpdate,
                priority: ActionPriority::Medium,
                conflict_policy: ConflictPolicy::Merge,
                method: Method::Put,
                strategy: "players",
                collection: "/api/players",
            },
            Self::MatchCreate => OperationProfile {
                merge: MergeStrategy::ServerWins,
                rollback_timeout: Duration::from_secs(45),
                action_kind: ActionKind::MatchCreate,
                priority: ActionPriority::High,
                conflict_policy: ConflictPolicy::UserChoice,
                method: Method::Post,
                strategy: "matches",
                collection: "/api/matches",
            },
            Self::MatchUpdate => OperationProfile {
                merge: MergeStrategy::FieldMerge,
                rollback_timeout: Duration::from_secs(45),
                action_kind: ActionKind::MatchUpdate,
                priority: ActionPriority::Medium,
                conflict_policy: ConflictPolicy::Merge,
                method: Method::Put,
                strategy: "matches",
                collection: "/api/matches",
            },
            Self::PreferenceUpdate => OperationProfile {
                merge: MergeStrategy::ClientWins,
                rollback_timeout: Duration::from_secs(10),
                action_kind: ActionKind::PreferenceUpdate,
                priority: ActionPriority::Low,
                conflict_policy: ConflictPolicy::Overwrite,
                method: Method::Put,
                strategy: "preferences",
                collection: "/api/preferences",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Pending,
    Syncing,
    Success,
    Failed,
    RolledBack,
}

/// One speculative mutation, alive until confirmed or rolled back.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticUpdate {
    pub id: String,
    pub operation_type: OperationType,
    pub entity_type: String,
    pub entity_id: String,
    pub cache_key: String,
    pub optimistic_data: Value,
    /// Cached value before the update, if there was one
    pub original_data: Option<Value>,
    /// Exact cache row to put back on rollback
    pub rollback_data: Option<CacheEntry>,
    pub status: UpdateStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub action_id: Option<String>,
    pub created_at: i64,
}
