//! Queued action data structure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::transport::Method;

/// What a queued mutation does. Drives the retry budget and merge rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    VoteSubmit,
    MatchCreate,
    MatchUpdate,
    ProfileUpdate,
    StatsUpdate,
    PreferenceUpdate,
    Other,
}

impl ActionKind {
    /// Base retry budget before priority scaling.
    ///
    /// User-visible writes get the most attempts, low-stakes ones the fewest.
    #[must_use]
    pub fn base_retries(self) -> u32 {
        match self {
            Self::VoteSubmit => 5,
            Self::MatchCreate | Self::MatchUpdate => 4,
            Self::ProfileUpdate | Self::StatsUpdate => 3,
            Self::Other => 2,
            Self::PreferenceUpdate => 1,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VoteSubmit => "vote_submit",
            Self::MatchCreate => "match_create",
            Self::MatchUpdate => "match_update",
            Self::ProfileUpdate => "profile_update",
            Self::StatsUpdate => "stats_update",
            Self::PreferenceUpdate => "preference_update",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery priority. `High` is serviced first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionPriority {
    High,
    Medium,
    Low,
}

impl ActionPriority {
    /// Multiplier applied to a kind's base retry budget.
    #[must_use]
    pub fn retry_scale(self) -> f64 {
        match self {
            Self::High => 1.5,
            Self::Medium => 1.0,
            Self::Low => 0.5,
        }
    }
}

impl std::fmt::Display for ActionPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// What to do when the remote answers 409.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPolicy {
    /// Resend with the force-update marker
    Overwrite,
    /// Apply the kind's merge and resend with the merge-update marker
    Merge,
    /// Record a conflict and hand it to the user
    UserChoice,
}

/// Retry budget for `kind` at `priority`, never below one attempt.
#[must_use]
pub fn retry_budget(kind: ActionKind, priority: ActionPriority) -> u32 {
    let scaled = (f64::from(kind.base_retries()) * priority.retry_scale()).ceil() as u32;
    scaled.max(1)
}

/// A pending mutation awaiting delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Time-ordered unique id (UUIDv7)
    pub id: String,
    pub kind: ActionKind,
    pub payload: Value,
    pub created_at: i64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: ActionPriority,
    pub target_endpoint: String,
    pub method: Method,
    pub conflict_policy: ConflictPolicy,
    /// Earliest time the next attempt may run (0 = immediately)
    #[serde(default)]
    pub next_attempt_at: i64,
}

impl QueuedAction {
    pub fn new(
        kind: ActionKind,
        payload: Value,
        target_endpoint: impl Into<String>,
        method: Method,
        priority: ActionPriority,
        conflict_policy: ConflictPolicy,
        now: i64,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind,
            payload,
            created_at: now,
            retry_count: 0,
            max_retries: retry_budget(kind, priority),
            priority,
            target_endpoint: target_endpoint.into(),
            method,
            conflict_policy,
            next_attempt_at: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at <= now
    }

    #[inline]
    #[must_use]
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Final fate of an action, delivered to `enqueue_tracked` callers.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    /// Remote accepted it; carries the response body
    Delivered(Value),
    /// Remote already holds a newer value; carries that value
    Superseded(Value),
    /// Dropped without delivery
    Dropped(crate::events::DropReason),
}
