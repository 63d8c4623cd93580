//! Cache strategies.
//!
//! A [`CacheStrategy`] describes how one resource family is cached: how long
//! entries live, how hard eviction should try to keep them, whether payloads
//! are compressed, and which domain events invalidate them. Strategies are
//! immutable once the engine is built.
//!
//! # Example
//!
//! ```
//! use offline_sync::strategy::{StrategyTable, StrategyPriority};
//!
//! let table = StrategyTable::builtin();
//! let votes = table.get("votes").unwrap();
//! assert_eq!(votes.priority, StrategyPriority::Critical);
//! assert!(votes.is_invalidated_by("vote-submitted"));
//! ```

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// How strongly eviction should try to keep a strategy's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl std::fmt::Display for StrategyPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Caching policy for one resource family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStrategy {
    pub name: String,
    pub ttl_secs: u64,
    pub priority: StrategyPriority,
    pub max_entries: usize,
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,
    #[serde(default)]
    pub invalidating_events: BTreeSet<String>,
    #[serde(default)]
    pub prefetch: bool,
}

fn default_network_timeout_secs() -> u64 { 10 }

impl CacheStrategy {
    pub fn new(name: impl Into<String>, ttl_secs: u64, priority: StrategyPriority) -> Self {
        Self {
            name: name.into(),
            ttl_secs,
            priority,
            max_entries: 100,
            compress: false,
            network_timeout_secs: default_network_timeout_secs(),
            invalidating_events: BTreeSet::new(),
            prefetch: false,
        }
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    #[must_use]
    pub fn with_network_timeout_secs(mut self, secs: u64) -> Self {
        self.network_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn invalidated_by<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.invalidating_events.extend(events.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn prefetched(mut self) -> Self {
        self.prefetch = true;
        self
    }

    /// TTL in milliseconds.
    #[must_use]
    pub fn ttl_millis(&self) -> i64 {
        (self.ttl_secs as i64).saturating_mul(1000)
    }

    #[must_use]
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    #[must_use]
    pub fn is_invalidated_by(&self, event: &str) -> bool {
        self.invalidating_events.contains(event)
    }
}

/// Name-indexed, immutable set of strategies.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    strategies: HashMap<String, CacheStrategy>,
}

impl StrategyTable {
    pub fn new(strategies: impl IntoIterator<Item = CacheStrategy>) -> Self {
        Self {
            strategies: strategies
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }

    /// The league client's default table.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_strategies())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CacheStrategy> {
        self.strategies.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheStrategy> {
        self.strategies.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

/// Default strategies for the league resources.
#[must_use]
pub fn builtin_strategies() -> Vec<CacheStrategy> {
    vec![
        CacheStrategy::new("players", 60 * 60, StrategyPriority::High)
            .with_max_entries(500)
            .invalidated_by(["player-updated", "rating-changed"])
            .prefetched(),
        CacheStrategy::new("stats", 30 * 60, StrategyPriority::Medium)
            .with_max_entries(200)
            .compressed()
            .with_network_timeout_secs(15)
            .invalidated_by(["match-completed", "stats-updated"]),
        CacheStrategy::new("matches", 10 * 60, StrategyPriority::High)
            .with_max_entries(300)
            .invalidated_by(["match-created", "match-completed"])
            .prefetched(),
        CacheStrategy::new("votes", 5 * 60, StrategyPriority::Critical)
            .with_max_entries(1000)
            .with_network_timeout_secs(5)
            .invalidated_by(["vote-submitted", "voting-closed"]),
        CacheStrategy::new("preferences", 24 * 60 * 60, StrategyPriority::Low)
            .with_max_entries(50)
            .with_network_timeout_secs(5)
            .invalidated_by(["preferences-changed", "logout"]),
        CacheStrategy::new("leaderboard", 15 * 60, StrategyPriority::Medium)
            .with_max_entries(20)
            .compressed()
            .with_network_timeout_secs(15)
            .invalidated_by(["match-completed", "vote-submitted", "stats-updated"]),
        CacheStrategy::new("api", 5 * 60, StrategyPriority::Low)
            .with_max_entries(200)
            .invalidated_by(["logout"]),
    ]
}
