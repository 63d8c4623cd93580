// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! LRU eviction with critical-entry protection.
//!
//! Victims are chosen least-recently-accessed first. Entries whose strategy
//! priority is `critical` and that were touched within the protection window
//! are never selected, however old their neighbours are. Each pass selects at
//! most `batch_size` victims so a single eviction never stalls the caller.

use crate::strategy::StrategyPriority;

/// Entry metadata for eviction scoring.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: String,
    pub size_bytes: usize,
    pub last_accessed_at: i64,
    pub priority: StrategyPriority,
}

/// Size-pressure eviction policy.
#[derive(Debug, Clone)]
pub struct LruPolicy {
    /// Critical entries accessed this recently are skipped (millis)
    pub critical_protection_millis: i64,
    /// Max victims per pass
    pub batch_size: usize,
}

impl Default for LruPolicy {
    fn default() -> Self {
        Self {
            critical_protection_millis: 5 * 60 * 1000,
            batch_size: 20,
        }
    }
}

impl LruPolicy {
    #[must_use]
    pub fn is_protected(&self, candidate: &EvictionCandidate, now: i64) -> bool {
        candidate.priority == StrategyPriority::Critical
            && now.saturating_sub(candidate.last_accessed_at) < self.critical_protection_millis
    }

    /// Select victims for one pass (keys, least recently accessed first).
    ///
    /// Ties on access time go to the less important strategy.
    pub fn select_victims(&self, candidates: &[EvictionCandidate], now: i64) -> Vec<String> {
        let mut eligible: Vec<&EvictionCandidate> = candidates
            .iter()
            .filter(|c| !self.is_protected(c, now))
            .collect();

        eligible.sort_by(|a, b| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then_with(|| b.priority.cmp(&a.priority))
        });

        eligible
            .into_iter()
            .take(self.batch_size)
            .map(|c| c.key.clone())
            .collect()
    }
}
