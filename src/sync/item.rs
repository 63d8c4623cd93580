//! Per-resource sync bookkeeping.

use serde::{Deserialize, Serialize};

use crate::config::SyncResourceConfig;
use crate::strategy::StrategyPriority;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Success,
    Error,
    Conflict,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Syncing => write!(f, "SYNCING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Error => write!(f, "ERROR"),
            Self::Conflict => write!(f, "CONFLICT"),
        }
    }
}

/// One synchronized resource family (not one record).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub id: String,
    pub resource_type: String,
    pub endpoint: String,
    pub priority: StrategyPriority,
    /// Intrinsic cadence before network adaptation
    pub base_frequency_minutes: f64,
    /// Effective cadence after network adaptation
    pub frequency_minutes: f64,
    pub last_sync_at: Option<i64>,
    pub retry_count: u32,
    pub status: SyncStatus,
}

impl SyncItem {
    pub fn from_config(config: &SyncResourceConfig) -> Self {
        Self {
            id: format!("sync:{}", config.resource_type),
            resource_type: config.resource_type.clone(),
            endpoint: config.endpoint.clone(),
            priority: config.priority,
            base_frequency_minutes: config.frequency_minutes,
            frequency_minutes: config.frequency_minutes,
            last_sync_at: None,
            retry_count: 0,
            status: SyncStatus::Pending,
        }
    }

    #[must_use]
    pub fn frequency_millis(&self) -> i64 {
        (self.frequency_minutes * 60_000.0) as i64
    }

    /// Due when the interval has elapsed, the last attempt failed, or it has
    /// never synced.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        if self.status == SyncStatus::Error {
            return true;
        }
        match self.last_sync_at {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.frequency_millis(),
        }
    }

    /// Cache key holding this resource's latest fetched collection.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("{}:all", self.resource_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> SyncItem {
        SyncItem::from_config(&SyncResourceConfig::new("votes", "/api/votes", StrategyPriority::Critical, 5.0))
    }

    #[test]
    fn test_never_synced_is_due() {
        assert!(item().is_due(0));
    }

    #[test]
    fn test_due_after_frequency() {
        let mut i = item();
        i.last_sync_at = Some(1_000);
        i.status = SyncStatus::Success;
        assert!(!i.is_due(1_000 + 299_999));
        assert!(i.is_due(1_000 + 300_000));
    }

    #[test]
    fn test_error_is_always_due() {
        let mut i = item();
        i.last_sync_at = Some(1_000);
        i.status = SyncStatus::Error;
        assert!(i.is_due(1_001));
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(item().cache_key(), "votes:all");
    }
}
