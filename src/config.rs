//! Configuration for the offline engine.
//!
//! # Example
//!
//! ```
//! use offline_sync::EngineConfig;
//!
//! // Minimal config (uses defaults)
//! let config = EngineConfig::default();
//! assert_eq!(config.drain_interval_secs, 30);
//! assert_eq!(config.sync_tick_secs, 60);
//!
//! // Phone client with a tighter eviction threshold
//! let config = EngineConfig {
//!     user_agent: Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)".into()),
//!     eviction_threshold: 0.85,
//!     ..Default::default()
//! };
//! ```

use serde::Deserialize;
use crate::strategy::{builtin_strategies, CacheStrategy, StrategyPriority};

/// Configuration for the offline engine.
///
/// All fields have defaults. Deserializes from any serde format, so the
/// host application can ship it as JSON next to its other settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Cache strategies (default: players, stats, matches, votes, preferences, leaderboard, api)
    #[serde(default = "builtin_strategies")]
    pub strategies: Vec<CacheStrategy>,

    /// User agent used to pick the device-class storage budget
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Explicit cache budget in bytes (overrides the device class)
    #[serde(default)]
    pub storage_budget_bytes: Option<usize>,

    /// Eviction starts when usage exceeds this share of the budget
    #[serde(default = "default_eviction_threshold")]
    pub eviction_threshold: f64,
    /// Eviction passes continue until usage drops below this share
    #[serde(default = "default_eviction_target")]
    pub eviction_target: f64,
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
    /// Critical entries touched this recently are never evicted
    #[serde(default = "default_critical_protection_secs")]
    pub critical_protection_secs: u64,
    /// Expiry sweep timer
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Write cache rows through to persistence
    #[serde(default = "default_true")]
    pub persist_cache: bool,

    /// Periodic queue drain check
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    /// Pause between deliveries within one drain pass
    #[serde(default = "default_drain_action_delay_ms")]
    pub drain_action_delay_ms: u64,
    /// Per-action backoff after a transient failure
    #[serde(default = "default_retry_backoff_initial_ms")]
    pub retry_backoff_initial_ms: u64,
    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Sync scheduler tick
    #[serde(default = "default_sync_tick_secs")]
    pub sync_tick_secs: u64,
    /// Synchronized resource families
    #[serde(default = "default_sync_resources")]
    pub sync_resources: Vec<SyncResourceConfig>,
    /// Fetch deadline for a medium-priority resource; scaled by priority
    #[serde(default = "default_sync_base_timeout_ms")]
    pub sync_base_timeout_ms: u64,
    #[serde(default = "default_sync_fetch_attempts")]
    pub sync_fetch_attempts: usize,
    #[serde(default = "default_sync_backoff_initial_ms")]
    pub sync_backoff_initial_ms: u64,

    /// Drift thresholds for conflict detection
    #[serde(default)]
    pub conflict_tolerances: ConflictTolerances,

    /// Optional connectivity probe endpoint
    #[serde(default)]
    pub heartbeat_endpoint: Option<String>,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Capacity of the notification broadcast channel
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

/// One synchronized resource family.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyncResourceConfig {
    pub resource_type: String,
    pub endpoint: String,
    pub priority: StrategyPriority,
    /// Base frequency before network adaptation
    pub frequency_minutes: f64,
}

impl SyncResourceConfig {
    pub fn new(resource_type: &str, endpoint: &str, priority: StrategyPriority, frequency_minutes: f64) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            endpoint: endpoint.to_string(),
            priority,
            frequency_minutes,
        }
    }
}

/// Heuristic drift thresholds. These are tuning knobs, not policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConflictTolerances {
    /// Relative numeric drift allowed on stats fields (0.10 = 10%)
    #[serde(default = "default_stats_relative")]
    pub stats_relative: f64,
    /// Absolute rating drift allowed on player records
    #[serde(default = "default_player_rating_absolute")]
    pub player_rating_absolute: f64,
}

impl Default for ConflictTolerances {
    fn default() -> Self {
        Self {
            stats_relative: default_stats_relative(),
            player_rating_absolute: default_player_rating_absolute(),
        }
    }
}

fn default_true() -> bool { true }
fn default_eviction_threshold() -> f64 { 0.9 }
fn default_eviction_target() -> f64 { 0.8 }
fn default_eviction_batch_size() -> usize { 20 }
fn default_critical_protection_secs() -> u64 { 5 * 60 }
fn default_sweep_interval_secs() -> u64 { 5 * 60 }
fn default_drain_interval_secs() -> u64 { 30 }
fn default_drain_action_delay_ms() -> u64 { 100 }
fn default_retry_backoff_initial_ms() -> u64 { 1_000 }
fn default_retry_backoff_max_ms() -> u64 { 60_000 }
fn default_sync_tick_secs() -> u64 { 60 }
fn default_sync_base_timeout_ms() -> u64 { 10_000 }
fn default_sync_fetch_attempts() -> usize { 3 }
fn default_sync_backoff_initial_ms() -> u64 { 500 }
fn default_stats_relative() -> f64 { 0.10 }
fn default_player_rating_absolute() -> f64 { 5.0 }
fn default_heartbeat_interval_secs() -> u64 { 30 }
fn default_event_channel_capacity() -> usize { 256 }

fn default_sync_resources() -> Vec<SyncResourceConfig> {
    vec![
        SyncResourceConfig::new("votes", "/api/votes", StrategyPriority::Critical, 5.0),
        SyncResourceConfig::new("matches", "/api/matches", StrategyPriority::High, 10.0),
        SyncResourceConfig::new("players", "/api/players", StrategyPriority::High, 15.0),
        SyncResourceConfig::new("stats", "/api/stats", StrategyPriority::Medium, 30.0),
    ]
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategies: builtin_strategies(),
            user_agent: None,
            storage_budget_bytes: None,
            eviction_threshold: default_eviction_threshold(),
            eviction_target: default_eviction_target(),
            eviction_batch_size: default_eviction_batch_size(),
            critical_protection_secs: default_critical_protection_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            persist_cache: true,
            drain_interval_secs: default_drain_interval_secs(),
            drain_action_delay_ms: default_drain_action_delay_ms(),
            retry_backoff_initial_ms: default_retry_backoff_initial_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            sync_tick_secs: default_sync_tick_secs(),
            sync_resources: default_sync_resources(),
            sync_base_timeout_ms: default_sync_base_timeout_ms(),
            sync_fetch_attempts: default_sync_fetch_attempts(),
            sync_backoff_initial_ms: default_sync_backoff_initial_ms(),
            conflict_tolerances: ConflictTolerances::default(),
            heartbeat_endpoint: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Defaults with every pacing delay removed (drain spacing, retry
    /// backoff, fetch backoff). Timers and deadlines are unchanged.
    #[must_use]
    pub fn without_delays() -> Self {
        Self {
            drain_action_delay_ms: 0,
            retry_backoff_initial_ms: 0,
            retry_backoff_max_ms: 0,
            sync_backoff_initial_ms: 0,
            ..Self::default()
        }
    }
}
