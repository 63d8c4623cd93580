//! Public types for the offline engine.

use crate::cache::CacheStats;
use crate::queue::QueueStats;

/// Engine lifecycle state.
///
/// Use [`super::OfflineEngine::state()`] to check the current state or
/// [`super::OfflineEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, nothing loaded yet
    Created,
    /// Hydrating cache, queue, sync state and conflicts from persistence
    Loading,
    /// Background timers are running
    Running,
    /// Graceful shutdown in progress
    ShuttingDown,
    /// Timers stopped, final state persisted
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Loading => write!(f, "Loading"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine cannot start from state {0}")]
    InvalidState(EngineState),
}

/// Point-in-time view of the whole engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineHealth {
    pub state: EngineState,
    pub online: bool,
    pub cache: CacheStats,
    pub queue: QueueStats,
    pub pending_conflicts: usize,
    pub pending_updates: usize,
    /// Resources whose last sync attempt failed
    pub sync_errors: usize,
    pub syncing: bool,
}

impl EngineHealth {
    /// Running, online and nothing stuck in error.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state == EngineState::Running && self.online && self.sync_errors == 0
    }
}
