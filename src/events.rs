//! Notification surface.
//!
//! The engine never talks to the UI directly. It publishes [`SyncEvent`]s on a
//! broadcast channel and whoever renders conflict prompts or "your vote could
//! not be saved" toasts subscribes. Publishing with no subscribers is fine.

use tokio::sync::broadcast;
use tracing::trace;

/// Why a queued action left the queue without being delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Transient failures used up the retry budget
    RetriesExhausted,
    /// Remote rejected it as a client error (4xx other than 409)
    Rejected { status: u16 },
    /// 409 under the user-choice policy; a conflict record now owns it
    ConflictSurfaced { conflict_id: String },
    /// Removed by its owner (e.g. optimistic rollback)
    Cancelled,
}

/// Why an optimistic update was reverted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackReason {
    DeliveryFailed,
    Deadline,
    Conflict,
}

/// Final state of an optimistic update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Confirmed,
    RolledBack(RollbackReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ConflictDetected {
        conflict_id: String,
        resource_type: String,
        key: String,
    },
    ConflictResolved {
        conflict_id: String,
    },
    ActionDelivered {
        action_id: String,
    },
    ActionDropped {
        action_id: String,
        reason: DropReason,
    },
    UpdateSettled {
        update_id: String,
        cache_key: String,
        outcome: SettleOutcome,
    },
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: SyncEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::ActionDelivered { action_id: "a1".into() });

        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::ActionDelivered { action_id: "a1".into() }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.emit(SyncEvent::ConflictResolved { conflict_id: "c1".into() });
    }
}
