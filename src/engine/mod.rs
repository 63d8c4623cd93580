// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline engine context.
//!
//! The [`OfflineEngine`] owns one instance of every component and wires them
//! to the same persistence, transport, connectivity monitor and event bus:
//! - [`CacheStore`] with TTL, budget eviction and invalidation
//! - [`ActionQueue`] for mutations made while offline
//! - [`SyncCoordinator`] for scheduled pulls with conflict detection
//! - [`OptimisticCoordinator`] for speculative writes with rollback
//!
//! Construct it once at application start and hand out references; there is
//! no global instance.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Loading → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{EngineConfig, EngineState, MemoryKvStore, OfflineEngine, ScriptedTransport};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let engine = OfflineEngine::new(
//!     EngineConfig::default(),
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(ScriptedTransport::new()),
//! );
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().await.expect("start");
//! engine.shutdown().await;
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{EngineError, EngineHealth, EngineState};

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::conflict::ConflictLog;
use crate::events::{EventBus, SyncEvent};
use crate::network::NetworkMonitor;
use crate::optimistic::update::OperationType;
use crate::optimistic::{OptimisticCoordinator, OptimisticError, UpdateHandle};
use crate::queue::ActionQueue;
use crate::storage::KvStore;
use crate::sync::item::SyncStatus;
use crate::sync::SyncCoordinator;
use crate::transport::Transport;

pub struct OfflineEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    network: NetworkMonitor,
    events: EventBus,
    cache: Arc<CacheStore>,
    conflicts: Arc<ConflictLog>,
    queue: Arc<ActionQueue>,
    sync: Arc<SyncCoordinator>,
    optimistic: Arc<OptimisticCoordinator>,
    state: watch::Sender<EngineState>,
    state_rx: watch::Receiver<EngineState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for OfflineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineEngine")
            .field("state", &self.state())
            .field("online", &self.network.is_online())
            .finish_non_exhaustive()
    }
}

impl OfflineEngine {
    /// Build every component over the given persistence and transport.
    /// Starts online; feed connectivity changes through [`Self::network`].
    pub fn new(config: EngineConfig, store: Arc<dyn KvStore>, transport: Arc<dyn Transport>) -> Self {
        Self::with_network(config, store, transport, NetworkMonitor::default())
    }

    pub fn with_network(
        config: EngineConfig,
        store: Arc<dyn KvStore>,
        transport: Arc<dyn Transport>,
        network: NetworkMonitor,
    ) -> Self {
        let events = EventBus::new(config.event_channel_capacity);
        let cache = Arc::new(CacheStore::new(&config, store.clone()));
        let conflicts = Arc::new(ConflictLog::new(store.clone()));
        let queue = Arc::new(ActionQueue::new(
            &config,
            store.clone(),
            transport.clone(),
            network.clone(),
            conflicts.clone(),
            events.clone(),
        ));
        let sync = Arc::new(SyncCoordinator::new(
            &config,
            cache.clone(),
            transport.clone(),
            network.clone(),
            conflicts.clone(),
            events.clone(),
            store,
        ));
        let optimistic = Arc::new(OptimisticCoordinator::new(cache.clone(), queue.clone(), events.clone()));

        let (state, state_rx) = watch::channel(EngineState::Created);
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            transport,
            network,
            events,
            cache,
            conflicts,
            queue,
            sync,
            optimistic,
            state,
            state_rx,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<ActionQueue> {
        &self.queue
    }

    #[must_use]
    pub fn sync(&self) -> &Arc<SyncCoordinator> {
        &self.sync
    }

    #[must_use]
    pub fn optimistic(&self) -> &Arc<OptimisticCoordinator> {
        &self.optimistic
    }

    #[must_use]
    pub fn conflicts(&self) -> &Arc<ConflictLog> {
        &self.conflicts
    }

    /// Conflict and settlement notifications for the UI layer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Shorthand for [`OptimisticCoordinator::apply`].
    pub async fn apply_update(
        &self,
        operation: OperationType,
        entity_type: &str,
        entity_id: &str,
        data: Value,
    ) -> Result<UpdateHandle, OptimisticError> {
        self.optimistic.apply(operation, entity_type, entity_id, data).await
    }

    #[must_use]
    pub fn health(&self) -> EngineHealth {
        let items = self.sync.items();
        EngineHealth {
            state: self.state(),
            online: self.network.is_online(),
            cache: self.cache.stats(),
            queue: self.queue.stats(),
            pending_conflicts: self.conflicts.pending().len(),
            pending_updates: self.optimistic.len(),
            sync_errors: items.iter().filter(|i| i.status == SyncStatus::Error).count(),
            syncing: self.sync.is_syncing(),
        }
    }
}
