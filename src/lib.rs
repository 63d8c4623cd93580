//! # Offline Sync
//!
//! Offline-first data layer for a client application: a TTL cache, a durable
//! queue of mutations made while offline, a scheduled synchronizer with
//! conflict detection, and optimistic updates that roll back on their own.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  OptimisticCoordinator                      │
//! │  • Speculative cache write, rollback snapshot              │
//! │  • Deadline timer bounds divergence                        │
//! └─────────────────────────────────────────────────────────────┘
//!            │ enqueue_tracked                 │ set / restore
//!            ▼                                 ▼
//! ┌──────────────────────────┐   ┌──────────────────────────────┐
//! │       ActionQueue        │   │          CacheStore          │
//! │  • Priority FIFO         │   │  • Per-strategy TTL          │
//! │  • Retry budget, backoff │   │  • Budget + LRU eviction     │
//! │  • 409 policies          │   │  • Event invalidation        │
//! └──────────────────────────┘   └──────────────────────────────┘
//!            │                                 ▲
//!            │ Transport                       │ fresh data
//!            ▼                                 │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SyncCoordinator                          │
//! │  • Priority-ordered pulls, network-adapted cadence         │
//! │  • Drift heuristics → ConflictLog                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything persists through one [`KvStore`] and talks to the server
//! through one [`Transport`]. [`OfflineEngine`] builds and owns the lot.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use offline_sync::{EngineConfig, HttpTransport, OfflineEngine, OperationType, SqliteKvStore};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = SqliteKvStore::open("league.db").await.expect("store");
//!     let transport = HttpTransport::new("https://league.example.com").expect("transport");
//!     let engine = OfflineEngine::new(EngineConfig::default(), Arc::new(store), Arc::new(transport));
//!
//!     engine.start().await.expect("start");
//!
//!     // Visible in the cache at once; rolled back if the server never confirms
//!     let handle = engine
//!         .apply_update(OperationType::VoteSubmit, "votes", "match-42", json!({"choice": "home"}))
//!         .await
//!         .expect("apply");
//!     println!("settled: {:?}", handle.settled.await);
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the [`OfflineEngine`] context and its background timers
//! - [`cache`]: TTL cache with budget eviction and invalidation
//! - [`queue`]: durable action queue with retry and conflict policies
//! - [`sync`]: scheduled synchronization and conflict detection
//! - [`optimistic`]: optimistic updates with automatic rollback
//! - [`storage`]: persistence backends (memory, SQLite)
//! - [`transport`]: HTTP and scripted transports
//! - [`resilience`]: retry with backoff and per-attempt deadlines

pub mod config;
pub mod strategy;
pub mod time;
pub mod storage;
pub mod resilience;
pub mod metrics;
pub mod events;
pub mod network;
pub mod transport;
pub mod conflict;
pub mod cache;
pub mod queue;
pub mod sync;
pub mod optimistic;
pub mod engine;

pub use config::{ConflictTolerances, EngineConfig, SyncResourceConfig};
pub use strategy::{CacheStrategy, StrategyPriority, StrategyTable};
pub use storage::{KvStore, MemoryKvStore, SqliteKvStore, StorageError};
pub use resilience::retry::RetryConfig;
pub use events::{DropReason, EventBus, RollbackReason, SettleOutcome, SyncEvent};
pub use network::{EffectiveType, NetworkMonitor, NetworkQuality, NetworkStatus};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{Method, Request, Response, ScriptedTransport, Transport, TransportError};
pub use conflict::{Conflict, ConflictLog, ConflictSource, ConflictStatus, Resolution};
pub use cache::{CacheError, CacheStats, CacheStore, CachedValue};
pub use queue::action::{ActionKind, ActionOutcome, ActionPriority, ConflictPolicy, QueuedAction};
pub use queue::{ActionQueue, ActionRequest, DrainReport, QueueError, QueueStats};
pub use sync::item::{SyncItem, SyncStatus};
pub use sync::{SyncCoordinator, SyncError, SyncOutcome, SyncReport};
pub use optimistic::update::{MergeStrategy, OperationType, OptimisticUpdate, UpdateStatus};
pub use optimistic::{OptimisticCoordinator, OptimisticError, UpdateHandle};
pub use engine::{EngineError, EngineHealth, EngineState, OfflineEngine};
