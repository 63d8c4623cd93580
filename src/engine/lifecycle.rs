//! Engine lifecycle: hydration, background timers, shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::network::NetworkMonitor;
use crate::transport::{dispatch, Request, Transport};

use super::{EngineError, EngineState, OfflineEngine};

/// How long shutdown waits for each timer to finish its current pass.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

impl OfflineEngine {
    /// Hydrate every component from persistence and start the timers.
    ///
    /// Startup flow:
    /// 1. Cache rows (expired and corrupt rows are purged)
    /// 2. Conflict records
    /// 3. Pending actions, re-sorted by priority
    /// 4. Per-resource sync state
    /// 5. Spawn sweep, drain, sync tick and (if configured) heartbeat
    /// 6. Prefetch flagged strategies when online
    ///
    /// Persistence failures are logged and leave the affected component
    /// empty; they never fail startup.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), EngineError> {
        let mut previous = EngineState::Created;
        let claimed = self.state.send_if_modified(|state| {
            previous = *state;
            if *state == EngineState::Created {
                *state = EngineState::Loading;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(EngineError::InvalidState(previous));
        }

        let started = Instant::now();
        info!("Starting offline engine...");

        let cached = self.cache.load().await;
        let conflicts = self.conflicts.load().await;
        let queued = self.queue.load().await;
        let resources = self.sync.load().await;
        info!(
            cached,
            conflicts,
            queued,
            resources,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Hydration complete"
        );

        let shutdown = self.shutdown.subscribe();
        let mut tasks = vec![
            tokio::spawn(sweep_loop(
                self.cache.clone(),
                Duration::from_secs(self.config.sweep_interval_secs),
                shutdown.clone(),
            )),
            tokio::spawn(
                self.queue
                    .clone()
                    .run(Duration::from_secs(self.config.drain_interval_secs), shutdown.clone()),
            ),
            tokio::spawn(
                self.sync
                    .clone()
                    .run(Duration::from_secs(self.config.sync_tick_secs), shutdown.clone()),
            ),
        ];

        if let Some(endpoint) = self.config.heartbeat_endpoint.clone() {
            tasks.push(tokio::spawn(heartbeat_loop(
                self.transport.clone(),
                self.network.clone(),
                endpoint,
                Duration::from_secs(self.config.heartbeat_interval_secs),
                shutdown.clone(),
            )));
        }

        if self.network.is_online() {
            let sync = self.sync.clone();
            tasks.push(tokio::spawn(async move {
                let report = sync.prefetch().await;
                debug!(resources = report.outcomes.len(), "Startup prefetch finished");
            }));
        }

        self.tasks.lock().extend(tasks);
        let _ = self.state.send(EngineState::Running);
        info!("Offline engine running");
        Ok(())
    }

    /// Stop the timers and persist final queue and sync state.
    ///
    /// Each timer finishes the pass it is in; one that overruns the grace
    /// period is aborted.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if matches!(self.state(), EngineState::ShuttingDown | EngineState::Stopped) {
            return;
        }
        info!("Initiating offline engine shutdown...");
        let _ = self.state.send(EngineState::ShuttingDown);
        self.shutdown.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for mut task in tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("Background task overran shutdown grace period, aborting");
                task.abort();
            }
        }

        self.queue.persist().await;
        self.sync.persist().await;

        let _ = self.state.send(EngineState::Stopped);
        info!("Offline engine shutdown complete");
    }
}

async fn sweep_loop(cache: Arc<CacheStore>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // first tick is immediate; hydration already purged expired rows
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                cache.sweep_expired().await;
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Cache sweeper stopped");
}

/// Probe `endpoint` and flip connectivity from the result. Any HTTP response
/// counts as reachable; only transport failures mark the engine offline.
async fn heartbeat_loop(
    transport: Arc<dyn Transport>,
    network: NetworkMonitor,
    endpoint: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let probe = Request::get(endpoint.clone()).with_timeout(HEARTBEAT_TIMEOUT);
                let reachable = match dispatch(transport.as_ref(), probe).await {
                    Ok(_) => true,
                    Err(e) => {
                        debug!(error = %e, "Heartbeat failed");
                        false
                    }
                };
                if network.set_online(reachable) {
                    info!(online = reachable, "Heartbeat changed connectivity");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Heartbeat stopped");
}
