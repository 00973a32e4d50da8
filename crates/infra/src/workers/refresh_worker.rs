//! Polling worker that drains one refresh queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use bannergress_core::{Clock, QueueKind, WorkerId};

use crate::queue::{LeaseCoordinator, LeaseQueue, MissionLease, MissionQueueStore, QueueError};

/// Result of refreshing one mission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Refresh done; the mission leaves the queue.
    Refreshed,
    /// Refresh failed; the lease is left to lapse so the mission is retried.
    Failed(String),
}

/// Does the actual refresh work for a leased mission.
#[async_trait]
pub trait RefreshHandler: Send + Sync {
    async fn refresh(&self, lease: &MissionLease) -> RefreshOutcome;
}

#[async_trait]
impl<H: RefreshHandler + ?Sized> RefreshHandler for Arc<H> {
    async fn refresh(&self, lease: &MissionLease) -> RefreshOutcome {
        (**self).refresh(lease).await
    }
}

/// Refresh worker configuration.
#[derive(Debug, Clone)]
pub struct RefreshWorkerConfig {
    /// Name for logging
    pub name: String,
    /// Which queue to drain
    pub kind: QueueKind,
    /// How long to wait after finding the queue empty (or the store down)
    pub poll_interval: Duration,
    /// Identity of this worker in logs
    pub worker_id: WorkerId,
}

impl Default for RefreshWorkerConfig {
    fn default() -> Self {
        Self {
            name: "refresh-worker".to_string(),
            kind: QueueKind::Author,
            poll_interval: Duration::from_secs(1),
            worker_id: WorkerId::new(),
        }
    }
}

impl RefreshWorkerConfig {
    pub fn for_kind(kind: QueueKind) -> Self {
        Self {
            name: format!("{kind}-refresh-worker"),
            kind,
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Worker runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct WorkerStats {
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub store_errors: u64,
}

/// Handle to a spawned worker.
#[derive(Debug)]
pub struct RefreshWorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl RefreshWorkerHandle {
    /// Request graceful shutdown and wait for the current refresh to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "refresh worker task ended abnormally");
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Pulls leased missions from one queue and hands them to a handler.
///
/// On success the mission is satisfied. On failure nothing is written: the
/// lease runs out and the mission becomes eligible again for any worker.
pub struct RefreshWorker<S, C, H> {
    coordinator: Arc<LeaseCoordinator<S, C>>,
    handler: H,
    config: RefreshWorkerConfig,
    stats: Arc<Mutex<WorkerStats>>,
}

impl<S, C, H> RefreshWorker<S, C, H>
where
    S: MissionQueueStore + 'static,
    C: Clock + 'static,
    H: RefreshHandler + 'static,
{
    pub fn new(
        coordinator: Arc<LeaseCoordinator<S, C>>,
        handler: H,
        config: RefreshWorkerConfig,
    ) -> Self {
        Self {
            coordinator,
            handler,
            config,
            stats: Arc::new(Mutex::new(WorkerStats::default())),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn queue(&self) -> &LeaseQueue<S, C> {
        self.coordinator.queue(self.config.kind)
    }

    fn record(&self, update: impl FnOnce(&mut WorkerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    /// Claim and process at most one mission.
    ///
    /// Returns `None` when the queue had nothing eligible.
    pub async fn run_once(&self) -> Result<Option<RefreshOutcome>, QueueError> {
        let queue = self.queue();

        let lease = match queue.dequeue_update().await {
            Ok(Some(lease)) => lease,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.record(|s| s.store_errors += 1);
                return Err(e);
            }
        };
        self.record(|s| s.claimed += 1);

        debug!(
            worker = %self.config.name,
            worker_id = %self.config.worker_id,
            mission_id = %lease.mission_id,
            kind = %lease.kind,
            "refreshing mission"
        );

        let outcome = self.handler.refresh(&lease).await;

        match &outcome {
            RefreshOutcome::Refreshed => {
                if queue.lease_lapsed(&lease) {
                    warn!(
                        worker = %self.config.name,
                        mission_id = %lease.mission_id,
                        kind = %lease.kind,
                        expires_at = %lease.expires_at,
                        "refresh outlived its lease; mission may have been refreshed twice"
                    );
                }

                match queue.satisfy_update(&lease.mission_id).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {
                        warn!(
                            worker = %self.config.name,
                            mission_id = %lease.mission_id,
                            "mission deleted while being refreshed"
                        );
                    }
                    Err(e) => {
                        self.record(|s| s.store_errors += 1);
                        return Err(e);
                    }
                }
                self.record(|s| s.succeeded += 1);
            }
            RefreshOutcome::Failed(reason) => {
                warn!(
                    worker = %self.config.name,
                    mission_id = %lease.mission_id,
                    kind = %lease.kind,
                    retry_after = %lease.expires_at,
                    error = %reason,
                    "refresh failed; leaving lease to lapse"
                );
                self.record(|s| s.failed += 1);
            }
        }

        Ok(Some(outcome))
    }

    /// Run the worker on the current tokio runtime until shut down.
    pub fn spawn(self) -> RefreshWorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = self.stats.clone();
        let join = tokio::spawn(worker_loop(self, shutdown_rx));

        RefreshWorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }
}

async fn worker_loop<S, C, H>(worker: RefreshWorker<S, C, H>, mut shutdown_rx: watch::Receiver<bool>)
where
    S: MissionQueueStore + 'static,
    C: Clock + 'static,
    H: RefreshHandler + 'static,
{
    info!(
        worker = %worker.config.name,
        worker_id = %worker.config.worker_id,
        kind = %worker.config.kind,
        "refresh worker started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let idle = match worker.run_once().await {
            // Keep draining while there is work.
            Ok(Some(_)) => false,
            Ok(None) => true,
            Err(e) => {
                error!(
                    worker = %worker.config.name,
                    kind = %worker.config.kind,
                    error = %e,
                    retryable = e.is_retryable(),
                    "failed to process refresh queue"
                );
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(worker.config.poll_interval) => {}
            }
        }
    }

    info!(worker = %worker.config.name, "refresh worker stopped");
}
