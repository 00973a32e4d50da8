//! Infrastructure layer: queue storage, lease coordination, workers.

pub mod queue;
pub mod workers;

pub use queue::{
    BacklogStats, ConfigError, InMemoryMissionStore, LeaseCoordinator, LeaseQueue, MissionLease,
    MissionQueueStore, PostgresMissionStore, QueueConfig, QueueError, StoreError,
};
pub use workers::{RefreshHandler, RefreshOutcome, RefreshWorker, RefreshWorkerConfig};
