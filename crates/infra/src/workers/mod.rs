//! Background workers.

pub mod refresh_worker;

pub use refresh_worker::{
    RefreshHandler, RefreshOutcome, RefreshWorker, RefreshWorkerConfig, RefreshWorkerHandle,
    WorkerStats,
};
