//! Lease-based mission refresh queues.
//!
//! ## Design
//!
//! - Two independent queues (author, status) over the same mission records
//! - Queue state is one nullable timestamp per (mission, kind); no status flag
//! - A lease is a timestamp in the future; expiry needs no sweeper
//! - Claims are compare-and-set on the observed timestamp, so concurrent
//!   workers never receive the same mission for the same kind
//! - At-least-once: a worker that dies mid-refresh just lets its lease lapse
//!
//! ## Components
//!
//! - `MissionQueueStore`: persistence port (in-memory or Postgres)
//! - `LeaseQueue`: the state machine for one kind
//! - `LeaseCoordinator`: both queues, author/status operations
//! - `QueueConfig`: lease duration and claim attempt bound

pub mod config;
pub mod coordinator;
pub mod postgres;
pub mod store;

pub use config::{ConfigError, QueueConfig};
pub use coordinator::{LeaseCoordinator, LeaseQueue, MissionLease, QueueError};
pub use postgres::PostgresMissionStore;
pub use store::{BacklogStats, EligibleMission, InMemoryMissionStore, MissionQueueStore, StoreError};
