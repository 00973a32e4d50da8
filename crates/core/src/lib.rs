//! `bannergress-core`: domain primitives for the mission refresh queues.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;
pub mod mission;
pub mod queue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{MissionId, WorkerId};
pub use mission::MissionQueueRecord;
pub use queue::{QueueKind, QueueState, is_eligible};
