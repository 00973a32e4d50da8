//! Tracing and logging setup shared by every process that runs refresh
//! workers.

/// Tracing subscriber configuration.
pub mod tracing;

pub use self::tracing::{LogFormat, init, init_for_tests, init_with};
