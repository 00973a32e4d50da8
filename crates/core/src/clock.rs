//! Time source abstraction.
//!
//! Queue eligibility and lease expiry are both wall-clock comparisons, so every
//! component that needs "now" takes a [`Clock`] instead of calling `Utc::now()`
//! directly. Production wiring uses [`SystemClock`]; tests drive a
//! [`ManualClock`] to simulate lease expiry without sleeping.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Source of the current instant.
pub trait Clock: Send + Sync + core::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Cloning yields a handle to the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// A clock starting at the UNIX epoch, handy for "T=0" style scenarios.
    pub fn at_epoch() -> Self {
        Self::new(Utc.timestamp_opt(0, 0).single().unwrap_or_default())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap_or_else(|e| e.into_inner())
    }
}
