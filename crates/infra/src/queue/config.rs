//! Lease queue configuration.
//!
//! Read once at startup and handed to [`LeaseCoordinator::new`] as a plain
//! value; the coordinator never consults the environment itself.
//!
//! [`LeaseCoordinator::new`]: super::LeaseCoordinator::new

use std::time::Duration;

/// Environment variable holding the lease duration in whole seconds.
pub const LEASE_DURATION_ENV: &str = "BANNERGRESS_LEASE_DURATION_SECS";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("lease duration must be positive")]
    ZeroLease,
    #[error("lease duration out of range: {0:?}")]
    LeaseOutOfRange(Duration),
}

/// Lease queue configuration.
///
/// Applies uniformly to both refresh kinds. A longer lease means a crashed
/// worker's mission sits idle longer before another worker retries it; a
/// shorter lease raises the chance that a slow worker (or a skewed clock)
/// sees its lease re-claimed while it is still working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// How far into the future a dequeue pushes the mission's timestamp.
    pub lease_duration: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    pub fn with_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    pub fn with_lease_secs(self, secs: u64) -> Self {
        self.with_lease_duration(Duration::from_secs(secs))
    }

    /// Load from the process environment, falling back to defaults for unset
    /// variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(LEASE_DURATION_ENV) {
            let secs = parse_number::<u64>(LEASE_DURATION_ENV, &raw)?;
            config.lease_duration = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lease().map(|_| ())
    }

    /// The lease duration as a signed delta suitable for timestamp arithmetic.
    pub fn lease(&self) -> Result<chrono::Duration, ConfigError> {
        if self.lease_duration.is_zero() {
            return Err(ConfigError::ZeroLease);
        }
        chrono::Duration::from_std(self.lease_duration)
            .map_err(|_| ConfigError::LeaseOutOfRange(self.lease_duration))
    }
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
