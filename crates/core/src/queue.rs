//! Refresh kinds and the per-(mission, kind) queue state.
//!
//! A single nullable timestamp encodes the whole state machine:
//!
//! | timestamp      | state       |
//! |----------------|-------------|
//! | `None`         | not queued  |
//! | `Some(t <= now)` | waiting since `t` |
//! | `Some(t > now)`  | leased until `t`  |
//!
//! A lease is a waiting item whose timestamp lies in the future; once the
//! lease elapses the item is eligible again without any extra bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independent refresh queues a mission can sit in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueKind {
    /// Refresh of the mission author's metadata.
    Author,
    /// Refresh of the mission's online/offline status.
    Status,
}

impl QueueKind {
    pub const ALL: [QueueKind; 2] = [QueueKind::Author, QueueKind::Status];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Author => "author",
            QueueKind::Status => "status",
        }
    }
}

impl core::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of one (mission, kind) pair at a given instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum QueueState {
    NotQueued,
    Waiting { since: DateTime<Utc> },
    Leased { until: DateTime<Utc> },
}

impl QueueState {
    /// Interpret a stored queued-since timestamp at `now`.
    pub fn at(queued_since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match queued_since {
            None => QueueState::NotQueued,
            Some(t) if t > now => QueueState::Leased { until: t },
            Some(t) => QueueState::Waiting { since: t },
        }
    }

    pub fn is_queued(&self) -> bool {
        !matches!(self, QueueState::NotQueued)
    }
}

/// Whether a stored timestamp makes the item claimable at `now`.
///
/// Strictly earlier than `now`: a lease that ends exactly at `now` is not yet
/// claimable.
pub fn is_eligible(queued_since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    queued_since.is_some_and(|t| t < now)
}
