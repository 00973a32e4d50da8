//! The slice of a mission this crate cares about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::MissionId;
use crate::queue::{QueueKind, QueueState};

/// Queue bookkeeping stored on a mission record.
///
/// The mission itself is owned elsewhere; this is only its identity plus the
/// two queued-since fields. Each field belongs to exactly one [`QueueKind`]
/// and is never touched through the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissionQueueRecord {
    pub id: MissionId,
    pub author_update_queued_since: Option<DateTime<Utc>>,
    pub status_update_queued_since: Option<DateTime<Utc>>,
}

impl MissionQueueRecord {
    /// A mission that is in neither queue.
    pub fn new(id: MissionId) -> Self {
        Self {
            id,
            author_update_queued_since: None,
            status_update_queued_since: None,
        }
    }

    pub fn id(&self) -> &MissionId {
        &self.id
    }

    pub fn queued_since(&self, kind: QueueKind) -> Option<DateTime<Utc>> {
        match kind {
            QueueKind::Author => self.author_update_queued_since,
            QueueKind::Status => self.status_update_queued_since,
        }
    }

    pub fn set_queued_since(&mut self, kind: QueueKind, value: Option<DateTime<Utc>>) {
        match kind {
            QueueKind::Author => self.author_update_queued_since = value,
            QueueKind::Status => self.status_update_queued_since = value,
        }
    }

    pub fn state(&self, kind: QueueKind, now: DateTime<Utc>) -> QueueState {
        QueueState::at(self.queued_since(kind), now)
    }
}
