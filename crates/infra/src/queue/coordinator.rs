//! Lease coordinator: enqueue, dequeue-with-lease and satisfy.
//!
//! One [`LeaseQueue`] implements the state machine for a single
//! [`QueueKind`]; [`LeaseCoordinator`] instantiates it once per kind and
//! exposes the author/status operations on top.
//!
//! ```text
//!  not-queued --queue_update--> waiting(T=now)
//!  waiting(T) --dequeue_update (T<now)--> leased(T=now+lease)
//!  leased(T)  --dequeue_update (T<now)--> leased(T=now+lease)
//!  waiting|leased --satisfy_update--> not-queued
//! ```
//!
//! No locks are held here. A dequeue finds the oldest eligible mission and
//! then claims it with a compare-and-set against the timestamp it observed;
//! if another worker claimed it first the swap fails and the next candidate
//! is tried. Every lost swap means some other worker changed that mission's
//! timestamp, so the loop ends on any finite backlog.
//!
//! Timestamps are truncated to microseconds before they are compared or
//! written, matching what `TIMESTAMPTZ` can hold.

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::debug;

use bannergress_core::{Clock, MissionId, QueueKind, QueueState};

use super::config::{ConfigError, QueueConfig};
use super::store::{BacklogStats, MissionQueueStore, StoreError};

/// Lease coordinator error.
///
/// An empty queue is not an error; see [`LeaseQueue::dequeue_update`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl QueueError {
    /// Whether the failure is transient infrastructure trouble the caller may
    /// retry on its next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::Unavailable(_)))
    }

    /// Whether the caller referenced a mission that no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::Store(StoreError::NotFound(_)))
    }
}

/// A claim on one mission for one kind, valid until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissionLease {
    pub mission_id: MissionId,
    pub kind: QueueKind,
    pub expires_at: DateTime<Utc>,
}

/// Lease queue over one timestamp field.
#[derive(Debug, Clone)]
pub struct LeaseQueue<S, C> {
    kind: QueueKind,
    store: S,
    clock: C,
    lease: chrono::Duration,
}

impl<S, C> LeaseQueue<S, C>
where
    S: MissionQueueStore,
    C: Clock,
{
    pub fn new(kind: QueueKind, store: S, clock: C, config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        Ok(Self {
            kind,
            store,
            clock,
            lease: config.lease()?,
        })
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        self.lease
    }

    /// Mark the mission waiting if it is not queued.
    ///
    /// A mission that is already waiting or leased is left untouched, so
    /// re-queuing never moves it back in line or cuts a lease short.
    pub async fn queue_update(&self, mission_id: &MissionId) -> Result<(), QueueError> {
        let now = self.now();
        let queued = self
            .store
            .compare_and_set(mission_id, self.kind, None, Some(now))
            .await?;

        if queued {
            debug!(mission_id = %mission_id, kind = %self.kind, "mission queued");
        } else {
            debug!(mission_id = %mission_id, kind = %self.kind, "mission already queued");
        }
        Ok(())
    }

    /// Claim the oldest eligible mission.
    ///
    /// Eligible means queued with a timestamp strictly before now. The
    /// claimed mission's timestamp moves to `now + lease`, which hides it
    /// from other dequeues until the lease runs out. Returns `None` only when
    /// nothing is eligible.
    pub async fn dequeue_update(&self) -> Result<Option<MissionLease>, QueueError> {
        let mut lost = 0u32;
        loop {
            let now = self.now();
            let Some(candidate) = self.store.find_earliest_eligible(self.kind, now).await? else {
                return Ok(None);
            };

            let expires_at = now + self.lease;
            let claimed = match self
                .store
                .compare_and_set(
                    &candidate.mission_id,
                    self.kind,
                    Some(candidate.queued_since),
                    Some(expires_at),
                )
                .await
            {
                Ok(claimed) => claimed,
                // Deleted by its owner between the lookup and the claim.
                Err(StoreError::NotFound(_)) => false,
                Err(e) => return Err(e.into()),
            };

            if claimed {
                debug!(
                    mission_id = %candidate.mission_id,
                    kind = %self.kind,
                    queued_since = %candidate.queued_since,
                    expires_at = %expires_at,
                    lost_races = lost,
                    "mission leased"
                );
                return Ok(Some(MissionLease {
                    mission_id: candidate.mission_id,
                    kind: self.kind,
                    expires_at,
                }));
            }

            lost += 1;
            debug!(
                mission_id = %candidate.mission_id,
                kind = %self.kind,
                lost_races = lost,
                "lost claim race"
            );
        }
    }

    /// Take the mission out of the queue, whatever state it is in.
    ///
    /// Acknowledges a finished refresh and cancels any outstanding lease.
    pub async fn satisfy_update(&self, mission_id: &MissionId) -> Result<(), QueueError> {
        self.store
            .set_queued_since(mission_id, self.kind, None)
            .await?;
        debug!(mission_id = %mission_id, kind = %self.kind, "mission satisfied");
        Ok(())
    }

    /// Whether `lease` has run out, i.e. another dequeue may already have
    /// handed the same mission to someone else.
    pub fn lease_lapsed(&self, lease: &MissionLease) -> bool {
        lease.expires_at < self.now()
    }

    /// Current state of one mission in this queue.
    pub async fn state(&self, mission_id: &MissionId) -> Result<QueueState, QueueError> {
        let record = self
            .store
            .load(mission_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(mission_id.clone()))?;
        Ok(record.state(self.kind, self.now()))
    }

    /// Waiting and leased counts for this queue.
    pub async fn stats(&self) -> Result<BacklogStats, QueueError> {
        Ok(self.store.backlog_stats(self.kind, self.now()).await?)
    }
}

/// Author and status refresh queues over one shared mission store.
#[derive(Debug, Clone)]
pub struct LeaseCoordinator<S, C> {
    author: LeaseQueue<S, C>,
    status: LeaseQueue<S, C>,
}

impl<S, C> LeaseCoordinator<S, C>
where
    S: MissionQueueStore + Clone,
    C: Clock + Clone,
{
    pub fn new(store: S, clock: C, config: QueueConfig) -> Result<Self, QueueError> {
        Ok(Self {
            author: LeaseQueue::new(QueueKind::Author, store.clone(), clock.clone(), &config)?,
            status: LeaseQueue::new(QueueKind::Status, store, clock, &config)?,
        })
    }
}

impl<S, C> LeaseCoordinator<S, C>
where
    S: MissionQueueStore,
    C: Clock,
{
    /// The queue for one kind.
    pub fn queue(&self, kind: QueueKind) -> &LeaseQueue<S, C> {
        match kind {
            QueueKind::Author => &self.author,
            QueueKind::Status => &self.status,
        }
    }

    pub async fn queue_update_author(&self, mission_id: &MissionId) -> Result<(), QueueError> {
        self.author.queue_update(mission_id).await
    }

    pub async fn queue_update_status(&self, mission_id: &MissionId) -> Result<(), QueueError> {
        self.status.queue_update(mission_id).await
    }

    pub async fn dequeue_update_author(&self) -> Result<Option<MissionLease>, QueueError> {
        self.author.dequeue_update().await
    }

    pub async fn dequeue_update_status(&self) -> Result<Option<MissionLease>, QueueError> {
        self.status.dequeue_update().await
    }

    pub async fn satisfy_update_author(&self, mission_id: &MissionId) -> Result<(), QueueError> {
        self.author.satisfy_update(mission_id).await
    }

    pub async fn satisfy_update_status(&self, mission_id: &MissionId) -> Result<(), QueueError> {
        self.status.satisfy_update(mission_id).await
    }

    pub async fn queue_state(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
    ) -> Result<QueueState, QueueError> {
        self.queue(kind).state(mission_id).await
    }

    pub async fn backlog_stats(&self, kind: QueueKind) -> Result<BacklogStats, QueueError> {
        self.queue(kind).stats().await
    }
}
