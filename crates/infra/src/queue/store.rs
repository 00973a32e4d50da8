//! Queue state storage.
//!
//! The store owns the two queued-since columns of each mission and nothing
//! else. It exposes exactly what the lease coordinator needs: an ordered
//! "earliest eligible" lookup, point loads, and an atomic compare-and-set on a
//! single (mission, kind) timestamp. Everything else about a mission lives in
//! the wider domain.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use bannergress_core::{MissionId, MissionQueueRecord, QueueKind, QueueState, is_eligible};

/// A mission found eligible for one kind, together with the timestamp it was
/// observed with. The timestamp is the expected value for the follow-up
/// compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleMission {
    pub mission_id: MissionId,
    pub queued_since: DateTime<Utc>,
}

/// Per-kind backlog counts at an instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BacklogStats {
    /// Queued with a timestamp at or before `now`.
    pub waiting: usize,
    /// Queued with a timestamp after `now` (lease outstanding).
    pub leased: usize,
}

impl BacklogStats {
    pub fn total(&self) -> usize {
        self.waiting + self.leased
    }
}

/// Store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// The referenced mission does not exist.
    #[error("mission not found: {0}")]
    NotFound(MissionId),
    /// The backing store could not be reached or was temporarily unable to
    /// serve the operation. Callers may retry later.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The backing store refused the operation in a way a retry will not
    /// fix (missing table or column, constraint violation).
    #[error("store rejected operation: {0}")]
    Rejected(String),
    /// Stored data could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence port for mission queue timestamps.
#[async_trait]
pub trait MissionQueueStore: Send + Sync {
    /// The mission with the smallest non-null timestamp for `kind` strictly
    /// earlier than `before`. Ties are broken by mission id ascending.
    async fn find_earliest_eligible(
        &self,
        kind: QueueKind,
        before: DateTime<Utc>,
    ) -> Result<Option<EligibleMission>, StoreError>;

    /// Load the queue fields of one mission.
    async fn load(&self, mission_id: &MissionId) -> Result<Option<MissionQueueRecord>, StoreError>;

    /// Atomically replace the `kind` timestamp with `new` if it currently
    /// equals `expected`. Returns whether the swap happened.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown mission.
    async fn compare_and_set(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError>;

    /// Unconditionally write the `kind` timestamp.
    ///
    /// Fails with [`StoreError::NotFound`] for an unknown mission.
    async fn set_queued_since(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        value: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Count waiting and leased missions for `kind` as of `now`.
    async fn backlog_stats(
        &self,
        kind: QueueKind,
        now: DateTime<Utc>,
    ) -> Result<BacklogStats, StoreError>;
}

#[async_trait]
impl<T: MissionQueueStore + ?Sized> MissionQueueStore for Arc<T> {
    async fn find_earliest_eligible(
        &self,
        kind: QueueKind,
        before: DateTime<Utc>,
    ) -> Result<Option<EligibleMission>, StoreError> {
        (**self).find_earliest_eligible(kind, before).await
    }

    async fn load(&self, mission_id: &MissionId) -> Result<Option<MissionQueueRecord>, StoreError> {
        (**self).load(mission_id).await
    }

    async fn compare_and_set(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        (**self).compare_and_set(mission_id, kind, expected, new).await
    }

    async fn set_queued_since(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        value: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        (**self).set_queued_since(mission_id, kind, value).await
    }

    async fn backlog_stats(
        &self,
        kind: QueueKind,
        now: DateTime<Utc>,
    ) -> Result<BacklogStats, StoreError> {
        (**self).backlog_stats(kind, now).await
    }
}

/// In-memory mission store for tests/dev.
///
/// A single lock guards all records, so each compare-and-set is atomic with
/// respect to every other operation.
#[derive(Debug, Default)]
pub struct InMemoryMissionStore {
    missions: RwLock<BTreeMap<MissionId, MissionQueueRecord>>,
}

impl InMemoryMissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a mission, as the owning domain would when it imports one.
    /// Replaces any existing record with the same id.
    pub fn insert(&self, record: MissionQueueRecord) -> Result<(), StoreError> {
        let mut missions = self.write()?;
        missions.insert(record.id.clone(), record);
        Ok(())
    }

    /// Register a mission that is in neither queue.
    pub fn insert_new(&self, mission_id: MissionId) -> Result<(), StoreError> {
        self.insert(MissionQueueRecord::new(mission_id))
    }

    /// Drop a mission, as the owning domain would when it deletes one.
    pub fn remove(&self, mission_id: &MissionId) -> Result<Option<MissionQueueRecord>, StoreError> {
        let mut missions = self.write()?;
        Ok(missions.remove(mission_id))
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.read()?.is_empty())
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<MissionId, MissionQueueRecord>>, StoreError>
    {
        self.missions
            .read()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<MissionId, MissionQueueRecord>>, StoreError>
    {
        self.missions
            .write()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))
    }
}

#[async_trait]
impl MissionQueueStore for InMemoryMissionStore {
    async fn find_earliest_eligible(
        &self,
        kind: QueueKind,
        before: DateTime<Utc>,
    ) -> Result<Option<EligibleMission>, StoreError> {
        let missions = self.read()?;

        // BTreeMap iterates in id order, so min_by_key on the timestamp keeps
        // the smallest id among equal timestamps.
        let earliest = missions
            .values()
            .filter_map(|m| {
                let ts = m.queued_since(kind);
                is_eligible(ts, before).then(|| (ts, m))
            })
            .min_by_key(|(ts, _)| *ts)
            .and_then(|(ts, m)| {
                ts.map(|queued_since| EligibleMission {
                    mission_id: m.id.clone(),
                    queued_since,
                })
            });

        Ok(earliest)
    }

    async fn load(&self, mission_id: &MissionId) -> Result<Option<MissionQueueRecord>, StoreError> {
        let missions = self.read()?;
        Ok(missions.get(mission_id).cloned())
    }

    async fn compare_and_set(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let mut missions = self.write()?;
        let record = missions
            .get_mut(mission_id)
            .ok_or_else(|| StoreError::NotFound(mission_id.clone()))?;

        if record.queued_since(kind) != expected {
            return Ok(false);
        }
        record.set_queued_since(kind, new);
        Ok(true)
    }

    async fn set_queued_since(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        value: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut missions = self.write()?;
        let record = missions
            .get_mut(mission_id)
            .ok_or_else(|| StoreError::NotFound(mission_id.clone()))?;
        record.set_queued_since(kind, value);
        Ok(())
    }

    async fn backlog_stats(
        &self,
        kind: QueueKind,
        now: DateTime<Utc>,
    ) -> Result<BacklogStats, StoreError> {
        let missions = self.read()?;
        let mut stats = BacklogStats::default();

        for record in missions.values() {
            match record.state(kind, now) {
                QueueState::NotQueued => {}
                QueueState::Waiting { .. } => stats.waiting += 1,
                QueueState::Leased { .. } => stats.leased += 1,
            }
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn mission(id: &str) -> MissionId {
        MissionId::new(id).unwrap()
    }

    #[tokio::test]
    async fn earliest_eligible_uses_strict_bound() {
        let store = InMemoryMissionStore::new();
        let now = Utc::now();

        let mut record = MissionQueueRecord::new(mission("a"));
        record.author_update_queued_since = Some(now);
        store.insert(record).unwrap();

        assert!(
            store
                .find_earliest_eligible(QueueKind::Author, now)
                .await
                .unwrap()
                .is_none()
        );

        let later = now + Duration::milliseconds(1);
        let found = store
            .find_earliest_eligible(QueueKind::Author, later)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.mission_id, mission("a"));
        assert_eq!(found.queued_since, now);
    }

    #[tokio::test]
    async fn ties_break_by_mission_id() {
        let store = InMemoryMissionStore::new();
        let t = Utc::now() - Duration::seconds(10);

        for id in ["c", "a", "b"] {
            let mut record = MissionQueueRecord::new(mission(id));
            record.status_update_queued_since = Some(t);
            store.insert(record).unwrap();
        }

        let found = store
            .find_earliest_eligible(QueueKind::Status, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.mission_id, mission("a"));
    }

    #[tokio::test]
    async fn compare_and_set_checks_expected_value() {
        let store = InMemoryMissionStore::new();
        let id = mission("a");
        store.insert_new(id.clone()).unwrap();
        let now = Utc::now();

        assert!(
            store
                .compare_and_set(&id, QueueKind::Author, None, Some(now))
                .await
                .unwrap()
        );
        // Second swap from None loses: the value is now `Some(now)`.
        assert!(
            !store
                .compare_and_set(&id, QueueKind::Author, None, Some(now))
                .await
                .unwrap()
        );

        let record = store.load(&id).await.unwrap().unwrap();
        assert_eq!(record.author_update_queued_since, Some(now));
        assert_eq!(record.status_update_queued_since, None);
    }

    #[tokio::test]
    async fn unknown_mission_is_not_found() {
        let store = InMemoryMissionStore::new();
        let id = mission("ghost");

        let err = store
            .compare_and_set(&id, QueueKind::Author, None, Some(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref m) if *m == id));

        let err = store
            .set_queued_since(&id, QueueKind::Status, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        // No phantom record was created.
        assert!(store.load(&id).await.unwrap().is_none());
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn backlog_stats_split_waiting_and_leased() {
        let store = InMemoryMissionStore::new();
        let now = Utc::now();

        let mut waiting = MissionQueueRecord::new(mission("w"));
        waiting.author_update_queued_since = Some(now - Duration::seconds(5));
        let mut leased = MissionQueueRecord::new(mission("l"));
        leased.author_update_queued_since = Some(now + Duration::seconds(30));
        leased.status_update_queued_since = Some(now - Duration::seconds(1));
        store.insert(waiting).unwrap();
        store.insert(leased).unwrap();
        store.insert_new(mission("idle")).unwrap();

        let author = store.backlog_stats(QueueKind::Author, now).await.unwrap();
        assert_eq!(author, BacklogStats { waiting: 1, leased: 1 });
        assert_eq!(author.total(), 2);

        let status = store.backlog_stats(QueueKind::Status, now).await.unwrap();
        assert_eq!(status, BacklogStats { waiting: 1, leased: 0 });
    }

    #[tokio::test]
    async fn removed_mission_disappears_from_queues() {
        let store = InMemoryMissionStore::new();
        let id = mission("gone");
        let mut record = MissionQueueRecord::new(id.clone());
        record.author_update_queued_since = Some(Utc::now() - Duration::seconds(1));
        store.insert(record.clone()).unwrap();
        assert_eq!(store.len().unwrap(), 1);

        assert_eq!(store.remove(&id).unwrap(), Some(record));
        assert!(store.remove(&id).unwrap().is_none());
        assert!(store.is_empty().unwrap());
        assert!(
            store
                .find_earliest_eligible(QueueKind::Author, Utc::now())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn poisoned_lock_is_reported_not_hidden() {
        let store = Arc::new(InMemoryMissionStore::new());
        store.insert_new(mission("a")).unwrap();

        let poisoner = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.missions.write().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(matches!(store.len(), Err(StoreError::Unavailable(_))));
        assert!(matches!(store.is_empty(), Err(StoreError::Unavailable(_))));
    }
}
