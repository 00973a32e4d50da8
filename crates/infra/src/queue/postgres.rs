//! Postgres-backed mission queue store.
//!
//! The queue fields live directly on the `missions` table (see
//! `migrations/0001_mission_refresh_queues.sql`). Every operation is a single
//! statement, so atomicity comes from Postgres row locking rather than from an
//! explicit transaction:
//!
//! - `compare_and_set` is one `UPDATE ... WHERE col IS NOT DISTINCT FROM $expected`;
//!   of two concurrent claims on the same row, the second re-evaluates its
//!   `WHERE` after the first commits and matches nothing.
//! - `find_earliest_eligible` is served by the partial index on `(col, id)`.
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | PoolClosed / PoolTimedOut / Io / Tls | `Unavailable` |
//! | Database, SQLSTATE class 08, 53, 57P, or 40001 / 40P01 | `Unavailable` |
//! | Database (any other code) | `Rejected` |
//! | Configuration | `Rejected` |
//! | ColumnDecode / Decode / ColumnNotFound | `Corrupt` |
//! | Other | `Unavailable` |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use bannergress_core::{MissionId, MissionQueueRecord, QueueKind};

use super::store::{BacklogStats, EligibleMission, MissionQueueStore, StoreError};

/// Column holding the queued-since timestamp for `kind`.
///
/// Only ever interpolated into SQL from this fixed mapping.
fn queue_column(kind: QueueKind) -> &'static str {
    match kind {
        QueueKind::Author => "author_update_queued_since",
        QueueKind::Status => "status_update_queued_since",
    }
}

/// Postgres mission queue store.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresMissionStore {
    pool: Arc<PgPool>,
}

impl PostgresMissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect to `database_url` and wrap the resulting pool.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl MissionQueueStore for PostgresMissionStore {
    #[instrument(skip(self), fields(kind = %kind), err)]
    async fn find_earliest_eligible(
        &self,
        kind: QueueKind,
        before: DateTime<Utc>,
    ) -> Result<Option<EligibleMission>, StoreError> {
        let column = queue_column(kind);
        let sql = format!(
            r#"
            SELECT id, {column} AS queued_since
            FROM missions
            WHERE {column} IS NOT NULL AND {column} < $1
            ORDER BY {column} ASC, id ASC
            LIMIT 1
            "#
        );

        let row = sqlx::query(&sql)
            .bind(before)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_earliest_eligible", e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("find_earliest_eligible", e))?;
        let queued_since: DateTime<Utc> = row
            .try_get("queued_since")
            .map_err(|e| map_sqlx_error("find_earliest_eligible", e))?;

        Ok(Some(EligibleMission {
            mission_id: decode_mission_id(id)?,
            queued_since,
        }))
    }

    #[instrument(skip(self), fields(mission_id = %mission_id), err)]
    async fn load(&self, mission_id: &MissionId) -> Result<Option<MissionQueueRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, author_update_queued_since, status_update_queued_since
            FROM missions
            WHERE id = $1
            "#,
        )
        .bind(mission_id.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load", e))?;

        match row {
            Some(row) => {
                let record = MissionQueueRow::from_row(&row)
                    .map_err(|e| map_sqlx_error("load", e))?;
                Ok(Some(record.try_into()?))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(mission_id = %mission_id, kind = %kind), err)]
    async fn compare_and_set(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        expected: Option<DateTime<Utc>>,
        new: Option<DateTime<Utc>>,
    ) -> Result<bool, StoreError> {
        let column = queue_column(kind);
        // One round trip that also tells "missing" apart from "value differed".
        let sql = format!(
            r#"
            WITH target AS (
                SELECT id FROM missions WHERE id = $1
            ),
            swapped AS (
                UPDATE missions
                SET {column} = $3
                WHERE id = $1 AND {column} IS NOT DISTINCT FROM $2
                RETURNING id
            )
            SELECT
                EXISTS (SELECT 1 FROM target) AS found,
                EXISTS (SELECT 1 FROM swapped) AS swapped
            "#
        );

        let row = sqlx::query(&sql)
            .bind(mission_id.as_str())
            .bind(expected)
            .bind(new)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("compare_and_set", e))?;

        let found: bool = row
            .try_get("found")
            .map_err(|e| map_sqlx_error("compare_and_set", e))?;
        let swapped: bool = row
            .try_get("swapped")
            .map_err(|e| map_sqlx_error("compare_and_set", e))?;

        if !found {
            return Err(StoreError::NotFound(mission_id.clone()));
        }
        Ok(swapped)
    }

    #[instrument(skip(self), fields(mission_id = %mission_id, kind = %kind), err)]
    async fn set_queued_since(
        &self,
        mission_id: &MissionId,
        kind: QueueKind,
        value: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let column = queue_column(kind);
        let sql = format!("UPDATE missions SET {column} = $2 WHERE id = $1");

        let result = sqlx::query(&sql)
            .bind(mission_id.as_str())
            .bind(value)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_queued_since", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(mission_id.clone()));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %kind), err)]
    async fn backlog_stats(
        &self,
        kind: QueueKind,
        now: DateTime<Utc>,
    ) -> Result<BacklogStats, StoreError> {
        let column = queue_column(kind);
        let sql = format!(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE {column} <= $1) AS waiting,
                COUNT(*) FILTER (WHERE {column} > $1) AS leased
            FROM missions
            WHERE {column} IS NOT NULL
            "#
        );

        let row = sqlx::query(&sql)
            .bind(now)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("backlog_stats", e))?;

        let waiting: i64 = row
            .try_get("waiting")
            .map_err(|e| map_sqlx_error("backlog_stats", e))?;
        let leased: i64 = row
            .try_get("leased")
            .map_err(|e| map_sqlx_error("backlog_stats", e))?;

        Ok(BacklogStats {
            waiting: waiting.max(0) as usize,
            leased: leased.max(0) as usize,
        })
    }
}

fn decode_mission_id(raw: String) -> Result<MissionId, StoreError> {
    MissionId::new(raw).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Whether a SQLSTATE code describes a condition that may clear on its own:
/// lost connections, serialization failures and deadlocks, resource
/// exhaustion, and operator intervention such as a restart.
fn is_transient_sqlstate(code: &str) -> bool {
    matches!(code, "40001" | "40P01")
        || code.starts_with("08")
        || code.starts_with("53")
        || code.starts_with("57P")
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code() {
                Some(code) if is_transient_sqlstate(code.as_ref()) => {
                    StoreError::Unavailable(msg)
                }
                Some(code) => StoreError::Rejected(format!("{} (SQLSTATE {})", msg, code)),
                None => StoreError::Rejected(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::Configuration(_) => {
            StoreError::Rejected(format!("misconfigured store in {}: {}", operation, err))
        }
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(format!("failed to decode row in {}: {}", operation, err))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct MissionQueueRow {
    id: String,
    author_update_queued_since: Option<DateTime<Utc>>,
    status_update_queued_since: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MissionQueueRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(MissionQueueRow {
            id: row.try_get("id")?,
            author_update_queued_since: row.try_get("author_update_queued_since")?,
            status_update_queued_since: row.try_get("status_update_queued_since")?,
        })
    }
}

impl TryFrom<MissionQueueRow> for MissionQueueRecord {
    type Error = StoreError;

    fn try_from(row: MissionQueueRow) -> Result<Self, Self::Error> {
        Ok(MissionQueueRecord {
            id: decode_mission_id(row.id)?,
            author_update_queued_since: row.author_update_queued_since,
            status_update_queued_since: row.status_update_queued_since,
        })
    }
}
