//! Delivery job storage.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

use super::{fmt_ts, lock_conn, open_file, open_in_memory, parse_ts, parse_uuid};
use crate::error::{CourierError, CourierResult};
use crate::types::{DeliveryJob, JobOrigin, JobStatus, NewJob};

/// Result of inserting a job.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// A new job was written.
    Created(DeliveryJob),
    /// An open job already exists for the same (endpoint, event) pair.
    Duplicate,
}

impl InsertOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Trait for delivery job storage operations.
///
/// A claim is identified by the token passed to `try_claim`. State
/// transitions out of `delivering` require that same token and return
/// whether the row actually moved, so a pass that lost its claim (e.g. to
/// the stale-claim watchdog, followed by another pass's claim) cannot
/// overwrite someone else's result.
#[cfg_attr(test, mockall::automock)]
pub trait JobStore: Send + Sync {
    /// Insert a job, honoring the open-pair dedup rule for organic and
    /// backfill jobs.
    fn insert(&self, job: NewJob) -> CourierResult<InsertOutcome>;

    /// Get a job by ID.
    fn get(&self, id: Uuid) -> CourierResult<Option<DeliveryJob>>;

    /// IDs of pending jobs due at `now`, oldest due first.
    fn due_candidates(&self, now: DateTime<Utc>, limit: usize) -> CourierResult<Vec<Uuid>>;

    /// Atomically move a due job from `pending` to `delivering` under
    /// `claim_id`, stamping `claimed_at = now`.
    ///
    /// Returns the claimed job, or `None` when another pass got it first.
    fn try_claim(
        &self,
        id: Uuid,
        claim_id: Uuid,
        now: DateTime<Utc>,
    ) -> CourierResult<Option<DeliveryJob>>;

    /// Record success after `attempts` attempts.
    fn mark_succeeded(
        &self,
        id: Uuid,
        claim_id: Uuid,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> CourierResult<bool>;

    /// Put the job back to `pending` for another attempt at `next_attempt_at`.
    fn schedule_retry(
        &self,
        id: Uuid,
        claim_id: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> CourierResult<bool>;

    /// Terminal: all attempts used.
    fn mark_exhausted(
        &self,
        id: Uuid,
        claim_id: Uuid,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> CourierResult<bool>;

    /// Terminal: non-retryable configuration problem. Attempts are untouched.
    fn mark_failed(
        &self,
        id: Uuid,
        claim_id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> CourierResult<bool>;

    /// Return jobs claimed before `claimed_before` and still `delivering`
    /// to `pending`, due immediately, dropping their claim token. Returns
    /// how many were recovered.
    fn recover_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CourierResult<usize>;

    /// Whether any organic or backfill job, in any state, exists for the pair.
    fn has_job_for(&self, endpoint_id: Uuid, event_id: Uuid) -> CourierResult<bool>;

    /// Most recent jobs for an endpoint.
    fn list_for_endpoint(&self, endpoint_id: Uuid, limit: usize) -> CourierResult<Vec<DeliveryJob>>;

    /// Job counts per status.
    fn count_by_status(&self) -> CourierResult<HashMap<JobStatus, usize>>;
}

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

const JOB_COLUMNS: &str = "id, webhook_endpoint_id, transaction_event_id, event_type, payload, \
     status, origin, attempts, max_attempts, next_attempt_at, last_error, claim_id, claimed_at, \
     created_at, updated_at";

impl SqliteJobStore {
    /// Create a new store at the given path.
    pub fn new(path: impl AsRef<Path>) -> CourierResult<Self> {
        let store = Self {
            conn: Mutex::new(open_file(path)?),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing)
    pub fn in_memory() -> CourierResult<Self> {
        let store = Self {
            conn: Mutex::new(open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CourierResult<()> {
        let conn = lock_conn!(self.conn);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS delivery_jobs (
                id TEXT PRIMARY KEY,
                webhook_endpoint_id TEXT NOT NULL,
                transaction_event_id TEXT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL,
                origin TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                next_attempt_at TEXT NOT NULL,
                last_error TEXT,
                claim_id TEXT,
                claimed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (max_attempts >= 1),
                CHECK (attempts >= 0 AND attempts <= max_attempts)
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_due ON delivery_jobs(status, next_attempt_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_claimed ON delivery_jobs(status, claimed_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_endpoint ON delivery_jobs(webhook_endpoint_id);
            CREATE INDEX IF NOT EXISTS idx_jobs_pair
                ON delivery_jobs(webhook_endpoint_id, transaction_event_id);

            CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_open_pair
                ON delivery_jobs(webhook_endpoint_id, transaction_event_id)
                WHERE transaction_event_id IS NOT NULL
                  AND origin IN ('organic', 'backfill')
                  AND status IN ('pending', 'delivering');
        "#,
        )?;
        Ok(())
    }

    fn row_to_job(row: &Row<'_>) -> CourierResult<DeliveryJob> {
        let id: String = row.get(0)?;
        let endpoint_id: String = row.get(1)?;
        let event_id: Option<String> = row.get(2)?;
        let event_type: String = row.get(3)?;
        let payload: String = row.get(4)?;
        let status: String = row.get(5)?;
        let origin: String = row.get(6)?;
        let attempts: u32 = row.get(7)?;
        let max_attempts: u32 = row.get(8)?;
        let next_attempt_at: String = row.get(9)?;
        let last_error: Option<String> = row.get(10)?;
        let claim_id: Option<String> = row.get(11)?;
        let claimed_at: Option<String> = row.get(12)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;

        Ok(DeliveryJob {
            id: parse_uuid(&id)?,
            webhook_endpoint_id: parse_uuid(&endpoint_id)?,
            transaction_event_id: event_id.as_deref().map(parse_uuid).transpose()?,
            event_type,
            payload: serde_json::from_str(&payload)?,
            status: JobStatus::from_str(&status)
                .map_err(|_| CourierError::corrupt_row(format!("bad job status '{}'", status)))?,
            origin: JobOrigin::from_str(&origin)
                .map_err(|_| CourierError::corrupt_row(format!("bad job origin '{}'", origin)))?,
            attempts,
            max_attempts,
            next_attempt_at: parse_ts(&next_attempt_at)?,
            last_error,
            claim_id: claim_id.as_deref().map(parse_uuid).transpose()?,
            claimed_at: claimed_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    }

    fn get_locked(conn: &Connection, id: Uuid) -> CourierResult<Option<DeliveryJob>> {
        let sql = format!("SELECT {} FROM delivery_jobs WHERE id = ?1", JOB_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_job(row)))
            .optional()?
            .transpose()
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: NewJob) -> CourierResult<InsertOutcome> {
        let job = job.into_job(Utc::now());
        let payload = serde_json::to_string(&job.payload)?;
        let conn = lock_conn!(self.conn);

        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO delivery_jobs
               (id, webhook_endpoint_id, transaction_event_id, event_type, payload, status, origin,
                attempts, max_attempts, next_attempt_at, last_error, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"#,
            params![
                job.id.to_string(),
                job.webhook_endpoint_id.to_string(),
                job.transaction_event_id.map(|id| id.to_string()),
                job.event_type,
                payload,
                job.status.as_ref(),
                job.origin.as_ref(),
                job.attempts,
                job.max_attempts,
                fmt_ts(&job.next_attempt_at),
                job.last_error,
                fmt_ts(&job.created_at),
                fmt_ts(&job.updated_at),
            ],
        )?;

        if inserted == 0 {
            return Ok(InsertOutcome::Duplicate);
        }
        // Re-read so timestamps carry the stored precision.
        Self::get_locked(&conn, job.id)?
            .map(InsertOutcome::Created)
            .ok_or_else(|| CourierError::database("inserted job vanished"))
    }

    fn get(&self, id: Uuid) -> CourierResult<Option<DeliveryJob>> {
        let conn = lock_conn!(self.conn);
        Self::get_locked(&conn, id)
    }

    fn due_candidates(&self, now: DateTime<Utc>, limit: usize) -> CourierResult<Vec<Uuid>> {
        let conn = lock_conn!(self.conn);
        let mut stmt = conn.prepare(
            r#"SELECT id FROM delivery_jobs
               WHERE status = 'pending' AND next_attempt_at <= ?1
               ORDER BY next_attempt_at ASC
               LIMIT ?2"#,
        )?;
        let ids = stmt
            .query_map(params![fmt_ts(&now), limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids.iter().map(|id| parse_uuid(id)).collect()
    }

    fn try_claim(
        &self,
        id: Uuid,
        claim_id: Uuid,
        now: DateTime<Utc>,
    ) -> CourierResult<Option<DeliveryJob>> {
        let conn = lock_conn!(self.conn);
        let ts = fmt_ts(&now);
        let claimed = conn.execute(
            r#"UPDATE delivery_jobs
               SET status = 'delivering', claim_id = ?3, claimed_at = ?2, updated_at = ?2
               WHERE id = ?1 AND status = 'pending' AND next_attempt_at <= ?2"#,
            params![id.to_string(), ts, claim_id.to_string()],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        Self::get_locked(&conn, id)
    }

    fn mark_succeeded(
        &self,
        id: Uuid,
        claim_id: Uuid,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> CourierResult<bool> {
        let conn = lock_conn!(self.conn);
        let changed = conn.execute(
            r#"UPDATE delivery_jobs
               SET status = 'succeeded', attempts = ?3, last_error = NULL,
                   claim_id = NULL, claimed_at = NULL, updated_at = ?4
               WHERE id = ?1 AND claim_id = ?2 AND status = 'delivering'
                 AND ?3 <= max_attempts"#,
            params![id.to_string(), claim_id.to_string(), attempts, fmt_ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn schedule_retry(
        &self,
        id: Uuid,
        claim_id: Uuid,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> CourierResult<bool> {
        let conn = lock_conn!(self.conn);
        let changed = conn.execute(
            r#"UPDATE delivery_jobs
               SET status = 'pending', attempts = ?3, next_attempt_at = ?4,
                   last_error = ?5, claim_id = NULL, claimed_at = NULL, updated_at = ?6
               WHERE id = ?1 AND claim_id = ?2 AND status = 'delivering'
                 AND ?3 < max_attempts"#,
            params![
                id.to_string(),
                claim_id.to_string(),
                attempts,
                fmt_ts(&next_attempt_at),
                error,
                fmt_ts(&now)
            ],
        )?;
        Ok(changed == 1)
    }

    fn mark_exhausted(
        &self,
        id: Uuid,
        claim_id: Uuid,
        attempts: u32,
        error: &str,
        now: DateTime<Utc>,
    ) -> CourierResult<bool> {
        let conn = lock_conn!(self.conn);
        let changed = conn.execute(
            r#"UPDATE delivery_jobs
               SET status = 'exhausted', attempts = max_attempts, last_error = ?4,
                   claim_id = NULL, claimed_at = NULL, updated_at = ?5
               WHERE id = ?1 AND claim_id = ?2 AND status = 'delivering'
                 AND ?3 >= max_attempts"#,
            params![id.to_string(), claim_id.to_string(), attempts, error, fmt_ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn mark_failed(
        &self,
        id: Uuid,
        claim_id: Uuid,
        error: &str,
        now: DateTime<Utc>,
    ) -> CourierResult<bool> {
        let conn = lock_conn!(self.conn);
        let changed = conn.execute(
            r#"UPDATE delivery_jobs
               SET status = 'failed', last_error = ?3,
                   claim_id = NULL, claimed_at = NULL, updated_at = ?4
               WHERE id = ?1 AND claim_id = ?2 AND status = 'delivering'"#,
            params![id.to_string(), claim_id.to_string(), error, fmt_ts(&now)],
        )?;
        Ok(changed == 1)
    }

    fn recover_stale(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CourierResult<usize> {
        let conn = lock_conn!(self.conn);
        let recovered = conn.execute(
            r#"UPDATE delivery_jobs
               SET status = 'pending', next_attempt_at = ?2, updated_at = ?2,
                   claim_id = NULL, claimed_at = NULL,
                   last_error = 'claim expired before an outcome was recorded'
               WHERE status = 'delivering' AND claimed_at < ?1"#,
            params![fmt_ts(&claimed_before), fmt_ts(&now)],
        )?;
        Ok(recovered)
    }

    fn has_job_for(&self, endpoint_id: Uuid, event_id: Uuid) -> CourierResult<bool> {
        let conn = lock_conn!(self.conn);
        let found: Option<i64> = conn
            .query_row(
                r#"SELECT 1 FROM delivery_jobs
                   WHERE webhook_endpoint_id = ?1 AND transaction_event_id = ?2
                     AND origin IN ('organic', 'backfill')
                   LIMIT 1"#,
                params![endpoint_id.to_string(), event_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn list_for_endpoint(&self, endpoint_id: Uuid, limit: usize) -> CourierResult<Vec<DeliveryJob>> {
        let conn = lock_conn!(self.conn);
        let sql = format!(
            "SELECT {} FROM delivery_jobs WHERE webhook_endpoint_id = ?1 \
             ORDER BY created_at DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(params![endpoint_id.to_string(), limit as i64], |row| {
                Ok(Self::row_to_job(row))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        jobs.into_iter().collect()
    }

    fn count_by_status(&self) -> CourierResult<HashMap<JobStatus, usize>> {
        let conn = lock_conn!(self.conn);
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM delivery_jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = HashMap::new();
        for (status, count) in rows {
            let status = JobStatus::from_str(&status)
                .map_err(|_| CourierError::corrupt_row(format!("bad job status '{}'", status)))?;
            counts.insert(status, count as usize);
        }
        Ok(counts)
    }
}
