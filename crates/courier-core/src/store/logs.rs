//! Delivery log storage: an append-only audit trail, one row per attempt.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

use super::{fmt_ts, lock_conn, open_file, open_in_memory, parse_ts, parse_uuid};
use crate::error::{CourierError, CourierResult};
use crate::types::{DeliveryLogEntry, DeliveryOutcome};

/// Trait for delivery log storage operations.
#[cfg_attr(test, mockall::automock)]
pub trait DeliveryLogStore: Send + Sync {
    /// Append an entry. Entries are never updated.
    fn append(&self, entry: &DeliveryLogEntry) -> CourierResult<()>;

    /// Get an entry by ID.
    fn get(&self, id: Uuid) -> CourierResult<Option<DeliveryLogEntry>>;

    /// All entries for a job, oldest first.
    fn list_for_job(&self, job_id: Uuid) -> CourierResult<Vec<DeliveryLogEntry>>;

    /// Most recent entries for an endpoint, newest first.
    fn list_for_endpoint(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> CourierResult<Vec<DeliveryLogEntry>>;
}

/// SQLite-backed delivery log.
pub struct SqliteDeliveryLogStore {
    conn: Mutex<Connection>,
}

const LOG_COLUMNS: &str = "id, endpoint_id, job_id, event_type, payload, response_status, \
     outcome, error, response_body, duration_ms, attempt, created_at";

impl SqliteDeliveryLogStore {
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
            CREATE TABLE IF NOT EXISTS webhook_delivery_logs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                endpoint_id TEXT NOT NULL,
                job_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                response_status INTEGER,
                outcome TEXT NOT NULL,
                error TEXT,
                response_body TEXT,
                duration_ms INTEGER,
                attempt INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_logs_job ON webhook_delivery_logs(job_id);
            CREATE INDEX IF NOT EXISTS idx_logs_endpoint
                ON webhook_delivery_logs(endpoint_id, created_at);
        "#,
        )?;
        Ok(())
    }

    fn row_to_entry(row: &Row<'_>) -> CourierResult<DeliveryLogEntry> {
        let id: String = row.get(0)?;
        let endpoint_id: String = row.get(1)?;
        let job_id: String = row.get(2)?;
        let payload: String = row.get(4)?;
        let outcome: String = row.get(6)?;
        let duration_ms: Option<i64> = row.get(9)?;
        let created_at: String = row.get(11)?;

        Ok(DeliveryLogEntry {
            id: parse_uuid(&id)?,
            endpoint_id: parse_uuid(&endpoint_id)?,
            job_id: parse_uuid(&job_id)?,
            event_type: row.get(3)?,
            payload: serde_json::from_str(&payload)?,
            response_status: row.get(5)?,
            outcome: DeliveryOutcome::from_str(&outcome)
                .map_err(|_| CourierError::corrupt_row(format!("bad outcome '{}'", outcome)))?,
            error: row.get(7)?,
            response_body: row.get(8)?,
            duration_ms: duration_ms.map(|ms| ms.max(0) as u64),
            attempt: row.get(10)?,
            created_at: parse_ts(&created_at)?,
        })
    }

    fn query_entries(
        &self,
        filter: &str,
        order: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> CourierResult<Vec<DeliveryLogEntry>> {
        let conn = lock_conn!(self.conn);
        let sql = format!(
            "SELECT {} FROM webhook_delivery_logs WHERE {} ORDER BY {}",
            LOG_COLUMNS, filter, order
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(args, |row| Ok(Self::row_to_entry(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }
}

impl DeliveryLogStore for SqliteDeliveryLogStore {
    fn append(&self, entry: &DeliveryLogEntry) -> CourierResult<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        let conn = lock_conn!(self.conn);
        conn.execute(
            r#"INSERT INTO webhook_delivery_logs
               (id, endpoint_id, job_id, event_type, payload, response_status, outcome,
                error, response_body, duration_ms, attempt, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"#,
            params![
                entry.id.to_string(),
                entry.endpoint_id.to_string(),
                entry.job_id.to_string(),
                entry.event_type,
                payload,
                entry.response_status,
                entry.outcome.as_ref(),
                entry.error,
                entry.response_body,
                entry.duration_ms.map(|ms| ms as i64),
                entry.attempt,
                fmt_ts(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> CourierResult<Option<DeliveryLogEntry>> {
        let conn = lock_conn!(self.conn);
        let sql = format!("SELECT {} FROM webhook_delivery_logs WHERE id = ?1", LOG_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_entry(row)))
            .optional()?
            .transpose()
    }

    fn list_for_job(&self, job_id: Uuid) -> CourierResult<Vec<DeliveryLogEntry>> {
        self.query_entries("job_id = ?1", "seq ASC", params![job_id.to_string()])
    }

    fn list_for_endpoint(
        &self,
        endpoint_id: Uuid,
        limit: usize,
    ) -> CourierResult<Vec<DeliveryLogEntry>> {
        self.query_entries(
            "endpoint_id = ?1",
            "seq DESC LIMIT ?2",
            params![endpoint_id.to_string(), limit as i64],
        )
    }
}
