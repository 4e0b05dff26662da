//! Event log: the append-only record of business events that delivery
//! watches. Generating events is the event source's job; delivery reads.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use super::{fmt_ts, lock_conn, open_file, open_in_memory, parse_ts, parse_uuid};
use crate::error::CourierResult;
use crate::types::Event;

/// Read interface over the event log.
pub trait EventLog: Send + Sync {
    /// Events created at or after `since`, oldest first, optionally filtered
    /// by type.
    fn read_events(&self, since: DateTime<Utc>, event_type: Option<&str>)
        -> CourierResult<Vec<Event>>;

    /// Look up a single event.
    fn get_event(&self, id: Uuid) -> CourierResult<Option<Event>>;
}

/// SQLite-backed event log.
pub struct SqliteEventLog {
    conn: Mutex<Connection>,
}

const EVENT_COLUMNS: &str = "id, sale_id, product_id, event_type, metadata, created_at";

impl SqliteEventLog {
    /// Create a new event log at the given path.
    pub fn new(path: impl AsRef<Path>) -> CourierResult<Self> {
        let log = Self {
            conn: Mutex::new(open_file(path)?),
        };
        log.init_schema()?;
        Ok(log)
    }

    /// Create an in-memory event log (for testing)
    pub fn in_memory() -> CourierResult<Self> {
        let log = Self {
            conn: Mutex::new(open_in_memory()?),
        };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> CourierResult<()> {
        let conn = lock_conn!(self.conn);
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS transaction_events (
                id TEXT PRIMARY KEY,
                sale_id TEXT,
                product_id TEXT,
                event_type TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_created ON transaction_events(created_at);
            CREATE INDEX IF NOT EXISTS idx_events_type ON transaction_events(event_type, created_at);
        "#,
        )?;
        Ok(())
    }

    /// Append an event. Appending the same event twice is a no-op.
    pub fn append(&self, event: &Event) -> CourierResult<bool> {
        let metadata = serde_json::to_string(&event.metadata)?;
        let conn = lock_conn!(self.conn);
        let inserted = conn.execute(
            r#"INSERT OR IGNORE INTO transaction_events
               (id, sale_id, product_id, event_type, metadata, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
            params![
                event.id.to_string(),
                event.sale_id,
                event.product_id,
                event.event_type,
                metadata,
                fmt_ts(&event.created_at),
            ],
        )?;
        Ok(inserted == 1)
    }

    fn row_to_event(row: &Row<'_>) -> CourierResult<Event> {
        let id: String = row.get(0)?;
        let metadata: String = row.get(4)?;
        let created_at: String = row.get(5)?;

        Ok(Event {
            id: parse_uuid(&id)?,
            sale_id: row.get(1)?,
            product_id: row.get(2)?,
            event_type: row.get(3)?,
            metadata: serde_json::from_str(&metadata)?,
            created_at: parse_ts(&created_at)?,
        })
    }
}

impl EventLog for SqliteEventLog {
    fn read_events(
        &self,
        since: DateTime<Utc>,
        event_type: Option<&str>,
    ) -> CourierResult<Vec<Event>> {
        let conn = lock_conn!(self.conn);
        let sql = format!(
            "SELECT {} FROM transaction_events \
             WHERE created_at >= ?1 AND (?2 IS NULL OR event_type = ?2) \
             ORDER BY created_at ASC, id ASC",
            EVENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![fmt_ts(&since), event_type], |row| Ok(Self::row_to_event(row)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    fn get_event(&self, id: Uuid) -> CourierResult<Option<Event>> {
        let conn = lock_conn!(self.conn);
        let sql = format!("SELECT {} FROM transaction_events WHERE id = ?1", EVENT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        stmt.query_row(params![id.to_string()], |row| Ok(Self::row_to_event(row)))
            .optional()?
            .transpose()
    }
}
