//! Durable storage for delivery jobs and delivery logs, plus the read
//! interfaces consumed from the endpoint registry and the event log.
//!
//! Every store is a trait with a SQLite implementation. Each SQLite store
//! owns one connection behind a mutex; exclusivity between worker passes
//! (in this process or another one sharing the database file) comes from
//! conditional updates, never from that mutex.

mod events;
mod jobs;
mod logs;
mod registry;

pub use events::{EventLog, SqliteEventLog};
pub use jobs::{InsertOutcome, JobStore, SqliteJobStore};
pub use logs::{DeliveryLogStore, SqliteDeliveryLogStore};
pub use registry::{EndpointRegistry, SqliteEndpointRegistry};

#[cfg(test)]
pub use jobs::MockJobStore;
#[cfg(test)]
pub use logs::MockDeliveryLogStore;
#[cfg(test)]
pub use registry::MockEndpointRegistry;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{CourierError, CourierResult};

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open a file-backed connection configured for concurrent writers.
pub(crate) fn open_file(path: impl AsRef<Path>) -> CourierResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    Ok(conn)
}

/// Open a private in-memory connection.
pub(crate) fn open_in_memory() -> CourierResult<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Fixed-width RFC 3339 so that string order is chronological order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> CourierResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CourierError::corrupt_row(format!("bad timestamp '{}': {}", s, e)))
}

pub(crate) fn parse_uuid(s: &str) -> CourierResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| CourierError::corrupt_row(format!("bad uuid '{}': {}", s, e)))
}

/// Lock a store connection, turning a poisoned mutex into an error.
macro_rules! lock_conn {
    ($mutex:expr) => {
        $mutex
            .lock()
            .map_err(|_| $crate::error::CourierError::database("connection mutex poisoned"))?
    };
}
pub(crate) use lock_conn;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_ordering_is_lexical() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 59, 59).unwrap();
        let late = early + chrono::Duration::milliseconds(1);
        assert!(fmt_ts(&early) < fmt_ts(&late));
        assert_eq!(fmt_ts(&early).len(), fmt_ts(&late).len());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 17, 12, 30, 0).unwrap();
        assert_eq!(parse_ts(&fmt_ts(&ts)).unwrap(), ts);
        assert!(parse_ts("yesterday").is_err());
    }
}
