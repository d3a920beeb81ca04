//! SQLite state database shared by hook processes and overseer workers.
//!
//! Every host process opens its own connection to the same file; SQLite's file
//! locking (WAL mode plus a busy timeout) is what serializes them.

pub mod migrations;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, SkillsError};

/// How long a connection waits on a competing writer before reporting `SQLITE_BUSY`.
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Open (or create) the state database at the given path with schema and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SkillsError::io(parent, e))?;
    }

    let conn = Connection::open(path)?;

    // Busy timeout first: switching to WAL needs a lock another process may hold.
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;

    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;

    tracing::debug!(path = %path.display(), "state database opened");
    Ok(conn)
}

/// Open an in-memory database for testing.
#[cfg(test)]
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::init_schema(&conn)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}

/// Render a timestamp the way every table stores it.
pub fn format_ts(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Unparseable values read as `None`.
pub fn parse_ts(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn timestamps_round_trip() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let stored = format_ts(ts);
        assert_eq!(stored, "2026-03-14T15:09:26.000Z");
        assert_eq!(parse_ts(&stored), Some(ts));
    }

    #[test]
    fn garbage_timestamp_is_none() {
        assert_eq!(parse_ts("yesterday"), None);
    }
}
