//! SQL DDL for the coordination state.
//!
//! Defines `sessions` (per-session counters), `trigger_config` (per-project trigger
//! settings), `project_state` (debounce bookkeeping), `overseer_lock` (the per-project
//! singleton lock) and `schema_meta`. All DDL uses `IF NOT EXISTS`.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Per-session usage counters. `tokens`/`prompts` reset on trigger, `total_*` never do.
CREATE TABLE IF NOT EXISTS sessions (
    project TEXT NOT NULL,
    session_id TEXT NOT NULL,
    tokens INTEGER NOT NULL DEFAULT 0 CHECK(tokens >= 0),
    prompts INTEGER NOT NULL DEFAULT 0 CHECK(prompts >= 0),
    responses INTEGER NOT NULL DEFAULT 0 CHECK(responses >= 0),
    total_tokens INTEGER NOT NULL DEFAULT 0,
    total_prompts INTEGER NOT NULL DEFAULT 0,
    transcript_path TEXT,
    transcript_offset INTEGER NOT NULL DEFAULT 0,
    started_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_reset_at TEXT,
    ended_at TEXT,
    PRIMARY KEY (project, session_id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);

-- One row per explicitly configured project.
CREATE TABLE IF NOT EXISTS trigger_config (
    project TEXT PRIMARY KEY,
    mode TEXT NOT NULL CHECK(mode IN ('tokens','prompts')),
    threshold INTEGER NOT NULL CHECK(threshold > 0),
    debounce_secs INTEGER NOT NULL CHECK(debounce_secs >= 0),
    stop_threshold INTEGER CHECK(stop_threshold IS NULL OR stop_threshold > 0),
    evaluate_on_stop INTEGER NOT NULL DEFAULT 1,
    trigger_on_first_response INTEGER NOT NULL DEFAULT 1,
    flush_on_end INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS project_state (
    project TEXT PRIMARY KEY,
    last_trigger_at TEXT
);

-- At most one row per project: the current overseer holder.
CREATE TABLE IF NOT EXISTS overseer_lock (
    project TEXT PRIMARY KEY,
    token TEXT NOT NULL,
    holder_pid INTEGER NOT NULL,
    acquired_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    pending INTEGER NOT NULL DEFAULT 0 CHECK(pending IN (0, 1))
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for table in ["sessions", "trigger_config", "project_state", "overseer_lock", "schema_meta"] {
            assert!(tables.contains(&table.to_string()), "{table} table missing");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap(); // second call should not error
    }

    #[test]
    fn zero_threshold_violates_check() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO trigger_config (project, mode, threshold, debounce_secs, updated_at) \
             VALUES ('/p', 'prompts', 0, 0, '2026-01-01T00:00:00.000Z')",
            [],
        );
        assert!(result.is_err(), "zero threshold should be rejected by CHECK constraint");
    }
}
