//! Counter Store: durable per-session usage counters.
//!
//! Every mutation is a single SQL statement (`col = col + ?`), so concurrent events for
//! the same session serialize inside SQLite without lost updates. Different sessions
//! touch different rows.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::format_ts;
use crate::error::Result;

/// The two counters a trigger can be configured against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub tokens: u64,
    pub prompts: u64,
}

/// Full session row, used for status output and analysis snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct SessionCounters {
    pub session_id: String,
    pub counters: Counters,
    pub responses: u64,
    /// Lifetime totals, never reset by a trigger.
    pub total_tokens: u64,
    pub total_prompts: u64,
    pub transcript_path: Option<String>,
    pub started_at: String,
    pub updated_at: String,
    pub last_reset_at: Option<String>,
    pub ended_at: Option<String>,
}

/// Create the session row if it does not exist. A resumed session is reopened.
pub fn start_session(
    conn: &Connection,
    project: &str,
    session: &str,
    transcript: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    let now = format_ts(now);
    conn.execute(
        "INSERT INTO sessions (project, session_id, transcript_path, started_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(project, session_id) DO UPDATE SET \
             ended_at = NULL, \
             transcript_path = COALESCE(excluded.transcript_path, transcript_path), \
             updated_at = excluded.updated_at",
        params![project, session, transcript, now],
    )?;
    Ok(())
}

fn ensure_session(conn: &Connection, project: &str, session: &str, now: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO sessions (project, session_id, started_at, updated_at) \
         VALUES (?1, ?2, ?3, ?3)",
        params![project, session, now],
    )?;
    Ok(())
}

/// SQLite integers are signed; counters saturate instead of wrapping.
fn clamp(delta: u64) -> i64 {
    i64::try_from(delta).unwrap_or(i64::MAX)
}

fn counters_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Counters> {
    Ok(Counters {
        tokens: row.get::<_, i64>(0)? as u64,
        prompts: row.get::<_, i64>(1)? as u64,
    })
}

/// Count one submitted prompt and its estimated tokens. Returns the updated counters.
pub fn record_prompt(
    conn: &Connection,
    project: &str,
    session: &str,
    estimated_tokens: u64,
    now: DateTime<Utc>,
) -> Result<Counters> {
    let now = format_ts(now);
    ensure_session(conn, project, session, &now)?;
    let counters = conn.query_row(
        "UPDATE sessions SET \
             prompts = prompts + 1, total_prompts = total_prompts + 1, \
             tokens = tokens + MIN(?3, 9223372036854775807 - tokens), \
             total_tokens = total_tokens + MIN(?3, 9223372036854775807 - total_tokens), \
             unmetered_tokens = unmetered_tokens + MIN(?3, 9223372036854775807 - unmetered_tokens), \
             updated_at = ?4 \
         WHERE project = ?1 AND session_id = ?2 \
         RETURNING tokens, prompts",
        params![project, session, clamp(estimated_tokens), now],
        counters_from_row,
    )?;
    Ok(counters)
}

/// Add `delta` tokens to the session. Returns the updated counters.
pub fn record_tokens(
    conn: &Connection,
    project: &str,
    session: &str,
    delta: u64,
    now: DateTime<Utc>,
) -> Result<Counters> {
    let now = format_ts(now);
    ensure_session(conn, project, session, &now)?;
    let counters = conn.query_row(
        "UPDATE sessions SET \
             tokens = tokens + MIN(?3, 9223372036854775807 - tokens), \
             total_tokens = total_tokens + MIN(?3, 9223372036854775807 - total_tokens), \
             updated_at = ?4 \
         WHERE project = ?1 AND session_id = ?2 \
         RETURNING tokens, prompts",
        params![project, session, clamp(delta), now],
        counters_from_row,
    )?;
    Ok(counters)
}

/// Credit transcript growth measured at a turn boundary.
///
/// The transcript also contains the prompts, whose estimates [`record_prompt`] already
/// counted, so only growth beyond those estimates is added. The estimates are matched once:
/// every call starts the next measurement from zero.
pub fn credit_transcript_tokens(
    conn: &Connection,
    project: &str,
    session: &str,
    growth_tokens: u64,
    now: DateTime<Utc>,
) -> Result<Counters> {
    let now = format_ts(now);
    ensure_session(conn, project, session, &now)?;
    let unmetered: i64 = conn.query_row(
        "SELECT unmetered_tokens FROM sessions WHERE project = ?1 AND session_id = ?2",
        params![project, session],
        |row| row.get(0),
    )?;
    let credit = growth_tokens.saturating_sub(unmetered.max(0) as u64);

    let counters = conn.query_row(
        "UPDATE sessions SET \
             tokens = tokens + MIN(?3, 9223372036854775807 - tokens), \
             total_tokens = total_tokens + MIN(?3, 9223372036854775807 - total_tokens), \
             unmetered_tokens = 0, \
             updated_at = ?4 \
         WHERE project = ?1 AND session_id = ?2 \
         RETURNING tokens, prompts",
        params![project, session, clamp(credit), now],
        counters_from_row,
    )?;
    Ok(counters)
}

/// Count one completed assistant response. Returns the new response count.
pub fn record_response(
    conn: &Connection,
    project: &str,
    session: &str,
    now: DateTime<Utc>,
) -> Result<u64> {
    let now = format_ts(now);
    ensure_session(conn, project, session, &now)?;
    let responses: i64 = conn.query_row(
        "UPDATE sessions SET responses = responses + 1, updated_at = ?3 \
         WHERE project = ?1 AND session_id = ?2 \
         RETURNING responses",
        params![project, session, now],
        |row| row.get(0),
    )?;
    Ok(responses as u64)
}

/// Current counters for a session, or `None` if the session was never seen.
pub fn read_counters(conn: &Connection, project: &str, session: &str) -> Result<Option<Counters>> {
    let counters = conn
        .query_row(
            "SELECT tokens, prompts FROM sessions WHERE project = ?1 AND session_id = ?2",
            params![project, session],
            counters_from_row,
        )
        .optional()?;
    Ok(counters)
}

/// Zero both counters for one session and stamp the reset time.
pub fn reset(conn: &Connection, project: &str, session: &str, now: DateTime<Utc>) -> Result<()> {
    let now = format_ts(now);
    conn.execute(
        "UPDATE sessions SET tokens = 0, prompts = 0, last_reset_at = ?3, updated_at = ?3 \
         WHERE project = ?1 AND session_id = ?2",
        params![project, session, now],
    )?;
    Ok(())
}

/// Record the transcript's current length and return how many bytes it grew since the
/// last measurement. A different path or a shorter file counts from zero.
pub fn advance_transcript(
    conn: &Connection,
    project: &str,
    session: &str,
    transcript: &str,
    len: u64,
    now: DateTime<Utc>,
) -> Result<u64> {
    let now = format_ts(now);
    ensure_session(conn, project, session, &now)?;

    let (stored_path, offset): (Option<String>, i64) = conn.query_row(
        "SELECT transcript_path, transcript_offset FROM sessions WHERE project = ?1 AND session_id = ?2",
        params![project, session],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let offset = offset as u64;
    let growth = if stored_path.as_deref() != Some(transcript) || len < offset {
        len
    } else {
        len - offset
    };

    conn.execute(
        "UPDATE sessions SET transcript_path = ?3, transcript_offset = ?4, updated_at = ?5 \
         WHERE project = ?1 AND session_id = ?2",
        params![project, session, transcript, len as i64, now],
    )?;

    Ok(growth)
}

/// Archive a session. Its row is kept for status and lifetime totals.
pub fn end_session(conn: &Connection, project: &str, session: &str, now: DateTime<Utc>) -> Result<()> {
    let now = format_ts(now);
    ensure_session(conn, project, session, &now)?;
    conn.execute(
        "UPDATE sessions SET ended_at = ?3, updated_at = ?3 WHERE project = ?1 AND session_id = ?2",
        params![project, session, now],
    )?;
    Ok(())
}

const SESSION_COLUMNS: &str = "session_id, tokens, prompts, responses, total_tokens, total_prompts, \
     transcript_path, started_at, updated_at, last_reset_at, ended_at";

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionCounters> {
    Ok(SessionCounters {
        session_id: row.get(0)?,
        counters: Counters {
            tokens: row.get::<_, i64>(1)? as u64,
            prompts: row.get::<_, i64>(2)? as u64,
        },
        responses: row.get::<_, i64>(3)? as u64,
        total_tokens: row.get::<_, i64>(4)? as u64,
        total_prompts: row.get::<_, i64>(5)? as u64,
        transcript_path: row.get(6)?,
        started_at: row.get(7)?,
        updated_at: row.get(8)?,
        last_reset_at: row.get(9)?,
        ended_at: row.get(10)?,
    })
}

/// All sessions of a project, most recently active first.
pub fn project_sessions(conn: &Connection, project: &str) -> Result<Vec<SessionCounters>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions WHERE project = ?1 \
         ORDER BY updated_at DESC, session_id"
    ))?;
    let sessions = stmt
        .query_map(params![project], session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sessions)
}

/// Open sessions plus those archived at or after `ended_since`, most recently active first.
pub fn recent_sessions(
    conn: &Connection,
    project: &str,
    ended_since: DateTime<Utc>,
) -> Result<Vec<SessionCounters>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions \
         WHERE project = ?1 AND (ended_at IS NULL OR ended_at >= ?2) \
         ORDER BY updated_at DESC, session_id"
    ))?;
    let sessions = stmt
        .query_map(params![project, format_ts(ended_since)], session_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(sessions)
}

/// Delete sessions archived before `cutoff`. Open sessions are never pruned.
pub fn prune_archived(conn: &Connection, project: &str, cutoff: DateTime<Utc>) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM sessions WHERE project = ?1 AND ended_at IS NOT NULL AND ended_at < ?2",
        params![project, format_ts(cutoff)],
    )?;
    Ok(removed)
}
