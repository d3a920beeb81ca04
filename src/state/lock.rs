//! Process singleton coordinator: one overseer per project, across processes.
//!
//! The lock is a row in `overseer_lock`. Every state transition runs inside a
//! `BEGIN IMMEDIATE` transaction, which takes SQLite's write lock up front, so the
//! read-decide-write sequence is atomic against every other process sharing the database
//! file. Reclaiming an abandoned lock is an additional compare-and-swap on the observed
//! token: the `UPDATE` only matches if nobody replaced the holder in between.
//!
//! Lock states:
//!
//! ```text
//! Absent ──acquire──▶ Held(pid, heartbeat)
//! Held ──notify──▶ Held(pid, pending)
//! Held ──finish_pass (pending)──▶ Held(pid)          worker loops again
//! Held ──finish_pass / release──▶ Absent
//! Held (heartbeat expired) ──reclaim──▶ Held(new pid)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;

use crate::db::{format_ts, parse_ts};
use crate::error::{Result, SkillsError};

/// Result of [`acquire_or_notify`] and [`start_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcquireOutcome {
    /// The caller now holds the lock and must launch a worker with `token`.
    Spawned {
        token: String,
        /// Pid of the abandoned holder, if this was a reclaim.
        reclaimed_from: Option<u32>,
    },
    /// A live worker holds the lock and will run another pass.
    Notified {
        holder_pid: u32,
        /// The worker already had a pass requested; this call coalesced into it.
        already_pending: bool,
    },
    /// A live worker holds the lock; it was left alone (start-if-absent).
    AlreadyRunning { holder_pid: u32 },
}

impl AcquireOutcome {
    pub fn spawned_token(&self) -> Option<&str> {
        match self {
            Self::Spawned { token, .. } => Some(token),
            _ => None,
        }
    }
}

/// What a worker should do after finishing a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassEnd {
    /// A notification arrived during the pass; the flag was cleared, run again.
    Continue,
    /// No pending work; the lock was released.
    Released,
    /// The lock no longer belongs to this worker.
    Lost,
}

/// Snapshot of a project's lock for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub holder_pid: u32,
    pub token: String,
    pub acquired_at: String,
    pub heartbeat_at: String,
    pub pending: bool,
    pub live: bool,
    pub heartbeat_age_secs: Option<i64>,
}

struct LockRow {
    token: String,
    holder_pid: u32,
    acquired_at: String,
    heartbeat_at: String,
    pending: bool,
}

impl LockRow {
    fn heartbeat(&self) -> Option<DateTime<Utc>> {
        parse_ts(&self.heartbeat_at)
    }

    /// A lock with an unreadable heartbeat is treated as abandoned.
    fn is_live(&self, liveness: Duration, now: DateTime<Utc>) -> bool {
        match self.heartbeat() {
            Some(beat) => match (now - beat).to_std() {
                Ok(age) => age <= liveness,
                // Heartbeat ahead of our clock: skew up to one liveness window is tolerated
                Err(_) => (beat - now).to_std().is_ok_and(|ahead| ahead <= liveness),
            },
            None => false,
        }
    }
}

fn read_row(conn: &Connection, project: &str) -> rusqlite::Result<Option<LockRow>> {
    conn.query_row(
        "SELECT token, holder_pid, acquired_at, heartbeat_at, pending \
         FROM overseer_lock WHERE project = ?1",
        params![project],
        |row| {
            Ok(LockRow {
                token: row.get(0)?,
                holder_pid: row.get::<_, i64>(1)? as u32,
                acquired_at: row.get(2)?,
                heartbeat_at: row.get(3)?,
                pending: row.get(4)?,
            })
        },
    )
    .optional()
}

fn new_token() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn insert(conn: &Connection, project: &str, pid: u32, now: &str) -> rusqlite::Result<String> {
    let token = new_token();
    conn.execute(
        "INSERT INTO overseer_lock (project, token, holder_pid, acquired_at, heartbeat_at, pending) \
         VALUES (?1, ?2, ?3, ?4, ?4, 0)",
        params![project, token, pid as i64, now],
    )?;
    Ok(token)
}

/// Compare-and-swap the holder of an abandoned lock. Only matches if the row still carries
/// the token we observed as expired.
fn reclaim(
    conn: &Connection,
    project: &str,
    observed_token: &str,
    pid: u32,
    now: &str,
) -> Result<String> {
    let token = new_token();
    let rows = conn.execute(
        "UPDATE overseer_lock \
         SET token = ?3, holder_pid = ?4, acquired_at = ?5, heartbeat_at = ?5, pending = 0 \
         WHERE project = ?1 AND token = ?2",
        params![project, observed_token, token, pid as i64, now],
    )?;
    if rows == 0 {
        return Err(SkillsError::LockReclaimRace {
            project: project.to_string(),
        });
    }
    Ok(token)
}

fn set_pending(conn: &Connection, project: &str, token: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE overseer_lock SET pending = 1 WHERE project = ?1 AND token = ?2",
        params![project, token],
    )
}

fn decide(
    conn: &Connection,
    project: &str,
    pid: u32,
    liveness: Duration,
    now: DateTime<Utc>,
    notify: bool,
) -> Result<AcquireOutcome> {
    let now_str = format_ts(now);

    let outcome = match read_row(conn, project)? {
        None => AcquireOutcome::Spawned {
            token: insert(conn, project, pid, &now_str)?,
            reclaimed_from: None,
        },
        Some(row) if row.is_live(liveness, now) => {
            if !notify {
                AcquireOutcome::AlreadyRunning {
                    holder_pid: row.holder_pid,
                }
            } else {
                if !row.pending {
                    set_pending(conn, project, &row.token)?;
                }
                AcquireOutcome::Notified {
                    holder_pid: row.holder_pid,
                    already_pending: row.pending,
                }
            }
        }
        Some(row) => match reclaim(conn, project, &row.token, pid, &now_str) {
            Ok(token) => {
                tracing::warn!(
                    project,
                    previous_pid = row.holder_pid,
                    heartbeat = %row.heartbeat_at,
                    "reclaimed abandoned overseer lock"
                );
                AcquireOutcome::Spawned {
                    token,
                    reclaimed_from: Some(row.holder_pid),
                }
            }
            Err(SkillsError::LockReclaimRace { .. }) => {
                // Lost the reclaim: whoever won is the live holder now.
                tracing::debug!(project, "lost lock reclaim race");
                match read_row(conn, project)? {
                    Some(winner) => {
                        if notify && !winner.pending {
                            set_pending(conn, project, &winner.token)?;
                        }
                        AcquireOutcome::Notified {
                            holder_pid: winner.holder_pid,
                            already_pending: winner.pending,
                        }
                    }
                    None => AcquireOutcome::Spawned {
                        token: insert(conn, project, pid, &now_str)?,
                        reclaimed_from: None,
                    },
                }
            }
            Err(e) => return Err(e),
        },
    };

    Ok(outcome)
}

fn acquire(
    conn: &mut Connection,
    project: &str,
    pid: u32,
    liveness: Duration,
    now: DateTime<Utc>,
    notify: bool,
) -> Result<AcquireOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let outcome = decide(&tx, project, pid, liveness, now, notify)?;
    tx.commit()?;
    Ok(outcome)
}

/// Take the lock if nobody live holds it; otherwise ask the live holder for another pass.
///
/// `pid` is recorded as the provisional holder until the launched worker calls [`adopt`].
pub fn acquire_or_notify(
    conn: &mut Connection,
    project: &str,
    pid: u32,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<AcquireOutcome> {
    acquire(conn, project, pid, liveness, now, true)
}

/// [`acquire_or_notify`] inside a transaction the caller already holds.
///
/// The caller must have opened it with `BEGIN IMMEDIATE`, so the decision is made under
/// SQLite's write lock together with whatever else the transaction does.
pub fn acquire_or_notify_in(
    tx: &Transaction<'_>,
    project: &str,
    pid: u32,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<AcquireOutcome> {
    decide(tx, project, pid, liveness, now, true)
}

/// Take the lock if nobody live holds it; leave a live holder untouched.
pub fn start_if_absent(
    conn: &mut Connection,
    project: &str,
    pid: u32,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<AcquireOutcome> {
    acquire(conn, project, pid, liveness, now, false)
}

/// Claim a granted lock for the worker process that will actually run.
/// Returns `false` if the token is no longer current.
pub fn adopt(
    conn: &Connection,
    project: &str,
    token: &str,
    pid: u32,
    now: DateTime<Utc>,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE overseer_lock SET holder_pid = ?3, heartbeat_at = ?4 WHERE project = ?1 AND token = ?2",
        params![project, token, pid as i64, format_ts(now)],
    )?;
    Ok(rows == 1)
}

/// Refresh the liveness heartbeat. Returns `false` if the lock was lost.
pub fn heartbeat(conn: &Connection, project: &str, token: &str, now: DateTime<Utc>) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE overseer_lock SET heartbeat_at = ?3 WHERE project = ?1 AND token = ?2",
        params![project, token, format_ts(now)],
    )?;
    Ok(rows == 1)
}

/// Whether a pass has been requested. `None` if the lock is no longer held by `token`.
pub fn pending(conn: &Connection, project: &str, token: &str) -> Result<Option<bool>> {
    let pending = conn
        .query_row(
            "SELECT pending FROM overseer_lock WHERE project = ?1 AND token = ?2",
            params![project, token],
            |row| row.get::<_, bool>(0),
        )
        .optional()?;
    Ok(pending)
}

/// End a pass: clear a pending request and continue, or release the lock.
///
/// The check and the release happen in one transaction, so a notification that lands
/// while the worker is finishing is never dropped.
pub fn finish_pass(conn: &mut Connection, project: &str, token: &str) -> Result<PassEnd> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let end = match read_row(&tx, project)? {
        Some(row) if row.token == token => {
            if row.pending {
                tx.execute(
                    "UPDATE overseer_lock SET pending = 0 WHERE project = ?1 AND token = ?2",
                    params![project, token],
                )?;
                PassEnd::Continue
            } else {
                tx.execute(
                    "DELETE FROM overseer_lock WHERE project = ?1 AND token = ?2",
                    params![project, token],
                )?;
                PassEnd::Released
            }
        }
        _ => PassEnd::Lost,
    };

    tx.commit()?;
    Ok(end)
}

/// Release unconditionally, dropping any pending request. Returns whether `token` held it.
pub fn release(conn: &Connection, project: &str, token: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM overseer_lock WHERE project = ?1 AND token = ?2",
        params![project, token],
    )?;
    Ok(rows == 1)
}

pub fn status(
    conn: &Connection,
    project: &str,
    liveness: Duration,
    now: DateTime<Utc>,
) -> Result<Option<LockStatus>> {
    let Some(row) = read_row(conn, project)? else {
        return Ok(None);
    };
    Ok(Some(LockStatus {
        live: row.is_live(liveness, now),
        heartbeat_age_secs: row.heartbeat().map(|beat| (now - beat).num_seconds()),
        holder_pid: row.holder_pid,
        token: row.token,
        acquired_at: row.acquired_at,
        heartbeat_at: row.heartbeat_at,
        pending: row.pending,
    }))
}
