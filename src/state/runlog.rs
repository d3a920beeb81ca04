//! Overseer run outcome log.
//!
//! One row per notable event in a worker pass: applied edits, rejections, truncation,
//! analysis failures, pass completion and lock loss.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::db::format_ts;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Applied,
    Rejected,
    Truncated,
    AnalysisFailed,
    Completed,
    Lost,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Rejected => "rejected",
            Self::Truncated => "truncated",
            Self::AnalysisFailed => "analysis_failed",
            Self::Completed => "completed",
            Self::Lost => "lost",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    pub id: i64,
    pub pass: u32,
    pub outcome: String,
    pub artifact: Option<String>,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

pub fn record(
    conn: &Connection,
    project: &str,
    pass: u32,
    outcome: RunOutcome,
    artifact: Option<&str>,
    details: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<()> {
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO run_log (project, pass, outcome, artifact, details, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![project, pass, outcome.as_str(), artifact, details_json, format_ts(now)],
    )?;
    Ok(())
}

/// Most recent entries for a project, newest first.
pub fn recent(conn: &Connection, project: &str, limit: usize) -> Result<Vec<RunLogEntry>> {
    let mut stmt = conn.prepare(
        "SELECT id, pass, outcome, artifact, details, created_at FROM run_log \
         WHERE project = ?1 ORDER BY id DESC LIMIT ?2",
    )?;
    let entries = stmt
        .query_map(params![project, limit as i64], |row| {
            let details: Option<String> = row.get(4)?;
            Ok(RunLogEntry {
                id: row.get(0)?,
                pass: row.get(1)?,
                outcome: row.get(2)?,
                artifact: row.get(3)?,
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
                created_at: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

/// Keep only the newest `keep` entries of a project. Returns the number removed.
pub fn prune(conn: &Connection, project: &str, keep: usize) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM run_log WHERE project = ?1 AND id NOT IN \
         (SELECT id FROM run_log WHERE project = ?1 ORDER BY id DESC LIMIT ?2)",
        params![project, i64::try_from(keep).unwrap_or(i64::MAX)],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn recent_returns_newest_first_per_project() {
        let conn = db::open_memory_database().unwrap();
        let now = Utc::now();

        record(&conn, "/p", 1, RunOutcome::Applied, Some("rust/SKILL.md"), None, now).unwrap();
        let details = serde_json::json!({"lines": 612, "limit": 500});
        record(&conn, "/p", 1, RunOutcome::Rejected, Some("go/SKILL.md"), Some(&details), now)
            .unwrap();
        record(&conn, "/other", 1, RunOutcome::Completed, None, None, now).unwrap();

        let entries = recent(&conn, "/p", 10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, "rejected");
        assert_eq!(entries[0].details.as_ref().unwrap()["lines"], 612);
        assert_eq!(entries[1].artifact.as_deref(), Some("rust/SKILL.md"));
    }

    #[test]
    fn prune_keeps_newest_entries_of_one_project() {
        let conn = db::open_memory_database().unwrap();
        let now = Utc::now();

        for pass in 1..=5 {
            record(&conn, "/p", pass, RunOutcome::Completed, None, None, now).unwrap();
        }
        record(&conn, "/other", 1, RunOutcome::Completed, None, None, now).unwrap();

        assert_eq!(prune(&conn, "/p", 2).unwrap(), 3);
        let passes: Vec<_> = recent(&conn, "/p", 10).unwrap().into_iter().map(|e| e.pass).collect();
        assert_eq!(passes, vec![5, 4]);
        assert_eq!(recent(&conn, "/other", 10).unwrap().len(), 1);
    }
}
