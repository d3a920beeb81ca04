//! Trigger configuration and the threshold evaluator.
//!
//! [`should_trigger`] is a pure function over counters, config, and the last trigger
//! time. Persistence of per-project [`TriggerConfig`] and of the debounce timestamp lives
//! alongside it.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::counters::Counters;
use crate::db::{format_ts, parse_ts};
use crate::error::{Result, SkillsError};

/// Which counter a project's trigger compares against its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    Tokens,
    Prompts,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tokens => "tokens",
            Self::Prompts => "prompts",
        }
    }

    /// Threshold used when a project switches to this mode without naming one.
    pub fn default_threshold(&self) -> u64 {
        match self {
            Self::Tokens => 10_000,
            Self::Prompts => 5,
        }
    }

    /// The counter this mode watches.
    pub fn counter(&self, counters: &Counters) -> u64 {
        match self {
            Self::Tokens => counters.tokens,
            Self::Prompts => counters.prompts,
        }
    }
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tokens" => Ok(Self::Tokens),
            "prompts" => Ok(Self::Prompts),
            _ => Err(format!("unknown trigger mode: {s} (expected tokens or prompts)")),
        }
    }
}

/// Where in the host lifecycle an evaluation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationPoint {
    PromptSubmit,
    Stop,
}

/// Per-project trigger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerConfig {
    pub mode: TriggerMode,
    pub threshold: u64,
    /// Minimum time between two overseer invocations for the project.
    pub debounce: Duration,
    /// Overrides `threshold` for evaluations at `Stop`.
    pub stop_threshold: Option<u64>,
    pub evaluate_on_stop: bool,
    pub trigger_on_first_response: bool,
    pub flush_on_end: bool,
}

impl TriggerConfig {
    /// Build a config with the remaining knobs at their defaults. Rejects a zero threshold.
    pub fn new(mode: TriggerMode, threshold: u64, debounce: Duration) -> Result<Self> {
        let config = Self {
            mode,
            threshold,
            debounce,
            stop_threshold: None,
            evaluate_on_stop: true,
            trigger_on_first_response: true,
            flush_on_end: true,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.threshold == 0 {
            return Err(SkillsError::InvalidConfig(
                "threshold must be a positive integer".into(),
            ));
        }
        if self.stop_threshold == Some(0) {
            return Err(SkillsError::InvalidConfig(
                "stop_threshold must be a positive integer".into(),
            ));
        }
        Ok(())
    }

    /// Threshold in effect at an evaluation point.
    pub fn threshold_at(&self, point: EvaluationPoint) -> u64 {
        match point {
            EvaluationPoint::PromptSubmit => self.threshold,
            EvaluationPoint::Stop => self.stop_threshold.unwrap_or(self.threshold),
        }
    }
}

/// True once `debounce` has passed since `last_trigger`, or if there was none.
pub fn debounce_elapsed(
    debounce: Duration,
    last_trigger: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_trigger else {
        return true;
    };
    match (now - last).to_std() {
        Ok(elapsed) => elapsed >= debounce,
        // Last trigger is in the future (clock skew between processes)
        Err(_) => debounce.is_zero(),
    }
}

/// Whether a trigger fires at prompt submission.
///
/// Fires iff the active-mode counter meets or exceeds the threshold and the debounce
/// interval has elapsed. The inactive counter is ignored.
pub fn should_trigger(
    counters: &Counters,
    config: &TriggerConfig,
    last_trigger: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    should_trigger_at(EvaluationPoint::PromptSubmit, counters, config, last_trigger, now)
}

/// [`should_trigger`] for a specific evaluation point.
pub fn should_trigger_at(
    point: EvaluationPoint,
    counters: &Counters,
    config: &TriggerConfig,
    last_trigger: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    config.mode.counter(counters) >= config.threshold_at(point)
        && debounce_elapsed(config.debounce, last_trigger, now)
}

// ── Persistence ──────────────────────────────────────────────────────────────

/// The explicitly stored config for a project, if any.
pub fn load_config(conn: &Connection, project: &str) -> Result<Option<TriggerConfig>> {
    let row = conn
        .query_row(
            "SELECT mode, threshold, debounce_secs, stop_threshold, evaluate_on_stop, \
                    trigger_on_first_response, flush_on_end \
             FROM trigger_config WHERE project = ?1",
            params![project],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, bool>(5)?,
                    row.get::<_, bool>(6)?,
                ))
            },
        )
        .optional()?;

    let Some((mode, threshold, debounce_secs, stop_threshold, on_stop, first, flush)) = row else {
        return Ok(None);
    };

    let mode = mode.parse::<TriggerMode>().map_err(SkillsError::InvalidConfig)?;
    Ok(Some(TriggerConfig {
        mode,
        threshold: threshold as u64,
        debounce: Duration::from_secs(debounce_secs as u64),
        stop_threshold: stop_threshold.map(|t| t as u64),
        evaluate_on_stop: on_stop,
        trigger_on_first_response: first,
        flush_on_end: flush,
    }))
}

/// The project's stored config, or `defaults` if it was never configured.
pub fn effective_config(
    conn: &Connection,
    project: &str,
    defaults: &TriggerConfig,
) -> Result<TriggerConfig> {
    Ok(load_config(conn, project)?.unwrap_or_else(|| defaults.clone()))
}

/// Store a project's config. Invalid configs are rejected before touching storage.
pub fn save_config(
    conn: &Connection,
    project: &str,
    config: &TriggerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    config.validate()?;
    conn.execute(
        "INSERT OR REPLACE INTO trigger_config \
         (project, mode, threshold, debounce_secs, stop_threshold, evaluate_on_stop, \
          trigger_on_first_response, flush_on_end, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            project,
            config.mode.as_str(),
            config.threshold as i64,
            config.debounce.as_secs() as i64,
            config.stop_threshold.map(|t| t as i64),
            config.evaluate_on_stop,
            config.trigger_on_first_response,
            config.flush_on_end,
            format_ts(now),
        ],
    )?;
    tracing::info!(project, mode = %config.mode, threshold = config.threshold, "trigger config saved");
    Ok(())
}

/// Drop a project's explicit config so defaults apply again. Returns whether one existed.
pub fn clear_config(conn: &Connection, project: &str) -> Result<bool> {
    let rows = conn.execute("DELETE FROM trigger_config WHERE project = ?1", params![project])?;
    Ok(rows > 0)
}

/// When the project last fired a trigger.
pub fn last_trigger(conn: &Connection, project: &str) -> Result<Option<DateTime<Utc>>> {
    let value: Option<Option<String>> = conn
        .query_row(
            "SELECT last_trigger_at FROM project_state WHERE project = ?1",
            params![project],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.flatten().as_deref().and_then(parse_ts))
}

pub fn mark_triggered(conn: &Connection, project: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO project_state (project, last_trigger_at) VALUES (?1, ?2) \
         ON CONFLICT(project) DO UPDATE SET last_trigger_at = excluded.last_trigger_at",
        params![project, format_ts(now)],
    )?;
    Ok(())
}
