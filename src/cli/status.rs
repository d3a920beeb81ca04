//! CLI `daemon status`: lock holder, trigger configuration, session counters, recent runs.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::Path;

use skills::config::SkillsConfig;
use skills::db;
use skills::state::counters::{self, SessionCounters};
use skills::state::lock::{self, LockStatus};
use skills::state::runlog::{self, RunLogEntry};
use skills::state::trigger::{self, TriggerConfig};
use skills::state::project_key;

const RECENT_RUNS: usize = 10;

#[derive(Serialize)]
struct StatusReport {
    project: String,
    overseer: Option<LockStatus>,
    trigger: TriggerConfig,
    trigger_is_default: bool,
    last_trigger_at: Option<String>,
    sessions: Vec<SessionCounters>,
    recent_runs: Vec<RunLogEntry>,
}

pub fn status(config: &SkillsConfig, project: &Path, json: bool) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let key = project_key(project);
    let now = Utc::now();

    let stored = trigger::load_config(&conn, &key)?;
    let report = StatusReport {
        overseer: lock::status(&conn, &key, config.overseer.liveness_timeout(), now)?,
        trigger_is_default: stored.is_none(),
        trigger: stored.unwrap_or_else(|| config.trigger.to_trigger_config()),
        last_trigger_at: trigger::last_trigger(&conn, &key)?.map(db::format_ts),
        sessions: counters::project_sessions(&conn, &key)?,
        recent_runs: runlog::recent(&conn, &key, RECENT_RUNS)?,
        project: key,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Project: {}", report.project);
    println!("{}", "=".repeat(40));

    match &report.overseer {
        Some(lock) => {
            let state = if lock.live { "running" } else { "abandoned" };
            println!("Overseer:          {state} (pid {})", lock.holder_pid);
            println!("  Acquired:        {}", lock.acquired_at);
            match lock.heartbeat_age_secs {
                Some(age) => println!("  Heartbeat:       {age}s ago"),
                None => println!("  Heartbeat:       {} (unreadable)", lock.heartbeat_at),
            }
            println!("  Pending pass:    {}", if lock.pending { "yes" } else { "no" });
        }
        None => println!("Overseer:          idle"),
    }
    println!();

    let t = &report.trigger;
    let source = if report.trigger_is_default { " (defaults)" } else { "" };
    println!("Trigger{source}:");
    println!("  Mode:            {}", t.mode);
    println!("  Threshold:       {}", t.threshold);
    println!("  Debounce:        {}s", t.debounce.as_secs());
    match t.stop_threshold {
        Some(n) => println!("  Stop threshold:  {n}"),
        None => println!("  Stop threshold:  (same)"),
    }
    println!("  Evaluate on stop:   {}", t.evaluate_on_stop);
    println!("  First response:     {}", t.trigger_on_first_response);
    println!("  Flush on end:       {}", t.flush_on_end);
    println!(
        "  Last trigger:    {}",
        report.last_trigger_at.as_deref().unwrap_or("never")
    );
    println!();

    println!("Sessions ({}):", report.sessions.len());
    for s in &report.sessions {
        let ended = if s.ended_at.is_some() { " [ended]" } else { "" };
        println!(
            "  {:<36} tokens {:>8}  prompts {:>4}  responses {:>4}{ended}",
            s.session_id, s.counters.tokens, s.counters.prompts, s.responses
        );
    }
    println!();

    println!("Recent runs:");
    if report.recent_runs.is_empty() {
        println!("  (none)");
    }
    for run in &report.recent_runs {
        println!(
            "  {}  pass {:<3} {:<16} {}",
            run.created_at,
            run.pass,
            run.outcome,
            run.artifact.as_deref().unwrap_or("")
        );
    }

    Ok(())
}
