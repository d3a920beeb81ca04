//! CLI `hook` command: the entry point the host runs on every lifecycle event.
//!
//! The host's turn must never fail because of us. Every error is logged, reported as a
//! `warning:` line on stderr, and swallowed.

use anyhow::{Context, Result};
use chrono::Utc;
use std::io::Read;

use skills::config::SkillsConfig;
use skills::db;
use skills::hooks::{HookAdapter, HookInput};
use skills::overseer::launcher::ProcessLauncher;

pub fn hook() {
    let config = match SkillsConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("warning: skills hook: {e:#}");
            return;
        }
    };

    // Hold the guard until the end so buffered log lines are flushed.
    let _guard = match super::init_file_logging(&config.logging) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: skills hook: logging disabled: {e:#}");
            None
        }
    };

    if let Err(e) = handle_stdin(&config) {
        tracing::warn!(error = %format!("{e:#}"), "hook failed");
        eprintln!("warning: skills hook: {e:#}");
    }
}

fn handle_stdin(config: &SkillsConfig) -> Result<()> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read hook input")?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(());
    }

    let input: HookInput = serde_json::from_str(raw).context("failed to parse hook input")?;

    let mut conn = db::open_database(config.resolved_db_path())
        .context("failed to open state database")?;
    let launcher = ProcessLauncher::current()?;
    let mut adapter = HookAdapter::new(
        &mut conn,
        config.trigger.to_trigger_config(),
        config.overseer.liveness_timeout(),
        &launcher,
    );

    let outcome = adapter
        .handle(&input, Utc::now())
        .with_context(|| format!("failed to handle {:?}", input.hook_event_name))?;

    if let Some(outcome) = outcome {
        tracing::debug!(
            event = ?input.hook_event_name,
            session = %input.session_id,
            tokens = outcome.counters.tokens,
            prompts = outcome.counters.prompts,
            fired = ?outcome.fired,
            "hook handled"
        );
    }
    Ok(())
}
