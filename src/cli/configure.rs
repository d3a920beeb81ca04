//! CLI `config` commands: per-project trigger configuration.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::time::Duration;

use skills::config::SkillsConfig;
use skills::db;
use skills::state::project_key;
use skills::state::trigger::{self, TriggerConfig, TriggerMode};

/// Changes to apply on top of the project's current configuration.
#[derive(Debug, Default, clap::Args)]
pub struct SetArgs {
    /// Counter to compare against the threshold (tokens or prompts)
    #[arg(long)]
    pub mode: Option<TriggerMode>,
    /// Positive threshold. Defaults to the mode's default when only --mode is given
    #[arg(long)]
    pub threshold: Option<u64>,
    /// Minimum seconds between two overseer triggers
    #[arg(long)]
    pub debounce_secs: Option<u64>,
    /// Separate threshold for turn-boundary (Stop) evaluation
    #[arg(long, conflicts_with = "clear_stop_threshold")]
    pub stop_threshold: Option<u64>,
    /// Use the regular threshold at turn boundaries again
    #[arg(long)]
    pub clear_stop_threshold: bool,
    #[arg(long)]
    pub evaluate_on_stop: Option<bool>,
    /// Fire on the first response of every session
    #[arg(long)]
    pub first_response: Option<bool>,
    /// Force a final trigger when a session ends with uncounted activity
    #[arg(long)]
    pub flush_on_end: Option<bool>,
}

impl SetArgs {
    /// Apply the changes. A mode switch without a threshold resets the threshold to the
    /// new mode's default, since token and prompt scales differ by orders of magnitude.
    pub fn apply(&self, mut config: TriggerConfig) -> TriggerConfig {
        if let Some(mode) = self.mode {
            if mode != config.mode && self.threshold.is_none() {
                config.threshold = mode.default_threshold();
            }
            config.mode = mode;
        }
        if let Some(threshold) = self.threshold {
            config.threshold = threshold;
        }
        if let Some(secs) = self.debounce_secs {
            config.debounce = Duration::from_secs(secs);
        }
        if self.clear_stop_threshold {
            config.stop_threshold = None;
        } else if let Some(n) = self.stop_threshold {
            config.stop_threshold = Some(n);
        }
        if let Some(v) = self.evaluate_on_stop {
            config.evaluate_on_stop = v;
        }
        if let Some(v) = self.first_response {
            config.trigger_on_first_response = v;
        }
        if let Some(v) = self.flush_on_end {
            config.flush_on_end = v;
        }
        config
    }
}

pub fn show(config: &SkillsConfig, project: &Path) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let key = project_key(project);
    let stored = trigger::load_config(&conn, &key)?;
    let is_default = stored.is_none();
    let effective = stored.unwrap_or_else(|| config.trigger.to_trigger_config());

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "project": key,
        "source": if is_default { "defaults" } else { "project" },
        "mode": effective.mode,
        "threshold": effective.threshold,
        "debounce_secs": effective.debounce.as_secs(),
        "stop_threshold": effective.stop_threshold,
        "evaluate_on_stop": effective.evaluate_on_stop,
        "trigger_on_first_response": effective.trigger_on_first_response,
        "flush_on_end": effective.flush_on_end,
    }))?);
    Ok(())
}

pub fn set(config: &SkillsConfig, project: &Path, args: &SetArgs) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let key = project_key(project);
    let current = trigger::effective_config(&conn, &key, &config.trigger.to_trigger_config())?;
    let updated = args.apply(current);

    trigger::save_config(&conn, &key, &updated, Utc::now())
        .context("configuration rejected")?;
    println!(
        "Trigger for {key}: {} >= {} (debounce {}s)",
        updated.mode,
        updated.threshold,
        updated.debounce.as_secs()
    );
    Ok(())
}

pub fn reset(config: &SkillsConfig, project: &Path) -> Result<()> {
    let conn = db::open_database(config.resolved_db_path())?;
    let key = project_key(project);
    if trigger::clear_config(&conn, &key)? {
        println!("Trigger for {key} reset to defaults");
    } else {
        println!("Trigger for {key} already uses defaults");
    }
    Ok(())
}
