use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::state::trigger::{TriggerConfig, TriggerMode};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SkillsConfig {
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
    pub trigger: TriggerDefaults,
    pub overseer: OverseerConfig,
    pub analyzer: AnalyzerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Log file used by `hook` and the detached overseer.
    pub file: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    /// Skill root, relative to the project directory.
    pub skills_dir: String,
}

/// Trigger settings applied to projects that have no explicit configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TriggerDefaults {
    pub mode: TriggerMode,
    pub threshold: u64,
    pub debounce_secs: u64,
    pub stop_threshold: Option<u64>,
    pub evaluate_on_stop: bool,
    pub trigger_on_first_response: bool,
    pub flush_on_end: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OverseerConfig {
    pub heartbeat_secs: u64,
    pub liveness_timeout_secs: u64,
    pub idle_grace_secs: u64,
    pub analysis_timeout_secs: u64,
    pub max_edits_per_pass: usize,
    pub condense_on_reject: bool,
    /// Archived sessions stay visible to analysis this long, then are pruned.
    pub session_retention_secs: u64,
    /// Run log entries kept per project.
    pub run_log_keep: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub provider: String,
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
            trigger: TriggerDefaults::default(),
            overseer: OverseerConfig::default(),
            analyzer: AnalyzerConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let file = default_skills_home()
            .join("skills.log")
            .to_string_lossy()
            .into_owned();
        Self {
            level: "info".into(),
            file,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_skills_home()
            .join("state.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            skills_dir: ".claude/skills".into(),
        }
    }
}

impl Default for TriggerDefaults {
    fn default() -> Self {
        Self {
            mode: TriggerMode::Tokens,
            threshold: TriggerMode::Tokens.default_threshold(),
            debounce_secs: 30,
            stop_threshold: None,
            evaluate_on_stop: true,
            trigger_on_first_response: true,
            flush_on_end: true,
        }
    }
}

impl Default for OverseerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 5,
            liveness_timeout_secs: 30,
            idle_grace_secs: 15,
            analysis_timeout_secs: 300,
            max_edits_per_pass: 16,
            condense_on_reject: true,
            session_retention_secs: 86_400,
            run_log_keep: 1_000,
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider: "command".into(),
            command: String::new(),
            args: Vec::new(),
        }
    }
}

impl LoggingConfig {
    /// Resolve the log file path, expanding `~` if needed.
    pub fn resolved_file(&self) -> PathBuf {
        expand_tilde(&self.file)
    }
}

impl TriggerDefaults {
    /// The project-level [`TriggerConfig`] these defaults describe.
    pub fn to_trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            mode: self.mode,
            threshold: self.threshold,
            debounce: Duration::from_secs(self.debounce_secs),
            stop_threshold: self.stop_threshold,
            evaluate_on_stop: self.evaluate_on_stop,
            trigger_on_first_response: self.trigger_on_first_response,
            flush_on_end: self.flush_on_end,
        }
    }
}

impl OverseerConfig {
    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness_timeout_secs)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }
}

/// Returns `~/.skills/`
pub fn default_skills_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".skills")
}

/// Returns the default config file path: `~/.skills/config.toml`
pub fn default_config_path() -> PathBuf {
    default_skills_home().join("config.toml")
}

impl SkillsConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            SkillsConfig::default()
        };

        config.apply_env_overrides();
        config
            .trigger
            .to_trigger_config()
            .validate()
            .context("invalid [trigger] section")?;
        Ok(config)
    }

    /// Apply environment variable overrides (SKILLS_DB, SKILLS_LOG_LEVEL, SKILLS_ANALYZER_CMD).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SKILLS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("SKILLS_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("SKILLS_ANALYZER_CMD") {
            self.analyzer.command = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// The skill root for a project.
    pub fn skills_root(&self, project: &Path) -> PathBuf {
        project.join(&self.storage.skills_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
