//! The analysis capability: decides *what* to write into skill artifacts.
//!
//! The coordination engine treats it as a black box. It receives an [`AnalysisRequest`]
//! snapshot and answers with proposed [`SkillEdit`]s. Implementations are created via
//! [`create_analyzer`] from configuration.

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::skills::SkillArtifact;
use crate::state::counters::SessionCounters;

/// Everything the analyzer gets to see for one pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub project: String,
    /// Transcript of the most recently active session, as an opaque path.
    pub transcript: Option<String>,
    pub sessions: Vec<SessionSnapshot>,
    pub artifacts: Vec<SkillArtifact>,
    /// 1-based pass number within this worker's lifetime.
    pub pass: u32,
    /// Edits from the previous attempt that were refused, so they can be condensed.
    #[serde(default)]
    pub rejections: Vec<Rejection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub tokens: u64,
    pub prompts: u64,
    pub responses: u64,
    pub total_tokens: u64,
    pub total_prompts: u64,
    pub transcript_path: Option<String>,
    pub ended: bool,
}

impl From<&SessionCounters> for SessionSnapshot {
    fn from(session: &SessionCounters) -> Self {
        Self {
            session_id: session.session_id.clone(),
            tokens: session.counters.tokens,
            prompts: session.counters.prompts,
            responses: session.responses,
            total_tokens: session.total_tokens,
            total_prompts: session.total_prompts,
            transcript_path: session.transcript_path.clone(),
            ended: session.ended_at.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub artifact: String,
    pub reason: String,
    pub lines: Option<usize>,
}

/// One proposed file write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEdit {
    pub skill: String,
    /// Defaults to `SKILL.md`.
    #[serde(default = "default_file")]
    pub file: String,
    pub body: String,
}

fn default_file() -> String {
    crate::skills::PRIMARY_FILE.to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default)]
    pub edits: Vec<SkillEdit>,
    pub summary: Option<String>,
}

/// The external analysis capability.
///
/// Implementations must be cancel-safe: the worker drops the future when the analysis
/// timeout elapses.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse>;
}

/// Create an analyzer from config.
///
/// Currently only `"command"` is supported (a subprocess speaking JSON on stdin/stdout).
pub fn create_analyzer(config: &crate::config::AnalyzerConfig) -> anyhow::Result<Box<dyn Analyzer>> {
    match config.provider.as_str() {
        "command" => {
            if config.command.is_empty() {
                anyhow::bail!(
                    "analyzer.command is not set. Configure it in config.toml or SKILLS_ANALYZER_CMD"
                );
            }
            Ok(Box::new(command::CommandAnalyzer::new(
                &config.command,
                config.args.clone(),
            )))
        }
        other => anyhow::bail!("unknown analyzer provider: {other}. Supported: command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;

    #[test]
    fn edit_file_defaults_to_primary() {
        let edit: SkillEdit =
            serde_json::from_str(r#"{"skill": "deploy", "body": "x"}"#).unwrap();
        assert_eq!(edit.file, "SKILL.md");
    }

    #[test]
    fn response_without_edits_is_empty() {
        let response: AnalysisResponse = serde_json::from_str(r#"{"summary": "nothing new"}"#).unwrap();
        assert!(response.edits.is_empty());
    }

    #[test]
    fn command_provider_requires_command() {
        let config = AnalyzerConfig::default();
        let err = create_analyzer(&config).err().unwrap();
        assert!(err.to_string().contains("analyzer.command"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = AnalyzerConfig {
            provider: "magic".into(),
            ..AnalyzerConfig::default()
        };
        assert!(create_analyzer(&config).is_err());
    }
}
