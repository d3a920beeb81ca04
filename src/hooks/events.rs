//! Host lifecycle events as delivered on the hook's stdin.

use std::path::PathBuf;

use serde::Deserialize;

/// Rough characters-per-token ratio used when the host gives no token estimate.
pub const CHARS_PER_TOKEN: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum HookEvent {
    SessionStart,
    UserPromptSubmit,
    Stop,
    SessionEnd,
    /// Events this crate does not act on (tool hooks, notifications, ...).
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookInput {
    pub hook_event_name: HookEvent,
    pub session_id: String,
    pub cwd: PathBuf,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub estimated_tokens: Option<u64>,
}

impl HookInput {
    /// Token estimate for a prompt submission.
    pub fn prompt_tokens(&self) -> u64 {
        self.estimated_tokens
            .or_else(|| self.prompt.as_deref().map(estimate_tokens))
            .unwrap_or(0)
    }
}

pub fn estimate_tokens(text: &str) -> u64 {
    text.chars().count() as u64 / CHARS_PER_TOKEN
}

/// Token estimate for `bytes` of new transcript.
pub fn tokens_for_bytes(bytes: u64) -> u64 {
    bytes / CHARS_PER_TOKEN
}
