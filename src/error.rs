//! Error taxonomy shared by the coordination engine.
//!
//! Library operations return [`Result<T>`] with a [`SkillsError`]; the CLI layer wraps
//! these in `anyhow` with context.

use std::path::PathBuf;

use thiserror::Error;

/// Ceiling on the number of lines in a skill's primary `SKILL.md`.
pub const SKILL_LINE_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum SkillsError {
    /// The counter or lock store could not be reached. The event was not counted.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] rusqlite::Error),

    /// Another caller won the compare-and-swap on an abandoned lock.
    #[error("lock for {project} was reclaimed by another caller")]
    LockReclaimRace { project: String },

    /// The analysis capability returned an error.
    #[error("analysis failed: {0}")]
    AnalysisFailure(String),

    /// The analysis capability did not answer within the configured timeout.
    #[error("analysis timed out after {0}s")]
    AnalysisTimeout(u64),

    /// A proposed artifact body exceeds the line ceiling.
    #[error("{name} has {lines} lines, limit is {limit}")]
    RejectedTooLarge {
        name: String,
        lines: usize,
        limit: usize,
    },

    /// A proposed artifact has a bad name or a malformed header block.
    #[error("invalid artifact {name}: {reason}")]
    InvalidArtifact { name: String, reason: String },

    /// Configuration that can never be evaluated (e.g. a zero threshold).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SkillsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is a per-edit rejection (the rest of a pass may proceed).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::RejectedTooLarge { .. } | Self::InvalidArtifact { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SkillsError>;
