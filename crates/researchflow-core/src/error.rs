use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::state::{AgentStatus, StateError};

/// Pipeline stage names used in error reports, traces and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Research,
    Write,
    Review,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Research => "research",
            Stage::Write => "write",
            Stage::Review => "review",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for a ResearchFlow run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("content generator is not configured: {0}")]
    Config(String),
    #[error("invalid topic: {0}")]
    Validation(String),
    #[error("research plan could not be parsed: {0}")]
    PlanParse(String),
    #[error("{stage} stage failed: {reason}")]
    StageFailure { stage: Stage, reason: String },
    #[error(transparent)]
    State(#[from] StateError),
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn stage(stage: Stage, reason: impl fmt::Display) -> Self {
        Self::StageFailure {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Whether the error was raised before any agent state was touched.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Validation(_))
    }
}

/// Failure reported by a [`ContentGenerator`](crate::ContentGenerator).
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("generation service unavailable: {0}")]
    Unavailable(String),
    #[error("generation request rejected: {0}")]
    Rejected(String),
    #[error("malformed stream: {0}")]
    MalformedStream(String),
}

impl GenerationError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }
}

/// Human-readable note appended to an agent's output when a run aborts.
pub(crate) fn failure_note(error: &PipelineError) -> String {
    format!("\n\n[{}] {error}", AgentStatus::Error.as_str())
}
