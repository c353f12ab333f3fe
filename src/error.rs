//! Error types for the Solvent problem-solving pipeline.

use crate::pipeline::stage::Stage;
use thiserror::Error;

/// Failure class assigned to a generation-service error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    RateLimited,
    Transient,
    Fatal,
}

/// Classified failure returned by a generation client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transient generation failure: {0}")]
    Transient(String),

    #[error("Fatal generation failure: {0}")]
    Fatal(String),
}

impl GenerationError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GenerationError::RateLimited(_) => ErrorClass::RateLimited,
            GenerationError::Transient(_) => ErrorClass::Transient,
            GenerationError::Fatal(_) => ErrorClass::Fatal,
        }
    }

    /// Rate-limited and transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Fatal(_))
    }
}

/// Artifact storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Pipeline-level errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Structured output rejected: {0}")]
    Schema(String),

    #[error("Remote generation failed: {0}")]
    Remote(#[from] GenerationError),

    #[error("Data resolution degraded: {0}")]
    ResolutionDegraded(String),

    #[error("Data directory inaccessible: {0}")]
    ResolutionInaccessible(String),

    #[error("Stage {stage} failed: {reason}")]
    StageFatal { stage: Stage, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Problem discovery failed: {0}")]
    Discovery(String),
}

impl PipelineError {
    pub fn stage_fatal(stage: Stage, reason: impl std::fmt::Display) -> Self {
        PipelineError::StageFatal {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Config(err.to_string())
    }
}
