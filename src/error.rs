//! Error types for the Foundry pipeline orchestration engine.

use crate::pipeline::state::Phase;
use crate::types::{RunId, StepId};
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sled::Error> for StorageError {
    fn from(err: sled::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

/// Pipeline errors surfaced by collaborators, phases, and the orchestrator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Provider rate limit exceeded: {0}")]
    ProviderRateLimit(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    #[error("{operation} timed out after {timeout_secs}s")]
    ProviderTimeout { operation: String, timeout_secs: u64 },

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid agent response: {0}")]
    InvalidResponse(String),

    #[error("Agent {agent} failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Planning failed: {0}")]
    PlanFailed(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Step {step_id} failed: {message}")]
    StepFailed { step_id: StepId, message: String },

    #[error("No checkpoint found for run {0}")]
    CheckpointMissing(RunId),

    #[error("Checkpoint for run {run_id} is unusable: {reason}")]
    CheckpointCorrupt { run_id: RunId, reason: String },

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run {0} is already active")]
    RunAlreadyActive(RunId),

    #[error("Run supervisor failed: {0}")]
    SupervisorFailed(String),

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::ConfigError(err.to_string())
    }
}
