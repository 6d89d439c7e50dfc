//! Typed error hierarchy for the draftgate engine.
//!
//! Three top-level enums cover the three subsystems:
//! - `EngineError`: rejected external calls and unrecoverable store problems
//! - `StepError`: per-step execution failures, classified for retry
//! - `StoreError`: checkpoint store failures
//!
//! `CollaboratorError` is the narrower error a draft/review collaborator
//! returns; steps convert it into a `StepError`.

use std::time::Duration;
use thiserror::Error;

/// Errors from a single step execution.
///
/// The engine classifies these inside its loop; they never escape to callers
/// except as a `failed` run carrying the matching [`FailureCode`].
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Step {step} timed out after {limit:?}")]
    Timeout { step: String, limit: Duration },

    #[error("Transient failure in {step}: {message}")]
    Transient { step: String, message: String },

    #[error("Malformed output from {step}: {message}")]
    Malformed { step: String, message: String },

    #[error("Step {step} violated its contract: {message}")]
    ContractViolation { step: String, message: String },
}

impl StepError {
    pub fn transient(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn malformed(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            step: step.into(),
            message: message.into(),
        }
    }

    pub fn contract(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Failure code recorded on the blackboard when this error ends a run.
    pub fn failure_code(&self) -> FailureCode {
        match self {
            Self::Timeout { .. } => FailureCode::StepTimeout,
            Self::Transient { .. } => FailureCode::StepFailed,
            Self::Malformed { .. } => FailureCode::MalformedOutput,
            Self::ContractViolation { .. } => FailureCode::ContractViolation,
        }
    }
}

/// Errors from a draft or review collaborator.
///
/// Collaborators do not know which step called them; the step attaches its
/// name through [`CollaboratorError::into_step_error`].
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Spawn failure, I/O error, non-zero exit. Worth retrying.
    #[error("{0}")]
    Unavailable(String),

    /// The collaborator answered, but not with something usable.
    #[error("{0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn into_step_error(self, step: &str) -> StepError {
        match self {
            Self::Unavailable(message) => StepError::transient(step, message),
            Self::Malformed(message) => StepError::malformed(step, message),
        }
    }
}

/// Stable machine-readable failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    StepFailed,
    StepTimeout,
    MalformedOutput,
    ContractViolation,
    CheckpointCorrupt,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StepFailed => "step_failed",
            Self::StepTimeout => "step_timeout",
            Self::MalformedOutput => "malformed_output",
            Self::ContractViolation => "contract_violation",
            Self::CheckpointCorrupt => "checkpoint_corrupt",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the checkpoint store subsystem.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Checkpoint log I/O error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),

    #[error("Failed to serialize checkpoint: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Checkpoint for run {run_id} is unreadable: {detail}")]
    Corrupt { run_id: String, detail: String },

    #[error("Invalid run id '{0}'")]
    InvalidRunId(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Errors surfaced to callers of the engine's external API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Run {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Run {run_id} is already {status}; it cannot be resumed")]
    RunTerminal { run_id: String, status: String },

    #[error("Run {run_id} is {status}, not awaiting a human review")]
    NotAwaitingReview { run_id: String, status: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Checkpoint for run {run_id} is corrupt: {detail}")]
    CheckpointCorrupt { run_id: String, detail: String },

    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    /// Stable code so an operator can tell store corruption from business
    /// failures and bad requests.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RunNotFound { .. } => "run_not_found",
            Self::RunTerminal { .. } => "run_terminal",
            Self::NotAwaitingReview { .. } => "not_awaiting_review",
            Self::BadRequest(_) => "bad_request",
            Self::CheckpointCorrupt { .. } => FailureCode::CheckpointCorrupt.as_str(),
            Self::Store(_) => "store_error",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt { run_id, detail } => Self::CheckpointCorrupt { run_id, detail },
            StoreError::InvalidRunId(run_id) => Self::BadRequest(format!("invalid run id '{}'", run_id)),
            other => Self::Store(other),
        }
    }
}
