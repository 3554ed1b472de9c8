//! Error taxonomy shared by every collaborator of the workflow engine.
//!
//! Collaborators (repository backends, PR gateways, the branch manager) return
//! these typed errors; [`crate::engine::WorkflowEngine`] is the only place that
//! decides whether a failure is retried or fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A request that would break branch policy. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("refusing to operate on protected branch '{name}'")]
    ProtectedBranch { name: String },
    #[error("branch '{name}' does not start with an allowed type prefix")]
    InvalidPrefix { name: String },
}

/// Failure of a single workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Policy(#[from] PolicyViolation),
    /// Network timeout, lock contention, remote temporarily unreachable.
    #[error("transient infrastructure failure: {0}")]
    TransientInfra(String),
    /// No credentials for the pull request API.
    #[error("pull request credentials missing: {0}")]
    AuthMissing(String),
    /// Rejected before any side effect.
    #[error("invalid input: {0}")]
    Validation(String),
    /// The remote refused for reasons other than auth.
    #[error("remote rejected the request: {0}")]
    Rejected(String),
    /// A local version-control command failed.
    #[error("version control command failed: {0}")]
    Vcs(String),
    #[error("workflow cancelled")]
    Cancelled,
}

/// Serializable classification of a [`WorkflowError`], stored on failed runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PolicyViolation,
    TransientInfra,
    AuthMissing,
    Validation,
    Rejected,
    Vcs,
    Cancelled,
}

impl WorkflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Policy(_) => ErrorKind::PolicyViolation,
            WorkflowError::TransientInfra(_) => ErrorKind::TransientInfra,
            WorkflowError::AuthMissing(_) => ErrorKind::AuthMissing,
            WorkflowError::Validation(_) => ErrorKind::Validation,
            WorkflowError::Rejected(_) => ErrorKind::Rejected,
            WorkflowError::Vcs(_) => ErrorKind::Vcs,
            WorkflowError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Only transient infrastructure failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowError::TransientInfra(_))
    }
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::TransientInfra => "transient_infra",
            ErrorKind::AuthMissing => "auth_missing",
            ErrorKind::Validation => "validation",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Vcs => "vcs",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}
