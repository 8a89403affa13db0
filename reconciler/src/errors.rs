//! Error types for the reconciler

use thiserror::Error;

/// Main error type for a reconciliation run
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Target unreachable: {0}")]
    UnreachableTarget(String),

    #[error("Clone failed: {0}")]
    CloneFailed(String),

    #[error("Pull failed: {0}")]
    PullFailed(String),

    #[error("Reset failed: {0}")]
    ResetFailed(String),

    #[error("Permission normalization failed: {0}")]
    PermissionApplyFailed(String),

    #[error("Service restart failed: {0}")]
    ServiceRestartFailed(String),

    #[error("Deployment timed out after {0:?}")]
    DeploymentTimedOut(std::time::Duration),

    #[error("Deployment lock is held: {0}")]
    LockContended(String),

    #[error("Deployment cancelled: {0}")]
    Cancelled(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployError {
    /// Whether this error aborts the run instead of being recovered locally
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            DeployError::CloneFailed(_)
                | DeployError::PullFailed(_)
                | DeployError::ResetFailed(_)
                | DeployError::PermissionApplyFailed(_)
                | DeployError::ServiceRestartFailed(_)
        )
    }

    /// Process exit code reported to the orchestrating pipeline
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::ConfigError(_) => 2,
            DeployError::UnreachableTarget(_) => 3,
            DeployError::DeploymentTimedOut(_) => 4,
            DeployError::LockContended(_) => 5,
            DeployError::Cancelled(_) => 130,
            _ => 1,
        }
    }
}
