//! Deployment reconciliation

pub mod applier;
pub mod critical;
pub mod fsm;
pub mod git;
pub mod lock;
pub mod permissions;
pub mod placeholder;
pub mod probe;
pub mod reconciler;
pub mod service;
pub mod strategy;

use crate::errors::DeployError;
use crate::remote::ExecError;

/// Lift a transport-level failure into the run's error taxonomy
pub(crate) fn exec_error(err: ExecError) -> DeployError {
    match err {
        ExecError::Transport(msg) => DeployError::UnreachableTarget(msg),
        ExecError::Upload(msg) => DeployError::Internal(msg),
    }
}
