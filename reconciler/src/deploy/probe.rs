//! Workspace state probe

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::deployment::{DeployTarget, WorkspaceState};
use crate::remote::{ExecError, RemoteHost};
use crate::utils::shell_quote;

/// Classify what currently sits at the target path
///
/// Read-only. Always re-run at the start of a run, never cached.
pub async fn probe(host: &RemoteHost, target: &DeployTarget) -> Result<WorkspaceState, DeployError> {
    let output = host
        .run(&probe_command(&target.path))
        .await
        .map_err(|e| match e {
            ExecError::Transport(msg) => DeployError::UnreachableTarget(msg),
            other => DeployError::Internal(other.to_string()),
        })?;

    if !output.success() {
        return Err(DeployError::Internal(format!(
            "probe of {} failed: {}",
            target,
            output.describe()
        )));
    }

    let state = parse_probe_output(&output.stdout)?;
    debug!("Probe output for {}: {:?}", target, output.stdout.trim());
    info!("Workspace at {} is {}", target, state);
    Ok(state)
}

fn probe_command(path: &str) -> String {
    format!(
        "P={}; if [ -d \"$P/.git\" ]; then echo git; \
         elif [ -e \"$P\" ] && [ -n \"$(ls -A \"$P\" 2>/dev/null)\" ]; then echo foreign; \
         else echo absent; fi",
        shell_quote(path)
    )
}

fn parse_probe_output(stdout: &str) -> Result<WorkspaceState, DeployError> {
    match stdout.trim() {
        "git" => Ok(WorkspaceState::PresentAsGitRepo),
        "foreign" => Ok(WorkspaceState::PresentAsForeignContent),
        "absent" => Ok(WorkspaceState::Absent),
        other => Err(DeployError::Internal(format!(
            "unexpected probe output: {:?}",
            other
        ))),
    }
}
