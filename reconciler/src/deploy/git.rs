//! Git operations against the web root

use tracing::{debug, info, warn};

use crate::deploy::exec_error;
use crate::errors::DeployError;
use crate::models::deployment::{DeployTarget, RepoSource};
use crate::remote::RemoteHost;
use crate::utils::shell_quote;

/// `git` invocation scoped to the web root
///
/// The checkout is owned by the serving identity, so the deploying user
/// has to mark it safe. Prompts are disabled so a credential problem
/// fails instead of hanging.
fn git(target: &DeployTarget) -> String {
    let path = shell_quote(&target.path);
    format!(
        "GIT_TERMINAL_PROMPT=0 git -c safe.directory={} -C {}",
        path, path
    )
}

/// Clone the repository into an empty (or missing) target path
pub async fn clone_fresh(
    host: &RemoteHost,
    target: &DeployTarget,
    repo: &RepoSource,
) -> Result<(), DeployError> {
    info!("Cloning {} (branch: {}) into {}", repo.url, repo.branch, target);

    let command = format!(
        "GIT_TERMINAL_PROMPT=0 git clone --branch {} --single-branch -- {} {}",
        shell_quote(&repo.branch),
        shell_quote(&repo.url),
        shell_quote(&target.path)
    );
    let output = host.run_privileged(&command).await.map_err(exec_error)?;

    if !output.success() {
        return Err(DeployError::CloneFailed(output.describe()));
    }

    info!("Successfully cloned repository into {}", target);
    Ok(())
}

/// Rebase-pull in place
///
/// A rebase left half-applied is aborted so the fallback starts from a
/// clean state.
pub async fn pull_rebase(
    host: &RemoteHost,
    target: &DeployTarget,
    repo: &RepoSource,
) -> Result<(), DeployError> {
    debug!("Pulling {} with rebase in {}", repo.branch, target);

    let command = format!(
        "{} pull --rebase origin {}",
        git(target),
        shell_quote(&repo.branch)
    );
    let output = host.run_privileged(&command).await.map_err(exec_error)?;

    if !output.success() {
        let abort = format!("{} rebase --abort", git(target));
        if let Err(e) = host.run_privileged(&abort).await {
            warn!("Unable to abort rebase in {}: {}", target, e);
        }
        return Err(DeployError::PullFailed(output.describe()));
    }

    info!("Pulled latest {} into {}", repo.branch, target);
    Ok(())
}

/// Fetch every ref and force the working tree to the remote head
pub async fn fetch_reset_hard(
    host: &RemoteHost,
    target: &DeployTarget,
    repo: &RepoSource,
) -> Result<(), DeployError> {
    debug!("Fetching and hard-resetting {} to origin/{}", target, repo.branch);

    let git = git(target);
    let command = format!(
        "{git} fetch --all --prune && {git} reset --hard {} && {git} clean -fd",
        shell_quote(&format!("origin/{}", repo.branch)),
    );
    let output = host.run_privileged(&command).await.map_err(exec_error)?;

    if !output.success() {
        return Err(DeployError::ResetFailed(output.describe()));
    }

    info!("Reset {} to origin/{}", target, repo.branch);
    Ok(())
}

/// Commit currently checked out, if the target is a readable checkout
pub async fn revision(host: &RemoteHost, target: &DeployTarget) -> Option<String> {
    let command = format!("{} rev-parse HEAD", git(target));
    match host.run(&command).await {
        Ok(output) if output.success() => {
            let rev = output.stdout.trim().to_string();
            (!rev.is_empty()).then_some(rev)
        }
        Ok(output) => {
            debug!("rev-parse failed in {}: {}", target, output.describe());
            None
        }
        Err(e) => {
            debug!("rev-parse failed in {}: {}", target, e);
            None
        }
    }
}
