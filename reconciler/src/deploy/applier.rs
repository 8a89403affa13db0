//! Applies a sync plan to the target
//!
//! Walks the plan's steps in order, records every fallback, degrades to
//! the placeholder page when the chain is exhausted, then always
//! normalizes permissions and restarts the web server.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::deploy::critical::CriticalSection;
use crate::deploy::{exec_error, git, permissions, placeholder, service, strategy};
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{
    ApplyResult, DeployTarget, ReconcileAction, RepoSource, RunOutcome, SyncPlan, Transition,
};
use crate::remote::RemoteHost;
use crate::utils::shell_quote;

/// Everything the applier needs besides the plan
#[derive(Debug, Clone)]
pub struct ApplierOptions {
    /// Serving identities tried after the target's own service user
    pub identity_candidates: Vec<String>,

    /// Service restarted once content is in place
    pub service_name: String,

    /// Where the run's log ends up, shown on the placeholder page
    pub log_location: String,
}

impl Default for ApplierOptions {
    fn default() -> Self {
        Self {
            identity_candidates: vec!["nginx".to_string(), "apache".to_string()],
            service_name: "nginx".to_string(),
            log_location: "/var/log/rootsync/rootsync.log".to_string(),
        }
    }
}

/// Executes reconcile actions against one target
#[derive(Clone)]
pub struct Applier {
    host: RemoteHost,
    target: DeployTarget,
    repo: RepoSource,
    options: ApplierOptions,
    critical: CriticalSection,
}

impl Applier {
    pub fn new(
        host: RemoteHost,
        target: DeployTarget,
        repo: RepoSource,
        options: ApplierOptions,
        critical: CriticalSection,
    ) -> Self {
        Self {
            host,
            target,
            repo,
            options,
            critical,
        }
    }

    /// Run the plan and the post-sync passes, filling in `result`
    ///
    /// Only fatal errors (lost transport) are returned; everything else
    /// ends up in `result.transitions` or `result.warnings`.
    pub async fn apply(&self, plan: &SyncPlan, result: &mut ApplyResult) -> Result<RunOutcome, DeployError> {
        let outcome = self.sync_content(plan, result).await?;

        self.normalize_permissions(result).await?;

        match service::restart(&self.host, &self.options.service_name).await {
            Ok(()) => result.service_restarted = true,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Continuing without restart: {}", e);
                result.warnings.push(e.to_string());
            }
        }

        if outcome == RunOutcome::Succeeded {
            result.revision = git::revision(&self.host, &self.target).await;
        }

        Ok(outcome)
    }

    async fn sync_content(&self, plan: &SyncPlan, result: &mut ApplyResult) -> Result<RunOutcome, DeployError> {
        let mut steps = plan.steps().peekable();

        while let Some(action) = steps.next() {
            match self.execute(action, &result.run_id).await {
                Ok(()) => {
                    result.action = action;
                    return Ok(if action == ReconcileAction::PlaceholderPage {
                        RunOutcome::Degraded
                    } else {
                        RunOutcome::Succeeded
                    });
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let next = steps.peek().copied().unwrap_or_else(strategy::exhausted);
                    warn!("{} failed for {}: {}; falling back to {}", action, self.target, e, next);
                    result.transitions.push(Transition {
                        from: action,
                        to: next,
                        reason: e.to_string(),
                    });
                }
            }
        }

        result.action = ReconcileAction::PlaceholderPage;
        match self.write_placeholder(&result.run_id).await {
            Ok(()) => {}
            Err(e @ DeployError::UnreachableTarget(_)) => return Err(e),
            Err(e) => {
                error!("Unable to write placeholder page to {}: {}", self.target, e);
                result.warnings.push(format!("placeholder page not written: {}", e));
            }
        }
        Ok(RunOutcome::Degraded)
    }

    /// Execute a single action
    pub async fn execute(&self, action: ReconcileAction, run_id: &str) -> Result<(), DeployError> {
        info!("Applying {} to {}", action, self.target);
        match action {
            ReconcileAction::CloneFresh => {
                self.clear_target().await?;
                git::clone_fresh(&self.host, &self.target, &self.repo).await
            }
            ReconcileAction::PullRebase => git::pull_rebase(&self.host, &self.target, &self.repo).await,
            ReconcileAction::FetchResetHard => {
                git::fetch_reset_hard(&self.host, &self.target, &self.repo).await
            }
            ReconcileAction::PlaceholderPage => self.write_placeholder(run_id).await,
        }
    }

    /// Remove everything under the target path, keeping the directory
    async fn clear_target(&self) -> Result<(), DeployError> {
        let path = shell_quote(&self.target.path);
        let command = format!(
            "if [ -e {path} ] && [ ! -d {path} ]; then rm -f {path}; fi; \
             mkdir -p {path} && find {path} -mindepth 1 -maxdepth 1 -exec rm -rf {{}} +"
        );
        let output = self.host.run_privileged(&command).await.map_err(exec_error)?;
        if !output.success() {
            return Err(DeployError::CloneFailed(format!(
                "unable to clear {}: {}",
                self.target,
                output.describe()
            )));
        }
        Ok(())
    }

    /// Stage the placeholder locally, upload it, and move it into place
    async fn write_placeholder(&self, run_id: &str) -> Result<(), DeployError> {
        let html = placeholder::render(run_id, &self.options.log_location, Utc::now());

        let staging = Dir::create_temp_dir("rootsync").await?;
        let page = staging.file(placeholder::PLACEHOLDER_FILE);
        page.write_string(&html).await?;

        let remote_tmp = format!("/tmp/rootsync-{}.html", run_id);
        let uploaded = self.host.upload(page.path(), &remote_tmp).await;
        if let Err(e) = staging.delete().await {
            warn!("Unable to remove staging directory {:?}: {}", staging.path(), e);
        }
        uploaded.map_err(exec_error)?;

        let path = shell_quote(&self.target.path);
        let tmp = shell_quote(&remote_tmp);
        let command = format!(
            "mkdir -p {path} && mv -f {tmp} {path}/{page} || {{ rm -f {tmp}; exit 1; }}",
            page = placeholder::PLACEHOLDER_FILE
        );
        let output = self.host.run_privileged(&command).await.map_err(exec_error)?;
        if !output.success() {
            return Err(DeployError::Internal(format!(
                "unable to place {}: {}",
                placeholder::PLACEHOLDER_FILE,
                output.describe()
            )));
        }

        warn!("Placeholder page written to {}", self.target);
        Ok(())
    }

    /// Ownership and mode pass, shielded from cancellation
    ///
    /// Its host-side bound is pushed back by the critical section's grace
    /// so that a run timeout alone does not kill it.
    async fn normalize_permissions(&self, result: &mut ApplyResult) -> Result<(), DeployError> {
        let host = self.host.extended(self.critical.grace());
        let target = self.target.clone();
        let candidates = permissions::candidate_identities(&self.target, &self.options.identity_candidates);

        let pass = self
            .critical
            .run(async move {
                let identity = permissions::resolve_identity(&host, &candidates).await?;
                let modes = permissions::normalize(&host, &target, &identity).await?;
                Ok::<_, DeployError>((identity, modes))
            })
            .await?;

        match pass {
            Ok((identity, modes)) => {
                result.ownership = Some(identity);
                result.permissions = Some(modes);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Content left with its current ownership: {}", e);
                result.warnings.push(e.to_string());
                Ok(())
            }
        }
    }
}
