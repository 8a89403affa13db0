//! Command execution

use std::future::Future;

use serde::Serialize;
use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::app::report;
use crate::deploy::lock::DeployLock;
use crate::errors::DeployError;
use crate::models::deployment::{ApplyResult, SyncPlan, WorkspaceState};

/// What `plan` reports
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub target: String,
    pub state: WorkspaceState,
    pub plan: SyncPlan,
}

/// Full reconciliation, aborted when `shutdown_signal` resolves
pub async fn deploy(
    options: &AppOptions,
    shutdown_signal: impl Future<Output = ()>,
    json: bool,
) -> Result<ApplyResult, DeployError> {
    let reconciler = options.reconciler();
    let result = reconciler.run(shutdown_signal).await?;
    report::print_result(&result, json)?;
    Ok(result)
}

/// Probe and plan only
pub async fn plan(options: &AppOptions, json: bool) -> Result<PlanReport, DeployError> {
    let reconciler = options.reconciler();
    let (state, plan) = reconciler.plan().await?;
    let plan_report = PlanReport {
        target: options.target.to_string(),
        state,
        plan,
    };
    report::print_plan(&plan_report, json)?;
    Ok(plan_report)
}

/// Probe only
pub async fn probe(options: &AppOptions, json: bool) -> Result<WorkspaceState, DeployError> {
    let (state, _) = options.reconciler().plan().await?;
    report::print_state(&options.target, state, json)?;
    Ok(state)
}

/// Break a stale lock
pub async fn unlock(options: &AppOptions) -> Result<(), DeployError> {
    let lock = DeployLock::new(options.remote_host(), &options.target, "unlock");
    match lock.force_unlock().await? {
        Some(holder) => warn!("Removed lock {} held by {}", lock.path(), holder),
        None => info!("Removed lock {}", lock.path()),
    }
    Ok(())
}
