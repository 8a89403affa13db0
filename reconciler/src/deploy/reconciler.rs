//! One reconciliation run: lock, probe, plan, apply, report

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::deploy::applier::{Applier, ApplierOptions};
use crate::deploy::critical::{self, CriticalSection};
use crate::deploy::fsm::{RunEvent, RunFsm};
use crate::deploy::lock::DeployLock;
use crate::deploy::{probe, strategy};
use crate::errors::DeployError;
use crate::models::deployment::{ApplyResult, DeployTarget, RepoSource, RunOutcome, SyncPlan, WorkspaceState};
use crate::remote::RemoteHost;
use crate::utils::{generate_run_id, CooldownOptions};

/// Upper bound on releasing the lock after a run has ended
const LOCK_RELEASE_GRACE: Duration = Duration::from_secs(30);

/// Run-level settings
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Wall-clock budget for the whole run, lock wait included
    pub run_timeout: Duration,

    /// How long to wait for a competing run to release the lock
    pub lock_wait: Duration,

    /// Retry cadence while waiting for the lock
    pub lock_cooldown: CooldownOptions,

    /// How long a permission pass may run past the deadline
    pub critical_grace: Duration,

    pub applier: ApplierOptions,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(600),
            lock_wait: Duration::ZERO,
            lock_cooldown: CooldownOptions::default(),
            critical_grace: critical::DEFAULT_GRACE,
            applier: ApplierOptions::default(),
        }
    }
}

/// Reconciles one target with one repository
#[derive(Clone)]
pub struct Reconciler {
    host: RemoteHost,
    target: DeployTarget,
    repo: RepoSource,
    options: ReconcilerOptions,
    critical: CriticalSection,
}

impl Reconciler {
    pub fn new(host: RemoteHost, target: DeployTarget, repo: RepoSource, options: ReconcilerOptions) -> Self {
        let critical = CriticalSection::with_grace(options.critical_grace);
        Self {
            host,
            target,
            repo,
            options,
            critical,
        }
    }

    pub fn target(&self) -> &DeployTarget {
        &self.target
    }

    /// Probe and plan without taking the lock or mutating anything
    pub async fn plan(&self) -> Result<(WorkspaceState, SyncPlan), DeployError> {
        let state = probe::probe(&self.host, &self.target).await?;
        Ok((state, strategy::choose(state, &self.repo)))
    }

    /// Run a full reconciliation
    ///
    /// `cancel` resolving aborts the run like the timeout does. In both
    /// cases an in-flight permission pass gets up to the critical grace
    /// to finish, commands still running on the host are stopped, and
    /// the lock is released before returning. No rollback is attempted.
    pub async fn run<C>(&self, cancel: C) -> Result<ApplyResult, DeployError>
    where
        C: Future<Output = ()>,
    {
        let run_id = generate_run_id();
        let started_at = Utc::now();
        let deadline = Instant::now() + self.options.run_timeout;
        tokio::pin!(cancel);

        info!("Reconciling {} from {} ({}) [run {}]", self.target, self.repo.url, self.repo.branch, run_id);

        let lock = DeployLock::new(self.host.clone(), &self.target, &run_id)
            .with_cooldown(self.options.lock_cooldown.clone());

        let acquired = tokio::select! {
            biased;
            res = tokio::time::timeout_at(deadline, lock.acquire(self.options.lock_wait)) => {
                res.unwrap_or(Err(DeployError::DeploymentTimedOut(self.options.run_timeout)))
            }
            _ = &mut cancel => Err(DeployError::Cancelled("aborted while waiting for the lock".to_string())),
        };
        if let Err(e) = acquired {
            // The mkdir may have landed on the host before the reply was dropped
            if is_abort(&e) {
                release_lock(&lock).await;
            }
            return Err(e);
        }

        let host = self.host.bounded(deadline, format!("rootsync-run-{}", run_id));
        let outcome = tokio::select! {
            biased;
            res = tokio::time::timeout_at(deadline, self.reconcile_locked(&host, &run_id)) => {
                res.unwrap_or(Err(DeployError::DeploymentTimedOut(self.options.run_timeout)))
            }
            _ = &mut cancel => Err(DeployError::Cancelled("aborted during reconciliation".to_string())),
        };

        // A permission pass cut off by the timeout still runs, within the grace
        if !self.critical.drain().await {
            warn!(
                "Permission pass on {} still running after {:?}; the next run repeats it",
                self.target,
                self.critical.grace()
            );
        }

        if matches!(&outcome, Err(e) if is_abort(e)) {
            host.abort().await;
        }

        release_lock(&lock).await;

        match outcome {
            Ok(mut result) => {
                result.started_at = started_at;
                Ok(result)
            }
            Err(e) => {
                error!("Run {} against {} failed: {}", run_id, self.target, e);
                Err(e)
            }
        }
    }

    async fn reconcile_locked(&self, host: &RemoteHost, run_id: &str) -> Result<ApplyResult, DeployError> {
        let mut fsm = RunFsm::new();

        let state = probe::probe(host, &self.target).await?;
        step(&mut fsm, RunEvent::Probed)?;

        let plan = strategy::choose(state, &self.repo);
        step(&mut fsm, RunEvent::PlanChosen)?;
        info!("Plan for {}: {} (fallbacks: {:?})", self.target, plan.action, plan.fallbacks);

        let mut result = ApplyResult::new(run_id, &self.target, state, plan.clone());
        step(&mut fsm, RunEvent::Apply)?;

        let applier = Applier::new(
            host.clone(),
            self.target.clone(),
            self.repo.clone(),
            self.options.applier.clone(),
            self.critical.clone(),
        );
        let outcome = applier.apply(&plan, &mut result).await?;

        match outcome {
            RunOutcome::Succeeded => step(&mut fsm, RunEvent::Synced)?,
            RunOutcome::Degraded => {
                let reason = result
                    .transitions
                    .last()
                    .map(|t| t.reason.clone())
                    .unwrap_or_else(|| "sync chain exhausted".to_string());
                step(&mut fsm, RunEvent::Degrade(reason))?;
                warn!("Run {} degraded: {}", run_id, fsm.reason().unwrap_or_default());
            }
        }
        result.finish(outcome);

        info!(
            "Run {} finished {:?} with {} ({} fallback transition(s), {} warning(s))",
            run_id,
            result.outcome,
            result.action,
            result.transitions.len(),
            result.warnings.len()
        );
        Ok(result)
    }
}

/// Timeout or cancellation, as opposed to a failure of the run itself
fn is_abort(err: &DeployError) -> bool {
    matches!(err, DeployError::DeploymentTimedOut(_) | DeployError::Cancelled(_))
}

async fn release_lock(lock: &DeployLock) {
    match tokio::time::timeout(LOCK_RELEASE_GRACE, lock.release()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!("Failed to release deployment lock {}: {}", lock.path(), e),
        Err(_) => error!("Timed out releasing deployment lock {}", lock.path()),
    }
}

fn step(fsm: &mut RunFsm, event: RunEvent) -> Result<(), DeployError> {
    let from = fsm.state();
    fsm.process(event).map_err(DeployError::InvalidTransition)?;
    debug!("Run state {:?} -> {:?}", from, fsm.state());
    Ok(())
}
