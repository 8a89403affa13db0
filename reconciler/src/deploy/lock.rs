//! Per-target advisory deployment lock
//!
//! The lock is a directory next to the web root, created with `mkdir`,
//! which is atomic on POSIX filesystems. It holds an `owner` file naming
//! the run that took it. Every participant must go through this type.
//! A run only ever removes a lock whose owner file names it.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::deploy::exec_error;
use crate::errors::DeployError;
use crate::models::deployment::DeployTarget;
use crate::remote::RemoteHost;
use crate::utils::{calc_exp_backoff, hostname, shell_quote, CooldownOptions};

/// Exit status of the acquire script when the lock already exists
const CONTENDED: i32 = 1;

/// Printed by the release script when the lock was removed
const RELEASED: &str = "released";

/// Advisory lock scoped to one deploy target
#[derive(Clone)]
pub struct DeployLock {
    host: RemoteHost,
    path: String,
    run_id: String,
    owner: String,
    cooldown: CooldownOptions,
}

impl DeployLock {
    pub fn new(host: RemoteHost, target: &DeployTarget, run_id: &str) -> Self {
        let owner = format!(
            "host={} pid={} run={} at={}",
            hostname(),
            std::process::id(),
            run_id,
            chrono::Utc::now().to_rfc3339()
        );
        Self {
            host,
            path: target.lock_path(),
            run_id: run_id.to_string(),
            owner,
            cooldown: CooldownOptions::default(),
        }
    }

    /// Override the retry cadence used while waiting
    pub fn with_cooldown(mut self, cooldown: CooldownOptions) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Take the lock, retrying until `wait` has elapsed
    ///
    /// A zero `wait` fails on the first contended attempt.
    pub async fn acquire(&self, wait: Duration) -> Result<(), DeployError> {
        let deadline = Instant::now() + wait;
        let mut attempt = 0;

        loop {
            if self.try_acquire().await? {
                info!("Acquired deployment lock {}", self.path);
                return Ok(());
            }

            let holder = self.holder().await.unwrap_or_else(|| "unknown holder".to_string());
            let delay = calc_exp_backoff(&self.cooldown, attempt);
            if Instant::now() + delay > deadline {
                return Err(DeployError::LockContended(format!(
                    "{} is held by {}",
                    self.path, holder
                )));
            }

            debug!(
                "Deployment lock {} held by {}, retrying in {:?}",
                self.path, holder, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn try_acquire(&self) -> Result<bool, DeployError> {
        let lock = shell_quote(&self.path);
        let parent = shell_quote(parent_of(&self.path));
        let command = format!(
            "mkdir -p {parent} || exit 2; mkdir {lock} 2>/dev/null || exit {CONTENDED}; \
             printf '%s\\n' {owner} > {lock}/owner",
            owner = shell_quote(&self.owner),
        );
        let output = self.host.run_privileged(&command).await.map_err(exec_error)?;

        match output.status {
            0 => Ok(true),
            CONTENDED => Ok(false),
            _ => Err(DeployError::Internal(format!(
                "unable to create lock {}: {}",
                self.path,
                output.describe()
            ))),
        }
    }

    /// Description of whoever holds the lock
    pub async fn holder(&self) -> Option<String> {
        let command = format!("cat {}/owner 2>/dev/null", shell_quote(&self.path));
        match self.host.run(&command).await {
            Ok(output) if output.success() => {
                let owner = output.stdout.trim().to_string();
                (!owner.is_empty()).then_some(owner)
            }
            _ => None,
        }
    }

    /// Drop the lock if this run holds it
    ///
    /// Safe to call when acquisition was cut off midway, and never
    /// removes a lock another run took after a forced unlock. Returns
    /// whether a lock was removed.
    pub async fn release(&self) -> Result<bool, DeployError> {
        let lock = shell_quote(&self.path);
        let command = format!(
            "if grep -qF -- {marker} {lock}/owner 2>/dev/null; then rm -rf {lock} && echo {RELEASED}; fi",
            marker = shell_quote(&owner_marker(&self.run_id)),
        );
        let output = self.host.run_privileged(&command).await.map_err(exec_error)?;
        if !output.success() {
            return Err(DeployError::Internal(format!(
                "unable to remove lock {}: {}",
                self.path,
                output.describe()
            )));
        }

        let released = output.stdout.trim() == RELEASED;
        if released {
            info!("Released deployment lock {}", self.path);
        } else {
            debug!("Deployment lock {} is not held by run {}", self.path, self.run_id);
        }
        Ok(released)
    }

    /// Remove a lock left behind by a crashed run, whoever holds it
    pub async fn force_unlock(&self) -> Result<Option<String>, DeployError> {
        let holder = self.holder().await;
        match &holder {
            Some(h) => warn!("Breaking deployment lock {} held by {}", self.path, h),
            None => info!("No holder recorded for {}", self.path),
        }

        let command = format!("rm -rf {}", shell_quote(&self.path));
        let output = self.host.run_privileged(&command).await.map_err(exec_error)?;
        if !output.success() {
            return Err(DeployError::Internal(format!(
                "unable to remove lock {}: {}",
                self.path,
                output.describe()
            )));
        }
        Ok(holder)
    }
}

/// Owner-file fragment identifying a run
fn owner_marker(run_id: &str) -> String {
    format!("run={} ", run_id)
}

fn parent_of(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}
