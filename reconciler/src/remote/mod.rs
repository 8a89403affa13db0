//! Remote command execution
//!
//! The reconciler only needs two capabilities from a host: run a shell
//! command and upload a file. Transports implement [`RemoteExecutor`];
//! [`RemoteHost`] layers privilege escalation on top, and optionally a
//! host-side time bound so that mutations cannot outlive the run that
//! issued them.

pub mod local;
pub mod ssh;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::utils::shell_quote;

/// Result of a command that reached the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Best single-line description of a failure
    pub fn describe(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit status {}", self.status)
        } else {
            format!("exit status {}: {}", self.status, stderr)
        }
    }
}

/// Failure to execute at all
#[derive(Error, Debug)]
pub enum ExecError {
    /// The channel to the host could not be established
    #[error("transport failure: {0}")]
    Transport(String),

    /// A file transfer was rejected
    #[error("upload failed: {0}")]
    Upload(String),
}

/// Shell execution plus file transfer against one host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` through the host's POSIX shell
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError>;

    /// Copy a local file to `remote_path` on the host
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError>;
}

/// Host-side limit applied to privileged commands
///
/// Dropping the local `ssh` (or `sh`) process does not stop what it
/// started on the host, so every mutation runs under `timeout -s KILL`
/// with the time left until `deadline`. `tag` ends up in the command
/// line of the `timeout` process, which lets [`RemoteHost::abort`] find
/// and stop it early.
#[derive(Debug, Clone)]
struct HostBound {
    deadline: Instant,
    tag: String,
}

impl HostBound {
    /// Whole seconds left, rounded up and never below one
    fn remaining_secs(&self) -> u64 {
        let left = self.deadline.saturating_duration_since(Instant::now());
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        secs.max(1)
    }

    /// `pkill -f` pattern matching the tag but not the pattern itself
    fn pattern(&self) -> String {
        let mut chars = self.tag.chars();
        match chars.next() {
            Some(first) => format!("[{}]{}", first, chars.as_str()),
            None => String::new(),
        }
    }
}

/// An executor plus the privilege policy for mutating commands
#[derive(Clone)]
pub struct RemoteHost {
    executor: Arc<dyn RemoteExecutor>,
    use_sudo: bool,
    bound: Option<HostBound>,
}

impl RemoteHost {
    pub fn new(executor: Arc<dyn RemoteExecutor>, use_sudo: bool) -> Self {
        Self {
            executor,
            use_sudo,
            bound: None,
        }
    }

    /// Same host, with privileged commands killed on the host at `deadline`
    pub fn bounded(&self, deadline: Instant, tag: impl Into<String>) -> Self {
        Self {
            bound: Some(HostBound {
                deadline,
                tag: tag.into(),
            }),
            ..self.clone()
        }
    }

    /// Push the host-side deadline back by `extra`, if there is one
    pub fn extended(&self, extra: Duration) -> Self {
        let mut host = self.clone();
        if let Some(bound) = &mut host.bound {
            bound.deadline += extra;
        }
        host
    }

    /// Run an unprivileged command
    pub async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        self.executor.run(command).await
    }

    /// Run a command that mutates the web root or the service manager
    pub async fn run_privileged(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let command = match &self.bound {
            Some(bound) => format!(
                "timeout -s KILL {} sh -c {} {}",
                bound.remaining_secs(),
                shell_quote(command),
                shell_quote(&bound.tag)
            ),
            None => command.to_string(),
        };
        self.executor.run(&self.privileged(&command)).await
    }

    pub async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        self.executor.upload(local_path, remote_path).await
    }

    /// Stop privileged commands of this bound that are still running
    ///
    /// `timeout` forwards the signal to its whole process group, so
    /// nothing started under it is left behind. Best effort.
    pub async fn abort(&self) {
        let Some(bound) = &self.bound else {
            return;
        };
        let command = format!("pkill -TERM -f -- {}", shell_quote(&bound.pattern()));
        match self.executor.run(&self.privileged(&command)).await {
            // pkill exits 1 when nothing matched
            Ok(output) if output.status <= 1 => {
                debug!("Stopped leftover commands tagged {}", bound.tag)
            }
            Ok(output) => warn!("Unable to stop commands tagged {}: {}", bound.tag, output.describe()),
            Err(e) => warn!("Unable to stop commands tagged {}: {}", bound.tag, e),
        }
    }

    fn privileged(&self, command: &str) -> String {
        if self.use_sudo {
            format!("sudo -n sh -c {}", shell_quote(command))
        } else {
            command.to_string()
        }
    }
}
