//! Local transport
//!
//! Runs the same commands on this machine, for first-boot provisioning
//! where the reconciler executes on the web host itself.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;

use crate::remote::{CommandOutput, ExecError, RemoteExecutor};

/// Executor backed by the local `sh`
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        debug!("sh: {}", command);

        let output = Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Transport(format!("failed to spawn sh: {}", e)))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        debug!("copy {:?} -> {}", local_path, remote_path);
        fs::copy(local_path, remote_path)
            .await
            .map(|_| ())
            .map_err(|e| ExecError::Upload(format!("copy to {} failed: {}", remote_path, e)))
    }
}
