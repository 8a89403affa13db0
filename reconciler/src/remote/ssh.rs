//! SSH transport
//!
//! Shells out to the system `ssh` and `scp` binaries with key-based,
//! non-interactive authentication.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::remote::{CommandOutput, ExecError, RemoteExecutor};

/// Exit status `ssh` reserves for its own failures
const SSH_TRANSPORT_FAILURE: i32 = 255;

/// Seconds between keepalive probes on an idle connection
const SERVER_ALIVE_INTERVAL: u64 = 15;

/// Unanswered keepalives before the connection counts as dead
const SERVER_ALIVE_COUNT_MAX: u64 = 3;

/// SSH connection options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Destination (`user@host` or `host`)
    pub destination: String,

    pub port: u16,

    /// Private key; the agent / default identities are used when absent
    pub identity_file: Option<PathBuf>,

    pub connect_timeout: Duration,

    pub strict_host_key_checking: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            destination: String::new(),
            port: 22,
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
            strict_host_key_checking: true,
        }
    }
}

/// Executor that reaches the host over SSH
#[derive(Debug, Clone)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Options shared by `ssh` and `scp`
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("ServerAliveInterval={}", SERVER_ALIVE_INTERVAL),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", SERVER_ALIVE_COUNT_MAX),
        ];
        if !self.options.strict_host_key_checking {
            args.push("-o".to_string());
            args.push("StrictHostKeyChecking=accept-new".to_string());
        }
        if let Some(identity) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        debug!("ssh {}: {}", self.options.destination, command);

        let output = Command::new("ssh")
            .args(self.common_args())
            .arg("-p")
            .arg(self.options.port.to_string())
            .arg(&self.options.destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Transport(format!("failed to spawn ssh: {}", e)))?;

        let status = output.status.code().unwrap_or(-1);
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if status == SSH_TRANSPORT_FAILURE {
            return Err(ExecError::Transport(format!(
                "ssh to {} failed: {}",
                self.options.destination,
                stderr.trim()
            )));
        }

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), ExecError> {
        debug!(
            "scp {:?} -> {}:{}",
            local_path, self.options.destination, remote_path
        );

        let output = Command::new("scp")
            .args(self.common_args())
            .arg("-q")
            .arg("-P")
            .arg(self.options.port.to_string())
            .arg(local_path)
            .arg(format!("{}:{}", self.options.destination, remote_path))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ExecError::Transport(format!("failed to spawn scp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecError::Upload(format!(
                "scp to {} failed: {}",
                remote_path,
                stderr.trim()
            )));
        }

        Ok(())
    }
}
