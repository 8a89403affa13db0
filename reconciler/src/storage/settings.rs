//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::logs::LogLevel;

/// Reconciler settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log output configuration
    #[serde(default)]
    pub log: LogSettings,

    /// Web root to reconcile
    #[serde(default)]
    pub target: TargetSettings,

    /// Site repository
    #[serde(default)]
    pub repo: RepoSettings,

    /// How commands reach the host
    #[serde(default)]
    pub transport: TransportSettings,

    /// Web server service
    #[serde(default)]
    pub service: ServiceSettings,

    /// Wall-clock budget for one run, in seconds
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,

    /// How long to wait for a competing run's lock, in seconds
    #[serde(default)]
    pub lock_wait_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_run_timeout() -> u64 {
    600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log: LogSettings::default(),
            target: TargetSettings::default(),
            repo: RepoSettings::default(),
            transport: TransportSettings::default(),
            service: ServiceSettings::default(),
            run_timeout_secs: default_run_timeout(),
            lock_wait_secs: 0,
        }
    }
}

impl Settings {
    /// Reject settings that would make a run unsafe or meaningless
    pub fn validate(&self) -> Result<(), DeployError> {
        let path = self.target.path.trim_end_matches('/');
        if !self.target.path.starts_with('/') {
            return Err(DeployError::ConfigError(format!(
                "target path must be absolute: {:?}",
                self.target.path
            )));
        }
        if path.is_empty() {
            return Err(DeployError::ConfigError(
                "refusing to reconcile the filesystem root".to_string(),
            ));
        }
        if self.transport.kind == TransportKind::Ssh && self.target.host.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "target host is required for the ssh transport".to_string(),
            ));
        }
        if self.repo.url.trim().is_empty() {
            return Err(DeployError::ConfigError("repository url is empty".to_string()));
        }
        if self.repo.branch.trim().is_empty() {
            return Err(DeployError::ConfigError("repository branch is empty".to_string()));
        }
        if self.run_timeout_secs == 0 {
            return Err(DeployError::ConfigError("run timeout must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    /// Directory for the log file
    #[serde(default = "default_log_dir")]
    pub dir: String,

    /// Also write logs to `<dir>/rootsync.log`
    #[serde(default = "default_true")]
    pub file: bool,

    /// Emit JSON lines instead of text
    #[serde(default)]
    pub json: bool,
}

fn default_log_dir() -> String {
    "/var/log/rootsync".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            file: true,
            json: false,
        }
    }
}

/// Deploy target settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSettings {
    /// SSH destination (`user@host`)
    #[serde(default)]
    pub host: String,

    /// Web root path on the host
    #[serde(default = "default_target_path")]
    pub path: String,

    /// Identity that should own the served files
    #[serde(default = "default_service_user")]
    pub service_user: String,

    /// Identities tried, in order, when the service user does not exist
    #[serde(default = "default_identity_candidates")]
    pub identity_candidates: Vec<String>,
}

fn default_target_path() -> String {
    "/var/www/html".to_string()
}

fn default_service_user() -> String {
    "www-data".to_string()
}

fn default_identity_candidates() -> Vec<String> {
    vec!["nginx".to_string(), "apache".to_string()]
}

impl Default for TargetSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            path: default_target_path(),
            service_user: default_service_user(),
            identity_candidates: default_identity_candidates(),
        }
    }
}

/// Repository settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSettings {
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for RepoSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            branch: default_branch(),
        }
    }
}

/// Transport kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ssh,
    Local,
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default)]
    pub kind: TransportKind,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Private key used for SSH and SCP
    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Refuse unknown host keys instead of accepting new ones
    #[serde(default = "default_true")]
    pub strict_host_key_checking: bool,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Ssh,
            port: default_ssh_port(),
            identity_file: None,
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: true,
        }
    }
}

/// Web server service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Run mutating commands through `sudo -n`
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

fn default_service_name() -> String {
    "nginx".to_string()
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            use_sudo: true,
        }
    }
}
