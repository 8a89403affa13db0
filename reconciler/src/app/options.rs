//! Run options resolved from settings

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::deploy::applier::ApplierOptions;
use crate::deploy::reconciler::{Reconciler, ReconcilerOptions};
use crate::models::deployment::{DeployTarget, RepoSource};
use crate::remote::local::LocalExecutor;
use crate::remote::ssh::{SshExecutor, SshOptions};
use crate::remote::{RemoteExecutor, RemoteHost};
use crate::storage::settings::{Settings, TransportKind};

/// Everything needed to build a reconciler for one target
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub target: DeployTarget,

    pub repo: RepoSource,

    pub transport: TransportOptions,

    /// Run mutating commands through `sudo -n`
    pub use_sudo: bool,

    pub reconciler: ReconcilerOptions,
}

/// Transport selection
#[derive(Debug, Clone)]
pub enum TransportOptions {
    Ssh(SshOptions),
    Local,
}

impl AppOptions {
    /// Resolve options from validated settings
    ///
    /// `log_file` is the file the logger actually writes to, if any.
    pub fn from_settings(settings: &Settings, log_file: Option<&Path>) -> Self {
        let target = DeployTarget::new(
            settings.target.host.clone(),
            settings.target.path.clone(),
            settings.target.service_user.clone(),
        );

        let transport = match settings.transport.kind {
            TransportKind::Local => TransportOptions::Local,
            TransportKind::Ssh => TransportOptions::Ssh(SshOptions {
                destination: settings.target.host.clone(),
                port: settings.transport.port,
                identity_file: settings.transport.identity_file.as_ref().map(PathBuf::from),
                connect_timeout: Duration::from_secs(settings.transport.connect_timeout_secs),
                strict_host_key_checking: settings.transport.strict_host_key_checking,
            }),
        };

        let log_location = log_file
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_else(|| "the deployment job output".to_string());

        Self {
            target,
            repo: RepoSource::new(settings.repo.url.clone(), settings.repo.branch.clone()),
            transport,
            use_sudo: settings.service.use_sudo,
            reconciler: ReconcilerOptions {
                run_timeout: Duration::from_secs(settings.run_timeout_secs),
                lock_wait: Duration::from_secs(settings.lock_wait_secs),
                applier: ApplierOptions {
                    identity_candidates: settings.target.identity_candidates.clone(),
                    service_name: settings.service.name.clone(),
                    log_location,
                },
                ..Default::default()
            },
        }
    }

    /// Host handle for the configured transport
    pub fn remote_host(&self) -> RemoteHost {
        let executor: Arc<dyn RemoteExecutor> = match &self.transport {
            TransportOptions::Ssh(ssh) => Arc::new(SshExecutor::new(ssh.clone())),
            TransportOptions::Local => Arc::new(LocalExecutor::new()),
        };
        RemoteHost::new(executor, self.use_sudo)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.remote_host(),
            self.target.clone(),
            self.repo.clone(),
            self.reconciler.clone(),
        )
    }
}
