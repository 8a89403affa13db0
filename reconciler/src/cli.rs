//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::storage::settings::{Settings, TransportKind};

/// rootsync - keep a web root in sync with a git repository
#[derive(Parser, Debug)]
#[command(name = "rootsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (defaults to $ROOTSYNC_SETTINGS or /etc/rootsync/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reconcile the web root with the repository
    Deploy(TargetArgs),

    /// Show the plan a deploy would follow, without changing anything
    Plan(TargetArgs),

    /// Show the current state of the web root
    Probe(TargetArgs),

    /// Remove a deployment lock left behind by an interrupted run
    Unlock(TargetArgs),

    /// Write a settings file with defaults filled in
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        target: TargetArgs,
    },

    /// Print build information
    Version,
}

/// Per-invocation overrides of the settings file
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// SSH destination (user@host)
    #[arg(long)]
    pub host: Option<String>,

    /// Web root path on the host
    #[arg(long)]
    pub path: Option<String>,

    /// Repository URL
    #[arg(long)]
    pub repo: Option<String>,

    /// Branch to deploy
    #[arg(long)]
    pub branch: Option<String>,

    /// Run timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Seconds to wait for a competing run's lock
    #[arg(long)]
    pub lock_wait: Option<u64>,

    /// Run on this machine instead of over SSH
    #[arg(long)]
    pub local: bool,
}

impl TargetArgs {
    /// Layer the overrides onto loaded settings
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.target.host = host.clone();
        }
        if let Some(path) = &self.path {
            settings.target.path = path.clone();
        }
        if let Some(repo) = &self.repo {
            settings.repo.url = repo.clone();
        }
        if let Some(branch) = &self.branch {
            settings.repo.branch = branch.clone();
        }
        if let Some(timeout) = self.timeout {
            settings.run_timeout_secs = timeout;
        }
        if let Some(wait) = self.lock_wait {
            settings.lock_wait_secs = wait;
        }
        if self.local {
            settings.transport.kind = TransportKind::Local;
        }
    }
}
