//! Deployment models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The remote web root a run reconciles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    /// SSH destination (`user@host` or `host`); ignored by the local transport
    pub host: String,

    /// Absolute path of the web root on the host
    pub path: String,

    /// Identity that should own the served files
    pub service_user: String,
}

impl DeployTarget {
    pub fn new(host: impl Into<String>, path: impl Into<String>, service_user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: normalize_path(&path.into()),
            service_user: service_user.into(),
        }
    }

    /// Directory used as the per-target advisory lock
    ///
    /// Lives next to the web root so that clearing the root never touches it.
    pub fn lock_path(&self) -> String {
        let (parent, name) = match self.path.rsplit_once('/') {
            Some(("", name)) => ("", name),
            Some((parent, name)) => (parent, name),
            None => (".", self.path.as_str()),
        };
        format!("{}/.{}.rootsync.lock", parent, name)
    }
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.host, self.path)
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where the site content comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    pub url: String,
    pub branch: String,
}

impl RepoSource {
    pub fn new(url: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: branch.into(),
        }
    }
}

/// What the probe found at the target path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceState {
    /// Missing or empty
    Absent,

    /// Contains version-control metadata
    PresentAsGitRepo,

    /// Contains files that are not a checkout
    PresentAsForeignContent,
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceState::Absent => "absent",
            WorkspaceState::PresentAsGitRepo => "git checkout",
            WorkspaceState::PresentAsForeignContent => "foreign content",
        };
        f.write_str(s)
    }
}

/// A single content-sync path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    /// Clear the path and clone from scratch
    CloneFresh,

    /// Rebase-pull in place
    PullRebase,

    /// Fetch all refs and hard-reset to the remote head
    FetchResetHard,

    /// Write the static failure page (terminal, degraded)
    PlaceholderPage,
}

impl fmt::Display for ReconcileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileAction::CloneFresh => "clone_fresh",
            ReconcileAction::PullRebase => "pull_rebase",
            ReconcileAction::FetchResetHard => "fetch_reset_hard",
            ReconcileAction::PlaceholderPage => "placeholder_page",
        };
        f.write_str(s)
    }
}

/// The chosen action plus its ordered fallbacks
///
/// When the action and every fallback fail, the applier ends in
/// [`ReconcileAction::PlaceholderPage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub action: ReconcileAction,

    #[serde(default)]
    pub fallbacks: Vec<ReconcileAction>,
}

impl SyncPlan {
    /// Every step in the order it is attempted
    pub fn steps(&self) -> impl Iterator<Item = ReconcileAction> + '_ {
        std::iter::once(self.action).chain(self.fallbacks.iter().copied())
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Succeeded,
    Degraded,
}

/// A recorded move from one action to the next
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: ReconcileAction,
    pub to: ReconcileAction,
    pub reason: String,
}

/// Modes applied by the permission pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionModes {
    pub dirs: String,
    pub files: String,
}

impl Default for PermissionModes {
    fn default() -> Self {
        Self {
            dirs: "0755".to_string(),
            files: "0644".to_string(),
        }
    }
}

/// Outcome of one reconciliation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub run_id: String,

    pub target: String,

    /// State found by the probe
    pub probed: WorkspaceState,

    /// Plan chosen for that state
    pub plan: SyncPlan,

    /// Action that actually left content in place
    pub action: ReconcileAction,

    pub outcome: RunOutcome,

    pub success: bool,

    pub degraded: bool,

    /// Identity the tree was chowned to, if the pass succeeded
    pub ownership: Option<String>,

    /// Modes applied, if the pass succeeded
    pub permissions: Option<PermissionModes>,

    pub service_restarted: bool,

    /// Checked-out commit after a successful sync
    pub revision: Option<String>,

    pub transitions: Vec<Transition>,

    /// Non-fatal failures
    pub warnings: Vec<String>,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl ApplyResult {
    pub fn new(run_id: impl Into<String>, target: &DeployTarget, probed: WorkspaceState, plan: SyncPlan) -> Self {
        let action = plan.action;
        Self {
            run_id: run_id.into(),
            target: target.to_string(),
            probed,
            plan,
            action,
            outcome: RunOutcome::Succeeded,
            success: false,
            degraded: false,
            ownership: None,
            permissions: None,
            service_restarted: false,
            revision: None,
            transitions: Vec::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Seal the result with its final outcome
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.success = outcome == RunOutcome::Succeeded;
        self.degraded = outcome == RunOutcome::Degraded;
        self.finished_at = Some(Utc::now());
    }
}
