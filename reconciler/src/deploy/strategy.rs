//! Sync strategy
//!
//! Pure mapping from the probed workspace state to a plan. No I/O.

use crate::models::deployment::{ReconcileAction, RepoSource, SyncPlan, WorkspaceState};

/// Choose the reconciliation plan for a probed state
///
/// Foreign content maps to a fresh clone; the applier clears the path
/// first, under the deployment lock.
pub fn choose(state: WorkspaceState, _repo: &RepoSource) -> SyncPlan {
    match state {
        WorkspaceState::Absent => SyncPlan {
            action: ReconcileAction::CloneFresh,
            fallbacks: Vec::new(),
        },
        WorkspaceState::PresentAsGitRepo => SyncPlan {
            action: ReconcileAction::PullRebase,
            fallbacks: vec![ReconcileAction::FetchResetHard],
        },
        WorkspaceState::PresentAsForeignContent => SyncPlan {
            action: ReconcileAction::CloneFresh,
            fallbacks: Vec::new(),
        },
    }
}

/// Terminal action once every step of a plan has failed
pub fn exhausted() -> ReconcileAction {
    ReconcileAction::PlaceholderPage
}
