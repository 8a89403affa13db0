//! End-to-end reconciliation scenarios against a scripted host

mod common;

use std::future::pending;
use std::time::{Duration, Instant};

use common::{options, reconciler, site, FakeHost, Workspace};
use rootsync::errors::DeployError;
use rootsync::models::deployment::{ReconcileAction, RunOutcome, WorkspaceState};

#[tokio::test]
async fn test_empty_target_clones_fresh() {
    let fake = FakeHost::new();

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.probed, WorkspaceState::Absent);
    assert_eq!(result.action, ReconcileAction::CloneFresh);
    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert!(result.success);
    assert!(!result.degraded);
    assert!(result.transitions.is_empty());
    assert_eq!(result.revision.as_deref(), Some("c0ffee1"));
    assert_eq!(result.ownership.as_deref(), Some("www-data"));
    assert_eq!(result.permissions.as_ref().map(|m| m.dirs.as_str()), Some("0755"));
    assert_eq!(result.permissions.as_ref().map(|m| m.files.as_str()), Some("0644"));
    assert!(result.service_restarted);
    assert!(result.finished_at.is_some());

    let state = fake.state();
    assert!(matches!(state.workspace, Workspace::Git { .. }));
    assert_eq!(state.files, site("v1"));
    assert_eq!(state.restarts, 1);
    assert!(!state.lock_held);
}

#[tokio::test]
async fn test_checkout_pulls_new_commits() {
    let fake = FakeHost::new();
    fake.deploy_checkout();
    fake.push_upstream("beefcafe", "v2");

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.probed, WorkspaceState::PresentAsGitRepo);
    assert_eq!(result.plan.fallbacks, vec![ReconcileAction::FetchResetHard]);
    assert_eq!(result.action, ReconcileAction::PullRebase);
    assert!(result.success);
    assert_eq!(result.revision.as_deref(), Some("beefcafe"));
    assert_eq!(fake.state().files, site("v2"));
}

#[tokio::test]
async fn test_diverged_checkout_falls_back_to_reset() {
    let fake = FakeHost::new();
    fake.state().workspace = Workspace::Git {
        head: "local-only".to_string(),
        diverged: true,
    };
    fake.push_upstream("beefcafe", "v2");

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.action, ReconcileAction::FetchResetHard);
    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert_eq!(result.transitions.len(), 1);
    assert_eq!(result.transitions[0].from, ReconcileAction::PullRebase);
    assert_eq!(result.transitions[0].to, ReconcileAction::FetchResetHard);
    assert!(result.transitions[0].reason.contains("CONFLICT"));
    assert_eq!(result.revision.as_deref(), Some("beefcafe"));

    let state = fake.state();
    assert_eq!(state.files, site("v2"));
    assert!(state.commands.iter().any(|c| c.contains("rebase --abort")));
}

#[tokio::test]
async fn test_clone_failure_degrades_to_placeholder() {
    let fake = FakeHost::new();
    fake.state().clone_fails = true;

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.action, ReconcileAction::PlaceholderPage);
    assert_eq!(result.outcome, RunOutcome::Degraded);
    assert!(result.degraded);
    assert!(!result.success);
    assert!(result.revision.is_none());
    assert_eq!(result.transitions.len(), 1);
    assert_eq!(result.transitions[0].from, ReconcileAction::CloneFresh);
    assert_eq!(result.transitions[0].to, ReconcileAction::PlaceholderPage);

    // Ownership pass still runs after the placeholder
    assert_eq!(result.ownership.as_deref(), Some("www-data"));

    let state = fake.state();
    let page = state.files.get("index.html").expect("placeholder written");
    assert!(page.contains("Deployment failed"));
    assert!(page.contains(&result.run_id));
    let placeholder_at = state.events.iter().position(|e| e == "placeholder").unwrap();
    let permissions_at = state.events.iter().position(|e| e == "permissions").unwrap();
    assert!(placeholder_at < permissions_at);
}

#[tokio::test]
async fn test_exhausted_fallback_chain_degrades() {
    let fake = FakeHost::new();
    fake.state().workspace = Workspace::Git {
        head: "local-only".to_string(),
        diverged: true,
    };
    fake.state().reset_fails = true;

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.action, ReconcileAction::PlaceholderPage);
    assert!(result.degraded);
    let hops: Vec<_> = result.transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        hops,
        vec![
            (ReconcileAction::PullRebase, ReconcileAction::FetchResetHard),
            (ReconcileAction::FetchResetHard, ReconcileAction::PlaceholderPage),
        ]
    );
}

#[tokio::test]
async fn test_unreachable_host_fails_without_mutation() {
    let fake = FakeHost::new();
    fake.state().unreachable = true;

    let err = reconciler(&fake, options()).run(pending()).await.unwrap_err();

    assert!(matches!(err, DeployError::UnreachableTarget(_)));
    assert_ne!(err.exit_code(), 0);
    let state = fake.state();
    assert!(state.commands.is_empty());
    assert_eq!(state.workspace, Workspace::Absent);
    assert_eq!(state.lock_acquisitions, 0);
}

#[tokio::test]
async fn test_foreign_content_is_cleared_before_clone() {
    let fake = FakeHost::new();
    {
        let mut state = fake.state();
        state.workspace = Workspace::Foreign;
        state.files.insert("index.nginx-debian.html".to_string(), "Welcome to nginx!".to_string());
    }

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.probed, WorkspaceState::PresentAsForeignContent);
    assert_eq!(result.action, ReconcileAction::CloneFresh);
    let state = fake.state();
    assert_eq!(state.files, site("v1"));
    let clear_at = state.events.iter().position(|e| e == "clear").unwrap();
    let clone_at = state.events.iter().position(|e| e == "clone").unwrap();
    assert!(clear_at < clone_at);
}

#[tokio::test]
async fn test_repeated_runs_are_idempotent() {
    let fake = FakeHost::new();

    let first = reconciler(&fake, options()).run(pending()).await.unwrap();
    assert_eq!(first.action, ReconcileAction::CloneFresh);
    let files_after_first = fake.state().files.clone();

    let second = reconciler(&fake, options()).run(pending()).await.unwrap();
    let files_after_second = fake.state().files.clone();
    let third = reconciler(&fake, options()).run(pending()).await.unwrap();
    let files_after_third = fake.state().files.clone();

    assert_eq!(second.action, ReconcileAction::PullRebase);
    assert_eq!(third.action, second.action);
    assert_eq!(third.outcome, second.outcome);
    assert_eq!(third.revision, second.revision);
    assert_eq!(files_after_first, files_after_second);
    assert_eq!(files_after_second, files_after_third);
    assert_eq!(fake.state().permission_passes, 3);
}

#[tokio::test]
async fn test_restart_failure_is_not_fatal() {
    let fake = FakeHost::new();
    fake.state().restart_fails = true;

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert!(!result.service_restarted);
    assert!(result.warnings.iter().any(|w| w.contains("restart")));
}

#[tokio::test]
async fn test_identity_falls_back_to_next_candidate() {
    let fake = FakeHost::new();
    fake.state().users = vec!["apache".to_string(), "nginx".to_string()];

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    // Candidate order wins, not the host's user order
    assert_eq!(result.ownership.as_deref(), Some("nginx"));
    assert_eq!(fake.state().chowned_to.as_deref(), Some("nginx"));
}

#[tokio::test]
async fn test_missing_identities_leave_content_servable() {
    let fake = FakeHost::new();
    fake.state().users.clear();

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    assert_eq!(result.outcome, RunOutcome::Succeeded);
    assert!(result.ownership.is_none());
    assert!(result.permissions.is_none());
    assert!(result.warnings.iter().any(|w| w.contains("identities")));
    assert_eq!(fake.state().permission_passes, 0);
    assert!(result.service_restarted);
}

#[tokio::test]
async fn test_timeout_leaves_partial_state_and_releases_lock() {
    let fake = FakeHost::new();
    {
        let mut state = fake.state();
        state.workspace = Workspace::Foreign;
        state.files.insert("old.html".to_string(), "old".to_string());
        state.clone_delay = Duration::from_millis(500);
    }
    let mut opts = options();
    opts.run_timeout = Duration::from_millis(100);

    let err = reconciler(&fake, opts).run(pending()).await.unwrap_err();

    assert!(matches!(err, DeployError::DeploymentTimedOut(_)));
    assert_eq!(err.exit_code(), 4);
    let state = fake.state();
    // Cleared but never cloned; no rollback
    assert_eq!(state.workspace, Workspace::Absent);
    assert!(state.files.is_empty());
    assert!(!state.lock_held);
    assert_eq!(state.lock_releases, 1);

    // Leftover host commands are stopped before the lock goes
    let abort_at = state.events.iter().position(|e| e == "abort").unwrap();
    let release_at = state.events.iter().position(|e| e == "lock-release").unwrap();
    assert!(abort_at < release_at);
    let abort = state.commands.iter().find(|c| c.contains("pkill")).unwrap();
    assert!(abort.contains("[r]ootsync-run-"));
}

#[tokio::test]
async fn test_timeout_does_not_interrupt_permission_pass() {
    let fake = FakeHost::new();
    fake.state().chown_delay = Duration::from_millis(400);
    let mut opts = options();
    opts.run_timeout = Duration::from_millis(150);

    let err = reconciler(&fake, opts).run(pending()).await.unwrap_err();

    assert!(matches!(err, DeployError::DeploymentTimedOut(_)));
    let state = fake.state();
    assert_eq!(state.permission_passes, 1);
    let permissions_at = state.events.iter().position(|e| e == "permissions").unwrap();
    let release_at = state.events.iter().position(|e| e == "lock-release").unwrap();
    assert!(permissions_at < release_at);
}

#[tokio::test]
async fn test_cancellation_releases_lock() {
    let fake = FakeHost::new();
    fake.state().clone_delay = Duration::from_millis(500);

    let cancel = tokio::time::sleep(Duration::from_millis(50));
    let err = reconciler(&fake, options()).run(cancel).await.unwrap_err();

    assert!(matches!(err, DeployError::Cancelled(_)));
    assert_eq!(err.exit_code(), 130);
    let state = fake.state();
    assert!(!state.lock_held);
    assert!(state.events.iter().any(|e| e == "abort"));
}

#[tokio::test]
async fn test_stalled_permission_pass_is_abandoned_after_grace() {
    let fake = FakeHost::new();
    fake.state().chown_delay = Duration::from_secs(5);
    let mut opts = options();
    opts.run_timeout = Duration::from_millis(100);
    opts.critical_grace = Duration::from_millis(200);

    let started = Instant::now();
    let err = reconciler(&fake, opts).run(pending()).await.unwrap_err();

    assert!(matches!(err, DeployError::DeploymentTimedOut(_)));
    assert!(started.elapsed() < Duration::from_secs(2));
    let state = fake.state();
    assert_eq!(state.permission_passes, 0);
    assert!(!state.lock_held);
}

#[tokio::test]
async fn test_mutations_are_bounded_on_the_host() {
    let fake = FakeHost::new();

    let result = reconciler(&fake, options()).run(pending()).await.unwrap();

    let tag = format!("'rootsync-run-{}'", result.run_id);
    let state = fake.state();
    for needle in ["git clone", "-exec rm -rf", "chown -R", "systemctl restart"] {
        let command = state.commands.iter().find(|c| c.contains(needle)).unwrap();
        assert!(command.starts_with("timeout -s KILL "), "{}", command);
        assert!(command.ends_with(&tag), "{}", command);
    }
    // Reads and the lock itself are not tied to the run deadline
    for needle in ["echo absent", "rev-parse HEAD", "rootsync.lock"] {
        let command = state.commands.iter().find(|c| c.contains(needle)).unwrap();
        assert!(!command.starts_with("timeout "), "{}", command);
    }
    assert!(!state.events.iter().any(|e| e == "abort"));
}

#[tokio::test]
async fn test_plan_does_not_touch_target() {
    let fake = FakeHost::new();
    fake.deploy_checkout();

    let (state, plan) = reconciler(&fake, options()).plan().await.unwrap();

    assert_eq!(state, WorkspaceState::PresentAsGitRepo);
    assert_eq!(plan.action, ReconcileAction::PullRebase);
    let host = fake.state();
    assert_eq!(host.commands.len(), 1);
    assert_eq!(host.lock_acquisitions, 0);
}
