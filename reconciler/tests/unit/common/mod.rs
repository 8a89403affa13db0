//! Scripted in-memory host for reconciler tests

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rootsync::deploy::applier::ApplierOptions;
use rootsync::deploy::reconciler::{Reconciler, ReconcilerOptions};
use rootsync::models::deployment::{DeployTarget, RepoSource};
use rootsync::remote::{CommandOutput, ExecError, RemoteExecutor, RemoteHost};
use rootsync::utils::CooldownOptions;

/// What sits at the web root
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workspace {
    Absent,
    Git { head: String, diverged: bool },
    Foreign,
}

#[derive(Debug)]
pub struct FakeState {
    pub unreachable: bool,
    pub workspace: Workspace,
    pub files: BTreeMap<String, String>,

    pub upstream_head: String,
    pub upstream_files: BTreeMap<String, String>,

    pub clone_fails: bool,
    pub reset_fails: bool,
    pub restart_fails: bool,
    pub users: Vec<String>,

    pub clone_delay: Duration,
    pub chown_delay: Duration,

    /// Applied after the lock `mkdir` has taken effect, before replying
    pub lock_reply_delay: Duration,

    pub lock_held: bool,
    /// Run id recorded in the lock's owner file
    pub lock_owner: Option<String>,
    pub lock_acquisitions: usize,
    pub lock_releases: usize,

    pub chowned_to: Option<String>,
    pub permission_passes: usize,
    pub restarts: usize,
    pub pending_upload: Option<String>,

    /// Every command that reached the host
    pub commands: Vec<String>,

    /// Ordered milestones for sequencing assertions
    pub events: Vec<String>,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            unreachable: false,
            workspace: Workspace::Absent,
            files: BTreeMap::new(),
            upstream_head: "c0ffee1".to_string(),
            upstream_files: site("v1"),
            clone_fails: false,
            reset_fails: false,
            restart_fails: false,
            users: vec!["www-data".to_string()],
            clone_delay: Duration::ZERO,
            chown_delay: Duration::ZERO,
            lock_reply_delay: Duration::ZERO,
            lock_held: false,
            lock_owner: None,
            lock_acquisitions: 0,
            lock_releases: 0,
            chowned_to: None,
            permission_passes: 0,
            restarts: 0,
            pending_upload: None,
            commands: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Site content for a given version label
pub fn site(version: &str) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    files.insert("index.html".to_string(), format!("<h1>{}</h1>", version));
    files.insert("css/site.css".to_string(), format!("/* {} */", version));
    files
}

#[derive(Clone, Default)]
pub struct FakeHost {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Publish a new upstream commit
    pub fn push_upstream(&self, head: &str, version: &str) {
        let mut state = self.state();
        state.upstream_head = head.to_string();
        state.upstream_files = site(version);
    }

    /// Put a deployed checkout of the current upstream in place
    pub fn deploy_checkout(&self) {
        let mut state = self.state();
        state.workspace = Workspace::Git {
            head: state.upstream_head.clone(),
            diverged: false,
        };
        state.files = state.upstream_files.clone();
    }

    fn reply(&self, command: &str) -> CommandOutput {
        let mut state = self.state();
        state.commands.push(command.to_string());

        if command.contains("pkill") {
            state.events.push("abort".to_string());
            return fail(1, "");
        }

        if command.contains("rootsync.lock") {
            if command.contains("rm -rf") {
                if command.contains("grep -qF") {
                    let owned = state
                        .lock_owner
                        .as_ref()
                        .is_some_and(|owner| command.contains(&format!("run={} ", owner)));
                    if !state.lock_held || !owned {
                        return ok("");
                    }
                }
                state.lock_held = false;
                state.lock_owner = None;
                state.lock_releases += 1;
                state.events.push("lock-release".to_string());
                return ok("released\n");
            }
            if command.contains("cat ") {
                return if state.lock_held {
                    let owner = state.lock_owner.as_deref().unwrap_or("other");
                    ok(&format!("host=fake pid=1 run={}", owner))
                } else {
                    fail(1, "")
                };
            }
            if state.lock_held {
                return fail(1, "");
            }
            state.lock_held = true;
            state.lock_owner = command
                .split("run=")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next())
                .map(str::to_string);
            state.lock_acquisitions += 1;
            state.events.push("lock-acquire".to_string());
            return ok("");
        }

        if command.contains("echo absent") {
            return match state.workspace {
                Workspace::Absent => ok("absent\n"),
                Workspace::Git { .. } => ok("git\n"),
                Workspace::Foreign => ok("foreign\n"),
            };
        }

        if command.contains("git clone") {
            if state.clone_fails {
                return fail(128, "fatal: unable to access repository: Could not resolve host");
            }
            state.workspace = Workspace::Git {
                head: state.upstream_head.clone(),
                diverged: false,
            };
            state.files = state.upstream_files.clone();
            state.events.push("clone".to_string());
            return ok("");
        }

        if command.contains("pull --rebase") {
            return match state.workspace.clone() {
                Workspace::Git { diverged: true, .. } => {
                    fail(1, "CONFLICT (content): Merge conflict in index.html")
                }
                Workspace::Git { .. } => {
                    state.workspace = Workspace::Git {
                        head: state.upstream_head.clone(),
                        diverged: false,
                    };
                    state.files = state.upstream_files.clone();
                    state.events.push("pull".to_string());
                    ok("")
                }
                _ => fail(128, "fatal: not a git repository"),
            };
        }

        if command.contains("rebase --abort") {
            return ok("");
        }

        if command.contains("reset --hard") {
            if state.reset_fails {
                return fail(128, "fatal: couldn't find remote ref");
            }
            state.workspace = Workspace::Git {
                head: state.upstream_head.clone(),
                diverged: false,
            };
            state.files = state.upstream_files.clone();
            state.events.push("reset".to_string());
            return ok("");
        }

        if command.contains("rev-parse HEAD") {
            return match &state.workspace {
                Workspace::Git { head, .. } => ok(&format!("{}\n", head)),
                _ => fail(128, "fatal: not a git repository"),
            };
        }

        if command.contains("mv -f") {
            let Some(page) = state.pending_upload.take() else {
                return fail(1, "mv: cannot stat");
            };
            state.files.insert("index.html".to_string(), page);
            if state.workspace == Workspace::Absent {
                state.workspace = Workspace::Foreign;
            }
            state.events.push("placeholder".to_string());
            return ok("");
        }

        if command.contains("-exec rm -rf") {
            state.files.clear();
            state.workspace = Workspace::Absent;
            state.events.push("clear".to_string());
            return ok("");
        }

        if command.contains("id -u") {
            let candidates = parse_candidates(command);
            return match candidates.iter().find(|c| state.users.contains(c)) {
                Some(user) => ok(&format!("{}\n", user)),
                None => fail(1, ""),
            };
        }

        if command.contains("chown -R") {
            let owner = command
                .split("chown -R ")
                .nth(1)
                .map(|rest| rest.trim_start_matches(['\'', '\\']))
                .and_then(|rest| rest.split(':').next())
                .map(str::to_string);
            state.chowned_to = owner;
            state.permission_passes += 1;
            state.events.push("permissions".to_string());
            return ok("");
        }

        if command.contains("systemctl restart") {
            state.restarts += 1;
            return if state.restart_fails {
                fail(1, "Job for nginx.service failed")
            } else {
                ok("")
            };
        }

        ok("")
    }
}

fn parse_candidates(command: &str) -> Vec<String> {
    command
        .split("for u in ")
        .nth(1)
        .and_then(|rest| rest.split("; do").next())
        .map(|list| {
            list.split_whitespace()
                .map(|c| c.trim_matches('\'').to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn fail(status: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        status,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    async fn run(&self, command: &str) -> Result<CommandOutput, ExecError> {
        let (delay, reply_delay) = {
            let state = self.state();
            if state.unreachable {
                return Err(ExecError::Transport(
                    "ssh: connect to host 203.0.113.10 port 22: Connection timed out".to_string(),
                ));
            }
            let delay = if command.contains("git clone") {
                state.clone_delay
            } else if command.contains("chown -R") {
                state.chown_delay
            } else {
                Duration::ZERO
            };
            let reply_delay = if command.contains("rootsync.lock") && command.contains("mkdir") {
                state.lock_reply_delay
            } else {
                Duration::ZERO
            };
            (delay, reply_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let reply = self.reply(command);
        if !reply_delay.is_zero() {
            tokio::time::sleep(reply_delay).await;
        }
        Ok(reply)
    }

    async fn upload(&self, local_path: &Path, _remote_path: &str) -> Result<(), ExecError> {
        if self.state().unreachable {
            return Err(ExecError::Transport("connection refused".to_string()));
        }
        let content = std::fs::read_to_string(local_path)
            .map_err(|e| ExecError::Upload(e.to_string()))?;
        self.state().pending_upload = Some(content);
        Ok(())
    }
}

pub fn target() -> DeployTarget {
    DeployTarget::new("ubuntu@203.0.113.10", "/var/www/html", "www-data")
}

pub fn repo() -> RepoSource {
    RepoSource::new("https://github.com/example/site.git", "main")
}

pub fn options() -> ReconcilerOptions {
    ReconcilerOptions {
        run_timeout: Duration::from_secs(5),
        lock_wait: Duration::ZERO,
        lock_cooldown: CooldownOptions {
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        },
        critical_grace: Duration::from_secs(5),
        applier: ApplierOptions::default(),
    }
}

pub fn reconciler(fake: &FakeHost, options: ReconcilerOptions) -> Reconciler {
    let host = RemoteHost::new(Arc::new(fake.clone()), false);
    Reconciler::new(host, target(), repo(), options)
}
