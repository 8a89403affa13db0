//! Finite State Machine for a single reconciliation run

use serde::{Deserialize, Serialize};

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Nothing inspected yet
    Start,

    /// Workspace state known
    Probed,

    /// Plan selected
    ActionChosen,

    /// Mutating the target
    Applying,

    /// Repository content in place
    Succeeded,

    /// Placeholder page in place
    Degraded,
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Probe completed
    Probed,

    /// Strategy produced a plan
    PlanChosen,

    /// Start mutating the target
    Apply,

    /// A sync step succeeded
    Synced,

    /// Every sync step failed
    Degrade(String),
}

/// Run FSM
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: RunState,
    reason: Option<String>,
}

impl RunFsm {
    /// Create a new FSM in start state
    pub fn new() -> Self {
        Self {
            state: RunState::Start,
            reason: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Why the run degraded, if it did
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Whether the run has reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, RunState::Succeeded | RunState::Degraded)
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (RunState::Start, RunEvent::Probed) => RunState::Probed,
            (RunState::Probed, RunEvent::PlanChosen) => RunState::ActionChosen,
            (RunState::ActionChosen, RunEvent::Apply) => RunState::Applying,
            (RunState::Applying, RunEvent::Synced) => RunState::Succeeded,
            (RunState::Applying, RunEvent::Degrade(reason)) => {
                self.reason = Some(reason.clone());
                RunState::Degraded
            }

            // Invalid transitions
            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}
