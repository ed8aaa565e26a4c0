// AOR Graph - Run state machine
//
// PENDING → RUNNING → {WAITING | SUCCESS | FAILED | CANCELLED};
// WAITING → {RUNNING | CANCELLED}. Terminal states are final.

use aor_core::{AorError, AorResult};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a graph run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Pending,
    Running,
    Waiting,
    Success,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Success | RunState::Failed | RunState::Cancelled)
    }

    pub fn can_transition_to(&self, next: RunState) -> bool {
        match (self, next) {
            (RunState::Pending, RunState::Running) => true,
            (RunState::Pending, RunState::Cancelled) => true,
            (RunState::Running, RunState::Waiting)
            | (RunState::Running, RunState::Success)
            | (RunState::Running, RunState::Failed)
            | (RunState::Running, RunState::Cancelled) => true,
            (RunState::Waiting, RunState::Running) | (RunState::Waiting, RunState::Cancelled) => {
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Pending => "PENDING",
            RunState::Running => "RUNNING",
            RunState::Waiting => "WAITING",
            RunState::Success => "SUCCESS",
            RunState::Failed => "FAILED",
            RunState::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Validating wrapper over the current run state.
#[derive(Debug, Clone, Copy)]
pub struct RunStateMachine {
    current: RunState,
}

impl Default for RunStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunState::Pending,
        }
    }

    /// Resume path: a reloaded run starts out suspended.
    pub fn waiting() -> Self {
        Self {
            current: RunState::Waiting,
        }
    }

    pub fn current(&self) -> RunState {
        self.current
    }

    pub fn transition(&mut self, next: RunState) -> AorResult<RunState> {
        if !self.current.can_transition_to(next) {
            return Err(AorError::config(format!(
                "illegal run state transition {} -> {}",
                self.current, next
            )));
        }
        let previous = self.current;
        self.current = next;
        Ok(previous)
    }
}
