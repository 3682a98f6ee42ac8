//! Finite State Machine for a single deployment

use serde::{Deserialize, Serialize};

use crate::models::DeploymentStatus;

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Row inserted, worker not started
    Pending,

    /// Pipeline in progress
    Running,

    /// Exit code 0
    Succeeded,

    /// Non-zero exit code
    Failed,
}

impl From<DeploymentState> for DeploymentStatus {
    fn from(state: DeploymentState) -> Self {
        match state {
            DeploymentState::Pending => DeploymentStatus::Pending,
            DeploymentState::Running => DeploymentStatus::Running,
            DeploymentState::Succeeded => DeploymentStatus::Succeeded,
            DeploymentState::Failed => DeploymentStatus::Failed,
        }
    }
}

/// Deployment event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// Worker started the pipeline
    Start,

    /// Pipeline finished with an exit code
    Complete(i32),

    /// Deployment ended before its worker ran (shutdown, reconciliation)
    Abort(i32),
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    state: DeploymentState,
    exit_code: Option<i32>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            state: DeploymentState::Pending,
            exit_code: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> DeploymentState {
        self.state
    }

    /// Exit code, once terminal
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), String> {
        let next = match (self.state, event) {
            (DeploymentState::Pending, DeploymentEvent::Start) => DeploymentState::Running,

            (DeploymentState::Running, DeploymentEvent::Complete(code))
            | (DeploymentState::Running, DeploymentEvent::Abort(code))
            | (DeploymentState::Pending, DeploymentEvent::Abort(code)) => {
                self.exit_code = Some(code);
                if code == 0 {
                    DeploymentState::Succeeded
                } else {
                    DeploymentState::Failed
                }
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = next;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
