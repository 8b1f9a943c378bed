// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Execution Control Aggregate
//!
//! Per-execution control state consulted by the agent loop before every
//! iteration.
//!
//! ## State Machine
//!
//! ```text
//!             pause                      resume / inject
//!   Running ─────────▶ Paused ─────────────────────────▶ Running
//!      │  ▲              ▲ │
//!      │  │ resume       │ │ pause
//!      │  │ approve      │ ▼
//!      └──┴──────▶ AwaitingApproval
//!   (request_approval)
//!
//!   any non-terminal ──cancel──▶ Cancelled   (terminal, absorbing)
//! ```
//!
//! ## Invariants
//!
//! - `Cancelled` is the only terminal state; every transition out of it fails.
//! - `injected_instruction` is delivered at most once ([`ExecutionControl::take_instruction`]).
//! - `pause` on an already paused execution is a no-op, not an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::checkpoint::Checkpoint;
use crate::domain::identity::{ExecutionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlState {
    Running,
    Paused,
    AwaitingApproval,
    Cancelled,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "awaiting_approval" => Some(Self::AwaitingApproval),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The agent loop must not start another iteration in these states.
    pub fn halts_loop(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {operation} an execution that is {from}")]
pub struct ControlTransitionError {
    pub from: ControlState,
    pub operation: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    AlreadyPaused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionControl {
    pub execution_id: ExecutionId,
    pub user_id: UserId,
    pub state: ControlState,
    pub state_reason: Option<String>,
    pub injected_instruction: Option<String>,
    pub checkpoint: Option<Checkpoint>,
    pub last_state_change: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionControl {
    pub fn new(execution_id: ExecutionId, user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            execution_id,
            user_id,
            state: ControlState::Running,
            state_reason: None,
            injected_instruction: None,
            checkpoint: None,
            last_state_change: now,
            created_at: now,
        }
    }

    fn transition(&mut self, to: ControlState, reason: Option<String>) {
        self.state = to;
        self.state_reason = reason;
        self.last_state_change = Utc::now();
    }

    fn reject(&self, operation: &'static str) -> ControlTransitionError {
        ControlTransitionError {
            from: self.state,
            operation,
        }
    }

    pub fn pause(&mut self, reason: impl Into<String>) -> Result<PauseOutcome, ControlTransitionError> {
        match self.state {
            ControlState::Running | ControlState::AwaitingApproval => {
                self.transition(ControlState::Paused, Some(reason.into()));
                Ok(PauseOutcome::Paused)
            }
            ControlState::Paused => Ok(PauseOutcome::AlreadyPaused),
            ControlState::Cancelled => Err(self.reject("pause")),
        }
    }

    pub fn resume(&mut self) -> Result<(), ControlTransitionError> {
        match self.state {
            ControlState::Paused | ControlState::AwaitingApproval => {
                self.transition(ControlState::Running, None);
                Ok(())
            }
            ControlState::Running | ControlState::Cancelled => Err(self.reject("resume")),
        }
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), ControlTransitionError> {
        if self.state.is_terminal() {
            return Err(self.reject("cancel"));
        }
        self.injected_instruction = None;
        self.transition(ControlState::Cancelled, Some(reason.into()));
        Ok(())
    }

    /// Park the execution while a human reviews a risky action.
    pub fn await_approval(&mut self, reason: impl Into<String>) -> Result<(), ControlTransitionError> {
        match self.state {
            ControlState::Running | ControlState::Paused | ControlState::AwaitingApproval => {
                self.transition(ControlState::AwaitingApproval, Some(reason.into()));
                Ok(())
            }
            ControlState::Cancelled => Err(self.reject("await approval for")),
        }
    }

    /// Store a one-shot instruction. Returns `true` when the call also resumed
    /// a paused execution.
    pub fn inject_instruction(&mut self, instruction: impl Into<String>) -> Result<bool, ControlTransitionError> {
        if self.state.is_terminal() {
            return Err(self.reject("inject an instruction into"));
        }
        self.injected_instruction = Some(instruction.into());
        if self.state == ControlState::Paused {
            self.transition(ControlState::Running, Some("resumed by injected instruction".to_string()));
            return Ok(true);
        }
        Ok(false)
    }

    pub fn take_instruction(&mut self) -> Option<String> {
        self.injected_instruction.take()
    }

    pub fn should_pause(&self) -> bool {
        self.state.halts_loop()
    }

    pub fn save_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoint = Some(checkpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> ExecutionControl {
        ExecutionControl::new(ExecutionId(42), UserId(7))
    }

    #[test]
    fn test_initial_state_is_running() {
        let c = control();
        assert_eq!(c.state, ControlState::Running);
        assert!(!c.should_pause());
    }

    #[test]
    fn test_pause_is_noop_when_already_paused() {
        let mut c = control();
        assert_eq!(c.pause("user asked").unwrap(), PauseOutcome::Paused);
        let changed_at = c.last_state_change;
        assert_eq!(c.pause("again").unwrap(), PauseOutcome::AlreadyPaused);
        assert_eq!(c.state_reason.as_deref(), Some("user asked"));
        assert_eq!(c.last_state_change, changed_at);
    }

    #[test]
    fn test_resume_from_running_is_rejected() {
        let mut c = control();
        let err = c.resume().unwrap_err();
        assert_eq!(err.from, ControlState::Running);
    }

    #[test]
    fn test_awaiting_approval_can_pause_and_resume() {
        let mut c = control();
        c.await_approval("delete requested").unwrap();
        assert!(c.should_pause());
        c.pause("operator hold").unwrap();
        assert_eq!(c.state, ControlState::Paused);
        c.resume().unwrap();
        assert_eq!(c.state, ControlState::Running);
    }

    #[test]
    fn test_cancelled_is_absorbing() {
        let mut c = control();
        c.cancel("stop").unwrap();
        assert!(c.should_pause());
        assert!(c.pause("x").is_err());
        assert!(c.resume().is_err());
        assert!(c.cancel("again").is_err());
        assert!(c.inject_instruction("go").is_err());
        assert!(c.await_approval("x").is_err());
        assert_eq!(c.state, ControlState::Cancelled);
    }

    #[test]
    fn test_inject_resumes_paused_execution() {
        let mut c = control();
        c.pause("hold").unwrap();
        assert!(c.inject_instruction("use the staging account").unwrap());
        assert_eq!(c.state, ControlState::Running);
        assert_eq!(c.take_instruction().as_deref(), Some("use the staging account"));
        assert_eq!(c.take_instruction(), None);
    }

    #[test]
    fn test_inject_does_not_resume_awaiting_approval() {
        let mut c = control();
        c.await_approval("purchase").unwrap();
        assert!(!c.inject_instruction("note").unwrap());
        assert_eq!(c.state, ControlState::AwaitingApproval);
    }

    #[test]
    fn test_cancel_drops_pending_instruction() {
        let mut c = control();
        c.inject_instruction("later").unwrap();
        c.cancel("abort").unwrap();
        assert_eq!(c.injected_instruction, None);
    }
}
