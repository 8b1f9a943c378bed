// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Execution Control - Application Layer
//!
//! Pause, resume, cancel and steer running agent executions.
//!
//! Every mutating call joins against the execution's recorded owner first;
//! unknown and foreign executions fail identically with `AccessDenied`.
//! Control rows are created lazily on the first control operation. Every
//! transition attempt, accepted or rejected, writes one audit row, and every
//! accepted transition publishes a [`ControlEvent`] and updates the
//! execution's dashboard status.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::audit::AuditLogger;
use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::checkpoint::Checkpoint;
use crate::domain::error::ControlPlaneError;
use crate::domain::events::ControlEvent;
use crate::domain::execution::ExecutionStatus;
use crate::domain::execution_control::{ControlState, ControlTransitionError, ExecutionControl, PauseOutcome};
use crate::domain::identity::{ExecutionId, UserId};
use crate::domain::repository::{ExecutionControlRepository, ExecutionRepository};
use crate::infrastructure::event_bus::EventBus;

#[async_trait]
pub trait ExecutionControlService: Send + Sync {
    /// running | awaiting_approval → paused. Already paused is a no-op.
    async fn pause(&self, user_id: UserId, execution_id: ExecutionId, reason: &str) -> Result<PauseOutcome, ControlPlaneError>;

    /// paused | awaiting_approval → running.
    async fn resume(&self, user_id: UserId, execution_id: ExecutionId) -> Result<(), ControlPlaneError>;

    /// Any non-terminal state → cancelled. A second cancel is rejected.
    async fn cancel(&self, user_id: UserId, execution_id: ExecutionId, reason: &str) -> Result<(), ControlPlaneError>;

    /// Store a one-shot instruction; resumes a paused execution. Returns
    /// `true` when the call resumed the execution.
    async fn inject_instruction(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        instruction: &str,
    ) -> Result<bool, ControlPlaneError>;

    /// Atomically read and clear the injected instruction.
    async fn get_injected_instruction(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Option<String>, ControlPlaneError>;

    /// Checked by the agent loop before each iteration.
    async fn should_pause(&self, execution_id: ExecutionId) -> Result<bool, ControlPlaneError>;

    async fn save_checkpoint(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        checkpoint: Checkpoint,
    ) -> Result<(), ControlPlaneError>;

    async fn load_checkpoint(&self, user_id: UserId, execution_id: ExecutionId) -> Result<Option<Checkpoint>, ControlPlaneError>;

    /// Current control row. Executions never touched by a control operation
    /// report a fresh `running` row that is not persisted.
    async fn get_state(&self, user_id: UserId, execution_id: ExecutionId) -> Result<ExecutionControl, ControlPlaneError>;

    /// Park the execution while an approval is pending.
    async fn enter_awaiting_approval(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        reason: &str,
    ) -> Result<(), ControlPlaneError>;
}

pub struct StandardExecutionControlService {
    executions: Arc<dyn ExecutionRepository>,
    repository: Arc<dyn ExecutionControlRepository>,
    event_bus: EventBus,
    audit: AuditLogger,
}

/// Column written besides the state columns.
#[derive(Clone, Copy)]
enum Touches {
    StateOnly,
    Instruction,
    Checkpoint,
}

/// Result of applying one operation to a control row.
struct Applied<T> {
    value: T,
    from: ControlState,
    to: ControlState,
}

impl StandardExecutionControlService {
    pub fn new(
        executions: Arc<dyn ExecutionRepository>,
        repository: Arc<dyn ExecutionControlRepository>,
        event_bus: EventBus,
        audit: AuditLogger,
    ) -> Self {
        Self {
            executions,
            repository,
            event_bus,
            audit,
        }
    }

    async fn authorize(&self, user_id: UserId, execution_id: ExecutionId) -> Result<(), ControlPlaneError> {
        match self.executions.find_by_id(execution_id).await? {
            Some(execution) if execution.user_id == user_id => Ok(()),
            _ => Err(ControlPlaneError::AccessDenied(format!(
                "execution {} not found or access denied",
                execution_id
            ))),
        }
    }

    async fn load_or_init(&self, user_id: UserId, execution_id: ExecutionId) -> Result<ExecutionControl, ControlPlaneError> {
        Ok(self
            .repository
            .find_by_execution(execution_id)
            .await?
            .unwrap_or_else(|| ExecutionControl::new(execution_id, user_id)))
    }

    /// Ownership check, lazy load, domain transition, persist, then publish.
    ///
    /// Only the columns the operation owns are written back, so a concurrent
    /// `take_instruction` or checkpoint save is never overwritten with the
    /// values read here.
    async fn apply<T, F>(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        touches: Touches,
        op: F,
    ) -> Result<Applied<T>, ControlPlaneError>
    where
        F: FnOnce(&mut ExecutionControl) -> Result<T, ControlTransitionError> + Send,
        T: Send,
    {
        self.authorize(user_id, execution_id).await?;
        let mut control = self.load_or_init(user_id, execution_id).await?;
        let from = control.state;

        let value = op(&mut control).map_err(|e| ControlPlaneError::InvalidStateTransition(e.to_string()))?;
        match touches {
            Touches::StateOnly => {}
            Touches::Instruction => self.repository.set_instruction(&control).await?,
            Touches::Checkpoint => self.repository.save_checkpoint(&control).await?,
        }
        if control.state != from {
            self.repository.save_state(&control).await?;
        }

        if control.state != from {
            self.after_transition(&control, from).await;
        }
        Ok(Applied {
            value,
            from,
            to: control.state,
        })
    }

    async fn after_transition(&self, control: &ExecutionControl, from: ControlState) {
        let visible = match control.state {
            ControlState::Running => ExecutionStatus::Running,
            ControlState::Paused | ControlState::AwaitingApproval => ExecutionStatus::NeedsInput,
            ControlState::Cancelled => ExecutionStatus::Cancelled,
        };
        if let Err(e) = self.executions.update_status(control.execution_id, visible).await {
            warn!(
                execution_id = %control.execution_id,
                status = visible.as_str(),
                error = %e,
                "Failed to update visible execution status"
            );
        }

        info!(
            execution_id = %control.execution_id,
            from = %from,
            to = %control.state,
            reason = control.state_reason.as_deref().unwrap_or(""),
            "Execution control state changed"
        );

        self.event_bus.publish_control_event(ControlEvent::StateChanged {
            execution_id: control.execution_id,
            user_id: control.user_id,
            from,
            to: control.state,
            reason: control.state_reason.clone(),
            changed_at: control.last_state_change,
        });
    }

    /// Audit and count one transition attempt, then hand back its result.
    async fn audited<T>(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        transition: &'static str,
        mut details: Value,
        outcome: Result<Applied<T>, ControlPlaneError>,
    ) -> Result<T, ControlPlaneError> {
        let action = format!("execution.{}", transition);
        match outcome {
            Ok(applied) => {
                metrics::counter!(
                    "agentgate_control_transitions_total",
                    "transition" => transition,
                    "outcome" => "success"
                )
                .increment(1);
                details["from"] = json!(applied.from);
                details["to"] = json!(applied.to);
                self.audit
                    .record(AuditLogEntry::success(
                        user_id,
                        action,
                        ResourceType::ExecutionControl,
                        execution_id.to_string(),
                        details,
                    ))
                    .await;
                Ok(applied.value)
            }
            Err(e) => {
                metrics::counter!(
                    "agentgate_control_transitions_total",
                    "transition" => transition,
                    "outcome" => e.code()
                )
                .increment(1);
                details["error_code"] = json!(e.code());
                self.audit
                    .record(AuditLogEntry::failure(
                        user_id,
                        action,
                        ResourceType::ExecutionControl,
                        execution_id.to_string(),
                        details,
                        e.to_string(),
                    ))
                    .await;
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ExecutionControlService for StandardExecutionControlService {
    async fn pause(&self, user_id: UserId, execution_id: ExecutionId, reason: &str) -> Result<PauseOutcome, ControlPlaneError> {
        let outcome = self.apply(user_id, execution_id, Touches::StateOnly, |c| c.pause(reason)).await;
        self.audited(user_id, execution_id, "pause", json!({ "reason": reason }), outcome)
            .await
    }

    async fn resume(&self, user_id: UserId, execution_id: ExecutionId) -> Result<(), ControlPlaneError> {
        let outcome = self.apply(user_id, execution_id, Touches::StateOnly, |c| c.resume()).await;
        self.audited(user_id, execution_id, "resume", json!({}), outcome).await
    }

    async fn cancel(&self, user_id: UserId, execution_id: ExecutionId, reason: &str) -> Result<(), ControlPlaneError> {
        let outcome = self.apply(user_id, execution_id, Touches::StateOnly, |c| c.cancel(reason)).await;
        self.audited(user_id, execution_id, "cancel", json!({ "reason": reason }), outcome)
            .await
    }

    async fn inject_instruction(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        instruction: &str,
    ) -> Result<bool, ControlPlaneError> {
        let outcome = if instruction.trim().is_empty() {
            Err(ControlPlaneError::Validation("instruction cannot be empty".to_string()))
        } else {
            self.apply(user_id, execution_id, Touches::Instruction, |c| c.inject_instruction(instruction)).await
        };

        if outcome.is_ok() {
            self.event_bus.publish_control_event(ControlEvent::InstructionInjected {
                execution_id,
                user_id,
                injected_at: Utc::now(),
            });
        }

        let details = json!({ "instruction_length": instruction.chars().count() });
        self.audited(user_id, execution_id, "inject_instruction", details, outcome)
            .await
    }

    async fn get_injected_instruction(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
    ) -> Result<Option<String>, ControlPlaneError> {
        self.authorize(user_id, execution_id).await?;
        let instruction = self.repository.take_instruction(execution_id).await?;
        if instruction.is_some() {
            debug!(execution_id = %execution_id, "Delivered injected instruction");
        }
        Ok(instruction)
    }

    async fn should_pause(&self, execution_id: ExecutionId) -> Result<bool, ControlPlaneError> {
        Ok(self
            .repository
            .find_by_execution(execution_id)
            .await?
            .map(|c| c.should_pause())
            .unwrap_or(false))
    }

    async fn save_checkpoint(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        checkpoint: Checkpoint,
    ) -> Result<(), ControlPlaneError> {
        let iteration = checkpoint.iteration;
        let outcome = if checkpoint.is_supported() {
            self.apply(user_id, execution_id, Touches::Checkpoint, |c| {
                c.save_checkpoint(checkpoint);
                Ok(())
            })
            .await
        } else {
            Err(ControlPlaneError::Validation(format!(
                "unsupported checkpoint schema version {}",
                checkpoint.schema_version
            )))
        };
        self.audited(user_id, execution_id, "checkpoint", json!({ "iteration": iteration }), outcome)
            .await
    }

    async fn load_checkpoint(&self, user_id: UserId, execution_id: ExecutionId) -> Result<Option<Checkpoint>, ControlPlaneError> {
        self.authorize(user_id, execution_id).await?;
        let checkpoint = self
            .repository
            .find_by_execution(execution_id)
            .await?
            .and_then(|c| c.checkpoint);
        match checkpoint {
            Some(cp) if !cp.is_supported() => Err(ControlPlaneError::Validation(format!(
                "checkpoint schema version {} is newer than this build supports",
                cp.schema_version
            ))),
            other => Ok(other),
        }
    }

    async fn get_state(&self, user_id: UserId, execution_id: ExecutionId) -> Result<ExecutionControl, ControlPlaneError> {
        self.authorize(user_id, execution_id).await?;
        self.load_or_init(user_id, execution_id).await
    }

    async fn enter_awaiting_approval(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        reason: &str,
    ) -> Result<(), ControlPlaneError> {
        let outcome = self.apply(user_id, execution_id, Touches::StateOnly, |c| c.await_approval(reason)).await;
        self.audited(user_id, execution_id, "await_approval", json!({ "reason": reason }), outcome)
            .await
    }
}
