// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Action Approval - Application Layer
//!
//! Human-in-the-loop gate for risky agent actions.
//!
//! # Flow
//!
//! 1. The agent loop calls `request_approval`. Low-risk actions come back as
//!    [`ApprovalTicket::AutoApproved`] without touching storage.
//! 2. Otherwise a pending row is persisted, the execution is parked in
//!    `awaiting_approval` and the user is notified.
//! 3. The loop blocks in `wait_for_approval`, woken by the resolution event
//!    and falling back to polling the row every `poll_interval_ms`.
//! 4. `approve_action` resumes the execution; `reject_action` leaves it
//!    parked unless the auto-cancel threshold is configured and reached.
//!
//! Whichever observer first notices a pending row past its deadline performs
//! the timeout transition; the compare-and-set in the repository makes that
//! race harmless.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::audit::AuditLogger;
use crate::application::execution_control::ExecutionControlService;
use crate::domain::approval::{
    ActionApproval, ApprovalDisplayState, ApprovalId, ApprovalStatus, ApprovalTicket, ProposedAction,
    RiskAssessment, TimeoutAction,
};
use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::config::ApprovalConfig;
use crate::domain::error::ControlPlaneError;
use crate::domain::events::ApprovalEvent;
use crate::domain::identity::{ExecutionId, UserId};
use crate::domain::notification::Notifier;
use crate::domain::repository::{ApprovalRepository, ExecutionRepository};
use crate::domain::risk::assess_risk;
use crate::infrastructure::event_bus::EventBus;

/// Per-request overrides of the configured approval defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalOptions {
    pub timeout_minutes: Option<i64>,
    pub timeout_action: Option<TimeoutAction>,
    pub screenshot_url: Option<String>,
}

/// An approval row together with the state a dashboard should render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalView {
    #[serde(flatten)]
    pub approval: ActionApproval,
    pub display_state: ApprovalDisplayState,
}

impl From<ActionApproval> for ApprovalView {
    fn from(approval: ActionApproval) -> Self {
        let display_state = approval.display_state(Utc::now());
        Self {
            approval,
            display_state,
        }
    }
}

#[async_trait]
pub trait ActionApprovalService: Send + Sync {
    fn assess_risk(&self, action: &ProposedAction) -> RiskAssessment;

    async fn request_approval(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        action: ProposedAction,
        options: ApprovalOptions,
    ) -> Result<ApprovalTicket, ControlPlaneError>;

    /// Block until the approval is resolved. Returns whether the action may
    /// proceed. Cancelling `cancel` abandons the wait and leaves the row
    /// untouched for the next observer.
    async fn wait_for_approval(&self, ticket: ApprovalTicket, cancel: &CancellationToken) -> Result<bool, ControlPlaneError>;

    async fn approve_action(&self, user_id: UserId, approval_id: ApprovalId, note: Option<String>) -> Result<(), ControlPlaneError>;

    async fn reject_action(&self, user_id: UserId, approval_id: ApprovalId, reason: Option<String>) -> Result<(), ControlPlaneError>;

    /// Pending approvals for the user, oldest first.
    async fn get_pending_approvals(&self, user_id: UserId) -> Result<Vec<ApprovalView>, ControlPlaneError>;

    async fn get_approval(&self, user_id: UserId, approval_id: ApprovalId) -> Result<ApprovalView, ControlPlaneError>;

    async fn list_for_execution(&self, user_id: UserId, execution_id: ExecutionId) -> Result<Vec<ApprovalView>, ControlPlaneError>;
}

pub struct StandardActionApprovalService {
    repository: Arc<dyn ApprovalRepository>,
    executions: Arc<dyn ExecutionRepository>,
    control: Arc<dyn ExecutionControlService>,
    notifier: Arc<dyn Notifier>,
    event_bus: EventBus,
    audit: AuditLogger,
    config: ApprovalConfig,
}

impl StandardActionApprovalService {
    pub fn new(
        repository: Arc<dyn ApprovalRepository>,
        executions: Arc<dyn ExecutionRepository>,
        control: Arc<dyn ExecutionControlService>,
        notifier: Arc<dyn Notifier>,
        event_bus: EventBus,
        audit: AuditLogger,
        config: ApprovalConfig,
    ) -> Self {
        Self {
            repository,
            executions,
            control,
            notifier,
            event_bus,
            audit,
            config,
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms.max(1))
    }

    async fn authorize_execution(&self, user_id: UserId, execution_id: ExecutionId) -> Result<(), ControlPlaneError> {
        match self.executions.find_by_id(execution_id).await? {
            Some(execution) if execution.user_id == user_id => Ok(()),
            _ => Err(ControlPlaneError::AccessDenied(format!(
                "execution {} not found or access denied",
                execution_id
            ))),
        }
    }

    async fn load_owned(&self, user_id: UserId, approval_id: ApprovalId) -> Result<ActionApproval, ControlPlaneError> {
        match self.repository.find_by_id(approval_id).await? {
            Some(approval) if approval.user_id == user_id => Ok(approval),
            _ => Err(ControlPlaneError::AccessDenied(format!(
                "approval {} not found or access denied",
                approval_id
            ))),
        }
    }

    async fn record(&self, user_id: UserId, action: &str, approval_id: ApprovalId, result: Result<Value, &ControlPlaneError>) {
        let entry = match result {
            Ok(details) => {
                AuditLogEntry::success(user_id, action, ResourceType::ActionApproval, approval_id.to_string(), details)
            }
            Err(e) => AuditLogEntry::failure(
                user_id,
                action,
                ResourceType::ActionApproval,
                approval_id.to_string(),
                json!({ "error_code": e.code() }),
                e.to_string(),
            ),
        };
        self.audit.record(entry).await;
    }

    fn published_resolution(&self, approval: &ActionApproval) {
        metrics::counter!("agentgate_approvals_resolved_total", "outcome" => approval.status.as_str()).increment(1);
        self.event_bus.publish_approval_event(ApprovalEvent::Resolved {
            approval_id: approval.id,
            execution_id: approval.execution_id,
            status: approval.status,
            resolved_at: approval.responded_at.unwrap_or_else(Utc::now),
        });
    }

    /// Perform pending → timeout on an expired row and resolve it per its
    /// timeout policy. Loses gracefully to a concurrent resolver.
    async fn expire(&self, mut approval: ActionApproval) -> Result<bool, ControlPlaneError> {
        approval
            .time_out()
            .map_err(|e| ControlPlaneError::InvalidStateTransition(e.to_string()))?;

        if !self.repository.resolve_pending(&approval).await? {
            return self.stored_resolution(approval.id).await;
        }

        info!(
            approval_id = %approval.id,
            execution_id = %approval.execution_id,
            timeout_action = approval.timeout_action.as_str(),
            "Approval timed out"
        );
        self.published_resolution(&approval);
        self.record(
            approval.user_id,
            "approval.timeout",
            approval.id,
            Ok(json!({
                "execution_id": approval.execution_id,
                "timeout_action": approval.timeout_action,
                "expires_at": approval.expires_at,
            })),
        )
        .await;

        let proceed = approval.timeout_action == TimeoutAction::Approve;
        if proceed {
            self.resume_execution(&approval).await;
        }
        Ok(proceed)
    }

    async fn stored_resolution(&self, approval_id: ApprovalId) -> Result<bool, ControlPlaneError> {
        self.repository
            .find_by_id(approval_id)
            .await?
            .and_then(|a| a.resolution())
            .ok_or_else(|| ControlPlaneError::InvalidStateTransition(format!("approval {} is still pending", approval_id)))
    }

    async fn resume_execution(&self, approval: &ActionApproval) {
        if let Err(e) = self.control.resume(approval.user_id, approval.execution_id).await {
            warn!(
                approval_id = %approval.id,
                execution_id = %approval.execution_id,
                error = %e,
                "Approved action could not resume its execution"
            );
        }
    }

    async fn maybe_auto_cancel(&self, approval: &ActionApproval) {
        let Some(limit) = self.config.auto_cancel_after_rejections else {
            return;
        };
        let rejected = match self
            .repository
            .count_by_status(approval.execution_id, ApprovalStatus::Rejected)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!(execution_id = %approval.execution_id, error = %e, "Failed to count rejected approvals");
                return;
            }
        };
        if rejected >= limit as usize {
            let reason = format!("cancelled after {} rejected approvals", rejected);
            if let Err(e) = self.control.cancel(approval.user_id, approval.execution_id, &reason).await {
                warn!(execution_id = %approval.execution_id, error = %e, "Auto-cancel after rejections failed");
            }
        }
    }

    async fn do_request(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        action: ProposedAction,
        assessment: RiskAssessment,
        options: ApprovalOptions,
    ) -> Result<ActionApproval, ControlPlaneError> {
        self.authorize_execution(user_id, execution_id).await?;

        let approval = ActionApproval::new(
            execution_id,
            user_id,
            action,
            assessment,
            options.timeout_minutes.unwrap_or(self.config.default_timeout_minutes),
            options.timeout_action.unwrap_or(self.config.default_timeout_action),
            options.screenshot_url,
        )
        .map_err(|e| ControlPlaneError::Validation(e.to_string()))?;
        self.repository.insert(&approval).await?;

        let reason = format!("awaiting approval {} for {}", approval.id, approval.action.action_type);
        if let Err(e) = self.control.enter_awaiting_approval(user_id, execution_id, &reason).await {
            // The execution cannot wait (e.g. already cancelled): close the row.
            let mut closed = approval.clone();
            if closed.reject(Some(format!("execution could not wait for approval: {}", e))).is_ok() {
                if let Err(close_err) = self.repository.resolve_pending(&closed).await {
                    warn!(
                        approval_id = %approval.id,
                        execution_id = %execution_id,
                        error = %close_err,
                        "Failed to close approval for an execution that cannot wait"
                    );
                }
            }
            return Err(e);
        }
        Ok(approval)
    }

    async fn do_approve(&self, user_id: UserId, approval_id: ApprovalId, note: Option<String>) -> Result<ActionApproval, ControlPlaneError> {
        let mut approval = self.load_owned(user_id, approval_id).await?;
        if approval.is_expired_at(Utc::now()) {
            let expires_at = approval.expires_at;
            self.expire(approval).await?;
            return Err(ControlPlaneError::InvalidStateTransition(format!(
                "approval {} expired at {}",
                approval_id, expires_at
            )));
        }
        approval
            .approve(note)
            .map_err(|e| ControlPlaneError::InvalidStateTransition(e.to_string()))?;
        if !self.repository.resolve_pending(&approval).await? {
            return Err(ControlPlaneError::InvalidStateTransition(format!(
                "approval {} was resolved concurrently",
                approval_id
            )));
        }
        Ok(approval)
    }

    async fn do_reject(&self, user_id: UserId, approval_id: ApprovalId, reason: Option<String>) -> Result<ActionApproval, ControlPlaneError> {
        let mut approval = self.load_owned(user_id, approval_id).await?;
        if approval.is_expired_at(Utc::now()) {
            let expires_at = approval.expires_at;
            self.expire(approval).await?;
            return Err(ControlPlaneError::InvalidStateTransition(format!(
                "approval {} expired at {}",
                approval_id, expires_at
            )));
        }
        approval
            .reject(reason)
            .map_err(|e| ControlPlaneError::InvalidStateTransition(e.to_string()))?;
        if !self.repository.resolve_pending(&approval).await? {
            return Err(ControlPlaneError::InvalidStateTransition(format!(
                "approval {} was resolved concurrently",
                approval_id
            )));
        }
        Ok(approval)
    }
}

#[async_trait]
impl ActionApprovalService for StandardActionApprovalService {
    fn assess_risk(&self, action: &ProposedAction) -> RiskAssessment {
        assess_risk(action)
    }

    async fn request_approval(
        &self,
        user_id: UserId,
        execution_id: ExecutionId,
        action: ProposedAction,
        options: ApprovalOptions,
    ) -> Result<ApprovalTicket, ControlPlaneError> {
        let assessment = assess_risk(&action);
        metrics::counter!("agentgate_approvals_requested_total", "risk" => assessment.risk_level.as_str()).increment(1);

        if !assessment.requires_approval {
            debug!(
                execution_id = %execution_id,
                action_type = %action.action_type,
                "Low-risk action auto-approved"
            );
            return Ok(ApprovalTicket::AutoApproved);
        }

        let action_type = action.action_type.clone();
        match self.do_request(user_id, execution_id, action, assessment, options).await {
            Ok(approval) => {
                info!(
                    approval_id = %approval.id,
                    execution_id = %execution_id,
                    risk_level = %approval.risk_level,
                    "Approval requested"
                );
                self.event_bus.publish_approval_event(ApprovalEvent::Requested {
                    approval_id: approval.id,
                    execution_id,
                    user_id,
                    risk_level: approval.risk_level,
                    expires_at: approval.expires_at,
                });
                self.record(
                    user_id,
                    "approval.request",
                    approval.id,
                    Ok(json!({
                        "execution_id": execution_id,
                        "action_type": action_type,
                        "risk_level": approval.risk_level,
                        "risk_factors": approval.risk_factors,
                        "expires_at": approval.expires_at,
                    })),
                )
                .await;
                self.notifier
                    .notify(
                        user_id,
                        &format!(
                            "Approval needed: {} on execution #{} (risk: {}). Expires at {}.",
                            action_type,
                            execution_id,
                            approval.risk_level,
                            approval.expires_at.format("%H:%M:%S UTC")
                        ),
                    )
                    .await;
                Ok(ApprovalTicket::Pending(approval.id))
            }
            Err(e) => {
                self.audit
                    .record(AuditLogEntry::failure(
                        user_id,
                        "approval.request",
                        ResourceType::ActionApproval,
                        format!("execution:{}", execution_id),
                        json!({ "action_type": action_type, "error_code": e.code() }),
                        e.to_string(),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    async fn wait_for_approval(&self, ticket: ApprovalTicket, cancel: &CancellationToken) -> Result<bool, ControlPlaneError> {
        let Some(approval_id) = ticket.approval_id() else {
            return Ok(true);
        };

        // Subscribe before the first read so a resolution in between is not missed.
        let mut resolutions = self.event_bus.subscribe_approval(approval_id);

        loop {
            let approval = self
                .repository
                .find_by_id(approval_id)
                .await?
                .ok_or_else(|| ControlPlaneError::NotFound(format!("approval {}", approval_id)))?;

            if let Some(proceed) = approval.resolution() {
                return Ok(proceed);
            }

            let now = Utc::now();
            if approval.is_expired_at(now) {
                return self.expire(approval).await;
            }

            let until_deadline = (approval.expires_at - now)
                .to_std()
                .unwrap_or_default()
                + Duration::from_millis(10);
            let nap = self.poll_interval().min(until_deadline);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(approval_id = %approval_id, "Approval wait cancelled by caller");
                    return Err(ControlPlaneError::Cancelled);
                }
                _ = resolutions.recv() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn approve_action(&self, user_id: UserId, approval_id: ApprovalId, note: Option<String>) -> Result<(), ControlPlaneError> {
        match self.do_approve(user_id, approval_id, note).await {
            Ok(approval) => {
                info!(approval_id = %approval_id, execution_id = %approval.execution_id, "Action approved");
                self.published_resolution(&approval);
                self.record(
                    user_id,
                    "approval.approve",
                    approval_id,
                    Ok(json!({ "execution_id": approval.execution_id, "note": approval.response_note })),
                )
                .await;
                self.resume_execution(&approval).await;
                Ok(())
            }
            Err(e) => {
                self.record(user_id, "approval.approve", approval_id, Err(&e)).await;
                Err(e)
            }
        }
    }

    async fn reject_action(&self, user_id: UserId, approval_id: ApprovalId, reason: Option<String>) -> Result<(), ControlPlaneError> {
        match self.do_reject(user_id, approval_id, reason).await {
            Ok(approval) => {
                info!(approval_id = %approval_id, execution_id = %approval.execution_id, "Action rejected");
                self.published_resolution(&approval);
                self.record(
                    user_id,
                    "approval.reject",
                    approval_id,
                    Ok(json!({ "execution_id": approval.execution_id, "reason": approval.response_note })),
                )
                .await;
                self.maybe_auto_cancel(&approval).await;
                Ok(())
            }
            Err(e) => {
                self.record(user_id, "approval.reject", approval_id, Err(&e)).await;
                Err(e)
            }
        }
    }

    async fn get_pending_approvals(&self, user_id: UserId) -> Result<Vec<ApprovalView>, ControlPlaneError> {
        Ok(self
            .repository
            .find_pending_by_user(user_id)
            .await?
            .into_iter()
            .map(ApprovalView::from)
            .collect())
    }

    async fn get_approval(&self, user_id: UserId, approval_id: ApprovalId) -> Result<ApprovalView, ControlPlaneError> {
        Ok(self.load_owned(user_id, approval_id).await?.into())
    }

    async fn list_for_execution(&self, user_id: UserId, execution_id: ExecutionId) -> Result<Vec<ApprovalView>, ControlPlaneError> {
        self.authorize_execution(user_id, execution_id).await?;
        Ok(self
            .repository
            .find_by_execution(execution_id)
            .await?
            .into_iter()
            .map(ApprovalView::from)
            .collect())
    }
}
