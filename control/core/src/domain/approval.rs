// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Action Approval Aggregate
//!
//! A risky action proposed by the agent loop and the human decision about it.
//!
//! ## Status Lifecycle
//!
//! ```text
//! Pending ──approve──▶ Approved
//!    │ ────reject───▶ Rejected
//!    └──(now > expires_at, observed)──▶ Timeout  (resolves per timeout_action)
//! ```
//!
//! Status is terminal once it leaves `Pending`. `expires_at` is strictly in
//! the future when the row is created.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::identity::{ExecutionId, UserId};

/// Longest a pending approval may hold an execution: one week.
pub const MAX_TIMEOUT_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub Uuid);

impl ApprovalId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ApprovalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What `request_approval` hands back to the agent loop.
///
/// Low-risk actions never persist a row and come back as `AutoApproved`, so
/// waiting on them resolves immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "approval_id", rename_all = "snake_case")]
pub enum ApprovalTicket {
    AutoApproved,
    Pending(ApprovalId),
}

impl ApprovalTicket {
    pub fn approval_id(&self) -> Option<ApprovalId> {
        match self {
            Self::AutoApproved => None,
            Self::Pending(id) => Some(*id),
        }
    }
}

/// Ordinal risk classification: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// One step up the ladder; `Critical` stays `Critical`.
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action the agent loop wants to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl ProposedAction {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            description: String::new(),
            params: serde_json::Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Timeout,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    Approve,
    Reject,
}

impl TimeoutAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "approve" => Some(Self::Approve),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Dashboard-facing state. Pending rows whose deadline has passed but which no
/// observer has timed out yet show as `Expired`, never as a generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDisplayState {
    /// Actionable: show approve/reject.
    Pending,
    /// Informational: the deadline passed.
    Expired,
    Approved,
    /// Terminal: no further action.
    Rejected,
    /// Informational: resolved by the timeout policy.
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalStateError {
    #[error("approval is already {0}")]
    AlreadyResolved(&'static str),

    #[error("approval expired at {0}")]
    Expired(DateTime<Utc>),

    #[error("timeout must be between 1 and {max} minutes, got {0}", max = MAX_TIMEOUT_MINUTES)]
    InvalidTimeout(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionApproval {
    pub id: ApprovalId,
    pub execution_id: ExecutionId,
    pub user_id: UserId,
    pub action: ProposedAction,
    pub risk_level: RiskLevel,
    pub risk_factors: Vec<String>,
    pub screenshot_url: Option<String>,
    pub status: ApprovalStatus,
    pub expires_at: DateTime<Utc>,
    pub timeout_action: TimeoutAction,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub response_note: Option<String>,
}

impl ActionApproval {
    pub fn new(
        execution_id: ExecutionId,
        user_id: UserId,
        action: ProposedAction,
        assessment: RiskAssessment,
        timeout_minutes: i64,
        timeout_action: TimeoutAction,
        screenshot_url: Option<String>,
    ) -> Result<Self, ApprovalStateError> {
        if !(1..=MAX_TIMEOUT_MINUTES).contains(&timeout_minutes) {
            return Err(ApprovalStateError::InvalidTimeout(timeout_minutes));
        }
        let now = Utc::now();
        let expires_at = Duration::try_minutes(timeout_minutes)
            .and_then(|timeout| now.checked_add_signed(timeout))
            .ok_or(ApprovalStateError::InvalidTimeout(timeout_minutes))?;
        Ok(Self {
            id: ApprovalId::new(),
            execution_id,
            user_id,
            action,
            risk_level: assessment.risk_level,
            risk_factors: assessment.risk_factors,
            screenshot_url,
            status: ApprovalStatus::Pending,
            expires_at,
            timeout_action,
            created_at: now,
            responded_at: None,
            response_note: None,
        })
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Pending and past its deadline.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && now > self.expires_at
    }

    /// `Some(true)` when the action may proceed, `Some(false)` when it must
    /// not, `None` while still pending.
    pub fn resolution(&self) -> Option<bool> {
        match self.status {
            ApprovalStatus::Pending => None,
            ApprovalStatus::Approved => Some(true),
            ApprovalStatus::Rejected => Some(false),
            ApprovalStatus::Timeout => Some(self.timeout_action == TimeoutAction::Approve),
        }
    }

    fn ensure_actionable(&self, now: DateTime<Utc>) -> Result<(), ApprovalStateError> {
        if !self.is_pending() {
            return Err(ApprovalStateError::AlreadyResolved(self.status.as_str()));
        }
        if now > self.expires_at {
            return Err(ApprovalStateError::Expired(self.expires_at));
        }
        Ok(())
    }

    fn resolve(&mut self, status: ApprovalStatus, note: Option<String>, now: DateTime<Utc>) {
        self.status = status;
        self.responded_at = Some(now);
        self.response_note = note;
    }

    pub fn approve(&mut self, note: Option<String>) -> Result<(), ApprovalStateError> {
        let now = Utc::now();
        self.ensure_actionable(now)?;
        self.resolve(ApprovalStatus::Approved, note, now);
        Ok(())
    }

    pub fn reject(&mut self, reason: Option<String>) -> Result<(), ApprovalStateError> {
        let now = Utc::now();
        self.ensure_actionable(now)?;
        self.resolve(ApprovalStatus::Rejected, reason, now);
        Ok(())
    }

    /// Performed by whichever observer first notices the deadline passed.
    pub fn time_out(&mut self) -> Result<(), ApprovalStateError> {
        if !self.is_pending() {
            return Err(ApprovalStateError::AlreadyResolved(self.status.as_str()));
        }
        let note = format!("no response before deadline; resolved as {}", self.timeout_action.as_str());
        self.resolve(ApprovalStatus::Timeout, Some(note), Utc::now());
        Ok(())
    }

    pub fn display_state(&self, now: DateTime<Utc>) -> ApprovalDisplayState {
        match self.status {
            ApprovalStatus::Pending if now > self.expires_at => ApprovalDisplayState::Expired,
            ApprovalStatus::Pending => ApprovalDisplayState::Pending,
            ApprovalStatus::Approved => ApprovalDisplayState::Approved,
            ApprovalStatus::Rejected => ApprovalDisplayState::Rejected,
            ApprovalStatus::Timeout => ApprovalDisplayState::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(timeout_action: TimeoutAction) -> ActionApproval {
        ActionApproval::new(
            ExecutionId(42),
            UserId(1),
            ProposedAction::new("delete"),
            RiskAssessment {
                risk_level: RiskLevel::High,
                risk_factors: vec!["High-risk action type: delete".to_string()],
                requires_approval: true,
            },
            5,
            timeout_action,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_escalate_saturates_at_critical() {
        assert_eq!(RiskLevel::Low.escalate(), RiskLevel::Medium);
        assert_eq!(RiskLevel::High.escalate(), RiskLevel::Critical);
        assert_eq!(RiskLevel::Critical.escalate(), RiskLevel::Critical);
        assert!(RiskLevel::Low < RiskLevel::Critical);
    }

    #[test]
    fn test_new_rejects_non_positive_timeout() {
        let result = ActionApproval::new(
            ExecutionId(1),
            UserId(1),
            ProposedAction::new("delete"),
            RiskAssessment {
                risk_level: RiskLevel::High,
                risk_factors: vec![],
                requires_approval: true,
            },
            0,
            TimeoutAction::Reject,
            None,
        );
        assert_eq!(result.unwrap_err(), ApprovalStateError::InvalidTimeout(0));
    }

    #[test]
    fn test_oversized_timeout_is_rejected() {
        for minutes in [MAX_TIMEOUT_MINUTES + 1, 1_000_000_000_000, i64::MAX] {
            let result = ActionApproval::new(
                ExecutionId(1),
                UserId(1),
                ProposedAction::new("delete"),
                RiskAssessment {
                    risk_level: RiskLevel::High,
                    risk_factors: vec![],
                    requires_approval: true,
                },
                minutes,
                TimeoutAction::Reject,
                None,
            );
            assert_eq!(result.unwrap_err(), ApprovalStateError::InvalidTimeout(minutes));
        }
    }

    #[test]
    fn test_expires_strictly_in_future() {
        let a = approval(TimeoutAction::Reject);
        assert!(a.expires_at > a.created_at);
        assert!(!a.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_status_is_terminal_after_approval() {
        let mut a = approval(TimeoutAction::Reject);
        a.approve(Some("ok".to_string())).unwrap();
        assert_eq!(a.resolution(), Some(true));
        assert!(a.reject(None).is_err());
        assert!(a.time_out().is_err());
        assert_eq!(a.status, ApprovalStatus::Approved);
    }

    #[test]
    fn test_timeout_resolves_per_policy() {
        let mut approve = approval(TimeoutAction::Approve);
        approve.time_out().unwrap();
        assert_eq!(approve.resolution(), Some(true));

        let mut reject = approval(TimeoutAction::Reject);
        reject.time_out().unwrap();
        assert_eq!(reject.resolution(), Some(false));
        assert_eq!(reject.display_state(Utc::now()), ApprovalDisplayState::TimedOut);
    }

    #[test]
    fn test_expired_pending_cannot_be_approved() {
        let mut a = approval(TimeoutAction::Reject);
        a.expires_at = Utc::now() - Duration::seconds(1);
        assert!(matches!(a.approve(None), Err(ApprovalStateError::Expired(_))));
        assert_eq!(a.display_state(Utc::now()), ApprovalDisplayState::Expired);
    }

    #[test]
    fn test_ticket_serializes_sentinel() {
        let json = serde_json::to_value(ApprovalTicket::AutoApproved).unwrap();
        assert_eq!(json["kind"], "auto_approved");
        assert_eq!(ApprovalTicket::AutoApproved.approval_id(), None);
    }
}
