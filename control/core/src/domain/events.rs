// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalId, ApprovalStatus, RiskLevel};
use crate::domain::browser_context::ContextId;
use crate::domain::execution_control::ControlState;
use crate::domain::identity::{ExecutionId, UserId};

/// Execution control transitions, published after the new state is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlEvent {
    StateChanged {
        execution_id: ExecutionId,
        user_id: UserId,
        from: ControlState,
        to: ControlState,
        reason: Option<String>,
        changed_at: DateTime<Utc>,
    },
    InstructionInjected {
        execution_id: ExecutionId,
        user_id: UserId,
        injected_at: DateTime<Utc>,
    },
}

/// Approval workflow events. `Resolved` is what wakes approval waiters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApprovalEvent {
    Requested {
        approval_id: ApprovalId,
        execution_id: ExecutionId,
        user_id: UserId,
        risk_level: RiskLevel,
        expires_at: DateTime<Utc>,
    },
    Resolved {
        approval_id: ApprovalId,
        execution_id: ExecutionId,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContextEvent {
    Created {
        context_id: ContextId,
        user_id: UserId,
        created_at: DateTime<Utc>,
    },
    Deactivated {
        context_id: ContextId,
        deactivated_at: DateTime<Utc>,
    },
}
