// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Audit Log Entry
//!
//! Append-only record of security-relevant operations. Entries are never
//! mutated or deleted, and nothing in the control plane reads them back to
//! make a decision; they exist for compliance and incident review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::identity::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Credential,
    ExecutionControl,
    ActionApproval,
    BrowserContext,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credential => "credential",
            Self::ExecutionControl => "execution_control",
            Self::ActionApproval => "action_approval",
            Self::BrowserContext => "browser_context",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "credential" => Some(Self::Credential),
            "execution_control" => Some(Self::ExecutionControl),
            "action_approval" => Some(Self::ActionApproval),
            "browser_context" => Some(Self::BrowserContext),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user_id: UserId,
    /// Dotted action name, e.g. `credential.retrieve`, `execution.pause`.
    pub action: String,
    pub resource_type: ResourceType,
    pub resource_id: String,
    /// Never contains plaintext secrets; only masked hints and fingerprints.
    pub details: serde_json::Value,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AuditLogEntry {
    pub fn success(
        user_id: UserId,
        action: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            action: action.into(),
            resource_type,
            resource_id: resource_id.into(),
            details,
            success: true,
            error_message: None,
        }
    }

    pub fn failure(
        user_id: UserId,
        action: impl Into<String>,
        resource_type: ResourceType,
        resource_id: impl Into<String>,
        details: serde_json::Value,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id,
            action: action.into(),
            resource_type,
            resource_id: resource_id.into(),
            details,
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}
