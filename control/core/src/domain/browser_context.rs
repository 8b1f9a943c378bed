// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Browser Context Aggregate
//!
//! Persistent, per-(user, client) browser state: cookies and local storage
//! survive across many automation sessions, encrypted at rest.
//!
//! ## Invariants
//!
//! - At most one `Active` context exists per (`user_id`, `client_id`).
//! - `active_session_count` never goes negative. Increments and decrements
//!   happen atomically in the repository, never as read-modify-write here.
//! - A context becomes `Inactive` only through the idle sweep, and only when
//!   it has been idle for the configured window **and** has no live sessions.
//!   Rows are never hard-deleted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::crypto::EncryptedPayload;
use crate::domain::identity::{ClientId, UserId};

pub const DEFAULT_CONTEXT_TTL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(pub Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx_{}", self.0.simple())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    /// Every session gets its own storage partition.
    Strict,
    /// Sessions of the same context share one partition.
    Standard,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::Strict
    }
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Standard => "standard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" => Some(Self::Strict),
            "standard" => Some(Self::Standard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ContextStatus {
    Active,
    Inactive { deactivated_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserContext {
    pub id: ContextId,
    pub user_id: UserId,
    pub client_id: ClientId,
    pub isolation_level: IsolationLevel,
    pub active_session_count: u32,
    pub storage: Option<EncryptedPayload>,
    pub status: ContextStatus,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BrowserContext {
    pub fn new(user_id: UserId, client_id: ClientId, isolation_level: IsolationLevel, ttl_days: i64) -> Self {
        let now = Utc::now();
        Self {
            id: ContextId::new(),
            user_id,
            client_id,
            isolation_level,
            active_session_count: 0,
            storage: None,
            status: ContextStatus::Active,
            last_used_at: now,
            expires_at: now + Duration::days(ttl_days),
            created_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, ContextStatus::Active)
    }

    /// Associated data for the storage blob; binds ciphertext to this context.
    pub fn storage_aad(id: ContextId) -> Vec<u8> {
        format!("browser_context:{}", id.0).into_bytes()
    }

    /// Sweep eligibility: idle since before `cutoff` with no live sessions.
    pub fn is_reclaimable(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_active() && self.active_session_count == 0 && self.last_used_at <= cutoff
    }
}

/// Optional launch parameters forwarded to the session provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_region: Option<String>,
    #[serde(default)]
    pub record_session: bool,
}

/// Opaque handle for one automation session, scoped to a single context.
/// Carries no credentials and no storage blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolatedSession {
    pub session_id: String,
    pub context_id: ContextId,
    pub isolation_level: IsolationLevel,
    /// Storage namespace the session provider must confine the session to.
    pub storage_partition: String,
    pub config: SessionConfig,
    pub created_at: DateTime<Utc>,
}

impl IsolatedSession {
    pub fn new(context: &BrowserContext, config: SessionConfig) -> Self {
        let session_id = format!("sess_{}", Uuid::new_v4().simple());
        let storage_partition = match context.isolation_level {
            IsolationLevel::Strict => format!("{}/{}", context.id, session_id),
            IsolationLevel::Standard => context.id.to_string(),
        };
        Self {
            session_id,
            context_id: context.id,
            isolation_level: context.isolation_level,
            storage_partition,
            config,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_defaults() {
        let ctx = BrowserContext::new(UserId(1), ClientId(9), IsolationLevel::default(), DEFAULT_CONTEXT_TTL_DAYS);
        assert!(ctx.is_active());
        assert_eq!(ctx.isolation_level, IsolationLevel::Strict);
        assert_eq!(ctx.active_session_count, 0);
        assert_eq!((ctx.expires_at - ctx.created_at).num_days(), 30);
        assert!(ctx.id.to_string().starts_with("ctx_"));
    }

    #[test]
    fn test_reclaimable_requires_zero_sessions() {
        let mut ctx = BrowserContext::new(UserId(1), ClientId(9), IsolationLevel::Strict, 30);
        ctx.last_used_at = Utc::now() - Duration::days(45);
        let cutoff = Utc::now() - Duration::days(30);
        assert!(ctx.is_reclaimable(cutoff));
        ctx.active_session_count = 1;
        assert!(!ctx.is_reclaimable(cutoff));
    }

    #[test]
    fn test_strict_sessions_get_distinct_partitions() {
        let ctx = BrowserContext::new(UserId(1), ClientId(9), IsolationLevel::Strict, 30);
        let a = IsolatedSession::new(&ctx, SessionConfig::default());
        let b = IsolatedSession::new(&ctx, SessionConfig::default());
        assert_ne!(a.storage_partition, b.storage_partition);
        assert!(a.storage_partition.starts_with(&ctx.id.to_string()));
    }

    #[test]
    fn test_standard_sessions_share_partition() {
        let ctx = BrowserContext::new(UserId(1), ClientId(9), IsolationLevel::Standard, 30);
        let a = IsolatedSession::new(&ctx, SessionConfig::default());
        let b = IsolatedSession::new(&ctx, SessionConfig::default());
        assert_eq!(a.storage_partition, b.storage_partition);
        assert_ne!(a.session_id, b.session_id);
    }
}
