// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts, one per aggregate plus the audit sink and the
//! execution owner registry. Interfaces live in the domain layer and are
//! implemented in [`crate::infrastructure::repositories`].
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|-----------------|
//! | `AuditLogRepository` | `AuditLogEntry` | `InMemoryAuditLogRepository`, `PostgresAuditLogRepository` |
//! | `CredentialRepository` | `Credential` | `InMemoryCredentialRepository`, `PostgresCredentialRepository` |
//! | `ExecutionRepository` | `Execution` | `InMemoryExecutionRepository`, `PostgresExecutionRepository` |
//! | `ExecutionControlRepository` | `ExecutionControl` | `InMemoryExecutionControlRepository`, `PostgresExecutionControlRepository` |
//! | `ApprovalRepository` | `ActionApproval` | `InMemoryApprovalRepository`, `PostgresApprovalRepository` |
//! | `BrowserContextRepository` | `BrowserContext` | `InMemoryBrowserContextRepository`, `PostgresBrowserContextRepository` |
//!
//! ## Atomicity Contracts
//!
//! Services are stateless and hold no locks, so the few operations that race
//! are pushed down into single storage-level statements:
//!
//! - `ExecutionControlRepository::take_instruction` reads and clears in one step.
//! - `ExecutionControlRepository` writes are column-scoped: a state change
//!   never writes back an instruction or checkpoint read earlier.
//! - `ApprovalRepository::resolve_pending` only writes if the stored row is
//!   still `pending` (compare-and-set).
//! - `BrowserContextRepository::{increment,decrement}_sessions` never
//!   read-modify-write in the application; decrement floors at zero.
//! - `BrowserContextRepository::deactivate_idle` selects and deactivates in
//!   one statement, re-checking the session count.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::approval::{ActionApproval, ApprovalId, ApprovalStatus};
use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::browser_context::{BrowserContext, ContextId};
use crate::domain::credential::{Credential, CredentialId};
use crate::domain::crypto::EncryptedPayload;
use crate::domain::execution::{Execution, ExecutionStatus};
use crate::domain::execution_control::ExecutionControl;
use crate::domain::identity::{ClientId, ExecutionId, UserId};

/// Storage backend selection for pluggable persistence.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Append-only audit sink. Reads exist for incident review only.
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn find_by_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError>;

    /// Newest first.
    async fn find_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<AuditLogEntry>, RepositoryError>;
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    async fn insert(&self, credential: &Credential) -> Result<(), RepositoryError>;

    /// Overwrite mutable fields (payload, hints, name, metadata, status, timestamps).
    async fn update(&self, credential: &Credential) -> Result<(), RepositoryError>;

    /// Returns retired rows too; callers filter.
    async fn find_by_id(&self, id: CredentialId) -> Result<Option<Credential>, RepositoryError>;

    /// Active rows only, newest first, optionally filtered by service tag.
    async fn find_active_by_user(
        &self,
        user_id: UserId,
        service: Option<&str>,
    ) -> Result<Vec<Credential>, RepositoryError>;

    async fn touch(&self, id: CredentialId, at: DateTime<Utc>) -> Result<(), RepositoryError>;
}

/// Registry of agent executions, owned by the agent platform.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError>;

    async fn update_status(&self, id: ExecutionId, status: ExecutionStatus) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ExecutionControlRepository: Send + Sync {
    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionControl>, RepositoryError>;

    /// Insert the row, or update only `state`, `state_reason` and
    /// `last_state_change` on an existing one. Moving to `cancelled` also
    /// drops any undelivered instruction.
    async fn save_state(&self, control: &ExecutionControl) -> Result<(), RepositoryError>;

    /// Insert the row, or update only `injected_instruction` on an existing
    /// one. A cancelled row is left untouched.
    async fn set_instruction(&self, control: &ExecutionControl) -> Result<(), RepositoryError>;

    /// Insert the row, or update only `checkpoint` on an existing one.
    async fn save_checkpoint(&self, control: &ExecutionControl) -> Result<(), RepositoryError>;

    /// Atomically read and clear the injected instruction.
    async fn take_instruction(&self, execution_id: ExecutionId) -> Result<Option<String>, RepositoryError>;
}

#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert(&self, approval: &ActionApproval) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<ActionApproval>, RepositoryError>;

    /// Persist `approval`'s resolution only if the stored row is still
    /// pending. Returns `false` when another observer resolved it first.
    async fn resolve_pending(&self, approval: &ActionApproval) -> Result<bool, RepositoryError>;

    /// Pending rows, oldest first.
    async fn find_pending_by_user(&self, user_id: UserId) -> Result<Vec<ActionApproval>, RepositoryError>;

    /// All rows of one execution, oldest first.
    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Vec<ActionApproval>, RepositoryError>;

    async fn count_by_status(&self, execution_id: ExecutionId, status: ApprovalStatus) -> Result<usize, RepositoryError>;
}

#[async_trait]
pub trait BrowserContextRepository: Send + Sync {
    async fn find_active(&self, user_id: UserId, client_id: ClientId) -> Result<Option<BrowserContext>, RepositoryError>;

    async fn find_by_id(&self, id: ContextId) -> Result<Option<BrowserContext>, RepositoryError>;

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<BrowserContext>, RepositoryError>;

    /// Fails with [`RepositoryError::Conflict`] if an active context already
    /// exists for the same (user, client).
    async fn insert(&self, context: &BrowserContext) -> Result<(), RepositoryError>;

    async fn touch(&self, id: ContextId, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    /// Atomically increment the session counter of an active context and
    /// return the new value.
    async fn increment_sessions(&self, id: ContextId) -> Result<u32, RepositoryError>;

    /// Atomically decrement with a floor of zero and return the new value.
    async fn decrement_sessions(&self, id: ContextId) -> Result<u32, RepositoryError>;

    async fn update_storage(
        &self,
        id: ContextId,
        storage: &EncryptedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Deactivate every active context idle since `cutoff` with zero active
    /// sessions. Returns the ids that were deactivated.
    async fn deactivate_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextId>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict(db.to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
