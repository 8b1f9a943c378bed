// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the persistence contracts defined in
//! [`crate::domain::repository`].
//!
//! ## PostgreSQL Repositories
//!
//! Production implementations. Every race-prone operation is a single SQL
//! statement (`UPDATE ... WHERE status = 'pending'`, `GREATEST(count - 1, 0)`,
//! `UPDATE ... RETURNING`), so no application-level locking is needed.
//!
//! ## In-Memory Repositories
//!
//! `parking_lot`-guarded maps for tests and local development. Each atomic
//! contract is honoured by doing the read and the write under one write lock.

pub mod postgres_approval;
pub mod postgres_audit;
pub mod postgres_browser_context;
pub mod postgres_credential;
pub mod postgres_execution;
pub mod postgres_execution_control;

pub use postgres_approval::PostgresApprovalRepository;
pub use postgres_audit::PostgresAuditLogRepository;
pub use postgres_browser_context::PostgresBrowserContextRepository;
pub use postgres_credential::PostgresCredentialRepository;
pub use postgres_execution::PostgresExecutionRepository;
pub use postgres_execution_control::PostgresExecutionControlRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::approval::{ActionApproval, ApprovalId, ApprovalStatus};
use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::browser_context::{BrowserContext, ContextId, ContextStatus};
use crate::domain::credential::{Credential, CredentialId};
use crate::domain::crypto::EncryptedPayload;
use crate::domain::execution::{Execution, ExecutionStatus};
use crate::domain::execution_control::{ControlState, ExecutionControl};
use crate::domain::identity::{ClientId, ExecutionId, UserId};
use crate::domain::repository::{
    ApprovalRepository, AuditLogRepository, BrowserContextRepository, CredentialRepository,
    ExecutionControlRepository, ExecutionRepository, RepositoryError,
};

#[derive(Clone, Default)]
pub struct InMemoryAuditLogRepository {
    entries: Arc<RwLock<Vec<AuditLogEntry>>>,
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything appended so far, oldest first.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        self.entries.write().push(entry.clone());
        Ok(())
    }

    async fn find_by_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.resource_type == resource_type && e.resource_id == resource_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn find_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let entries = self.entries.read();
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCredentialRepository {
    credentials: Arc<RwLock<HashMap<CredentialId, Credential>>>,
}

impl InMemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for InMemoryCredentialRepository {
    async fn insert(&self, credential: &Credential) -> Result<(), RepositoryError> {
        let mut credentials = self.credentials.write();
        if credentials.contains_key(&credential.id) {
            return Err(RepositoryError::Conflict(format!("credential {} already exists", credential.id)));
        }
        credentials.insert(credential.id, credential.clone());
        Ok(())
    }

    async fn update(&self, credential: &Credential) -> Result<(), RepositoryError> {
        let mut credentials = self.credentials.write();
        match credentials.get_mut(&credential.id) {
            Some(existing) => {
                *existing = credential.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("credential {}", credential.id))),
        }
    }

    async fn find_by_id(&self, id: CredentialId) -> Result<Option<Credential>, RepositoryError> {
        Ok(self.credentials.read().get(&id).cloned())
    }

    async fn find_active_by_user(
        &self,
        user_id: UserId,
        service: Option<&str>,
    ) -> Result<Vec<Credential>, RepositoryError> {
        let credentials = self.credentials.read();
        let mut found: Vec<Credential> = credentials
            .values()
            .filter(|c| c.user_id == user_id && c.is_active())
            .filter(|c| service.map(|s| c.service == s).unwrap_or(true))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn touch(&self, id: CredentialId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(credential) = self.credentials.write().get_mut(&id) {
            credential.last_used_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<ExecutionId, Execution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        self.executions.write().insert(execution.id, execution.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.read().get(&id).cloned())
    }

    async fn update_status(&self, id: ExecutionId, status: ExecutionStatus) -> Result<(), RepositoryError> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("execution {}", id)))?;
        execution.status = status;
        execution.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryExecutionControlRepository {
    controls: Arc<RwLock<HashMap<ExecutionId, ExecutionControl>>>,
}

impl InMemoryExecutionControlRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionControlRepository for InMemoryExecutionControlRepository {
    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionControl>, RepositoryError> {
        Ok(self.controls.read().get(&execution_id).cloned())
    }

    async fn save_state(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.controls
            .write()
            .entry(control.execution_id)
            .and_modify(|stored| {
                stored.state = control.state;
                stored.state_reason = control.state_reason.clone();
                stored.last_state_change = control.last_state_change;
                if control.state == ControlState::Cancelled {
                    stored.injected_instruction = None;
                }
            })
            .or_insert_with(|| control.clone());
        Ok(())
    }

    async fn set_instruction(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.controls
            .write()
            .entry(control.execution_id)
            .and_modify(|stored| {
                if !stored.state.is_terminal() {
                    stored.injected_instruction = control.injected_instruction.clone();
                }
            })
            .or_insert_with(|| control.clone());
        Ok(())
    }

    async fn save_checkpoint(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.controls
            .write()
            .entry(control.execution_id)
            .and_modify(|stored| stored.checkpoint = control.checkpoint.clone())
            .or_insert_with(|| control.clone());
        Ok(())
    }

    async fn take_instruction(&self, execution_id: ExecutionId) -> Result<Option<String>, RepositoryError> {
        Ok(self
            .controls
            .write()
            .get_mut(&execution_id)
            .and_then(|c| c.take_instruction()))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryApprovalRepository {
    approvals: Arc<RwLock<HashMap<ApprovalId, ActionApproval>>>,
}

impl InMemoryApprovalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert(&self, approval: &ActionApproval) -> Result<(), RepositoryError> {
        let mut approvals = self.approvals.write();
        if approvals.contains_key(&approval.id) {
            return Err(RepositoryError::Conflict(format!("approval {} already exists", approval.id)));
        }
        approvals.insert(approval.id, approval.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<ActionApproval>, RepositoryError> {
        Ok(self.approvals.read().get(&id).cloned())
    }

    async fn resolve_pending(&self, approval: &ActionApproval) -> Result<bool, RepositoryError> {
        let mut approvals = self.approvals.write();
        let stored = approvals
            .get_mut(&approval.id)
            .ok_or_else(|| RepositoryError::NotFound(format!("approval {}", approval.id)))?;
        if !stored.is_pending() {
            return Ok(false);
        }
        stored.status = approval.status;
        stored.responded_at = approval.responded_at;
        stored.response_note = approval.response_note.clone();
        Ok(true)
    }

    async fn find_pending_by_user(&self, user_id: UserId) -> Result<Vec<ActionApproval>, RepositoryError> {
        let approvals = self.approvals.read();
        let mut pending: Vec<ActionApproval> = approvals
            .values()
            .filter(|a| a.user_id == user_id && a.is_pending())
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Vec<ActionApproval>, RepositoryError> {
        let approvals = self.approvals.read();
        let mut found: Vec<ActionApproval> = approvals
            .values()
            .filter(|a| a.execution_id == execution_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn count_by_status(&self, execution_id: ExecutionId, status: ApprovalStatus) -> Result<usize, RepositoryError> {
        Ok(self
            .approvals
            .read()
            .values()
            .filter(|a| a.execution_id == execution_id && a.status == status)
            .count())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBrowserContextRepository {
    contexts: Arc<RwLock<HashMap<ContextId, BrowserContext>>>,
}

impl InMemoryBrowserContextRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrowserContextRepository for InMemoryBrowserContextRepository {
    async fn find_active(&self, user_id: UserId, client_id: ClientId) -> Result<Option<BrowserContext>, RepositoryError> {
        Ok(self
            .contexts
            .read()
            .values()
            .find(|c| c.user_id == user_id && c.client_id == client_id && c.is_active())
            .cloned())
    }

    async fn find_by_id(&self, id: ContextId) -> Result<Option<BrowserContext>, RepositoryError> {
        Ok(self.contexts.read().get(&id).cloned())
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<BrowserContext>, RepositoryError> {
        let mut found: Vec<BrowserContext> = self
            .contexts
            .read()
            .values()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(found)
    }

    async fn insert(&self, context: &BrowserContext) -> Result<(), RepositoryError> {
        let mut contexts = self.contexts.write();
        let duplicate = contexts
            .values()
            .any(|c| c.user_id == context.user_id && c.client_id == context.client_id && c.is_active());
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "active context already exists for user {} client {}",
                context.user_id, context.client_id
            )));
        }
        contexts.insert(context.id, context.clone());
        Ok(())
    }

    async fn touch(&self, id: ContextId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(context) = self.contexts.write().get_mut(&id) {
            context.last_used_at = at;
        }
        Ok(())
    }

    async fn increment_sessions(&self, id: ContextId) -> Result<u32, RepositoryError> {
        let mut contexts = self.contexts.write();
        match contexts.get_mut(&id) {
            Some(context) if context.is_active() => {
                context.active_session_count += 1;
                context.last_used_at = Utc::now();
                Ok(context.active_session_count)
            }
            _ => Err(RepositoryError::NotFound(format!("active context {}", id))),
        }
    }

    async fn decrement_sessions(&self, id: ContextId) -> Result<u32, RepositoryError> {
        let mut contexts = self.contexts.write();
        let context = contexts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("context {}", id)))?;
        context.active_session_count = context.active_session_count.saturating_sub(1);
        context.last_used_at = Utc::now();
        Ok(context.active_session_count)
    }

    async fn update_storage(
        &self,
        id: ContextId,
        storage: &EncryptedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut contexts = self.contexts.write();
        let context = contexts
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("context {}", id)))?;
        context.storage = Some(storage.clone());
        context.last_used_at = at;
        Ok(())
    }

    async fn deactivate_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextId>, RepositoryError> {
        let now = Utc::now();
        let mut deactivated = Vec::new();
        for context in self.contexts.write().values_mut() {
            if context.is_reclaimable(cutoff) {
                context.status = ContextStatus::Inactive { deactivated_at: now };
                deactivated.push(context.id);
            }
        }
        Ok(deactivated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::browser_context::IsolationLevel;
    use chrono::Duration;

    #[tokio::test]
    async fn test_decrement_floors_at_zero() {
        let repo = InMemoryBrowserContextRepository::new();
        let ctx = BrowserContext::new(UserId(1), ClientId(2), IsolationLevel::Strict, 30);
        repo.insert(&ctx).await.unwrap();

        assert_eq!(repo.increment_sessions(ctx.id).await.unwrap(), 1);
        assert_eq!(repo.decrement_sessions(ctx.id).await.unwrap(), 0);
        assert_eq!(repo.decrement_sessions(ctx.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_active_context_conflicts() {
        let repo = InMemoryBrowserContextRepository::new();
        repo.insert(&BrowserContext::new(UserId(1), ClientId(2), IsolationLevel::Strict, 30))
            .await
            .unwrap();
        let err = repo
            .insert(&BrowserContext::new(UserId(1), ClientId(2), IsolationLevel::Standard, 30))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
        repo.insert(&BrowserContext::new(UserId(1), ClientId(3), IsolationLevel::Strict, 30))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deactivate_idle_skips_live_sessions() {
        let repo = InMemoryBrowserContextRepository::new();
        let mut idle = BrowserContext::new(UserId(1), ClientId(1), IsolationLevel::Strict, 30);
        idle.last_used_at = Utc::now() - Duration::days(40);
        let mut busy = BrowserContext::new(UserId(1), ClientId(2), IsolationLevel::Strict, 30);
        busy.last_used_at = Utc::now() - Duration::days(40);
        busy.active_session_count = 1;
        repo.insert(&idle).await.unwrap();
        repo.insert(&busy).await.unwrap();

        let ids = repo.deactivate_idle(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(ids, vec![idle.id]);
        assert!(!repo.find_by_id(idle.id).await.unwrap().unwrap().is_active());
        assert!(repo.find_by_id(busy.id).await.unwrap().unwrap().is_active());
    }

    #[tokio::test]
    async fn test_take_instruction_is_one_shot() {
        let repo = InMemoryExecutionControlRepository::new();
        let mut control = ExecutionControl::new(ExecutionId(42), UserId(1));
        control.inject_instruction("switch to the staging account").unwrap();
        repo.set_instruction(&control).await.unwrap();

        assert_eq!(
            repo.take_instruction(ExecutionId(42)).await.unwrap().as_deref(),
            Some("switch to the staging account")
        );
        assert_eq!(repo.take_instruction(ExecutionId(42)).await.unwrap(), None);
        assert_eq!(repo.take_instruction(ExecutionId(7)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_state_write_keeps_other_columns() {
        let repo = InMemoryExecutionControlRepository::new();
        let mut control = ExecutionControl::new(ExecutionId(42), UserId(1));
        control.inject_instruction("use the backup card").unwrap();
        repo.set_instruction(&control).await.unwrap();

        let mut stale = repo.find_by_execution(ExecutionId(42)).await.unwrap().unwrap();
        repo.take_instruction(ExecutionId(42)).await.unwrap();
        stale.pause("review").unwrap();
        repo.save_state(&stale).await.unwrap();

        let stored = repo.find_by_execution(ExecutionId(42)).await.unwrap().unwrap();
        assert_eq!(stored.state, ControlState::Paused);
        assert_eq!(stored.injected_instruction, None);
    }

    #[tokio::test]
    async fn test_audit_queries_newest_first() {
        let repo = InMemoryAuditLogRepository::new();
        for action in ["credential.store", "credential.retrieve", "credential.delete"] {
            repo.append(&AuditLogEntry::success(
                UserId(1),
                action,
                ResourceType::Credential,
                "c1",
                serde_json::Value::Null,
            ))
            .await
            .unwrap();
        }
        let rows = repo.find_by_resource(ResourceType::Credential, "c1", 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "credential.delete");
        assert!(repo.find_by_user(UserId(2), 10).await.unwrap().is_empty());
    }
}
