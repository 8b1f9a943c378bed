// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use agentgate_core::application::{ControlPlane, Repositories};
use agentgate_core::domain::audit::{AuditLogEntry, ResourceType};
use agentgate_core::domain::config::ControlPlaneSpec;
use agentgate_core::domain::execution::Execution;
use agentgate_core::domain::execution_control::ExecutionControl;
use agentgate_core::domain::identity::{ExecutionId, UserId};
use agentgate_core::domain::notification::Notifier;
use agentgate_core::domain::repository::{
    AuditLogRepository, ExecutionControlRepository, ExecutionRepository, RepositoryError,
};
use agentgate_core::infrastructure::repositories::{
    InMemoryApprovalRepository, InMemoryAuditLogRepository, InMemoryBrowserContextRepository,
    InMemoryCredentialRepository, InMemoryExecutionControlRepository, InMemoryExecutionRepository,
};
use agentgate_core::infrastructure::{AesGcmCipher, EventBus, MasterKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Captures every notification for assertions.
#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<(UserId, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: UserId, message: &str) {
        self.messages.lock().push((user_id, message.to_string()));
    }
}

/// Audit sink that is always down.
pub struct FailingAuditLogRepository;

#[async_trait]
impl AuditLogRepository for FailingAuditLogRepository {
    async fn append(&self, _entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        Err(RepositoryError::Database("audit store unreachable".to_string()))
    }

    async fn find_by_resource(
        &self,
        _resource_type: ResourceType,
        _resource_id: &str,
        _limit: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        Ok(Vec::new())
    }

    async fn find_by_user(&self, _user_id: UserId, _limit: usize) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        Ok(Vec::new())
    }
}

/// Control store whose reads lag, widening the window between a service's
/// load and its write.
pub struct SlowReadControlRepository {
    pub inner: InMemoryExecutionControlRepository,
    pub delay: Duration,
}

#[async_trait]
impl ExecutionControlRepository for SlowReadControlRepository {
    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionControl>, RepositoryError> {
        let control = self.inner.find_by_execution(execution_id).await?;
        tokio::time::sleep(self.delay).await;
        Ok(control)
    }

    async fn save_state(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.inner.save_state(control).await
    }

    async fn set_instruction(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.inner.set_instruction(control).await
    }

    async fn save_checkpoint(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.inner.save_checkpoint(control).await
    }

    async fn take_instruction(&self, execution_id: ExecutionId) -> Result<Option<String>, RepositoryError> {
        self.inner.take_instruction(execution_id).await
    }
}

pub struct Harness {
    pub plane: ControlPlane,
    pub audit_log: InMemoryAuditLogRepository,
    pub credentials: InMemoryCredentialRepository,
    pub executions: InMemoryExecutionRepository,
    pub controls: InMemoryExecutionControlRepository,
    pub approvals: InMemoryApprovalRepository,
    pub contexts: InMemoryBrowserContextRepository,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_spec(ControlPlaneSpec::default())
    }

    pub fn with_spec(spec: ControlPlaneSpec) -> Self {
        Self::build(spec, None, None)
    }

    pub fn with_failing_audit() -> Self {
        Self::build(ControlPlaneSpec::default(), Some(Arc::new(FailingAuditLogRepository)), None)
    }

    /// Control-row reads sleep for `delay` before returning.
    pub fn with_slow_control_reads(delay: Duration) -> Self {
        Self::build(ControlPlaneSpec::default(), None, Some(delay))
    }

    fn build(
        spec: ControlPlaneSpec,
        audit_override: Option<Arc<dyn AuditLogRepository>>,
        control_read_delay: Option<Duration>,
    ) -> Self {
        let audit_log = InMemoryAuditLogRepository::new();
        let credentials = InMemoryCredentialRepository::new();
        let executions = InMemoryExecutionRepository::new();
        let controls = InMemoryExecutionControlRepository::new();
        let control_store: Arc<dyn ExecutionControlRepository> = match control_read_delay {
            Some(delay) => Arc::new(SlowReadControlRepository {
                inner: controls.clone(),
                delay,
            }),
            None => Arc::new(controls.clone()),
        };
        let approvals = InMemoryApprovalRepository::new();
        let contexts = InMemoryBrowserContextRepository::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let repositories = Repositories {
            audit: audit_override.unwrap_or_else(|| Arc::new(audit_log.clone())),
            credentials: Arc::new(credentials.clone()),
            executions: Arc::new(executions.clone()),
            controls: control_store,
            approvals: Arc::new(approvals.clone()),
            contexts: Arc::new(contexts.clone()),
        };
        let cipher = Arc::new(AesGcmCipher::new(&MasterKey::generate()));
        let plane = ControlPlane::new(&spec, repositories, cipher, notifier.clone(), EventBus::with_default_capacity());

        Self {
            plane,
            audit_log,
            credentials,
            executions,
            controls,
            approvals,
            contexts,
            notifier,
        }
    }

    /// Record an execution owned by `user` the way the host platform would.
    pub async fn start_execution(&self, execution: i64, user: i64) -> ExecutionId {
        let id = ExecutionId(execution);
        self.plane
            .executions
            .save(&Execution::new(id, UserId(user)))
            .await
            .expect("register execution");
        id
    }

    pub fn audit_actions(&self) -> Vec<(String, bool)> {
        self.audit_log
            .entries()
            .into_iter()
            .map(|e| (e.action, e.success))
            .collect()
    }
}
