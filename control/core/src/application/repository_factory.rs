// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Picks concrete repository implementations for the configured storage
//! backend. The domain only sees the traits.

use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::error::ControlPlaneError;
use crate::domain::repository::{
    ApprovalRepository, AuditLogRepository, BrowserContextRepository, CredentialRepository,
    ExecutionControlRepository, ExecutionRepository, StorageBackend,
};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::{
    InMemoryApprovalRepository, InMemoryAuditLogRepository, InMemoryBrowserContextRepository,
    InMemoryCredentialRepository, InMemoryExecutionControlRepository, InMemoryExecutionRepository,
    PostgresApprovalRepository, PostgresAuditLogRepository, PostgresBrowserContextRepository,
    PostgresCredentialRepository, PostgresExecutionControlRepository, PostgresExecutionRepository,
};

/// One handle per persisted collection.
#[derive(Clone)]
pub struct Repositories {
    pub audit: Arc<dyn AuditLogRepository>,
    pub credentials: Arc<dyn CredentialRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub controls: Arc<dyn ExecutionControlRepository>,
    pub approvals: Arc<dyn ApprovalRepository>,
    pub contexts: Arc<dyn BrowserContextRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            audit: Arc::new(InMemoryAuditLogRepository::new()),
            credentials: Arc::new(InMemoryCredentialRepository::new()),
            executions: Arc::new(InMemoryExecutionRepository::new()),
            controls: Arc::new(InMemoryExecutionControlRepository::new()),
            approvals: Arc::new(InMemoryApprovalRepository::new()),
            contexts: Arc::new(InMemoryBrowserContextRepository::new()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            audit: Arc::new(PostgresAuditLogRepository::new(pool.clone())),
            credentials: Arc::new(PostgresCredentialRepository::new(pool.clone())),
            executions: Arc::new(PostgresExecutionRepository::new(pool.clone())),
            controls: Arc::new(PostgresExecutionControlRepository::new(pool.clone())),
            approvals: Arc::new(PostgresApprovalRepository::new(pool.clone())),
            contexts: Arc::new(PostgresBrowserContextRepository::new(pool)),
        }
    }
}

/// Build the repository set for `backend`, connecting to Postgres when
/// selected. The returned [`Database`] is `None` for in-memory storage.
pub async fn create_repositories(backend: &StorageBackend) -> Result<(Repositories, Option<Database>), ControlPlaneError> {
    match backend {
        StorageBackend::InMemory => Ok((Repositories::in_memory(), None)),
        StorageBackend::PostgreSQL(config) => {
            let database = Database::connect(config)
                .await
                .map_err(|e| ControlPlaneError::DownstreamUnavailable(format!("postgres connection failed: {}", e)))?;
            let repositories = Repositories::postgres(database.get_pool().clone());
            Ok((repositories, Some(database)))
        }
    }
}
