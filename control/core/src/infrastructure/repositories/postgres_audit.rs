// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::identity::UserId;
use crate::domain::repository::{AuditLogRepository, RepositoryError};

pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: PgRow) -> Result<AuditLogEntry, RepositoryError> {
        let resource_type: String = row.get("resource_type");
        let resource_type = ResourceType::parse(&resource_type)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown resource type: {}", resource_type)))?;

        Ok(AuditLogEntry {
            timestamp: row.get("timestamp"),
            user_id: UserId(row.get("user_id")),
            action: row.get("action"),
            resource_type,
            resource_id: row.get("resource_id"),
            details: row.get("details"),
            success: row.get("success"),
            error_message: row.get("error_message"),
        })
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                timestamp, user_id, action, resource_type, resource_id,
                details, success, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.timestamp)
        .bind(entry.user_id.0)
        .bind(&entry.action)
        .bind(entry.resource_type.as_str())
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.success)
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_resource(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        limit: usize,
    ) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, user_id, action, resource_type, resource_id, details, success, error_message
            FROM audit_logs
            WHERE resource_type = $1 AND resource_id = $2
            ORDER BY timestamp DESC, id DESC
            LIMIT $3
            "#,
        )
        .bind(resource_type.as_str())
        .bind(resource_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn find_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<AuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT timestamp, user_id, action, resource_type, resource_id, details, success, error_message
            FROM audit_logs
            WHERE user_id = $1
            ORDER BY timestamp DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.0)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }
}
