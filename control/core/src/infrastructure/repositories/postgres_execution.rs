// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::execution::{Execution, ExecutionStatus};
use crate::domain::identity::{ExecutionId, UserId};
use crate::domain::repository::{ExecutionRepository, RepositoryError};

pub struct PostgresExecutionRepository {
    pool: PgPool,
}

impl PostgresExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionRepository for PostgresExecutionRepository {
    async fn save(&self, execution: &Execution) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO executions (id, user_id, status, started_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(execution.id.0)
        .bind(execution.user_id.0)
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save execution: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, status, started_at, updated_at
            FROM executions
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        let status = ExecutionStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown execution status: {}", status)))?;

        Ok(Some(Execution {
            id: ExecutionId(row.get("id")),
            user_id: UserId(row.get("user_id")),
            status,
            started_at: row.get("started_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn update_status(&self, id: ExecutionId, status: ExecutionStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE executions SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("execution {}", id)));
        }
        Ok(())
    }
}
