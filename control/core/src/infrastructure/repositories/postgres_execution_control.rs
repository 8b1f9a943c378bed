// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::checkpoint::Checkpoint;
use crate::domain::execution_control::{ControlState, ExecutionControl};
use crate::domain::identity::{ExecutionId, UserId};
use crate::domain::repository::{ExecutionControlRepository, RepositoryError};

pub struct PostgresExecutionControlRepository {
    pool: PgPool,
}

impl PostgresExecutionControlRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the full row; `on_conflict` decides which columns an existing
    /// row takes from it.
    async fn upsert(&self, control: &ExecutionControl, on_conflict: &str) -> Result<(), RepositoryError> {
        let checkpoint = control.checkpoint.as_ref().map(serde_json::to_value).transpose()?;

        let sql = format!(
            r#"
            INSERT INTO execution_controls (
                execution_id, user_id, state, state_reason, injected_instruction,
                checkpoint, last_state_change, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            {}
            "#,
            on_conflict
        );

        sqlx::query(&sql)
            .bind(control.execution_id.0)
            .bind(control.user_id.0)
            .bind(control.state.as_str())
            .bind(&control.state_reason)
            .bind(&control.injected_instruction)
            .bind(checkpoint)
            .bind(control.last_state_change)
            .bind(control.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to save execution control: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl ExecutionControlRepository for PostgresExecutionControlRepository {
    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Option<ExecutionControl>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT execution_id, user_id, state, state_reason, injected_instruction,
                   checkpoint, last_state_change, created_at
            FROM execution_controls
            WHERE execution_id = $1
            "#,
        )
        .bind(execution_id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let state: String = row.get("state");
        let state = ControlState::parse(&state)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown control state: {}", state)))?;

        let checkpoint: Option<serde_json::Value> = row.get("checkpoint");
        let checkpoint = checkpoint.map(serde_json::from_value::<Checkpoint>).transpose()?;

        Ok(Some(ExecutionControl {
            execution_id: ExecutionId(row.get("execution_id")),
            user_id: UserId(row.get("user_id")),
            state,
            state_reason: row.get("state_reason"),
            injected_instruction: row.get("injected_instruction"),
            checkpoint,
            last_state_change: row.get("last_state_change"),
            created_at: row.get("created_at"),
        }))
    }

    async fn save_state(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.upsert(
            control,
            r#"
            ON CONFLICT (execution_id) DO UPDATE SET
                state = EXCLUDED.state,
                state_reason = EXCLUDED.state_reason,
                last_state_change = EXCLUDED.last_state_change,
                injected_instruction = CASE
                    WHEN EXCLUDED.state = 'cancelled' THEN NULL
                    ELSE execution_controls.injected_instruction
                END
            "#,
        )
        .await
    }

    async fn set_instruction(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.upsert(
            control,
            r#"
            ON CONFLICT (execution_id) DO UPDATE SET
                injected_instruction = EXCLUDED.injected_instruction
            WHERE execution_controls.state <> 'cancelled'
            "#,
        )
        .await
    }

    async fn save_checkpoint(&self, control: &ExecutionControl) -> Result<(), RepositoryError> {
        self.upsert(
            control,
            r#"
            ON CONFLICT (execution_id) DO UPDATE SET
                checkpoint = EXCLUDED.checkpoint
            "#,
        )
        .await
    }

    async fn take_instruction(&self, execution_id: ExecutionId) -> Result<Option<String>, RepositoryError> {
        // Lock, read and clear in one statement so two iterations never see
        // the same instruction.
        let row = sqlx::query(
            r#"
            WITH taken AS (
                SELECT execution_id, injected_instruction
                FROM execution_controls
                WHERE execution_id = $1 AND injected_instruction IS NOT NULL
                FOR UPDATE
            )
            UPDATE execution_controls c
            SET injected_instruction = NULL
            FROM taken
            WHERE c.execution_id = taken.execution_id
            RETURNING taken.injected_instruction
            "#,
        )
        .bind(execution_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.get("injected_instruction")))
    }
}
