// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::approval::{
    ActionApproval, ApprovalId, ApprovalStatus, ProposedAction, RiskLevel, TimeoutAction,
};
use crate::domain::identity::{ExecutionId, UserId};
use crate::domain::repository::{ApprovalRepository, RepositoryError};

const COLUMNS: &str = r#"
    id, execution_id, user_id, action_type, action_description, action_params,
    risk_level, risk_factors, screenshot_url, status, expires_at, timeout_action,
    created_at, responded_at, response_note
"#;

pub struct PostgresApprovalRepository {
    pool: PgPool,
}

impl PostgresApprovalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: PgRow) -> Result<ActionApproval, RepositoryError> {
        let risk_level: String = row.get("risk_level");
        let risk_level = RiskLevel::parse(&risk_level)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown risk level: {}", risk_level)))?;

        let status: String = row.get("status");
        let status = ApprovalStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown approval status: {}", status)))?;

        let timeout_action: String = row.get("timeout_action");
        let timeout_action = TimeoutAction::parse(&timeout_action)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown timeout action: {}", timeout_action)))?;

        let risk_factors: serde_json::Value = row.get("risk_factors");
        let risk_factors: Vec<String> = serde_json::from_value(risk_factors)?;

        Ok(ActionApproval {
            id: ApprovalId(row.get("id")),
            execution_id: ExecutionId(row.get("execution_id")),
            user_id: UserId(row.get("user_id")),
            action: ProposedAction {
                action_type: row.get("action_type"),
                description: row.get("action_description"),
                params: row.get("action_params"),
            },
            risk_level,
            risk_factors,
            screenshot_url: row.get("screenshot_url"),
            status,
            expires_at: row.get("expires_at"),
            timeout_action,
            created_at: row.get("created_at"),
            responded_at: row.get("responded_at"),
            response_note: row.get("response_note"),
        })
    }
}

#[async_trait]
impl ApprovalRepository for PostgresApprovalRepository {
    async fn insert(&self, approval: &ActionApproval) -> Result<(), RepositoryError> {
        let risk_factors = serde_json::to_value(&approval.risk_factors)?;

        sqlx::query(
            r#"
            INSERT INTO action_approvals (
                id, execution_id, user_id, action_type, action_description, action_params,
                risk_level, risk_factors, screenshot_url, status, expires_at, timeout_action,
                created_at, responded_at, response_note
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(approval.id.0)
        .bind(approval.execution_id.0)
        .bind(approval.user_id.0)
        .bind(&approval.action.action_type)
        .bind(&approval.action.description)
        .bind(&approval.action.params)
        .bind(approval.risk_level.as_str())
        .bind(risk_factors)
        .bind(&approval.screenshot_url)
        .bind(approval.status.as_str())
        .bind(approval.expires_at)
        .bind(approval.timeout_action.as_str())
        .bind(approval.created_at)
        .bind(approval.responded_at)
        .bind(&approval.response_note)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: ApprovalId) -> Result<Option<ActionApproval>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM action_approvals WHERE id = $1", COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::from_row).transpose()
    }

    async fn resolve_pending(&self, approval: &ActionApproval) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE action_approvals
            SET status = $2, responded_at = $3, response_note = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(approval.id.0)
        .bind(approval.status.as_str())
        .bind(approval.responded_at)
        .bind(&approval.response_note)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_pending_by_user(&self, user_id: UserId) -> Result<Vec<ActionApproval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM action_approvals WHERE user_id = $1 AND status = 'pending' ORDER BY created_at ASC",
            COLUMNS
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn find_by_execution(&self, execution_id: ExecutionId) -> Result<Vec<ActionApproval>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM action_approvals WHERE execution_id = $1 ORDER BY created_at ASC",
            COLUMNS
        ))
        .bind(execution_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn count_by_status(&self, execution_id: ExecutionId, status: ApprovalStatus) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM action_approvals WHERE execution_id = $1 AND status = $2",
        )
        .bind(execution_id.0)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count as usize)
    }
}
