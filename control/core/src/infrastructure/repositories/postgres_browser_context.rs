// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::browser_context::{BrowserContext, ContextId, ContextStatus, IsolationLevel};
use crate::domain::crypto::EncryptedPayload;
use crate::domain::identity::{ClientId, UserId};
use crate::domain::repository::{BrowserContextRepository, RepositoryError};

const COLUMNS: &str = r#"
    id, user_id, client_id, isolation_level, active_session_count,
    storage_encrypted, storage_iv, storage_auth_tag, is_active, deactivated_at,
    last_used_at, expires_at, created_at
"#;

pub struct PostgresBrowserContextRepository {
    pool: PgPool,
}

impl PostgresBrowserContextRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: PgRow) -> Result<BrowserContext, RepositoryError> {
        let isolation_level: String = row.get("isolation_level");
        let isolation_level = IsolationLevel::parse(&isolation_level)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown isolation level: {}", isolation_level)))?;

        let ciphertext: Option<Vec<u8>> = row.get("storage_encrypted");
        let iv: Option<Vec<u8>> = row.get("storage_iv");
        let auth_tag: Option<Vec<u8>> = row.get("storage_auth_tag");
        let storage = match (ciphertext, iv, auth_tag) {
            (Some(ciphertext), Some(iv), Some(auth_tag)) => Some(EncryptedPayload { iv, auth_tag, ciphertext }),
            _ => None,
        };

        let is_active: bool = row.get("is_active");
        let deactivated_at: Option<DateTime<Utc>> = row.get("deactivated_at");
        let last_used_at: DateTime<Utc> = row.get("last_used_at");
        let status = if is_active {
            ContextStatus::Active
        } else {
            ContextStatus::Inactive {
                deactivated_at: deactivated_at.unwrap_or(last_used_at),
            }
        };

        let sessions: i32 = row.get("active_session_count");

        Ok(BrowserContext {
            id: ContextId(row.get("id")),
            user_id: UserId(row.get("user_id")),
            client_id: ClientId(row.get("client_id")),
            isolation_level,
            active_session_count: sessions.max(0) as u32,
            storage,
            status,
            last_used_at,
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl BrowserContextRepository for PostgresBrowserContextRepository {
    async fn find_active(&self, user_id: UserId, client_id: ClientId) -> Result<Option<BrowserContext>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM browser_contexts WHERE user_id = $1 AND client_id = $2 AND is_active",
            COLUMNS
        ))
        .bind(user_id.0)
        .bind(client_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::from_row).transpose()
    }

    async fn find_by_id(&self, id: ContextId) -> Result<Option<BrowserContext>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM browser_contexts WHERE id = $1", COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::from_row).transpose()
    }

    async fn find_by_user(&self, user_id: UserId) -> Result<Vec<BrowserContext>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM browser_contexts WHERE user_id = $1 ORDER BY last_used_at DESC",
            COLUMNS
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn insert(&self, context: &BrowserContext) -> Result<(), RepositoryError> {
        // The partial unique index on (user_id, client_id) WHERE is_active
        // turns a racing second insert into a Conflict.
        sqlx::query(
            r#"
            INSERT INTO browser_contexts (
                id, user_id, client_id, isolation_level, active_session_count,
                is_active, last_used_at, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, $7, $8)
            "#,
        )
        .bind(context.id.0)
        .bind(context.user_id.0)
        .bind(context.client_id.0)
        .bind(context.isolation_level.as_str())
        .bind(context.active_session_count as i32)
        .bind(context.last_used_at)
        .bind(context.expires_at)
        .bind(context.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn touch(&self, id: ContextId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE browser_contexts SET last_used_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn increment_sessions(&self, id: ContextId) -> Result<u32, RepositoryError> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE browser_contexts
            SET active_session_count = active_session_count + 1, last_used_at = NOW()
            WHERE id = $1 AND is_active
            RETURNING active_session_count
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        count
            .map(|c| c as u32)
            .ok_or_else(|| RepositoryError::NotFound(format!("active context {}", id)))
    }

    async fn decrement_sessions(&self, id: ContextId) -> Result<u32, RepositoryError> {
        let count: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE browser_contexts
            SET active_session_count = GREATEST(active_session_count - 1, 0), last_used_at = NOW()
            WHERE id = $1
            RETURNING active_session_count
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        count
            .map(|c| c as u32)
            .ok_or_else(|| RepositoryError::NotFound(format!("context {}", id)))
    }

    async fn update_storage(
        &self,
        id: ContextId,
        storage: &EncryptedPayload,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE browser_contexts
            SET storage_encrypted = $2, storage_iv = $3, storage_auth_tag = $4, last_used_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(&storage.ciphertext)
        .bind(&storage.iv)
        .bind(&storage.auth_tag)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("context {}", id)));
        }
        Ok(())
    }

    async fn deactivate_idle(&self, cutoff: DateTime<Utc>) -> Result<Vec<ContextId>, RepositoryError> {
        let ids: Vec<uuid::Uuid> = sqlx::query_scalar(
            r#"
            UPDATE browser_contexts
            SET is_active = FALSE, deactivated_at = NOW()
            WHERE is_active AND active_session_count = 0 AND last_used_at <= $1
            RETURNING id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(ContextId).collect())
    }
}
