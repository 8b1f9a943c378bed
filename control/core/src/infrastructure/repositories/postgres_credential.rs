// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

use crate::domain::credential::{Credential, CredentialId, CredentialStatus, CredentialType};
use crate::domain::crypto::EncryptedPayload;
use crate::domain::identity::UserId;
use crate::domain::repository::{CredentialRepository, RepositoryError};

const COLUMNS: &str = r#"
    id, user_id, name, service, credential_type, encrypted_data, iv, auth_tag,
    metadata, masked_hint, fingerprint, is_active, retired_at, last_used_at,
    created_at, updated_at
"#;

pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn from_row(row: PgRow) -> Result<Credential, RepositoryError> {
        let credential_type: String = row.get("credential_type");
        let credential_type = CredentialType::parse(&credential_type)
            .ok_or_else(|| RepositoryError::Serialization(format!("unknown credential type: {}", credential_type)))?;

        let is_active: bool = row.get("is_active");
        let retired_at: Option<DateTime<Utc>> = row.get("retired_at");
        let updated_at: DateTime<Utc> = row.get("updated_at");
        let status = if is_active {
            CredentialStatus::Active
        } else {
            CredentialStatus::Retired {
                retired_at: retired_at.unwrap_or(updated_at),
            }
        };

        Ok(Credential {
            id: CredentialId(row.get("id")),
            user_id: UserId(row.get("user_id")),
            name: row.get("name"),
            service: row.get("service"),
            credential_type,
            payload: EncryptedPayload {
                iv: row.get("iv"),
                auth_tag: row.get("auth_tag"),
                ciphertext: row.get("encrypted_data"),
            },
            metadata: row.get("metadata"),
            masked_hint: row.get("masked_hint"),
            fingerprint: row.get("fingerprint"),
            status,
            last_used_at: row.get("last_used_at"),
            created_at: row.get("created_at"),
            updated_at,
        })
    }
}

fn retired_at(status: &CredentialStatus) -> Option<DateTime<Utc>> {
    match status {
        CredentialStatus::Active => None,
        CredentialStatus::Retired { retired_at } => Some(*retired_at),
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn insert(&self, credential: &Credential) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (
                id, user_id, name, service, credential_type, encrypted_data, iv, auth_tag,
                metadata, masked_hint, fingerprint, is_active, retired_at, last_used_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(credential.id.0)
        .bind(credential.user_id.0)
        .bind(&credential.name)
        .bind(&credential.service)
        .bind(credential.credential_type.as_str())
        .bind(&credential.payload.ciphertext)
        .bind(&credential.payload.iv)
        .bind(&credential.payload.auth_tag)
        .bind(&credential.metadata)
        .bind(&credential.masked_hint)
        .bind(&credential.fingerprint)
        .bind(credential.is_active())
        .bind(retired_at(&credential.status))
        .bind(credential.last_used_at)
        .bind(credential.created_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, credential: &Credential) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE credentials SET
                name = $2,
                encrypted_data = $3,
                iv = $4,
                auth_tag = $5,
                metadata = $6,
                masked_hint = $7,
                fingerprint = $8,
                is_active = $9,
                retired_at = $10,
                last_used_at = $11,
                updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(credential.id.0)
        .bind(&credential.name)
        .bind(&credential.payload.ciphertext)
        .bind(&credential.payload.iv)
        .bind(&credential.payload.auth_tag)
        .bind(&credential.metadata)
        .bind(&credential.masked_hint)
        .bind(&credential.fingerprint)
        .bind(credential.is_active())
        .bind(retired_at(&credential.status))
        .bind(credential.last_used_at)
        .bind(credential.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("credential {}", credential.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: CredentialId) -> Result<Option<Credential>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM credentials WHERE id = $1", COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::from_row).transpose()
    }

    async fn find_active_by_user(
        &self,
        user_id: UserId,
        service: Option<&str>,
    ) -> Result<Vec<Credential>, RepositoryError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM credentials
            WHERE user_id = $1 AND is_active AND ($2::TEXT IS NULL OR service = $2)
            ORDER BY created_at DESC
            "#,
            COLUMNS
        ))
        .bind(user_id.0)
        .bind(service)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::from_row).collect()
    }

    async fn touch(&self, id: CredentialId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE credentials SET last_used_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
