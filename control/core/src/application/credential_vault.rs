// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential Vault - Application Layer
//!
//! Encrypts, stores, lists, rotates and retires user-owned secrets.
//!
//! Every public call writes exactly one audit row, success or failure. Audit
//! details only ever carry masked hints and fingerprints. Decryption failures
//! are surfaced, audited and counted: they are treated as possible tampering.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::application::audit::AuditLogger;
use crate::domain::audit::{AuditLogEntry, ResourceType};
use crate::domain::credential::{
    Credential, CredentialId, CredentialSecret, CredentialStatus, CredentialSummary, CredentialUpdate,
    DecryptedCredential, NewCredential,
};
use crate::domain::crypto::{fingerprint, CipherError, EncryptedPayload, EnvelopeCipher};
use crate::domain::error::ControlPlaneError;
use crate::domain::identity::UserId;
use crate::domain::repository::CredentialRepository;

#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn store(&self, user_id: UserId, input: NewCredential) -> Result<CredentialId, ControlPlaneError>;

    /// Decrypt a credential the caller owns. Missing and foreign ids both
    /// yield `AccessDenied`.
    async fn retrieve(&self, user_id: UserId, id: CredentialId) -> Result<DecryptedCredential, ControlPlaneError>;

    /// Masked summaries of the caller's active credentials, newest first.
    async fn list(&self, user_id: UserId, service: Option<&str>) -> Result<Vec<CredentialSummary>, ControlPlaneError>;

    /// Soft delete: the row is retired and kept for audit.
    async fn delete(&self, user_id: UserId, id: CredentialId) -> Result<(), ControlPlaneError>;

    /// Replace the secret material under a fresh IV.
    async fn rotate(&self, user_id: UserId, id: CredentialId, data: CredentialSecret) -> Result<(), ControlPlaneError>;

    /// Change non-secret fields.
    async fn update(
        &self,
        user_id: UserId,
        id: CredentialId,
        update: CredentialUpdate,
    ) -> Result<CredentialSummary, ControlPlaneError>;
}

pub struct StandardCredentialVault {
    repository: Arc<dyn CredentialRepository>,
    cipher: Arc<dyn EnvelopeCipher>,
    audit: AuditLogger,
}

type Outcome<T> = Result<(T, Value), ControlPlaneError>;

impl StandardCredentialVault {
    pub fn new(repository: Arc<dyn CredentialRepository>, cipher: Arc<dyn EnvelopeCipher>, audit: AuditLogger) -> Self {
        Self {
            repository,
            cipher,
            audit,
        }
    }

    /// Write the single audit row for a call and hand back its result.
    async fn audited<T>(
        &self,
        user_id: UserId,
        action: &str,
        resource_id: String,
        outcome: Outcome<T>,
    ) -> Result<T, ControlPlaneError> {
        match outcome {
            Ok((value, details)) => {
                self.audit
                    .record(AuditLogEntry::success(user_id, action, ResourceType::Credential, resource_id, details))
                    .await;
                Ok(value)
            }
            Err(e) => {
                self.audit
                    .record(AuditLogEntry::failure(
                        user_id,
                        action,
                        ResourceType::Credential,
                        resource_id,
                        json!({ "error_code": e.code() }),
                        e.to_string(),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    /// Load a credential and enforce ownership. Absent and foreign rows are
    /// indistinguishable to the caller.
    async fn load_owned(&self, user_id: UserId, id: CredentialId) -> Result<Credential, ControlPlaneError> {
        match self.repository.find_by_id(id).await? {
            Some(credential) if credential.owned_by(user_id) => Ok(credential),
            _ => Err(ControlPlaneError::AccessDenied(format!(
                "credential {} not found or not owned by caller",
                id
            ))),
        }
    }

    async fn load_active(&self, user_id: UserId, id: CredentialId) -> Result<Credential, ControlPlaneError> {
        let credential = self.load_owned(user_id, id).await?;
        if !credential.is_active() {
            return Err(ControlPlaneError::NotFound(format!("credential {} has been deleted", id)));
        }
        Ok(credential)
    }

    fn seal(&self, id: CredentialId, user_id: UserId, data: &CredentialSecret) -> Result<Sealed, ControlPlaneError> {
        data.validate().map_err(ControlPlaneError::Validation)?;
        let plaintext =
            serde_json::to_vec(data).map_err(|e| ControlPlaneError::Validation(format!("unencodable secret: {}", e)))?;
        let payload = self
            .cipher
            .seal(&plaintext, &Credential::associated_data(id, user_id))
            .map_err(|e| ControlPlaneError::Configuration(e.to_string()))?;
        Ok(Sealed {
            payload,
            masked_hint: data.masked_hint(),
            fingerprint: fingerprint(&plaintext),
        })
    }

    fn open(&self, credential: &Credential) -> Result<CredentialSecret, ControlPlaneError> {
        let aad = Credential::associated_data(credential.id, credential.user_id);
        let decrypted = self
            .cipher
            .open(&credential.payload, &aad)
            .and_then(|plaintext| {
                serde_json::from_slice::<CredentialSecret>(&plaintext)
                    .map_err(|e| CipherError::Decryption(format!("malformed plaintext: {}", e)))
            });

        decrypted.map_err(|e| {
            metrics::counter!("agentgate_decryption_failures_total", "resource" => "credential").increment(1);
            error!(
                credential_id = %credential.id,
                user_id = %credential.user_id,
                "Credential decryption failed; ciphertext may have been tampered with"
            );
            ControlPlaneError::DecryptionFailure(e.to_string())
        })
    }

    async fn do_store(&self, user_id: UserId, id: CredentialId, input: NewCredential) -> Outcome<CredentialId> {
        if input.name.trim().is_empty() {
            return Err(ControlPlaneError::Validation("credential name cannot be empty".to_string()));
        }
        if input.service.trim().is_empty() {
            return Err(ControlPlaneError::Validation("credential service cannot be empty".to_string()));
        }

        let sealed = self.seal(id, user_id, &input.data)?;
        let now = Utc::now();
        let credential = Credential {
            id,
            user_id,
            name: input.name,
            service: input.service,
            credential_type: input.data.credential_type(),
            payload: sealed.payload,
            metadata: input.metadata,
            masked_hint: sealed.masked_hint,
            fingerprint: sealed.fingerprint,
            status: CredentialStatus::Active,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        self.repository.insert(&credential).await?;

        info!(credential_id = %id, user_id = %user_id, service = %credential.service, "Stored credential");
        let details = json!({
            "service": credential.service,
            "credential_type": credential.credential_type.as_str(),
            "masked_hint": credential.masked_hint,
            "fingerprint": credential.fingerprint,
        });
        Ok((id, details))
    }

    async fn do_retrieve(&self, user_id: UserId, id: CredentialId) -> Outcome<DecryptedCredential> {
        let credential = self.load_active(user_id, id).await?;
        let data = self.open(&credential)?;

        let now = Utc::now();
        self.repository.touch(id, now).await?;
        debug!(credential_id = %id, "Credential retrieved");

        let details = json!({ "service": credential.service, "fingerprint": credential.fingerprint });
        Ok((
            DecryptedCredential {
                id,
                name: credential.name,
                service: credential.service,
                credential_type: credential.credential_type,
                data,
                metadata: credential.metadata,
                last_used_at: Some(now),
            },
            details,
        ))
    }

    async fn do_list(&self, user_id: UserId, service: Option<&str>) -> Outcome<Vec<CredentialSummary>> {
        let summaries: Vec<CredentialSummary> = self
            .repository
            .find_active_by_user(user_id, service)
            .await?
            .iter()
            .map(Credential::summary)
            .collect();
        let details = json!({ "service": service, "count": summaries.len() });
        Ok((summaries, details))
    }

    async fn do_delete(&self, user_id: UserId, id: CredentialId) -> Outcome<()> {
        let mut credential = self.load_owned(user_id, id).await?;
        credential
            .retire()
            .map_err(|e| ControlPlaneError::NotFound(format!("credential {}: {}", id, e)))?;
        self.repository.update(&credential).await?;

        info!(credential_id = %id, user_id = %user_id, "Retired credential");
        Ok(((), json!({ "fingerprint": credential.fingerprint })))
    }

    async fn do_rotate(&self, user_id: UserId, id: CredentialId, data: CredentialSecret) -> Outcome<()> {
        let mut credential = self.load_active(user_id, id).await?;
        if data.credential_type() != credential.credential_type {
            return Err(ControlPlaneError::Validation(format!(
                "cannot rotate a {} credential to {}",
                credential.credential_type.as_str(),
                data.credential_type().as_str()
            )));
        }

        let old_fingerprint = credential.fingerprint.clone();
        let sealed = self.seal(id, user_id, &data)?;
        credential
            .replace_payload(sealed.payload, sealed.masked_hint, sealed.fingerprint)
            .map_err(|e| ControlPlaneError::NotFound(format!("credential {}: {}", id, e)))?;
        self.repository.update(&credential).await?;

        info!(credential_id = %id, user_id = %user_id, "Rotated credential");
        let details = json!({
            "old_fingerprint": old_fingerprint,
            "new_fingerprint": credential.fingerprint,
            "masked_hint": credential.masked_hint,
        });
        Ok(((), details))
    }

    async fn do_update(&self, user_id: UserId, id: CredentialId, update: CredentialUpdate) -> Outcome<CredentialSummary> {
        let mut credential = self.load_active(user_id, id).await?;
        let mut changed = Vec::new();

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(ControlPlaneError::Validation("credential name cannot be empty".to_string()));
            }
            credential.name = name;
            changed.push("name");
        }
        if let Some(metadata) = update.metadata {
            credential.metadata = metadata;
            changed.push("metadata");
        }
        credential.updated_at = Utc::now();
        self.repository.update(&credential).await?;

        Ok((credential.summary(), json!({ "changed": changed })))
    }
}

struct Sealed {
    payload: EncryptedPayload,
    masked_hint: String,
    fingerprint: String,
}

#[async_trait]
impl CredentialVault for StandardCredentialVault {
    async fn store(&self, user_id: UserId, input: NewCredential) -> Result<CredentialId, ControlPlaneError> {
        let id = CredentialId::new();
        let outcome = self.do_store(user_id, id, input).await;
        self.audited(user_id, "credential.store", id.to_string(), outcome).await
    }

    async fn retrieve(&self, user_id: UserId, id: CredentialId) -> Result<DecryptedCredential, ControlPlaneError> {
        let outcome = self.do_retrieve(user_id, id).await;
        self.audited(user_id, "credential.retrieve", id.to_string(), outcome).await
    }

    async fn list(&self, user_id: UserId, service: Option<&str>) -> Result<Vec<CredentialSummary>, ControlPlaneError> {
        let outcome = self.do_list(user_id, service).await;
        self.audited(user_id, "credential.list", service.unwrap_or("*").to_string(), outcome)
            .await
    }

    async fn delete(&self, user_id: UserId, id: CredentialId) -> Result<(), ControlPlaneError> {
        let outcome = self.do_delete(user_id, id).await;
        self.audited(user_id, "credential.delete", id.to_string(), outcome).await
    }

    async fn rotate(&self, user_id: UserId, id: CredentialId, data: CredentialSecret) -> Result<(), ControlPlaneError> {
        let outcome = self.do_rotate(user_id, id, data).await;
        self.audited(user_id, "credential.rotate", id.to_string(), outcome).await
    }

    async fn update(
        &self,
        user_id: UserId,
        id: CredentialId,
        update: CredentialUpdate,
    ) -> Result<CredentialSummary, ControlPlaneError> {
        let outcome = self.do_update(user_id, id, update).await;
        self.audited(user_id, "credential.update", id.to_string(), outcome).await
    }
}
