// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential Aggregate
//!
//! A user-owned secret stored encrypted at rest. The plaintext only exists as
//! a [`CredentialSecret`] inside a single vault call and is never logged: its
//! `Debug` implementation is redacted.
//!
//! ## Lifecycle
//!
//! ```text
//! store ──▶ Active ──rotate/update──▶ Active ──delete──▶ Retired
//! ```
//!
//! Retired rows stay in the store for audit but are invisible to `list` and
//! `retrieve`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::crypto::{fingerprint, mask_secret, EncryptedPayload};
use crate::domain::identity::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialId(pub Uuid);

impl CredentialId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CredentialId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Password,
    ApiKey,
    OauthToken,
    SshKey,
}

impl CredentialType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::ApiKey => "api_key",
            Self::OauthToken => "oauth_token",
            Self::SshKey => "ssh_key",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "password" => Some(Self::Password),
            "api_key" => Some(Self::ApiKey),
            "oauth_token" => Some(Self::OauthToken),
            "ssh_key" => Some(Self::SshKey),
            _ => None,
        }
    }
}

/// Decrypted secret material, one variant per credential type.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialSecret {
    Password {
        username: String,
        password: String,
    },
    ApiKey {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret: Option<String>,
    },
    OauthToken {
        access_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
        #[serde(default)]
        scopes: Vec<String>,
    },
    SshKey {
        private_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

impl fmt::Debug for CredentialSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialSecret::{}(<redacted>)", self.credential_type().as_str())
    }
}

impl CredentialSecret {
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Password { .. } => CredentialType::Password,
            Self::ApiKey { .. } => CredentialType::ApiKey,
            Self::OauthToken { .. } => CredentialType::OauthToken,
            Self::SshKey { .. } => CredentialType::SshKey,
        }
    }

    /// Masked identifier safe to show in listings.
    pub fn masked_hint(&self) -> String {
        match self {
            Self::Password { username, .. } => mask_secret(username),
            Self::ApiKey { key, .. } => mask_secret(key),
            Self::OauthToken { access_token, .. } => mask_secret(access_token),
            Self::SshKey { private_key, .. } => {
                format!("ssh:{}", &fingerprint(private_key.as_bytes())[..8])
            }
        }
    }

    /// Reject secrets whose primary field is empty.
    pub fn validate(&self) -> Result<(), String> {
        let primary = match self {
            Self::Password { password, .. } => password,
            Self::ApiKey { key, .. } => key,
            Self::OauthToken { access_token, .. } => access_token,
            Self::SshKey { private_key, .. } => private_key,
        };
        if primary.trim().is_empty() {
            return Err(format!("{} secret cannot be empty", self.credential_type().as_str()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Retired { retired_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialStateError {
    #[error("credential is retired")]
    Retired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub user_id: UserId,
    pub name: String,
    pub service: String,
    pub credential_type: CredentialType,
    pub payload: EncryptedPayload,
    pub metadata: serde_json::Value,
    pub masked_hint: String,
    pub fingerprint: String,
    pub status: CredentialStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Associated data bound into the ciphertext: a payload copied onto
    /// another row or owner fails authentication.
    pub fn associated_data(id: CredentialId, user_id: UserId) -> Vec<u8> {
        format!("credential:{}:{}", id.0, user_id.0).into_bytes()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, CredentialStatus::Active)
    }

    pub fn owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id
    }

    pub fn replace_payload(
        &mut self,
        payload: EncryptedPayload,
        masked_hint: String,
        fingerprint: String,
    ) -> Result<(), CredentialStateError> {
        if !self.is_active() {
            return Err(CredentialStateError::Retired);
        }
        self.payload = payload;
        self.masked_hint = masked_hint;
        self.fingerprint = fingerprint;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn retire(&mut self) -> Result<(), CredentialStateError> {
        if !self.is_active() {
            return Err(CredentialStateError::Retired);
        }
        let now = Utc::now();
        self.status = CredentialStatus::Retired { retired_at: now };
        self.updated_at = now;
        Ok(())
    }

    pub fn summary(&self) -> CredentialSummary {
        CredentialSummary {
            id: self.id,
            name: self.name.clone(),
            service: self.service.clone(),
            credential_type: self.credential_type,
            masked_hint: self.masked_hint.clone(),
            fingerprint: self.fingerprint.clone(),
            metadata: self.metadata.clone(),
            last_used_at: self.last_used_at,
            created_at: self.created_at,
        }
    }
}

/// Input to `CredentialVault::store`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCredential {
    pub name: String,
    pub service: String,
    pub data: CredentialSecret,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Non-secret fields that can change without re-encryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialUpdate {
    pub name: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Result of a successful `retrieve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedCredential {
    pub id: CredentialId,
    pub name: String,
    pub service: String,
    pub credential_type: CredentialType,
    pub data: CredentialSecret,
    pub metadata: serde_json::Value,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Listing row. Carries no secret material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub id: CredentialId,
    pub name: String,
    pub service: String,
    pub credential_type: CredentialType,
    pub masked_hint: String,
    pub fingerprint: String,
    pub metadata: serde_json::Value,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = CredentialSecret::Password {
            username: "agency-admin".to_string(),
            password: "correct horse battery staple".to_string(),
        };
        let rendered = format!("{:?}", secret);
        assert!(!rendered.contains("correct horse"));
        assert!(!rendered.contains("agency-admin"));
        assert!(rendered.contains("password"));
    }

    #[test]
    fn test_secret_serde_is_tagged_by_type() {
        let secret = CredentialSecret::ApiKey {
            key: "sk-test-123456".to_string(),
            secret: None,
        };
        let json = serde_json::to_value(&secret).unwrap();
        assert_eq!(json["type"], "api_key");
        let back: CredentialSecret = serde_json::from_value(json).unwrap();
        assert_eq!(back.credential_type(), CredentialType::ApiKey);
    }

    #[test]
    fn test_validate_rejects_empty_primary_field() {
        let secret = CredentialSecret::Password {
            username: "u".to_string(),
            password: "   ".to_string(),
        };
        assert!(secret.validate().is_err());
    }

    #[test]
    fn test_masked_hint_never_equals_secret() {
        let secret = CredentialSecret::ApiKey {
            key: "sk-live-0123456789".to_string(),
            secret: None,
        };
        let hint = secret.masked_hint();
        assert_eq!(hint, "sk****89");
    }
}
