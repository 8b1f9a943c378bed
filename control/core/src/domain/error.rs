// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Control Plane Error Taxonomy
//!
//! Every application service returns [`ControlPlaneError`]. Ownership and state
//! errors are always surfaced as typed variants so callers can act on them;
//! audit-write failures never reach this type (they are logged and dropped by
//! [`crate::application::audit::AuditLogger`]).

use thiserror::Error;

use crate::domain::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Ownership mismatch. Also returned when the resource does not exist, so
    /// callers cannot probe for other tenants' ids.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Corrupt ciphertext, auth-tag mismatch or wrong key. Possible tampering.
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Downstream unavailable: {0}")]
    DownstreamUnavailable(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    /// The caller's context was cancelled while waiting.
    #[error("Operation cancelled by caller")]
    Cancelled,
}

impl ControlPlaneError {
    /// Short machine-readable code recorded in audit rows and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccessDenied(_) => "access_denied",
            Self::NotFound(_) => "not_found",
            Self::InvalidStateTransition(_) => "invalid_state_transition",
            Self::DecryptionFailure(_) => "decryption_failure",
            Self::Configuration(_) => "configuration_error",
            Self::DownstreamUnavailable(_) => "downstream_unavailable",
            Self::Validation(_) => "validation_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<RepositoryError> for ControlPlaneError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ControlPlaneError::NotFound(what),
            RepositoryError::Conflict(what) => ControlPlaneError::InvalidStateTransition(what),
            RepositoryError::Database(msg) => ControlPlaneError::DownstreamUnavailable(msg),
            RepositoryError::Serialization(msg) => {
                ControlPlaneError::DownstreamUnavailable(format!("stored row is unreadable: {}", msg))
            }
        }
    }
}
