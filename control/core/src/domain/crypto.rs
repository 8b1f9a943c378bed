// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Envelope Encryption Contract
//!
//! Domain-level abstraction over the authenticated symmetric cipher shared by
//! the credential vault and browser context storage. The domain never sees key
//! material; the AES-256-GCM implementation lives in
//! [`crate::infrastructure::crypto`].
//!
//! ## Invariants
//!
//! - Every call to [`EnvelopeCipher::seal`] uses a fresh random IV.
//! - [`EnvelopeCipher::open`] fails on any bit flip in IV, tag, ciphertext or
//!   associated data. There is no unauthenticated fallback.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Ciphertext plus the per-record parameters needed to open it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub iv: Vec<u8>,
    pub auth_tag: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),
}

pub trait EnvelopeCipher: Send + Sync {
    /// Encrypt `plaintext`, binding `aad` into the authentication tag.
    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedPayload, CipherError>;

    /// Decrypt and authenticate a payload produced by [`EnvelopeCipher::seal`]
    /// with the same `aad`.
    fn open(&self, payload: &EncryptedPayload, aad: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Mask a secret for display or audit: keeps at most two leading and two
/// trailing characters, and nothing at all for short values.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 8 {
        return "****".to_string();
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{}****{}", head, tail)
}

/// Non-reversible short fingerprint of secret material (first 12 hex chars of
/// SHA-256). Used to correlate rotations in the audit trail.
pub fn fingerprint(material: &[u8]) -> String {
    let digest = Sha256::digest(material);
    hex::encode(digest)[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret_hides_short_values() {
        assert_eq!(mask_secret("hunter2"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn test_mask_secret_keeps_edges() {
        assert_eq!(mask_secret("sk-live-abcdef"), "sk****ef");
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let a = fingerprint(b"secret");
        let b = fingerprint(b"secret");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, fingerprint(b"secret2"));
    }
}
