// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # AES-256-GCM Envelope Cipher
//!
//! Implements [`EnvelopeCipher`] with AES-256-GCM: 96-bit random IV per
//! record, 128-bit authentication tag stored separately from the ciphertext.
//!
//! The master key is read once at startup. A missing or malformed key is a
//! fatal [`ControlPlaneError::Configuration`]; the process never runs with a
//! placeholder key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use rand_core::{OsRng, RngCore};
use std::fmt;

use crate::domain::crypto::{CipherError, EncryptedPayload, EnvelopeCipher};
use crate::domain::error::ControlPlaneError;

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// 32-byte symmetric master key.
#[derive(Clone)]
pub struct MasterKey([u8; KEY_LEN]);

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fresh random key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Accepts 64 hex characters, base64 of 32 bytes, or a raw 32-byte string.
    /// Surrounding whitespace is ignored for the encoded forms only; a raw
    /// key is taken byte for byte.
    pub fn parse(value: &str) -> Result<Self, ControlPlaneError> {
        let encoded = value.trim();

        if encoded.len() == KEY_LEN * 2 && encoded.chars().all(|c| c.is_ascii_hexdigit()) {
            let bytes = hex::decode(encoded)
                .map_err(|e| ControlPlaneError::Configuration(format!("invalid hex master key: {}", e)))?;
            return Self::from_slice(&bytes);
        }

        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(encoded) {
            if bytes.len() == KEY_LEN {
                return Self::from_slice(&bytes);
            }
        }

        if value.len() == KEY_LEN {
            return Self::from_slice(value.as_bytes());
        }

        Err(ControlPlaneError::Configuration(format!(
            "master key must be 64 hex chars, base64 of {} bytes, or a raw {}-byte string",
            KEY_LEN, KEY_LEN
        )))
    }

    /// Read and parse the key from the named environment variable.
    pub fn from_env(var: &str) -> Result<Self, ControlPlaneError> {
        let raw = std::env::var(var)
            .map_err(|_| ControlPlaneError::Configuration(format!("master key variable {} is not set", var)))?;
        Self::parse(&raw)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, ControlPlaneError> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            ControlPlaneError::Configuration(format!("master key must be {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(Self(key))
    }
}

pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    pub fn new(key: &MasterKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }
}

impl EnvelopeCipher for AesGcmCipher {
    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedPayload, CipherError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), Payload { msg: plaintext, aad })
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        // aes-gcm appends the tag; store it separately.
        let auth_tag = sealed.split_off(sealed.len() - TAG_LEN);
        Ok(EncryptedPayload {
            iv: iv.to_vec(),
            auth_tag,
            ciphertext: sealed,
        })
    }

    fn open(&self, payload: &EncryptedPayload, aad: &[u8]) -> Result<Vec<u8>, CipherError> {
        if payload.iv.len() != IV_LEN {
            return Err(CipherError::Decryption(format!("iv must be {} bytes", IV_LEN)));
        }
        if payload.auth_tag.len() != TAG_LEN {
            return Err(CipherError::Decryption(format!("auth tag must be {} bytes", TAG_LEN)));
        }

        let mut combined = Vec::with_capacity(payload.ciphertext.len() + TAG_LEN);
        combined.extend_from_slice(&payload.ciphertext);
        combined.extend_from_slice(&payload.auth_tag);

        self.cipher
            .decrypt(Nonce::from_slice(&payload.iv), Payload { msg: &combined, aad })
            .map_err(|_| CipherError::Decryption("authentication failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> AesGcmCipher {
        AesGcmCipher::new(&MasterKey::generate())
    }

    #[test]
    fn test_seal_open() {
        let c = cipher();
        let payload = c.seal(b"{\"password\":\"pw\"}", b"credential:1").unwrap();
        assert_eq!(payload.iv.len(), IV_LEN);
        assert_eq!(payload.auth_tag.len(), TAG_LEN);
        assert_eq!(c.open(&payload, b"credential:1").unwrap(), b"{\"password\":\"pw\"}");
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let c = cipher();
        let a = c.seal(b"same", b"").unwrap();
        let b = c.seal(b"same", b"").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tamper_detection() {
        let c = cipher();
        let payload = c.seal(b"top secret value", b"aad").unwrap();

        let mut flipped = payload.clone();
        flipped.ciphertext[0] ^= 0x01;
        assert!(c.open(&flipped, b"aad").is_err());

        let mut bad_tag = payload.clone();
        bad_tag.auth_tag[15] ^= 0x80;
        assert!(c.open(&bad_tag, b"aad").is_err());

        let mut bad_iv = payload.clone();
        bad_iv.iv[0] ^= 0x01;
        assert!(c.open(&bad_iv, b"aad").is_err());

        assert!(c.open(&payload, b"other-aad").is_err());
    }

    #[test]
    fn test_wrong_key_fails() {
        let payload = cipher().seal(b"x", b"").unwrap();
        assert!(cipher().open(&payload, b"").is_err());
    }

    #[test]
    fn test_master_key_encodings() {
        let key = MasterKey::generate();
        let hex_form = key.to_hex();
        assert_eq!(MasterKey::parse(&hex_form).unwrap().0, key.0);

        let b64 = key.to_base64();
        assert_eq!(MasterKey::parse(&b64).unwrap().0, key.0);

        let raw = "0123456789abcdefghijklmnopqrstuv";
        assert_eq!(MasterKey::parse(raw).unwrap().0, *raw.as_bytes());
    }

    #[test]
    fn test_master_key_whitespace_handling() {
        let key = MasterKey::generate();
        let padded_hex = format!("  {}\n", key.to_hex());
        assert_eq!(MasterKey::parse(&padded_hex).unwrap().0, key.0);

        let raw = " 123456789abcdefghijklmnopqrstu ";
        assert_eq!(raw.len(), KEY_LEN);
        assert_eq!(MasterKey::parse(raw).unwrap().0, *raw.as_bytes());
    }

    #[test]
    fn test_master_key_rejects_bad_input() {
        assert!(matches!(MasterKey::parse("short"), Err(ControlPlaneError::Configuration(_))));
        assert!(MasterKey::parse("").is_err());
        assert!(MasterKey::parse(&"zz".repeat(32)).is_err());
        assert!(MasterKey::from_env("AGENTGATE_TEST_KEY_THAT_IS_NOT_SET").is_err());
    }

    #[test]
    fn test_master_key_debug_is_redacted() {
        let key = MasterKey::generate();
        assert!(!format!("{:?}", key).contains(&key.to_hex()));
    }
}
