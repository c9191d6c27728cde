//! Signature Verification
//!
//! Checks that a downloaded log list is signed by the trusted ED25519 key.
//! The key is rotatable at runtime; verification always runs over the exact
//! bytes that will later be installed.

use std::sync::RwLock;

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

/// Verification errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("No trusted public key loaded")]
    KeyUnavailable,
    #[error("Invalid signature for {version_id}: {reason}")]
    Invalid { version_id: String, reason: String },
    #[error("Invalid public key: {0}")]
    InvalidKey(String),
}

/// Verifier for log-list signatures
pub struct SignatureVerifier {
    public_key: RwLock<Option<VerifyingKey>>,
}

impl SignatureVerifier {
    /// Create a verifier with no trusted key; every verification fails
    /// with `KeyUnavailable` until a key is installed.
    pub fn new() -> Self {
        Self {
            public_key: RwLock::new(None),
        }
    }

    /// Create verifier with a specific public key
    pub fn with_public_key(key_bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<Self, SignatureError> {
        let verifier = Self::new();
        verifier.set_public_key(key_bytes)?;
        Ok(verifier)
    }

    /// Replace the trusted key. A rejected key leaves the previous one in place.
    pub fn set_public_key(&self, key_bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Result<(), SignatureError> {
        let key = VerifyingKey::from_bytes(key_bytes)
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        let mut slot = self.public_key.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(key);
        info!(fingerprint = %key_fingerprint(key_bytes), "Trusted log list key installed");
        Ok(())
    }

    /// Replace the trusted key from its base64 encoding.
    pub fn set_public_key_base64(&self, encoded: &str) -> Result<(), SignatureError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        let key_bytes: [u8; PUBLIC_KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            SignatureError::InvalidKey(format!(
                "expected {} bytes, got {}",
                PUBLIC_KEY_LENGTH,
                bytes.len()
            ))
        })?;
        self.set_public_key(&key_bytes)
    }

    pub fn clear_public_key(&self) {
        let mut slot = self.public_key.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    pub fn has_public_key(&self) -> bool {
        self.public_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Verify `signature` over `payload` for the given compatibility version.
    pub fn verify(&self, version_id: &str, payload: &[u8], signature: &[u8]) -> Result<(), SignatureError> {
        let Some(public_key) = *self.public_key.read().unwrap_or_else(|e| e.into_inner()) else {
            return Err(SignatureError::KeyUnavailable);
        };

        let invalid = |reason: String| SignatureError::Invalid {
            version_id: version_id.to_string(),
            reason,
        };

        let sig_bytes = decode_signature(signature).ok_or_else(|| {
            invalid(format!("expected {} byte signature", SIGNATURE_LENGTH))
        })?;
        let signature = Signature::from_bytes(&sig_bytes);

        public_key
            .verify(payload, &signature)
            .map_err(|_| invalid("signature does not match payload".to_string()))?;

        debug!(version_id, bytes = payload.len(), "Signature verified");
        Ok(())
    }
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Accept either the raw 64 signature bytes or their base64 text form.
fn decode_signature(raw: &[u8]) -> Option<[u8; SIGNATURE_LENGTH]> {
    if let Ok(bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(raw) {
        return Some(bytes);
    }
    let text = std::str::from_utf8(raw).ok()?.trim();
    let decoded = base64::engine::general_purpose::STANDARD.decode(text).ok()?;
    decoded.as_slice().try_into().ok()
}

/// Short hex fingerprint of a public key, for logs.
fn key_fingerprint(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    hex::encode(&digest[..8])
}

/// Calculate the hex SHA256 digest of committed content
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
