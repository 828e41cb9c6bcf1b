//! Field-level encryption for member PII.
//!
//! Sealed values are stored as `v1:` followed by base64 of
//! `nonce (12 bytes) || ciphertext || tag (16 bytes)`, using ChaCha20-Poly1305.
//! Rows written before encryption was introduced hold plaintext, so readers go
//! through [`decrypt_or_raw`], which never fails.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;
use tracing::debug;

pub const SEALED_PREFIX: &str = "v1:";

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

/// Key length (32 bytes)
pub const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("value is not sealed")]
    NotSealed,
    #[error("sealed value is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("sealed value is truncated")]
    Truncated,
    #[error("authentication failed")]
    Authentication,
    #[error("decrypted value is not UTF-8")]
    Utf8,
    #[error("encryption failed")]
    Seal,
    #[error("field key must be 32 bytes, got {0}")]
    KeyLength(usize),
}

/// Crypto collaborator used by the paginator.
pub trait FieldCipher: Send + Sync {
    fn seal(&self, plaintext: &str) -> Result<String, CipherError>;
    fn open(&self, sealed: &str) -> Result<String, CipherError>;
}

/// Best-effort decryption: on any failure the stored value is returned as is.
pub fn decrypt_or_raw(cipher: &dyn FieldCipher, field: &'static str, stored: &str) -> String {
    match cipher.open(stored) {
        Ok(plaintext) => plaintext,
        Err(err) => {
            debug!(field, error = %err, "field emitted as stored");
            stored.to_string()
        }
    }
}

pub struct ChaChaFieldCipher {
    cipher: ChaCha20Poly1305,
}

impl ChaChaFieldCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
        }
    }

    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        let key: [u8; KEY_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| CipherError::KeyLength(bytes.len()))?;
        Ok(Self::new(key))
    }

    /// Generates a fresh random key, base64 encoded.
    pub fn generate_key() -> String {
        STANDARD.encode(ChaCha20Poly1305::generate_key(&mut OsRng))
    }
}

impl fmt::Debug for ChaChaFieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaChaFieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher for ChaChaFieldCipher {
    fn seal(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CipherError::Seal)?;
        let mut payload = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(format!("{SEALED_PREFIX}{}", STANDARD.encode(payload)))
    }

    fn open(&self, sealed: &str) -> Result<String, CipherError> {
        let encoded = sealed.strip_prefix(SEALED_PREFIX).ok_or(CipherError::NotSealed)?;
        let payload = STANDARD.decode(encoded)?;
        if payload.len() < NONCE_LEN + AUTH_TAG_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Authentication)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }
}
