//! Credential-at-rest encryption.
//!
//! Stored credentials (webhook signing secrets) are sealed with AES-256-GCM
//! under a process master key and kept as text blobs of the form
//! `tt1:<base64(nonce || ciphertext || tag)>`.
//!
//! Decrypted values come back as [`SecretString`] so they are never logged
//! by accident.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub use secrecy::{ExposeSecret, SecretString};

/// Environment variable the server reads the master key from.
pub const MASTER_KEY_ENV: &str = "TRACKTAGS_MASTER_KEY";

const BLOB_PREFIX: &str = "tt1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A 32-byte master key, zeroized on drop and redacted in `Debug`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

#[derive(Debug, Clone, Error)]
pub enum CryptoError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("malformed credential blob: {0}")]
    InvalidFormat(String),

    /// Wrong key or tampered blob.
    #[error("credential could not be decrypted")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Parse a master key given as 64 hex characters or base64 of 32 bytes.
pub fn parse_master_key(raw: &str) -> Result<MasterKey, CryptoError> {
    let raw = raw.trim();
    let bytes = if raw.len() == 64 && raw.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(raw).map_err(|e| CryptoError::InvalidKey(e.to_string()))?
    } else {
        B64.decode(raw)
            .map_err(|_| CryptoError::InvalidKey("expected 64 hex chars or base64".into()))?
    };
    let key: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
        CryptoError::InvalidKey(format!("expected 32 bytes, got {}", v.len()))
    })?;
    Ok(MasterKey(key))
}

/// Seals and opens credential blobs under one master key.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    pub fn new(key: &MasterKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    /// Build a cipher from the raw key text (see [`parse_master_key`]).
    pub fn from_key_text(raw: &str) -> Result<Self, CryptoError> {
        parse_master_key(raw).map(|k| Self::new(&k))
    }

    /// Seal `plaintext` into a `tt1:` blob with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(format!("{BLOB_PREFIX}{}", B64.encode(out)))
    }

    /// Open a `tt1:` blob.
    pub fn decrypt(&self, blob: &str) -> Result<SecretString, CryptoError> {
        let encoded = blob
            .trim()
            .strip_prefix(BLOB_PREFIX)
            .ok_or_else(|| CryptoError::InvalidFormat(format!("missing `{BLOB_PREFIX}` prefix")))?;
        let raw = B64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidFormat(e.to_string()))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::InvalidFormat(format!(
                "blob too short ({} bytes)",
                raw.len()
            )));
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let mut plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let text = String::from_utf8(plain.clone())
            .map_err(|_| CryptoError::InvalidFormat("plaintext is not UTF-8".into()));
        plain.zeroize();
        Ok(SecretString::new(text?))
    }
}
