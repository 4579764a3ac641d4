//! AES-256-GCM primitives with detached authentication tags.
//!
//! ```rust,ignore
//! use aegis_common::crypto::aead::AeadCipher;
//!
//! let key = AeadCipher::generate_key();
//! let cipher = AeadCipher::new(key.expose())?;
//!
//! let sealed = cipher.seal(b"sensitive data", b"context=general")?;
//! let opened = cipher.open(&sealed, b"context=general")?;
//! assert_eq!(opened, b"sensitive data");
//! ```

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes256Gcm;
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::{CommonError, ErrorSeverity};
use crate::security::secret::SecretBytes;
use crate::{impl_error_classification, impl_error_conversion};

/// Key length in bytes for AES-256-GCM
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes (96-bit GCM nonce)
pub const NONCE_LEN: usize = 12;
/// Authentication tag length in bytes
pub const TAG_LEN: usize = 16;
/// Minimum salt length accepted for password derivation
pub const MIN_SALT_LEN: usize = 16;

/// Errors raised by the AEAD primitives
#[derive(Debug, Error)]
pub enum AeadError {
    /// Key material was not 32 bytes
    #[error("Encryption key must be exactly 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    /// Ciphertext, nonce or associated data was altered
    #[error("Authentication tag verification failed")]
    TagMismatch,

    /// The AEAD backend reported a failure
    #[error("Cipher failure: {0}")]
    Cipher(String),

    /// Argon2id could not derive a key
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    /// Shared failure from a lower layer
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl_error_conversion!(AeadError, Common);

impl_error_classification!(AeadError, Common,
    Self::InvalidKeyLength(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::TagMismatch => {
        retryable: false,  // Tampered data never verifies on retry
        severity: ErrorSeverity::Critical,
        critical: true,
    },
    Self::Cipher(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    },
    Self::KeyDerivation(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);

/// Ciphertext with its nonce and detached tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Random 96-bit nonce, unique per seal
    pub nonce: [u8; NONCE_LEN],
    /// Encrypted bytes, same length as the plaintext
    pub ciphertext: Vec<u8>,
    /// GCM authentication tag
    pub tag: [u8; TAG_LEN],
}

/// AES-256-GCM cipher bound to one key
pub struct AeadCipher {
    cipher: Aes256Gcm,
    fingerprint: String,
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadCipher")
            .field("key", &"[REDACTED]")
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

impl AeadCipher {
    /// Algorithm label recorded alongside sealed data
    pub const ALGORITHM: &'static str = "AES-256-GCM";

    /// Create a cipher from a raw 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self, AeadError> {
        if key.len() != KEY_LEN {
            return Err(AeadError::InvalidKeyLength(key.len()));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AeadError::Cipher(format!("Failed to create cipher: {e}")))?;

        Ok(Self { cipher, fingerprint: key_fingerprint(key) })
    }

    /// Derive a cipher from a passphrase and salt using Argon2.
    pub fn from_password(password: &[u8], salt: &[u8]) -> Result<Self, AeadError> {
        let key = derive_key(password, salt)?;
        Self::new(key.expose())
    }

    /// Generate a random 32-byte key.
    pub fn generate_key() -> SecretBytes {
        let mut key = vec![0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        SecretBytes::new(key)
    }

    /// Generate a fresh random nonce.
    pub fn generate_nonce() -> [u8; NONCE_LEN] {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }

    /// Short, non-reversible identifier for the key behind this cipher.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Encrypt with a fresh random nonce, binding `aad` into the tag.
    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedPayload, AeadError> {
        self.seal_with_nonce(Self::generate_nonce(), plaintext, aad)
    }

    /// Encrypt with a caller-supplied nonce.
    ///
    /// Nonces must never repeat under the same key.
    pub fn seal_with_nonce(
        &self,
        nonce: [u8; NONCE_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<SealedPayload, AeadError> {
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&nonce), aad, buffer.as_mut_slice())
            .map_err(|e| AeadError::Cipher(format!("Encryption failed: {e}")))?;

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(SealedPayload { nonce, ciphertext: buffer, tag: tag_bytes })
    }

    /// Verify the tag and decrypt.
    pub fn open(&self, sealed: &SealedPayload, aad: &[u8]) -> Result<Vec<u8>, AeadError> {
        let mut buffer = sealed.ciphertext.clone();
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&sealed.nonce),
                aad,
                buffer.as_mut_slice(),
                GenericArray::from_slice(&sealed.tag),
            )
            .map_err(|_| AeadError::TagMismatch)?;
        Ok(buffer)
    }
}

/// Derive a 32-byte key from a passphrase using Argon2 default parameters.
pub fn derive_key(password: &[u8], salt: &[u8]) -> Result<SecretBytes, AeadError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(AeadError::KeyDerivation(format!(
            "salt must be at least {MIN_SALT_LEN} bytes"
        )));
    }

    let mut key = vec![0u8; KEY_LEN];
    Argon2::default()
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| AeadError::KeyDerivation(e.to_string()))?;
    Ok(SecretBytes::new(key))
}

/// Generate a random salt suitable for [`derive_key`].
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; MIN_SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Short fingerprint for a key: base64 of the first 8 bytes of its SHA-256.
pub fn key_fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    BASE64.encode(&digest[..8])
}
