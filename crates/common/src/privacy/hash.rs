//! Salted content hashing for pseudonyms and token lookups

use rand::{thread_rng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};
use thiserror::Error;

use crate::error::{CommonError, ErrorSeverity};
use crate::impl_error_classification;

const DEFAULT_SALT_LENGTH: usize = 32;
const BLAKE3_CONTEXT: &str = "aegis 2024-06 content hash";

/// Errors raised while building or using a [`ContentHasher`]
#[derive(Debug, Error)]
pub enum HashError {
    /// Input the hasher cannot work with, such as an empty salt
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Shared failure from a lower layer
    #[error(transparent)]
    Common(#[from] CommonError),
}

/// Result alias for hashing operations
pub type HashResult<T> = Result<T, HashError>;

impl_error_classification!(HashError, Common,
    Self::InvalidInput(_) => {
        retryable: false,
        severity: ErrorSeverity::Error,
        critical: false,
    }
);

/// Digest behind a [`ContentHasher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// Salted SHA-256
    #[default]
    Sha256,
    /// Salted SHA-384
    Sha384,
    /// Salted SHA-512
    Sha512,
    /// BLAKE3 in keyed mode with a key derived from the salt
    Blake3Keyed,
}

/// Deterministic salted hasher
///
/// The same (algorithm, salt, content) always yields the same hex digest;
/// without the salt the digest cannot be recomputed from a guessed value.
#[derive(Clone)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
    salt: Vec<u8>,
}

impl std::fmt::Debug for ContentHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentHasher")
            .field("algorithm", &self.algorithm)
            .field("salt", &"[REDACTED]")
            .finish()
    }
}

impl ContentHasher {
    /// Hasher with a caller-supplied salt; an empty salt is rejected
    pub fn new(algorithm: HashAlgorithm, salt: impl Into<Vec<u8>>) -> HashResult<Self> {
        let salt = salt.into();
        if salt.is_empty() {
            return Err(HashError::InvalidInput("Salt cannot be empty".to_string()));
        }
        Ok(Self { algorithm, salt })
    }

    /// Hasher with a fresh 32-byte random salt
    pub fn with_random_salt(algorithm: HashAlgorithm) -> Self {
        let mut salt = vec![0u8; DEFAULT_SALT_LENGTH];
        thread_rng().fill_bytes(&mut salt);
        Self { algorithm, salt }
    }

    /// Digest in use
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Hex digest of `content` under this hasher's salt
    pub fn hash(&self, content: &[u8]) -> String {
        match self.algorithm {
            HashAlgorithm::Sha256 => {
                let mut hasher = Sha256::new();
                hasher.update(&self.salt);
                hasher.update(content);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha384 => {
                let mut hasher = Sha384::new();
                hasher.update(&self.salt);
                hasher.update(content);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Sha512 => {
                let mut hasher = Sha512::new();
                hasher.update(&self.salt);
                hasher.update(content);
                hex::encode(hasher.finalize())
            }
            HashAlgorithm::Blake3Keyed => {
                let key = blake3::derive_key(BLAKE3_CONTEXT, &self.salt);
                blake3::keyed_hash(&key, content).to_hex().to_string()
            }
        }
    }

    /// [`ContentHasher::hash`] over the UTF-8 bytes of `content`
    pub fn hash_str(&self, content: &str) -> String {
        self.hash(content.as_bytes())
    }

    /// Short pseudonym for `content`: `<prefix>_<first n hex chars>`
    pub fn pseudonym(&self, prefix: &str, content: &str, hex_chars: usize) -> String {
        let digest = self.hash_str(content);
        let take = hex_chars.min(digest.len());
        format!("{prefix}_{}", &digest[..take])
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for privacy::hash.
    use super::*;

    /// Validates `ContentHasher::hash` behavior for the determinism scenario.
    ///
    /// Assertions:
    /// - Confirms identical inputs hash identically for every algorithm.
    /// - Confirms digest lengths match the algorithm.
    #[test]
    fn test_hash_is_deterministic() {
        for (algorithm, hex_len) in [
            (HashAlgorithm::Sha256, 64),
            (HashAlgorithm::Sha384, 96),
            (HashAlgorithm::Sha512, 128),
            (HashAlgorithm::Blake3Keyed, 64),
        ] {
            let hasher = ContentHasher::new(algorithm, b"org-salt".to_vec()).unwrap();
            let a = hasher.hash_str("john@example.com");
            let b = hasher.hash_str("john@example.com");
            assert_eq!(a, b);
            assert_eq!(a.len(), hex_len);
        }
    }

    /// Validates `ContentHasher::hash` behavior for the salt separation
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures different salts yield different digests.
    #[test]
    fn test_salt_changes_digest() {
        let a = ContentHasher::new(HashAlgorithm::Sha256, b"salt-a".to_vec()).unwrap();
        let b = ContentHasher::new(HashAlgorithm::Sha256, b"salt-b".to_vec()).unwrap();
        assert_ne!(a.hash_str("555-0100"), b.hash_str("555-0100"));
    }

    /// Validates `ContentHasher::new` behavior for the empty salt scenario.
    ///
    /// Assertions:
    /// - Ensures an empty salt is rejected.
    #[test]
    fn test_empty_salt_rejected() {
        let result = ContentHasher::new(HashAlgorithm::Sha256, Vec::new());
        assert!(matches!(result, Err(HashError::InvalidInput(_))));
    }

    /// Validates `ContentHasher::pseudonym` behavior for the prefix scenario.
    ///
    /// Assertions:
    /// - Confirms the pseudonym has the prefix and the requested hex length.
    #[test]
    fn test_pseudonym_shape() {
        let hasher = ContentHasher::with_random_salt(HashAlgorithm::Sha256);
        let pseudonym = hasher.pseudonym("email", "a@b.io", 10);
        assert!(pseudonym.starts_with("email_"));
        assert_eq!(pseudonym.len(), "email_".len() + 10);
        assert!(!format!("{hasher:?}").contains("salt: ["));
    }
}
