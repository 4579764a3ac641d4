//! Master key-encryption key sources
//!
//! Key rings are persisted wrapped under a single master key. The master key
//! can come from three places:
//! - [`MasterKeySource::Static`]: raw bytes supplied by the caller (tests,
//!   HSM-backed deployments that inject the key)
//! - [`MasterKeySource::Passphrase`]: Argon2 derivation from a passphrase
//! - [`MasterKeySource::Keychain`]: the platform keychain, generating and
//!   storing a fresh key on first use

use aegis_common::security::keychain::{KeychainError, KeychainProvider};
use aegis_common::{AeadCipher, CommonError, SecretBytes, SecureString};
use tracing::{info, instrument, warn};

use crate::error::{EncryptionFailure, PrivacyError, PrivacyResult};

const DEFAULT_KEYCHAIN_ACCOUNT: &str = "master-key";

/// Where the master key-encryption key comes from
#[derive(Debug, Clone)]
pub enum MasterKeySource {
    /// Raw key bytes
    Static(SecretBytes),
    /// Argon2id-derived from a passphrase
    Passphrase { passphrase: SecureString, salt: Vec<u8> },
    /// Stored in the OS keychain, created on first use
    Keychain { service: String, account: String },
}

impl MasterKeySource {
    /// Random in-memory master key; key rings persisted with it are
    /// unreadable after the process exits
    pub fn ephemeral() -> Self {
        Self::Static(AeadCipher::generate_key())
    }

    /// Keychain entry under `service` with the default account
    pub fn keychain(service: impl Into<String>) -> Self {
        Self::Keychain { service: service.into(), account: DEFAULT_KEYCHAIN_ACCOUNT.to_string() }
    }

    /// Build the wrapping cipher
    #[instrument(skip_all, fields(source = self.kind()))]
    pub fn resolve(&self) -> PrivacyResult<AeadCipher> {
        match self {
            Self::Static(key) => Ok(AeadCipher::new(key.expose())?),
            Self::Passphrase { passphrase, salt } => {
                info!("Deriving master key from passphrase");
                Ok(AeadCipher::from_password(passphrase.expose().as_bytes(), salt)?)
            }
            Self::Keychain { service, account } => {
                let key = load_or_create_keychain_key(service, account)?;
                Ok(AeadCipher::new(key.expose())?)
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Passphrase { .. } => "passphrase",
            Self::Keychain { .. } => "keychain",
        }
    }
}

fn load_or_create_keychain_key(service: &str, account: &str) -> PrivacyResult<SecretBytes> {
    let keychain = KeychainProvider::new(service);

    match keychain.load_secret(account) {
        Ok(key) => {
            info!(service = %service, "Loaded master key from keychain");
            Ok(key)
        }
        Err(KeychainError::NotFound) => {
            warn!(service = %service, "No master key in keychain, generating a new one");
            let key = AeadCipher::generate_key();
            keychain.store_secret(account, &key).map_err(keychain_error)?;
            Ok(key)
        }
        Err(KeychainError::Corrupt(reason)) => {
            Err(PrivacyError::Encryption(EncryptionFailure::InvalidKeyMaterial(reason)))
        }
        Err(e) => Err(keychain_error(e)),
    }
}

fn keychain_error(err: KeychainError) -> PrivacyError {
    PrivacyError::Common(CommonError::backend("keychain", err.to_string(), false))
}

#[cfg(test)]
mod tests {
    //! Unit tests for keys::master.
    use aegis_common::crypto::aead::generate_salt;

    use super::*;

    /// Validates `MasterKeySource::resolve` behavior for the static key
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a 32-byte key resolves to a working cipher.
    /// - Ensures a short key is rejected as invalid key material.
    #[test]
    fn test_static_source() {
        let cipher = MasterKeySource::ephemeral().resolve().unwrap();
        let sealed = cipher.seal(b"ring", b"aad").unwrap();
        assert_eq!(cipher.open(&sealed, b"aad").unwrap(), b"ring");

        let short = MasterKeySource::Static(SecretBytes::from_slice(&[1u8; 8]));
        assert!(matches!(
            short.resolve(),
            Err(PrivacyError::Encryption(EncryptionFailure::InvalidKeyMaterial(_)))
        ));
    }

    /// Validates `MasterKeySource::resolve` behavior for the passphrase
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms the same passphrase and salt resolve to the same key.
    #[test]
    fn test_passphrase_source_is_stable() {
        let salt = generate_salt();
        let source = MasterKeySource::Passphrase {
            passphrase: SecureString::new("open sesame".to_string()),
            salt: salt.clone(),
        };
        let a = source.resolve().unwrap();
        let b = source.resolve().unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
