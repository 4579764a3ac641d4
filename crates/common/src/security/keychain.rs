//! Platform keychain access for master key material
//!
//! Thin wrapper over `keyring` (macOS Keychain, Windows Credential Manager,
//! Secret Service on Linux). Binary secrets are stored base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use keyring::Entry;
use thiserror::Error;
use tracing::debug;

use crate::security::secret::SecretBytes;

/// Errors raised by keychain operations
#[derive(Debug, Error)]
pub enum KeychainError {
    /// No entry under the requested service and account
    #[error("Keychain entry not found")]
    NotFound,

    /// The platform keychain refused or failed the request
    #[error("Keychain access failed: {0}")]
    AccessFailed(String),

    /// Stored bytes could not be decoded
    #[error("Keychain entry is corrupt: {0}")]
    Corrupt(String),
}

/// Keychain provider scoped to one service name
#[derive(Debug, Clone)]
pub struct KeychainProvider {
    service_name: String,
}

impl KeychainProvider {
    /// Create a provider for a service (e.g. `"aegis.master-key"`)
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    /// Service name entries are stored under
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Store binary secret material under `account`
    pub fn store_secret(&self, account: &str, secret: &SecretBytes) -> Result<(), KeychainError> {
        debug!(service = %self.service_name, account = %account, "Storing secret in keychain");

        let entry = self.entry(account)?;
        entry
            .set_password(&BASE64.encode(secret.expose()))
            .map_err(|e| KeychainError::AccessFailed(format!("store {account}: {e}")))
    }

    /// Load binary secret material stored under `account`
    pub fn load_secret(&self, account: &str) -> Result<SecretBytes, KeychainError> {
        debug!(service = %self.service_name, account = %account, "Loading secret from keychain");

        let entry = self.entry(account)?;
        let encoded = entry.get_password().map_err(|e| {
            if matches!(e, keyring::Error::NoEntry) {
                KeychainError::NotFound
            } else {
                KeychainError::AccessFailed(format!("load {account}: {e}"))
            }
        })?;

        BASE64
            .decode(encoded.as_bytes())
            .map(SecretBytes::new)
            .map_err(|e| KeychainError::Corrupt(e.to_string()))
    }

    /// Delete a secret (idempotent)
    pub fn delete_secret(&self, account: &str) -> Result<(), KeychainError> {
        let entry = self.entry(account)?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::AccessFailed(format!("delete {account}: {e}"))),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry, KeychainError> {
        Entry::new(&self.service_name, account)
            .map_err(|e| KeychainError::AccessFailed(format!("open {account}: {e}")))
    }
}
