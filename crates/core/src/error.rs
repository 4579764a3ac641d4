//! Error taxonomy for the privacy engine
//!
//! Each failure family is its own `thiserror` enum; [`PrivacyError`] composes
//! them so every public operation returns a single [`PrivacyResult`].
//! Classification (retryability, severity, retry-after) is available through
//! [`ErrorClassification`] so callers can pick a fallback path.

use std::time::Duration;

use aegis_common::crypto::aead::AeadError;
use aegis_common::{CommonError, ErrorClassification, ErrorSeverity};
use thiserror::Error;
use uuid::Uuid;

/// Result alias used across `aegis-core`
pub type PrivacyResult<T> = Result<T, PrivacyError>;

/// Key lookup or cipher failure while sealing or opening data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncryptionFailure {
    /// The context has no usable key
    #[error("No active key for context '{0}'")]
    MissingKey(String),

    /// The AEAD primitive rejected the operation
    #[error("Cipher failure: {0}")]
    Cipher(String),

    /// Stored key bytes could not be used
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

/// Tampering or corruption detected
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityFailure {
    /// The AEAD tag did not verify
    #[error("Authentication tag verification failed")]
    TagMismatch,

    /// The envelope bytes do not parse
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Envelope names a key the store never issued
    #[error("Key {key_id} was never issued for context '{context}'")]
    UnknownKey { context: String, key_id: Uuid },

    /// A recomputed checksum disagrees with the stored one
    #[error("Audit chain diverges at entry {index}")]
    AuditChainDivergence { index: u64 },
}

/// Biometric or fallback authentication failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthenticationFailure {
    /// The user dismissed the prompt
    #[error("Authentication cancelled by user")]
    Cancelled,

    /// Too many recent failures
    #[error("Biometric authentication locked out, retry after {retry_after:?}")]
    LockedOut { retry_after: Duration },

    /// No identity to match against
    #[error("No biometric identity enrolled")]
    NotEnrolled,

    /// The sensor cannot be reached
    #[error("Biometric hardware unavailable")]
    HardwareUnavailable,

    /// The prompt expired without an answer
    #[error("Authentication timed out")]
    Timeout,

    /// Rejected with a reason from the authenticator
    #[error("Authentication failed: {0}")]
    Failed(String),
}

/// Secure storage failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageFailure {
    /// Nothing stored under the key
    #[error("No stored item under '{0}'")]
    NotFound(String),

    /// The backend refused the write
    #[error("Storage write failed: {0}")]
    WriteFailure(String),
}

/// Token lookup failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenFailure {
    /// The token outlived its TTL
    #[error("Token has expired")]
    Expired,

    /// Unknown or purged token
    #[error("Token not found")]
    NotFound,

    /// The token has no stored original
    #[error("Token was created non-reversible")]
    NonReversible,
}

/// Compliance evaluation failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComplianceFailure {
    /// The regulation name is not recognized
    #[error("Unknown regulation '{0}'")]
    UnknownRegulation(String),

    /// The policy definition is unusable
    #[error("Invalid compliance policy: {0}")]
    InvalidPolicy(String),
}

/// Configuration validation or loading failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationFailure {
    /// A field failed validation
    #[error("Configuration rejected: {field}: {reason}")]
    Rejected { field: String, reason: String },

    /// The source could not be read or parsed
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ConfigurationFailure {
    /// Validation failure for `field`
    pub fn rejected(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected { field: field.into(), reason: reason.into() }
    }
}

/// Top-level error for every privacy engine operation
#[derive(Debug, Error)]
pub enum PrivacyError {
    /// See [`EncryptionFailure`]
    #[error(transparent)]
    Encryption(#[from] EncryptionFailure),

    /// See [`IntegrityFailure`]
    #[error(transparent)]
    Integrity(#[from] IntegrityFailure),

    /// See [`AuthenticationFailure`]
    #[error(transparent)]
    Authentication(#[from] AuthenticationFailure),

    /// See [`StorageFailure`]
    #[error(transparent)]
    Storage(#[from] StorageFailure),

    /// See [`TokenFailure`]
    #[error(transparent)]
    Token(#[from] TokenFailure),

    /// See [`ComplianceFailure`]
    #[error(transparent)]
    Compliance(#[from] ComplianceFailure),

    /// See [`ConfigurationFailure`]
    #[error(transparent)]
    Configuration(#[from] ConfigurationFailure),

    /// Key existed but was revoked or rotated out past its grace window
    #[error("Key {key_id} for context '{context}' is no longer available")]
    KeyNotFound { context: String, key_id: Uuid },

    /// Fail-closed: the audit entry for an operation could not be written
    #[error("Audit log unavailable: {0}")]
    AuditUnavailable(String),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Persistence, serialization or validation error from `aegis-common`
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl PrivacyError {
    /// Stable short code recorded in audit metadata
    pub fn code(&self) -> &'static str {
        match self {
            Self::Encryption(EncryptionFailure::MissingKey(_)) => "encryption.missing_key",
            Self::Encryption(EncryptionFailure::Cipher(_)) => "encryption.cipher",
            Self::Encryption(EncryptionFailure::InvalidKeyMaterial(_)) => {
                "encryption.invalid_key_material"
            }
            Self::Integrity(IntegrityFailure::TagMismatch) => "integrity.tag_mismatch",
            Self::Integrity(IntegrityFailure::MalformedEnvelope(_)) => "integrity.malformed",
            Self::Integrity(IntegrityFailure::UnknownKey { .. }) => "integrity.unknown_key",
            Self::Integrity(IntegrityFailure::AuditChainDivergence { .. }) => {
                "integrity.audit_divergence"
            }
            Self::Authentication(AuthenticationFailure::Cancelled) => "auth.cancelled",
            Self::Authentication(AuthenticationFailure::LockedOut { .. }) => "auth.locked_out",
            Self::Authentication(AuthenticationFailure::NotEnrolled) => "auth.not_enrolled",
            Self::Authentication(AuthenticationFailure::HardwareUnavailable) => {
                "auth.hardware_unavailable"
            }
            Self::Authentication(AuthenticationFailure::Timeout) => "auth.timeout",
            Self::Authentication(AuthenticationFailure::Failed(_)) => "auth.failed",
            Self::Storage(StorageFailure::NotFound(_)) => "storage.not_found",
            Self::Storage(StorageFailure::WriteFailure(_)) => "storage.write_failure",
            Self::Token(TokenFailure::Expired) => "token.expired",
            Self::Token(TokenFailure::NotFound) => "token.not_found",
            Self::Token(TokenFailure::NonReversible) => "token.non_reversible",
            Self::Compliance(ComplianceFailure::UnknownRegulation(_)) => {
                "compliance.unknown_regulation"
            }
            Self::Compliance(ComplianceFailure::InvalidPolicy(_)) => "compliance.invalid_policy",
            Self::Configuration(ConfigurationFailure::Rejected { .. }) => "config.rejected",
            Self::Configuration(ConfigurationFailure::Load(_)) => "config.load",
            Self::KeyNotFound { .. } => "key.not_found",
            Self::AuditUnavailable(_) => "audit.unavailable",
            Self::Cancelled => "cancelled",
            Self::Common(e) => e.kind(),
        }
    }

    /// Whether the error indicates tampering
    pub fn is_integrity_failure(&self) -> bool {
        matches!(self, Self::Integrity(_))
    }
}

impl From<AeadError> for PrivacyError {
    fn from(err: AeadError) -> Self {
        match err {
            AeadError::TagMismatch => Self::Integrity(IntegrityFailure::TagMismatch),
            AeadError::InvalidKeyLength(len) => Self::Encryption(
                EncryptionFailure::InvalidKeyMaterial(format!("expected 32 bytes, got {len}")),
            ),
            AeadError::Cipher(msg) => Self::Encryption(EncryptionFailure::Cipher(msg)),
            AeadError::KeyDerivation(msg) => {
                Self::Encryption(EncryptionFailure::InvalidKeyMaterial(msg))
            }
            AeadError::Common(e) => Self::Common(e),
        }
    }
}

impl From<serde_json::Error> for PrivacyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl From<std::io::Error> for PrivacyError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

impl ErrorClassification for PrivacyError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Authentication(AuthenticationFailure::LockedOut { .. }) => true,
            Self::Authentication(AuthenticationFailure::Timeout) => true,
            Self::Storage(StorageFailure::WriteFailure(_)) => true,
            Self::AuditUnavailable(_) => true,
            Self::Common(e) => e.is_retryable(),
            _ => false,
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Integrity(_) => ErrorSeverity::Critical,
            Self::AuditUnavailable(_) => ErrorSeverity::Critical,
            Self::Encryption(_) => ErrorSeverity::Error,
            Self::KeyNotFound { .. } => ErrorSeverity::Error,
            Self::Authentication(AuthenticationFailure::Cancelled) => ErrorSeverity::Info,
            Self::Authentication(AuthenticationFailure::HardwareUnavailable) => {
                ErrorSeverity::Error
            }
            Self::Authentication(_) => ErrorSeverity::Warning,
            Self::Storage(StorageFailure::NotFound(_)) => ErrorSeverity::Warning,
            Self::Storage(StorageFailure::WriteFailure(_)) => ErrorSeverity::Error,
            Self::Token(_) => ErrorSeverity::Warning,
            Self::Compliance(_) => ErrorSeverity::Error,
            Self::Configuration(_) => ErrorSeverity::Error,
            Self::Cancelled => ErrorSeverity::Info,
            Self::Common(e) => e.severity(),
        }
    }

    fn is_critical(&self) -> bool {
        match self {
            Self::Integrity(_) | Self::AuditUnavailable(_) => true,
            Self::Common(e) => e.is_critical(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Authentication(AuthenticationFailure::LockedOut { retry_after }) => {
                Some(*retry_after)
            }
            Self::Common(e) => e.retry_after(),
            _ => None,
        }
    }
}
