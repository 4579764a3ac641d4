//! # Aegis Core
//!
//! The privacy and security engine.
//!
//! This crate contains:
//! - Key lifecycle management and authenticated encryption
//! - Biometric-gated secure storage
//! - Anonymization and reversible tokenization
//! - A hash-chained audit journal
//! - Regulatory compliance evaluation
//!
//! ## Architecture Principles
//! - Only depends on `aegis-common` for shared primitives
//! - Storage, audit persistence and biometric hardware sit behind traits
//! - No global state: [`PrivacyEngine::builder`] wires explicit instances

pub mod anonymize;
pub mod audit;
pub mod biometric;
pub mod compliance;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod engine;
pub mod error;
pub mod export;
pub mod keys;
pub mod observability;
pub mod storage;
pub mod tokenize;

// Re-export specific items to avoid ambiguity
pub use anonymize::{AnonymizationLevel, AnonymizationResult, Anonymizer, FieldValue, Record};
pub use audit::{
    AuditEntry, AuditEvent, AuditEventType, AuditFilter, AuditLogger, AuditOutcome,
    AuditSeverity, AuditStore, FileAuditStore, MemoryAuditStore,
};
pub use biometric::{
    AuthenticationOptions, AuthenticationOutcome, BiometricAuthenticator, PlatformAuthenticator,
    SoftwareAuthenticator,
};
pub use compliance::{ComplianceEngine, ComplianceIssue, ComplianceMode, ComplianceStatus, Regulation};
pub use config::{ConfigStore, PrivacyConfiguration};
pub use crypto::{EncryptedEnvelope, EncryptionAlgorithm, EncryptionService};
pub use domain::{
    DomainEngine, PayloadProcessor, ProtectionOperation, ProtectionRequest, ProtectionResponse,
};
pub use engine::{MaintenanceReport, PrivacyEngine, PrivacyEngineBuilder};
pub use error::{PrivacyError, PrivacyResult};
pub use export::ExportFormat;
pub use keys::{EncryptionContext, EncryptionLevel, KeyStore, MasterKeySource};
pub use observability::{init_tracing, LogFormat};
pub use storage::{FileBackend, MemoryBackend, SecureStorageOptions, SecureStorageService, StorageBackend};
pub use tokenize::{TokenizationContext, Tokenizer};
