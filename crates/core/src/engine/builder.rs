//! Explicit construction of a [`PrivacyEngine`] with injected backends

use std::sync::Arc;

use aegis_common::{PatternScanner, SharedClock, SystemClock};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::maintenance::Maintenance;
use super::signals::EngineSignals;
use super::PrivacyEngine;
use crate::anonymize::{Anonymizer, AnonymizerConfig};
use crate::audit::{AuditEvent, AuditEventType, AuditLogger, AuditStore, MemoryAuditStore};
use crate::biometric::{BiometricAuthenticator, NoHardwareAuthenticator, PlatformAuthenticator};
use crate::compliance::ComplianceEngine;
use crate::config::{ConfigStore, PrivacyConfiguration};
use crate::crypto::EncryptionService;
use crate::error::PrivacyResult;
use crate::keys::{KeyStore, MasterKeySource};
use crate::storage::{MemoryBackend, SecureStorageService, StorageBackend};
use crate::tokenize::Tokenizer;

/// Builder for [`PrivacyEngine`]
///
/// Anything not injected gets an in-memory or headless default: memory
/// storage and audit stores, no biometric hardware, an ephemeral master key
/// and the system clock.
#[derive(Default)]
pub struct PrivacyEngineBuilder {
    config: PrivacyConfiguration,
    storage: Option<Arc<dyn StorageBackend>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    platform: Option<Arc<dyn PlatformAuthenticator>>,
    master_key: Option<MasterKeySource>,
    clock: Option<SharedClock>,
    anonymizer: AnonymizerConfig,
}

impl std::fmt::Debug for PrivacyEngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyEngineBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

impl PrivacyEngineBuilder {
    /// Initial configuration, validated at build
    pub fn config(mut self, config: PrivacyConfiguration) -> Self {
        self.config = config;
        self
    }

    /// Backend for key rings and stored items; in-memory by default
    pub fn storage(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(backend);
        self
    }

    /// Audit persistence; in-memory by default
    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    /// Biometric facility; none by default, so prompts report no hardware
    pub fn platform_authenticator(mut self, platform: Arc<dyn PlatformAuthenticator>) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Source of the key-encryption key; ephemeral by default
    pub fn master_key(mut self, source: MasterKeySource) -> Self {
        self.master_key = Some(source);
        self
    }

    /// Time source for every component
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Field roles and parameters for anonymization
    pub fn anonymizer(mut self, config: AnonymizerConfig) -> Self {
        self.anonymizer = config;
        self
    }

    /// Validate the configuration, wire every service and record
    /// `engine_started`
    pub async fn build(self) -> PrivacyResult<PrivacyEngine> {
        let config = Arc::new(ConfigStore::new(self.config)?);
        let current = config.current();
        let clock = self.clock.unwrap_or_else(SystemClock::shared);
        let storage = self.storage.unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let audit_store = self.audit_store.unwrap_or_else(|| Arc::new(MemoryAuditStore::new()));
        let platform = self.platform.unwrap_or_else(|| Arc::new(NoHardwareAuthenticator));
        let master = self.master_key.unwrap_or_else(MasterKeySource::ephemeral).resolve()?;

        let audit = Arc::new(AuditLogger::new(
            audit_store,
            clock.clone(),
            current.audit_enabled,
            current.audit_max_size,
        ));
        let keys = Arc::new(KeyStore::new(
            storage.clone(),
            master,
            current.rotation_schedule(),
            clock.clone(),
            audit.clone(),
        ));
        let encryption = Arc::new(EncryptionService::new(keys.clone(), audit.clone(), clock.clone()));
        let biometric = Arc::new(
            BiometricAuthenticator::new(platform, audit.clone(), clock.clone())
                .with_session_ttl(current.biometric_session_ttl),
        );
        let secure_storage = Arc::new(SecureStorageService::new(
            storage,
            encryption.clone(),
            biometric.clone(),
            audit.clone(),
            clock.clone(),
        ));
        secure_storage.set_biometric_enabled(current.biometric_enabled);
        let tokenizer = Arc::new(Tokenizer::new(
            encryption.clone(),
            audit.clone(),
            clock.clone(),
            current.token_session_ttl,
        )?);
        let signals = Arc::new(EngineSignals::new(
            config.clone(),
            audit.clone(),
            keys.clone(),
            clock.clone(),
        ));
        let compliance = Arc::new(ComplianceEngine::new(signals, audit.clone(), clock.clone()));
        let maintenance = Arc::new(Maintenance::new(
            config.clone(),
            keys.clone(),
            secure_storage.clone(),
            tokenizer.clone(),
            audit.clone(),
            compliance.clone(),
        ));

        let engine = PrivacyEngine {
            anonymizer: Anonymizer::new(self.anonymizer)?,
            limiter: Arc::new(Semaphore::new(current.max_concurrent_requests)),
            shutdown: CancellationToken::new(),
            config_lock: tokio::sync::Mutex::new(()),
            scanner: PatternScanner::new(),
            config,
            clock,
            audit,
            keys,
            encryption,
            biometric,
            storage: secure_storage,
            tokenizer,
            compliance,
            maintenance,
        };

        engine
            .audit
            .append(
                AuditEvent::new(AuditEventType::EngineStarted)
                    .with("compliance_mode", current.compliance_mode.to_string())
                    .with("encryption_level", current.default_encryption_level.to_string())
                    .with("max_concurrent_requests", current.max_concurrent_requests),
            )
            .await?;
        info!(
            compliance_mode = %current.compliance_mode,
            encryption_level = %current.default_encryption_level,
            "Privacy engine started"
        );
        Ok(engine)
    }
}
