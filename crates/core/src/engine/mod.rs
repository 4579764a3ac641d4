//! The privacy engine coordinator
//!
//! [`PrivacyEngine`] owns the configuration and every service, bounds
//! concurrent requests, routes domain-engine requests and runs the periodic
//! maintenance task. Construct it through [`PrivacyEngine::builder`].

mod builder;
mod maintenance;
mod signals;

use std::collections::BTreeMap;
use std::sync::Arc;

use aegis_common::{CommonError, PatternMatch, PatternScanner, SharedClock};
use tokio::sync::{broadcast, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use builder::PrivacyEngineBuilder;
pub use maintenance::MaintenanceReport;
use maintenance::Maintenance;
pub use signals::SECURITY_FAILURE_WINDOW;

use crate::anonymize::{AnonymizationLevel, AnonymizationResult, Anonymizer, Record};
use crate::audit::{
    AuditEntry, AuditEvent, AuditEventType, AuditFilter, AuditLogger, AuditOutcome,
    AuditSeverity, AuditStatistics, ChainVerification,
};
use crate::biometric::{AuthenticationOptions, AuthenticationOutcome, BiometricAuthenticator};
use crate::compliance::{report, ComplianceEngine, ComplianceIssue, ComplianceStatus, Regulation};
use crate::config::{ConfigStore, PrivacyConfiguration};
use crate::crypto::{EncryptedEnvelope, EncryptionService};
use crate::domain::{PayloadProcessor, ProtectionOperation, ProtectionRequest, ProtectionResponse};
use crate::error::{AuthenticationFailure, IntegrityFailure, PrivacyError, PrivacyResult};
use crate::export::ExportFormat;
use crate::keys::{EncryptionContext, KeyMetadata, KeyStore, SweepReport};
use crate::storage::{SecureStorageOptions, SecureStorageService};
use crate::tokenize::{TokenizationContext, TokenizationResult, Tokenizer};

/// Unified entry point to the privacy services
///
/// Every state-changing call is audited by the service it lands in; calls
/// that fail before reaching a service (disabled biometrics, a context
/// mismatch on unprotect, a rejected configuration) are audited here.
pub struct PrivacyEngine {
    config: Arc<ConfigStore>,
    clock: SharedClock,
    audit: Arc<AuditLogger>,
    keys: Arc<KeyStore>,
    encryption: Arc<EncryptionService>,
    biometric: Arc<BiometricAuthenticator>,
    storage: Arc<SecureStorageService>,
    anonymizer: Anonymizer,
    tokenizer: Arc<Tokenizer>,
    compliance: Arc<ComplianceEngine>,
    maintenance: Arc<Maintenance>,
    scanner: PatternScanner,
    limiter: Arc<Semaphore>,
    shutdown: CancellationToken,
    config_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for PrivacyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivacyEngine")
            .field("config", &self.config.current())
            .field("available_permits", &self.limiter.available_permits())
            .finish_non_exhaustive()
    }
}

impl PrivacyEngine {
    /// Builder with in-memory defaults
    pub fn builder() -> PrivacyEngineBuilder {
        PrivacyEngineBuilder::default()
    }

    async fn permit(&self) -> PrivacyResult<SemaphorePermit<'_>> {
        self.limiter.acquire().await.map_err(|_| PrivacyError::Cancelled)
    }

    /// Snapshot of the configuration in effect
    pub fn configuration(&self) -> Arc<PrivacyConfiguration> {
        self.config.current()
    }

    /// The audit journal
    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.audit
    }

    /// The key store backing every context
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// The platform authenticator
    pub fn biometric(&self) -> &Arc<BiometricAuthenticator> {
        &self.biometric
    }

    /// The tokenizer and its vault
    pub fn tokenizer(&self) -> &Arc<Tokenizer> {
        &self.tokenizer
    }

    /// The compliance engine
    pub fn compliance(&self) -> &Arc<ComplianceEngine> {
        &self.compliance
    }

    // -- encryption ---------------------------------------------------------

    /// Encrypt under the active key of `context`
    pub async fn encrypt(
        &self,
        data: &[u8],
        context: &EncryptionContext,
    ) -> PrivacyResult<EncryptedEnvelope> {
        let _permit = self.permit().await?;
        self.encryption.encrypt(data, context).await
    }

    /// Like [`encrypt`](Self::encrypt), aborting when `cancel` fires
    pub async fn encrypt_cancellable(
        &self,
        data: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> PrivacyResult<EncryptedEnvelope> {
        let _permit = self.permit().await?;
        self.encryption.encrypt_cancellable(data, context, cancel).await
    }

    /// Decrypt with the key named in the envelope
    pub async fn decrypt(&self, envelope: &EncryptedEnvelope) -> PrivacyResult<Vec<u8>> {
        let _permit = self.permit().await?;
        self.encryption.decrypt(envelope).await
    }

    /// Like [`decrypt`](Self::decrypt), aborting when `cancel` fires
    pub async fn decrypt_cancellable(
        &self,
        envelope: &EncryptedEnvelope,
        cancel: &CancellationToken,
    ) -> PrivacyResult<Vec<u8>> {
        let _permit = self.permit().await?;
        self.encryption.decrypt_cancellable(envelope, cancel).await
    }

    /// Decrypt a serialized envelope
    pub async fn decrypt_bytes(&self, bytes: &[u8]) -> PrivacyResult<Vec<u8>> {
        let _permit = self.permit().await?;
        self.encryption.decrypt_bytes(bytes).await
    }

    /// Decrypt and reseal under the context's active key
    pub async fn reencrypt(&self, envelope: &EncryptedEnvelope) -> PrivacyResult<EncryptedEnvelope> {
        let _permit = self.permit().await?;
        self.encryption.reencrypt(envelope).await
    }

    // -- keys ---------------------------------------------------------------

    /// Issue a new key for `context`, moving stored items and token
    /// originals held under it onto the new key
    pub async fn rotate_key(&self, context: &EncryptionContext) -> PrivacyResult<KeyMetadata> {
        let _permit = self.permit().await?;
        let metadata = self.keys.rotate(context).await?;
        self.migrate_context(context).await?;
        Ok(metadata)
    }

    /// Revoke every key of a context; returns how many were revoked
    ///
    /// Engine-owned data under the context is re-encrypted while the revoked
    /// keys are still inside their grace window.
    pub async fn revoke_keys(&self, context: &EncryptionContext) -> PrivacyResult<usize> {
        let _permit = self.permit().await?;
        let revoked = self.keys.revoke(context).await?;
        self.migrate_context(context).await?;
        Ok(revoked)
    }

    async fn migrate_context(&self, context: &EncryptionContext) -> PrivacyResult<usize> {
        if context == self.storage.context() {
            self.storage.migrate_items().await
        } else if context == self.tokenizer.context() {
            self.tokenizer.migrate().await
        } else {
            Ok(0)
        }
    }

    /// Every key of `context`, newest first
    pub async fn list_keys(&self, context: &EncryptionContext) -> PrivacyResult<Vec<KeyMetadata>> {
        self.keys.list_keys(context).await
    }

    /// Retire keys past their grace window and rotate overdue ones
    pub async fn sweep_keys(&self) -> PrivacyResult<Vec<SweepReport>> {
        let _permit = self.permit().await?;
        self.keys.sweep_all().await
    }

    // -- secure storage -----------------------------------------------------

    /// Encrypt and persist an item under `key`
    pub async fn store(
        &self,
        key: &str,
        data: &[u8],
        options: &SecureStorageOptions,
    ) -> PrivacyResult<()> {
        let _permit = self.permit().await?;
        self.storage.store(key, data, options).await
    }

    /// Read and decrypt an item, authenticating first if the options require it
    pub async fn retrieve(&self, key: &str, options: &SecureStorageOptions) -> PrivacyResult<Vec<u8>> {
        let _permit = self.permit().await?;
        self.storage.retrieve(key, options).await
    }

    /// Securely delete an item; `false` when nothing was stored
    pub async fn delete(&self, key: &str) -> PrivacyResult<bool> {
        let _permit = self.permit().await?;
        self.storage.delete(key).await
    }

    /// Keys of every stored item
    pub async fn list_stored(&self) -> PrivacyResult<Vec<String>> {
        self.storage.list().await
    }

    // -- biometric ----------------------------------------------------------

    /// Prompt through the platform authenticator
    pub async fn authenticate(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
    ) -> PrivacyResult<AuthenticationOutcome> {
        self.authenticate_cancellable(reason, options, &CancellationToken::new()).await
    }

    /// Prompt through the platform authenticator
    ///
    /// With biometrics disabled in the configuration, the attempt is refused
    /// and audited without prompting.
    pub async fn authenticate_cancellable(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<AuthenticationOutcome> {
        let _permit = self.permit().await?;
        if !self.config.current().biometric_enabled {
            let event = AuditEvent::new(AuditEventType::AuthenticationFailed)
                .with("reason", reason)
                .with("cause", "biometric_disabled");
            let refused: PrivacyResult<AuthenticationOutcome> = Err(AuthenticationFailure::Failed(
                "biometric authentication is disabled".to_string(),
            )
            .into());
            return self.audit.record_outcome(event, refused).await;
        }
        self.biometric.authenticate_cancellable(reason, options, cancel).await
    }

    // -- anonymization ------------------------------------------------------

    /// Anonymize every field of a record
    pub async fn anonymize_record(
        &self,
        record: &Record,
        level: AnonymizationLevel,
    ) -> PrivacyResult<AnonymizationResult<Record>> {
        self.anonymize_record_cancellable(record, level, &CancellationToken::new()).await
    }

    /// Like [`anonymize_record`](Self::anonymize_record), aborting when `cancel` fires
    #[instrument(skip(self, record, cancel), fields(fields = record.len(), level = %level))]
    pub async fn anonymize_record_cancellable(
        &self,
        record: &Record,
        level: AnonymizationLevel,
        cancel: &CancellationToken,
    ) -> PrivacyResult<AnonymizationResult<Record>> {
        let _permit = self.permit().await?;
        let result = self.anonymizer.anonymize_record_cancellable(record, level, cancel);
        let event = anonymized_event("record", level, record.len(), &result);
        self.audit.record_outcome(event, result).await
    }

    /// Anonymize free text
    pub async fn anonymize_text(
        &self,
        text: &str,
        level: AnonymizationLevel,
    ) -> PrivacyResult<AnonymizationResult<String>> {
        self.anonymize_text_cancellable(text, level, &CancellationToken::new()).await
    }

    /// Like [`anonymize_text`](Self::anonymize_text), aborting when `cancel` fires
    #[instrument(skip(self, text, cancel), fields(bytes = text.len(), level = %level))]
    pub async fn anonymize_text_cancellable(
        &self,
        text: &str,
        level: AnonymizationLevel,
        cancel: &CancellationToken,
    ) -> PrivacyResult<AnonymizationResult<String>> {
        let _permit = self.permit().await?;
        let result = self.anonymizer.anonymize_text_cancellable(text, level, cancel);
        let event = anonymized_event("text", level, text.len(), &result);
        self.audit.record_outcome(event, result).await
    }

    // -- tokenization -------------------------------------------------------

    /// Replace sensitive spans with tokens
    pub async fn tokenize(
        &self,
        data: &str,
        context: &TokenizationContext,
    ) -> PrivacyResult<TokenizationResult> {
        let _permit = self.permit().await?;
        self.tokenizer.tokenize(data, context).await
    }

    /// Restore the originals of reversible tokens
    pub async fn detokenize(&self, tokenized: &str) -> PrivacyResult<String> {
        let _permit = self.permit().await?;
        self.tokenizer.detokenize(tokenized).await
    }

    /// Expire every session-retention token; returns how many were live
    pub async fn end_token_session(&self) -> usize {
        self.tokenizer.end_session().await
    }

    /// Sensitive spans in `text`; empty when scanning is disabled
    pub fn detect_sensitive(&self, text: &str) -> Vec<PatternMatch> {
        if self.config.current().sensitive_scan_enabled {
            self.scanner.scan(text)
        } else {
            Vec::new()
        }
    }

    // -- compliance ---------------------------------------------------------

    /// Evaluate one regulation
    pub async fn evaluate_compliance(&self, regulation: &Regulation) -> PrivacyResult<ComplianceStatus> {
        self.compliance.evaluate(regulation).await
    }

    /// Evaluate every regulation enabled in the configuration
    pub async fn evaluate_enabled(&self) -> PrivacyResult<Vec<ComplianceStatus>> {
        let config = self.config.current();
        self.compliance.evaluate_all(&config.enabled_regulations).await
    }

    /// Issues recorded by past evaluations
    pub async fn compliance_issues(&self) -> Vec<ComplianceIssue> {
        self.compliance.issues().await
    }

    /// Evaluate the enabled regulations and render the result
    pub async fn compliance_report(&self, format: ExportFormat) -> PrivacyResult<String> {
        let statuses = self.evaluate_enabled().await?;
        report::render(&statuses, format)
    }

    // -- audit --------------------------------------------------------------

    /// Audit entries matching `filter`
    pub async fn query_audit(&self, filter: &AuditFilter) -> PrivacyResult<Vec<AuditEntry>> {
        self.audit.query(filter).await
    }

    /// Verify the audit chain, recording a critical entry on divergence
    pub async fn verify_audit_chain(&self) -> PrivacyResult<ChainVerification> {
        match self.audit.verify_chain_integrity().await {
            Err(PrivacyError::Integrity(IntegrityFailure::AuditChainDivergence { index })) => {
                warn!(index, "Audit chain divergence detected");
                let event = AuditEvent::new(AuditEventType::IntegrityViolation)
                    .severity(AuditSeverity::Critical)
                    .outcome(AuditOutcome::Failure)
                    .with("component", "audit_chain")
                    .with("index", index);
                self.audit.append(event).await?;
                Err(IntegrityFailure::AuditChainDivergence { index }.into())
            }
            other => other,
        }
    }

    /// Counts over entries at or after `since`
    pub async fn audit_statistics(
        &self,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> PrivacyResult<AuditStatistics> {
        self.audit.statistics(since).await
    }

    /// Render matching entries as JSON or CSV
    pub async fn export_audit(&self, filter: &AuditFilter, format: ExportFormat) -> PrivacyResult<String> {
        self.audit.export(filter, format).await
    }

    /// Live feed of appended audit entries
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.audit.subscribe()
    }

    // -- configuration ------------------------------------------------------

    /// Validate and apply a new configuration
    ///
    /// A rejected candidate is audited and leaves the current configuration
    /// in effect. An accepted one is audited, naming the changed fields,
    /// before any service sees it. Re-enabling auditing is the exception: that
    /// change is recorded right after the logger is switched back on, and is
    /// rolled back if the entry cannot be written.
    #[instrument(skip_all)]
    pub async fn update_configuration(
        &self,
        candidate: PrivacyConfiguration,
    ) -> PrivacyResult<Arc<PrivacyConfiguration>> {
        let _guard = self.config_lock.lock().await;
        let previous = self.config.current();

        if let Err(failure) = candidate.validate() {
            warn!(error = %failure, "Configuration update rejected");
            let event = AuditEvent::new(AuditEventType::ConfigurationRejected);
            return self.audit.record_outcome(event, Err(failure.into())).await;
        }

        let changed = changed_fields(&previous, &candidate)?;
        if changed.is_empty() {
            return Ok(previous);
        }
        let event = || AuditEvent::new(AuditEventType::ConfigurationChanged).with("fields", changed.clone());

        // A disabled logger would drop the entry, so re-enabling is recorded
        // once the logger is back on
        let reenabling = candidate.audit_enabled && !previous.audit_enabled;
        if !reenabling {
            self.audit.append(event()).await?;
        }

        let applied = self.config.replace(candidate)?;
        self.apply(&applied);
        if reenabling {
            if let Err(e) = self.audit.append(event()).await {
                let restored = self.config.replace((*previous).clone())?;
                self.apply(&restored);
                return Err(e);
            }
        }
        if applied.max_concurrent_requests != previous.max_concurrent_requests {
            warn!(
                max_concurrent_requests = applied.max_concurrent_requests,
                "Concurrency limit takes effect on the next engine build"
            );
        }
        info!(fields = ?changed, "Configuration updated");
        Ok(applied)
    }

    fn apply(&self, config: &PrivacyConfiguration) {
        self.audit.set_enabled(config.audit_enabled);
        self.audit.set_max_segment_bytes(config.audit_max_size);
        self.keys.set_schedule(config.rotation_schedule());
        self.biometric.set_session_ttl(config.biometric_session_ttl);
        self.storage.set_biometric_enabled(config.biometric_enabled);
        self.tokenizer.set_session_ttl(config.token_session_ttl);
    }

    // -- domain engines -----------------------------------------------------

    /// Serve a domain-engine request
    ///
    /// Protect and unprotect are bound to the source engine's own context:
    /// an envelope sealed for another engine is refused.
    #[instrument(skip(self, request), fields(source = %request.source, operation = request.operation.name(), bytes = request.payload.len()))]
    pub async fn handle(&self, request: ProtectionRequest) -> PrivacyResult<ProtectionResponse> {
        let ProtectionRequest { source, payload, operation } = request;
        let context = source.context()?;
        let mut response = ProtectionResponse::new(source, &operation, Vec::new());

        match &operation {
            ProtectionOperation::Protect => {
                let sensitive = self
                    .config
                    .current()
                    .sensitive_scan_enabled
                    .then(|| String::from_utf8_lossy(&payload).into_owned())
                    .map(|text| self.scanner.contains_sensitive(&text));
                let envelope = self.encrypt(&payload, &context).await?;
                response.key_id = Some(envelope.key_id);
                response.sensitive_detected = sensitive;
                response.payload = envelope.to_bytes();
            }
            ProtectionOperation::Unprotect => {
                let event = AuditEvent::new(AuditEventType::DataDecrypted)
                    .with("source", source.to_string())
                    .with("ciphertext_bytes", payload.len());
                let envelope = match EncryptedEnvelope::from_bytes(&payload) {
                    Ok(envelope) => envelope,
                    Err(err) => return self.audit.record_outcome(event, Err(err)).await,
                };
                if envelope.context != context {
                    let denied = event.with("context", envelope.context.as_str());
                    let refused: PrivacyResult<ProtectionResponse> = Err(CommonError::unauthorized(format!(
                        "{source} may not unprotect payloads sealed for '{}'",
                        envelope.context
                    ))
                    .into());
                    return self.audit.record_outcome(denied, refused).await;
                }
                response.payload = self.decrypt(&envelope).await?;
            }
            ProtectionOperation::Anonymize { level } => {
                let result = self.anonymize_text(utf8(&payload)?, *level).await?;
                response.privacy_score = Some(result.privacy_score);
                response.payload = result.data.into_bytes();
            }
            ProtectionOperation::Tokenize { context: token_context } => {
                let result = self.tokenize(utf8(&payload)?, token_context).await?;
                response.token_count = Some(result.token_count());
                response.payload = result.tokenized.into_bytes();
            }
        }
        Ok(response)
    }

    /// Seal `payload` under the processor's context and hand it the envelope
    pub async fn deliver(
        &self,
        processor: &dyn PayloadProcessor,
        payload: &[u8],
    ) -> PrivacyResult<Vec<u8>> {
        let context = processor.engine().context()?;
        let envelope = self.encrypt(payload, &context).await?;
        processor.process(envelope.to_bytes()).await
    }

    // -- lifecycle ----------------------------------------------------------

    /// Run one maintenance pass now
    pub async fn run_maintenance(&self) -> PrivacyResult<MaintenanceReport> {
        let _permit = self.permit().await?;
        self.maintenance.run_once().await
    }

    /// Start the periodic maintenance task; `false` if already running
    pub async fn start_maintenance(&self) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        self.maintenance.start(self.shutdown.child_token()).await
    }

    /// Stop the maintenance task, refuse new requests and record
    /// `engine_stopped`
    pub async fn shutdown(&self) -> PrivacyResult<()> {
        if self.shutdown.is_cancelled() {
            return Ok(());
        }
        self.shutdown.cancel();
        self.limiter.close();
        self.maintenance.join().await;

        self.audit.append(AuditEvent::new(AuditEventType::EngineStopped)).await?;
        info!(at = %self.clock.now(), "Privacy engine stopped");
        Ok(())
    }

    /// Whether shutdown has begun
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn utf8(payload: &[u8]) -> PrivacyResult<&str> {
    std::str::from_utf8(payload)
        .map_err(|_| CommonError::validation("payload", "must be valid UTF-8").into())
}

fn anonymized_event<T>(
    kind: &str,
    level: AnonymizationLevel,
    size: usize,
    result: &PrivacyResult<AnonymizationResult<T>>,
) -> AuditEvent {
    let mut event = AuditEvent::new(AuditEventType::DataAnonymized)
        .with("kind", kind)
        .with("level", level.to_string())
        .with("size", size);
    if let Ok(result) = result {
        event = event
            .with("privacy_score", result.privacy_score)
            .with("utility_score", result.utility_score);
    }
    event
}

/// Top-level field names whose serialized values differ
fn changed_fields(
    previous: &PrivacyConfiguration,
    candidate: &PrivacyConfiguration,
) -> PrivacyResult<Vec<String>> {
    let as_map = |config: &PrivacyConfiguration| -> PrivacyResult<BTreeMap<String, serde_json::Value>> {
        Ok(serde_json::from_value(serde_json::to_value(config)?)?)
    };
    let before = as_map(previous)?;
    let after = as_map(candidate)?;
    Ok(after
        .into_iter()
        .filter(|(field, value)| before.get(field) != Some(value))
        .map(|(field, _)| field)
        .collect())
}
