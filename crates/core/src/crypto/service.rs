//! Authenticated encryption under context keys

use std::sync::Arc;
use std::time::Instant;

use aegis_common::{AeadCipher, CommonError, SharedClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use zeroize::Zeroizing;

use super::envelope::EncryptedEnvelope;
use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::error::{PrivacyError, PrivacyResult};
use crate::keys::{EncryptionContext, KeyStore};

fn join_error(err: tokio::task::JoinError) -> PrivacyError {
    PrivacyError::Common(CommonError::internal(format!("cipher task failed: {err}")))
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl std::future::Future<Output = PrivacyResult<T>>,
) -> PrivacyResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PrivacyError::Cancelled),
        result = operation => result,
    }
}

/// Encrypts and decrypts payloads with the active key of a context
///
/// AEAD work runs on the blocking pool while the caller holds a read lease
/// on the context's ring. Every public call appends one audit entry carrying
/// the context and byte counts.
pub struct EncryptionService {
    keys: Arc<KeyStore>,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").field("keys", &self.keys).finish()
    }
}

impl EncryptionService {
    /// Service sealing under keys from `keys`
    pub fn new(keys: Arc<KeyStore>, audit: Arc<AuditLogger>, clock: SharedClock) -> Self {
        Self { keys, audit, clock }
    }

    /// The key store in use
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Encrypt under the active key of `context`
    pub async fn encrypt(
        &self,
        data: &[u8],
        context: &EncryptionContext,
    ) -> PrivacyResult<EncryptedEnvelope> {
        self.encrypt_cancellable(data, context, &CancellationToken::new()).await
    }

    /// Encrypt, aborting when `cancel` fires
    #[instrument(skip(self, data, cancel), fields(context = %context, bytes = data.len()))]
    pub async fn encrypt_cancellable(
        &self,
        data: &[u8],
        context: &EncryptionContext,
        cancel: &CancellationToken,
    ) -> PrivacyResult<EncryptedEnvelope> {
        let started = Instant::now();
        let result = cancellable(cancel, self.seal(data, context)).await;

        let mut event = AuditEvent::new(AuditEventType::DataEncrypted)
            .with("context", context.as_str())
            .with("bytes", data.len())
            .with("duration_ms", started.elapsed().as_millis() as u64);
        if let Ok(envelope) = &result {
            event = event
                .with("key_id", envelope.key_id.to_string())
                .with("ciphertext_bytes", envelope.ciphertext.len());
        }
        self.audit.record_outcome(event, result).await
    }

    /// Decrypt with the key named in the envelope
    pub async fn decrypt(&self, envelope: &EncryptedEnvelope) -> PrivacyResult<Vec<u8>> {
        self.decrypt_cancellable(envelope, &CancellationToken::new()).await
    }

    /// Decrypt, aborting when `cancel` fires
    #[instrument(skip_all, fields(context = %envelope.context, key_id = %envelope.key_id))]
    pub async fn decrypt_cancellable(
        &self,
        envelope: &EncryptedEnvelope,
        cancel: &CancellationToken,
    ) -> PrivacyResult<Vec<u8>> {
        let started = Instant::now();
        let result = cancellable(cancel, self.open(envelope)).await;

        let mut event = AuditEvent::new(AuditEventType::DataDecrypted)
            .with("context", envelope.context.as_str())
            .with("key_id", envelope.key_id.to_string())
            .with("ciphertext_bytes", envelope.ciphertext.len())
            .with("duration_ms", started.elapsed().as_millis() as u64);
        if let Ok(plaintext) = &result {
            event = event.with("bytes", plaintext.len());
        }
        self.audit.record_outcome(event, result).await
    }

    /// Parse serialized envelope bytes, then decrypt
    ///
    /// Unparseable input is audited as a failed decryption.
    pub async fn decrypt_bytes(&self, bytes: &[u8]) -> PrivacyResult<Vec<u8>> {
        match EncryptedEnvelope::from_bytes(bytes) {
            Ok(envelope) => self.decrypt(&envelope).await,
            Err(err) => {
                let event = AuditEvent::new(AuditEventType::DataDecrypted)
                    .with("ciphertext_bytes", bytes.len());
                self.audit.record_outcome(event, Err(err)).await
            }
        }
    }

    /// Migrate an envelope to the context's active key
    ///
    /// When the key changes, the old key's outstanding-envelope count drops
    /// so a fully migrated key can retire before its grace deadline.
    #[instrument(skip_all, fields(context = %envelope.context, key_id = %envelope.key_id))]
    pub async fn reencrypt(&self, envelope: &EncryptedEnvelope) -> PrivacyResult<EncryptedEnvelope> {
        let result = self.migrate(envelope).await;

        let mut event = AuditEvent::new(AuditEventType::DataReencrypted)
            .with("context", envelope.context.as_str())
            .with("from_key_id", envelope.key_id.to_string());
        if let Ok(fresh) = &result {
            event = event.with("to_key_id", fresh.key_id.to_string());
        }
        self.audit.record_outcome(event, result).await
    }

    /// Re-seal under the active key without auditing; callers audit their own operation
    pub(crate) async fn migrate(&self, envelope: &EncryptedEnvelope) -> PrivacyResult<EncryptedEnvelope> {
        let plaintext = Zeroizing::new(self.open(envelope).await?);
        let fresh = self.seal(&plaintext, &envelope.context).await?;
        if fresh.key_id != envelope.key_id {
            self.keys.record_migrated(&envelope.context, envelope.key_id).await?;
        }
        Ok(fresh)
    }

    /// Encrypt without auditing; callers audit their own operation
    pub(crate) async fn seal(
        &self,
        data: &[u8],
        context: &EncryptionContext,
    ) -> PrivacyResult<EncryptedEnvelope> {
        let lease = self.keys.lease_active(context).await?;
        let envelope = EncryptedEnvelope::new(context.clone(), lease.handle().id(), self.clock.now());

        let aad = envelope.associated_data();
        let material = lease.handle().material().clone();
        let plaintext = Zeroizing::new(data.to_vec());
        let sealed = tokio::task::spawn_blocking(move || {
            AeadCipher::new(material.expose())?.seal(&plaintext, &aad)
        })
        .await
        .map_err(join_error)??;

        lease.record_envelope();
        debug!(context = %context, key_id = %envelope.key_id, "Sealed payload");
        Ok(envelope.with_sealed(sealed))
    }

    /// Decrypt without auditing; callers audit their own operation
    pub(crate) async fn open(&self, envelope: &EncryptedEnvelope) -> PrivacyResult<Vec<u8>> {
        let lease = self.keys.lease_for_decrypt(&envelope.context, envelope.key_id).await?;

        let aad = envelope.associated_data();
        let sealed = envelope.sealed();
        let material = lease.handle().material().clone();
        let plaintext =
            tokio::task::spawn_blocking(move || AeadCipher::new(material.expose())?.open(&sealed, &aad))
                .await
                .map_err(join_error)??;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for crypto::service.
    use std::time::Duration;

    use aegis_common::MockClock;

    use super::*;
    use crate::audit::{AuditFilter, MemoryAuditStore};
    use crate::error::IntegrityFailure;
    use crate::keys::RotationSchedule;
    use crate::storage::MemoryBackend;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn service(clock: &MockClock) -> (EncryptionService, Arc<AuditLogger>) {
        let audit = Arc::new(AuditLogger::new(
            Arc::new(MemoryAuditStore::new()),
            clock.shared(),
            true,
            u64::MAX,
        ));
        let keys = Arc::new(KeyStore::new(
            Arc::new(MemoryBackend::new()),
            AeadCipher::new(AeadCipher::generate_key().expose()).unwrap(),
            RotationSchedule::new(90 * DAY, 7 * DAY),
            clock.shared(),
            audit.clone(),
        ));
        (EncryptionService::new(keys, audit.clone(), clock.shared()), audit)
    }

    /// Validates `EncryptionService::encrypt` behavior for the round trip
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms decrypt returns the original bytes.
    /// - Confirms both calls are audited with byte counts and no plaintext.
    #[tokio::test]
    async fn test_encrypt_decrypt_round_trip() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let (service, audit) = service(&clock);
        let ctx = EncryptionContext::general();

        let envelope = service.encrypt(b"hello", &ctx).await.unwrap();
        assert_ne!(envelope.ciphertext, b"hello");
        assert_eq!(service.decrypt(&envelope).await.unwrap(), b"hello");

        let encrypted = audit
            .query(&AuditFilter::new().event_type(AuditEventType::DataEncrypted))
            .await
            .unwrap();
        assert_eq!(encrypted.len(), 1);
        assert_eq!(encrypted[0].event.metadata["bytes"], 5);
        let trail = serde_json::to_string(&audit.query(&AuditFilter::new()).await.unwrap()).unwrap();
        assert!(!trail.contains("hello"));
    }

    /// Validates `EncryptionService::decrypt` behavior for the tampered
    /// ciphertext scenario.
    ///
    /// Assertions:
    /// - Ensures a modified tag fails with `TagMismatch`.
    /// - Ensures a modified header fails as an integrity failure.
    #[tokio::test]
    async fn test_tampering_detected() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let (service, _) = service(&clock);
        let envelope = service.encrypt(b"payload", &EncryptionContext::general()).await.unwrap();

        let mut bad_tag = envelope.clone();
        bad_tag.tag[0] ^= 0x01;
        assert!(matches!(
            service.decrypt(&bad_tag).await,
            Err(PrivacyError::Integrity(IntegrityFailure::TagMismatch))
        ));

        let mut bad_time = envelope.clone();
        bad_time.created_at += chrono::Duration::milliseconds(1);
        assert!(service.decrypt(&bad_time).await.unwrap_err().is_integrity_failure());
    }

    /// Validates `EncryptionService::reencrypt` behavior for the key
    /// migration scenario.
    ///
    /// Assertions:
    /// - Confirms the migrated envelope uses the new key and still decrypts.
    /// - Confirms the old key's outstanding count returns to zero.
    #[tokio::test]
    async fn test_reencrypt_migrates_to_active_key() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let (service, _) = service(&clock);
        let ctx = EncryptionContext::general();

        let old = service.encrypt(b"migrate me", &ctx).await.unwrap();
        let rotated = service.keys().rotate(&ctx).await.unwrap();
        let fresh = service.reencrypt(&old).await.unwrap();

        assert_eq!(fresh.key_id, rotated.id);
        assert_eq!(service.decrypt(&fresh).await.unwrap(), b"migrate me");
        let keys = service.keys().list_keys(&ctx).await.unwrap();
        let old_meta = keys.iter().find(|k| k.id == old.key_id).unwrap();
        assert_eq!(old_meta.outstanding_envelopes, 0);
    }

    /// Validates `EncryptionService::encrypt_cancellable` behavior for the
    /// pre-cancelled token scenario.
    ///
    /// Assertions:
    /// - Confirms the call returns `Cancelled` and records a cancelled entry.
    #[tokio::test]
    async fn test_cancelled_encrypt() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let (service, audit) = service(&clock);
        let token = CancellationToken::new();
        token.cancel();

        let err = service
            .encrypt_cancellable(b"x", &EncryptionContext::general(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, PrivacyError::Cancelled));
        let entries = audit
            .query(&AuditFilter::new().event_type(AuditEventType::DataEncrypted))
            .await
            .unwrap();
        assert_eq!(entries[0].event.outcome, crate::audit::AuditOutcome::Cancelled);
    }
}
