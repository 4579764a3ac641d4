//! Encrypted key-value storage with optional biometric gating

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aegis_common::{impl_status_conversions, CommonError, SharedClock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use parking_lot::Mutex;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::ports::StorageBackend;
use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::biometric::{AuthenticationOptions, BiometricAuthenticator};
use crate::crypto::{EncryptedEnvelope, EncryptionAlgorithm, EncryptionService};
use crate::error::{
    AuthenticationFailure, IntegrityFailure, PrivacyError, PrivacyResult, StorageFailure,
};
use crate::keys::{EncryptionContext, EncryptionLevel};

/// Prefix under which user items are stored in the backend
pub const ITEM_PREFIX: &str = "item/";
const MAX_KEY_LEN: usize = 256;
const ITEM_FORMAT_VERSION: u8 = 1;

/// When a stored item may be read, mirroring platform keychain classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessibilityClass {
    /// Only while the device is unlocked
    #[default]
    WhenUnlocked,
    /// Any time after the first unlock since boot
    AfterFirstUnlock,
    /// Only while a device passcode is set
    WhenPasscodeSet,
    /// Any time
    Always,
}

impl_status_conversions!(AccessibilityClass {
    WhenUnlocked => "when_unlocked",
    AfterFirstUnlock => "after_first_unlock",
    WhenPasscodeSet => "when_passcode_set",
    Always => "always",
});

/// Per-item storage options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecureStorageOptions {
    /// Authenticate before every read
    pub require_biometric: bool,
    /// When the item may be read
    pub accessibility: AccessibilityClass,
    /// Cipher for the item envelope
    pub algorithm: EncryptionAlgorithm,
    /// `Maximum` forces biometric gating regardless of `require_biometric`
    pub level: EncryptionLevel,
    /// Limits for the biometric prompt
    pub authentication: AuthenticationOptions,
}

impl SecureStorageOptions {
    /// Options requiring biometric authentication on read
    pub fn biometric() -> Self {
        Self { require_biometric: true, ..Self::default() }
    }

    /// Set the protection level
    pub fn with_level(mut self, level: EncryptionLevel) -> Self {
        self.level = level;
        self
    }

    fn requires_biometric(&self) -> bool {
        self.require_biometric || self.level.requires_biometric()
    }
}

/// Backend record: the envelope plus the access policy it was stored with
#[derive(Debug, Serialize, Deserialize)]
struct StoredItem {
    version: u8,
    require_biometric: bool,
    level: EncryptionLevel,
    accessibility: AccessibilityClass,
    stored_at: DateTime<Utc>,
    envelope: String,
}

impl StoredItem {
    fn requires_biometric(&self) -> bool {
        self.require_biometric || self.level.requires_biometric()
    }
}

fn validate_key(key: &str) -> PrivacyResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(CommonError::validation_with_value(
            "key",
            format!("must be 1-{MAX_KEY_LEN} bytes"),
            key,
        )
        .into());
    }
    if key.starts_with("__") {
        return Err(CommonError::validation_with_value("key", "'__' prefix is reserved", key).into());
    }
    Ok(())
}

fn is_cancellation(err: &PrivacyError) -> bool {
    matches!(err, PrivacyError::Authentication(AuthenticationFailure::Cancelled) | PrivacyError::Cancelled)
}

/// Encrypted persistence of named secrets
///
/// Every store, retrieve and delete is audited whatever its outcome, except
/// a cancelled biometric prompt, which the authenticator records on its own.
#[derive(Debug)]
pub struct SecureStorageService {
    backend: Arc<dyn StorageBackend>,
    encryption: Arc<EncryptionService>,
    biometric: Arc<BiometricAuthenticator>,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
    context: EncryptionContext,
    biometric_enabled: AtomicBool,
    /// Key that sealed the most recent write; a change means the context rotated
    last_key: Mutex<Option<Uuid>>,
    /// Writers share it; a migration pass holds it exclusively
    item_lock: RwLock<()>,
}

impl SecureStorageService {
    /// Service encrypting items under the `storage` context
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        encryption: Arc<EncryptionService>,
        biometric: Arc<BiometricAuthenticator>,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
    ) -> Self {
        Self {
            backend,
            encryption,
            biometric,
            audit,
            clock,
            context: EncryptionContext::new("storage").unwrap_or_else(|_| EncryptionContext::general()),
            biometric_enabled: AtomicBool::new(true),
            last_key: Mutex::new(None),
            item_lock: RwLock::new(()),
        }
    }

    /// Encrypt items under `context` instead of `storage`
    pub fn with_context(mut self, context: EncryptionContext) -> Self {
        self.context = context;
        self
    }

    /// Key context sealing stored items
    pub fn context(&self) -> &EncryptionContext {
        &self.context
    }

    /// When disabled, any item that needs biometric gating is refused
    pub fn set_biometric_enabled(&self, enabled: bool) {
        self.biometric_enabled.store(enabled, Ordering::Release);
    }

    fn item_key(key: &str) -> String {
        format!("{ITEM_PREFIX}{key}")
    }

    /// Encrypt and persist `data` under `key`, replacing any previous item
    pub async fn store(
        &self,
        key: &str,
        data: &[u8],
        options: &SecureStorageOptions,
    ) -> PrivacyResult<()> {
        self.store_cancellable(key, data, options, &CancellationToken::new()).await
    }

    /// Like [`store`](Self::store), aborting when `cancel` fires
    #[instrument(skip(self, data, options, cancel), fields(bytes = data.len()))]
    pub async fn store_cancellable(
        &self,
        key: &str,
        data: &[u8],
        options: &SecureStorageOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<()> {
        let result = self.write_item(key, data, options, cancel).await;
        if matches!(&result, Err(e) if is_cancellation(e)) {
            return result.map(|_| ());
        }
        let sealed_with = result.as_ref().ok().copied();
        let event = AuditEvent::new(AuditEventType::StorageWrite)
            .with("key", key)
            .with("bytes", data.len())
            .with("biometric", options.requires_biometric())
            .with("level", options.level.to_string());
        self.audit.record_outcome(event, result.map(|_| ())).await?;

        if let Some(key_id) = sealed_with {
            self.follow_rotation(key_id).await;
        }
        Ok(())
    }

    /// Migrate older items once a write shows the context has a new key
    async fn follow_rotation(&self, key_id: Uuid) {
        let previous = self.last_key.lock().replace(key_id);
        if previous.is_some_and(|prev| prev != key_id) {
            if let Err(e) = self.migrate_items().await {
                warn!(context = %self.context, error = %e, "Item migration after rotation failed");
            }
        }
    }

    async fn write_item(
        &self,
        key: &str,
        data: &[u8],
        options: &SecureStorageOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<Uuid> {
        validate_key(key)?;
        if options.requires_biometric() {
            self.authorize("Store protected item", &options.authentication, cancel).await?;
        }

        let _writing = self.item_lock.read().await;
        let envelope = self.encryption.seal(data, &self.context).await?;
        let item = StoredItem {
            version: ITEM_FORMAT_VERSION,
            require_biometric: options.require_biometric,
            level: options.level,
            accessibility: options.accessibility,
            stored_at: self.clock.now(),
            envelope: envelope.to_base64(),
        };
        let bytes = serde_json::to_vec(&item)?;
        self.backend.put(&Self::item_key(key), bytes).await.map_err(|e| match e {
            PrivacyError::Common(inner) => {
                PrivacyError::Storage(StorageFailure::WriteFailure(inner.to_string()))
            }
            other => other,
        })?;
        debug!(key, "Stored item");
        Ok(envelope.key_id)
    }

    /// Read and decrypt the item under `key`
    pub async fn retrieve(&self, key: &str, options: &SecureStorageOptions) -> PrivacyResult<Vec<u8>> {
        self.retrieve_cancellable(key, options, &CancellationToken::new()).await
    }

    /// Like [`retrieve`](Self::retrieve), aborting when `cancel` fires
    #[instrument(skip(self, options, cancel))]
    pub async fn retrieve_cancellable(
        &self,
        key: &str,
        options: &SecureStorageOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<Vec<u8>> {
        let result = self.read_item(key, options, cancel).await;
        if matches!(&result, Err(e) if is_cancellation(e)) {
            return result;
        }
        let mut event = AuditEvent::new(AuditEventType::StorageRead).with("key", key);
        if let Ok(data) = &result {
            event = event.with("bytes", data.len());
        }
        self.audit.record_outcome(event, result).await
    }

    async fn read_item(
        &self,
        key: &str,
        options: &SecureStorageOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<Vec<u8>> {
        validate_key(key)?;
        let raw = self
            .backend
            .get(&Self::item_key(key))
            .await?
            .ok_or_else(|| StorageFailure::NotFound(key.to_string()))?;
        let item: StoredItem = serde_json::from_slice(&raw).map_err(|e| {
            PrivacyError::Integrity(IntegrityFailure::MalformedEnvelope(format!("stored item: {e}")))
        })?;

        if options.requires_biometric() || item.requires_biometric() {
            self.authorize("Read protected item", &options.authentication, cancel).await?;
        }

        let envelope = EncryptedEnvelope::from_base64(&item.envelope)?;
        self.encryption.open(&envelope).await
    }

    /// Overwrite then remove; returns whether the item existed
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> PrivacyResult<bool> {
        let result = match validate_key(key) {
            Ok(()) => {
                let _writing = self.item_lock.read().await;
                self.backend.secure_delete(&Self::item_key(key)).await
            }
            Err(e) => Err(e),
        };
        let mut event = AuditEvent::new(AuditEventType::StorageDelete).with("key", key);
        if let Ok(existed) = &result {
            event = event.with("existed", *existed);
        }
        self.audit.record_outcome(event, result).await
    }

    /// Whether an item is stored under `key`
    pub async fn contains(&self, key: &str) -> PrivacyResult<bool> {
        validate_key(key)?;
        self.backend.contains(&Self::item_key(key)).await
    }

    /// Stored item names, sorted
    pub async fn list(&self) -> PrivacyResult<Vec<String>> {
        Ok(self
            .backend
            .list_keys(ITEM_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(ITEM_PREFIX).map(str::to_string))
            .collect())
    }

    /// Re-encrypt every item sealed under a key other than the active one
    ///
    /// Runs after the storage context rotates so items stay readable once
    /// the previous key's grace window closes. Items whose key is already
    /// gone are skipped and logged; returns how many items moved.
    #[instrument(skip(self), fields(context = %self.context))]
    pub async fn migrate_items(&self) -> PrivacyResult<usize> {
        let _exclusive = self.item_lock.write().await;
        let names = self.backend.list_keys(ITEM_PREFIX).await?;
        if names.is_empty() {
            return Ok(0);
        }
        let active = self.encryption.keys().get_or_create(&self.context).await?.id;

        let mut migrated = 0;
        for name in names {
            let Some(raw) = self.backend.get(&name).await? else {
                continue;
            };
            let mut item: StoredItem = match serde_json::from_slice(&raw) {
                Ok(item) => item,
                Err(e) => {
                    warn!(item = %name, error = %e, "Skipping unreadable stored item");
                    continue;
                }
            };
            let envelope = match EncryptedEnvelope::from_base64(&item.envelope) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(item = %name, error = %e, "Skipping malformed stored envelope");
                    continue;
                }
            };
            if envelope.key_id == active || envelope.context != self.context {
                continue;
            }

            let fresh = match self.encryption.reencrypt(&envelope).await {
                Ok(fresh) => fresh,
                Err(e @ PrivacyError::AuditUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(item = %name, key_id = %envelope.key_id, error = %e, "Stored item could not be migrated");
                    continue;
                }
            };
            item.envelope = fresh.to_base64();
            self.backend.put(&name, serde_json::to_vec(&item)?).await?;
            migrated += 1;
        }

        *self.last_key.lock() = Some(active);
        if migrated > 0 {
            info!(items = migrated, key_id = %active, "Migrated stored items to the active key");
        }
        Ok(migrated)
    }

    async fn authorize(
        &self,
        reason: &str,
        options: &AuthenticationOptions,
        cancel: &CancellationToken,
    ) -> PrivacyResult<()> {
        if !self.biometric_enabled.load(Ordering::Acquire) {
            return Err(AuthenticationFailure::Failed(
                "biometric authentication is disabled by configuration".to_string(),
            )
            .into());
        }
        if self.biometric.has_valid_session() {
            return Ok(());
        }
        let outcome = self.biometric.authenticate_cancellable(reason, options, cancel).await?;
        Ok(outcome.into_result()?)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for storage::service.
    use std::time::Duration;

    use aegis_common::{AeadCipher, MockClock};

    use super::*;
    use crate::audit::{AuditFilter, MemoryAuditStore};
    use crate::biometric::{PromptResult, SoftwareAuthenticator};
    use crate::keys::{KeyStore, RotationSchedule};
    use crate::storage::MemoryBackend;

    struct Fixture {
        service: SecureStorageService,
        platform: Arc<SoftwareAuthenticator>,
        audit: Arc<AuditLogger>,
        backend: Arc<MemoryBackend>,
    }

    fn fixture(platform: SoftwareAuthenticator) -> Fixture {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let audit = Arc::new(AuditLogger::new(
            Arc::new(MemoryAuditStore::new()),
            clock.shared(),
            true,
            u64::MAX,
        ));
        let backend = Arc::new(MemoryBackend::new());
        let keys = Arc::new(KeyStore::new(
            backend.clone(),
            AeadCipher::new(AeadCipher::generate_key().expose()).unwrap(),
            RotationSchedule::default(),
            clock.shared(),
            audit.clone(),
        ));
        let encryption = Arc::new(EncryptionService::new(keys, audit.clone(), clock.shared()));
        let platform = Arc::new(platform);
        let biometric =
            Arc::new(BiometricAuthenticator::new(platform.clone(), audit.clone(), clock.shared()));
        let service = SecureStorageService::new(
            backend.clone(),
            encryption,
            biometric,
            audit.clone(),
            clock.shared(),
        );
        Fixture { service, platform, audit, backend }
    }

    /// Validates `SecureStorageService` behavior for the store and retrieve
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms retrieve returns the stored bytes.
    /// - Confirms the backend never holds the plaintext.
    /// - Confirms missing items fail with `NotFound`.
    #[tokio::test]
    async fn test_store_retrieve_round_trip() {
        let f = fixture(SoftwareAuthenticator::new());
        let options = SecureStorageOptions::default();

        f.service.store("api-token", b"s3cr3t-value", &options).await.unwrap();
        assert_eq!(f.service.retrieve("api-token", &options).await.unwrap(), b"s3cr3t-value");

        let raw = f.backend.get("item/api-token").await.unwrap().unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("s3cr3t-value"));

        assert!(matches!(
            f.service.retrieve("missing", &options).await,
            Err(PrivacyError::Storage(StorageFailure::NotFound(_)))
        ));
        assert_eq!(f.service.list().await.unwrap(), vec!["api-token".to_string()]);
    }

    /// Validates `SecureStorageService` behavior for the biometric gate
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms an item stored with biometric gating prompts once and the
    ///   cached session covers the following read.
    /// - Confirms `Maximum` level gates even without `require_biometric`.
    #[tokio::test]
    async fn test_biometric_gate_uses_session() {
        let f = fixture(SoftwareAuthenticator::new());
        f.service.store("vault", b"data", &SecureStorageOptions::biometric()).await.unwrap();
        f.service.retrieve("vault", &SecureStorageOptions::default()).await.unwrap();
        assert_eq!(f.platform.prompt_count(), 1);

        let g = fixture(SoftwareAuthenticator::new());
        let maximum = SecureStorageOptions::default().with_level(EncryptionLevel::Maximum);
        g.service.store("crown-jewels", b"data", &maximum).await.unwrap();
        assert_eq!(g.platform.prompt_count(), 1);
    }

    /// Validates `SecureStorageService::store` behavior for the cancelled
    /// prompt scenario.
    ///
    /// Assertions:
    /// - Confirms the store fails with `Cancelled` and nothing is written.
    /// - Confirms the only audit entry is `authentication_cancelled`.
    #[tokio::test]
    async fn test_cancelled_prompt_writes_nothing() {
        let f = fixture(SoftwareAuthenticator::new().with_script(vec![PromptResult::Cancelled]));
        let err = f
            .service
            .store("vault", b"data", &SecureStorageOptions::biometric())
            .await
            .unwrap_err();
        assert!(matches!(err, PrivacyError::Authentication(AuthenticationFailure::Cancelled)));
        assert!(!f.service.contains("vault").await.unwrap());

        let entries = f.audit.query(&AuditFilter::new()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.event_type, AuditEventType::AuthenticationCancelled);
    }

    /// Validates `SecureStorageService::delete` behavior for the secure
    /// erase scenario.
    ///
    /// Assertions:
    /// - Confirms delete reports whether the item existed.
    /// - Confirms both deletes are audited.
    #[tokio::test]
    async fn test_delete_is_audited() {
        let f = fixture(SoftwareAuthenticator::new());
        f.service.store("note", b"data", &SecureStorageOptions::default()).await.unwrap();
        assert!(f.service.delete("note").await.unwrap());
        assert!(!f.service.delete("note").await.unwrap());

        let deletes = f
            .audit
            .query(&AuditFilter::new().event_type(AuditEventType::StorageDelete))
            .await
            .unwrap();
        assert_eq!(deletes.len(), 2);
        assert_eq!(deletes[1].event.metadata["existed"], false);
    }

    /// Validates `SecureStorageService` behavior for the disabled biometric
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures gated items are refused without prompting.
    /// - Ensures reserved key names are rejected.
    #[tokio::test]
    async fn test_disabled_biometric_and_reserved_keys() {
        let f = fixture(SoftwareAuthenticator::new().with_delay(Duration::from_millis(1)));
        f.service.set_biometric_enabled(false);
        let err = f
            .service
            .store("vault", b"data", &SecureStorageOptions::biometric())
            .await
            .unwrap_err();
        assert!(matches!(err, PrivacyError::Authentication(AuthenticationFailure::Failed(_))));
        assert_eq!(f.platform.prompt_count(), 0);

        assert!(f
            .service
            .store("__keystore/general", b"x", &SecureStorageOptions::default())
            .await
            .is_err());
    }
}
