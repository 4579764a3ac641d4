//! Context-scoped key rings
//!
//! Each context owns a ring of keys behind a `tokio::sync::RwLock`. Encrypt
//! and decrypt hold a read lease for the whole AEAD operation; rotation,
//! revocation and sweeping take the write lock, so a ring never changes under
//! an in-flight cipher call.
//!
//! Rings are persisted through the [`StorageBackend`] as JSON records sealed
//! with the master key under `__keystore/<context>`.

use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use aegis_common::crypto::aead::{NONCE_LEN, TAG_LEN};
use aegis_common::{AeadCipher, ErrorClassification, SealedPayload, SecretBytes, SharedClock};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use super::model::{EncryptionContext, KeyHandle, KeyMetadata, KeyState, SymmetricKey};
use super::schedule::RotationSchedule;
use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::error::{EncryptionFailure, IntegrityFailure, PrivacyError, PrivacyResult};
use crate::storage::StorageBackend;

/// Storage prefix reserved for wrapped key rings
pub const KEYSTORE_PREFIX: &str = "__keystore/";

const RING_FORMAT_VERSION: u8 = 1;
const RING_AAD_LABEL: &str = "aegis.keyring.v1";
const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_INITIAL_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Default)]
struct ContextKeys {
    loaded: bool,
    keys: Vec<SymmetricKey>,
}

impl ContextKeys {
    fn active(&self) -> Option<&SymmetricKey> {
        self.keys.iter().rev().find(|k| k.state == KeyState::Active && k.material.is_some())
    }

    fn find(&self, id: Uuid) -> Option<&SymmetricKey> {
        self.keys.iter().find(|k| k.id == id)
    }
}

/// Read access to one key for the duration of a cipher call
///
/// Holding the lease blocks rotation of the context.
pub(crate) struct KeyLease {
    guard: OwnedRwLockReadGuard<ContextKeys>,
    handle: KeyHandle,
    outstanding: Arc<AtomicU64>,
}

impl KeyLease {
    fn new(
        guard: OwnedRwLockReadGuard<ContextKeys>,
        context: &EncryptionContext,
        key: Uuid,
    ) -> Option<Self> {
        let (handle, outstanding) = {
            let key = guard.find(key)?;
            let material = key.material.clone()?;
            (
                KeyHandle { id: key.id, context: context.clone(), material },
                Arc::clone(&key.outstanding),
            )
        };
        Some(Self { guard, handle, outstanding })
    }

    pub(crate) fn handle(&self) -> &KeyHandle {
        &self.handle
    }

    /// Count one more envelope sealed under the leased key
    pub(crate) fn record_envelope(&self) {
        self.outstanding.fetch_add(1, std::sync::atomic::Ordering::AcqRel);
    }
}

/// Keys retired or rotated by a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Context that was swept
    pub context: EncryptionContext,
    /// Keys whose grace window ended
    pub retired: Vec<Uuid>,
    /// New active key when the old one was overdue
    pub rotated_to: Option<Uuid>,
}

impl SweepReport {
    /// Whether the sweep changed nothing
    pub fn is_empty(&self) -> bool {
        self.retired.is_empty() && self.rotated_to.is_none()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedKey {
    id: Uuid,
    created_at: DateTime<Utc>,
    rotation_due: DateTime<Utc>,
    state: KeyState,
    grace_deadline: Option<DateTime<Utc>>,
    retired_at: Option<DateTime<Utc>>,
    material: Option<String>,
    fingerprint: String,
    outstanding: u64,
}

impl Drop for PersistedKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedRing {
    version: u8,
    keys: Vec<PersistedKey>,
}

/// On-disk wrapper: the ring JSON sealed under the master key
#[derive(Serialize, Deserialize)]
struct WrappedRing {
    version: u8,
    nonce: String,
    tag: String,
    ciphertext: String,
}

fn malformed(reason: impl Into<String>) -> PrivacyError {
    PrivacyError::Integrity(IntegrityFailure::MalformedEnvelope(reason.into()))
}

fn decode_array<const N: usize>(field: &str, encoded: &str) -> PrivacyResult<[u8; N]> {
    let bytes = BASE64.decode(encoded).map_err(|e| malformed(format!("key ring {field}: {e}")))?;
    bytes.try_into().map_err(|_| malformed(format!("key ring {field} has the wrong length")))
}

/// Retry transient storage failures with exponential backoff
async fn with_retry<T, F, Fut>(operation: &str, mut attempt_fn: F) -> PrivacyResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PrivacyResult<T>>,
{
    let mut delay = PERSIST_INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < PERSIST_ATTEMPTS && e.is_retryable() => {
                warn!(operation, attempt, error = %e, "Transient key ring failure, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Owner of every context's key ring
pub struct KeyStore {
    rings: DashMap<EncryptionContext, Arc<RwLock<ContextKeys>>>,
    backend: Arc<dyn StorageBackend>,
    master: AeadCipher,
    schedule: parking_lot::RwLock<RotationSchedule>,
    clock: SharedClock,
    audit: Arc<AuditLogger>,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("contexts", &self.rings.len())
            .field("master", &self.master)
            .field("schedule", &*self.schedule.read())
            .finish()
    }
}

impl KeyStore {
    /// Store over `backend`, wrapping key rings with `master`
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        master: AeadCipher,
        schedule: RotationSchedule,
        clock: SharedClock,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            rings: DashMap::new(),
            backend,
            master,
            schedule: parking_lot::RwLock::new(schedule),
            clock,
            audit,
        }
    }

    /// Schedule in effect
    pub fn schedule(&self) -> RotationSchedule {
        *self.schedule.read()
    }

    /// Applies to keys created or retired from now on
    pub fn set_schedule(&self, schedule: RotationSchedule) {
        *self.schedule.write() = schedule;
    }

    fn ring(&self, context: &EncryptionContext) -> Arc<RwLock<ContextKeys>> {
        Arc::clone(self.rings.entry(context.clone()).or_default().value())
    }

    /// The active key for `context`, creating one on first use
    #[instrument(skip(self), fields(context = %context))]
    pub async fn get_or_create(&self, context: &EncryptionContext) -> PrivacyResult<KeyMetadata> {
        let lease = self.lease_active(context).await?;
        let id = lease.handle().id();
        let metadata = lease
            .guard
            .find(id)
            .map(|key| key.metadata(context))
            .ok_or_else(|| PrivacyError::KeyNotFound { context: context.to_string(), key_id: id })?;
        Ok(metadata)
    }

    /// Lease the active key, creating or rotating it when needed
    pub(crate) async fn lease_active(&self, context: &EncryptionContext) -> PrivacyResult<KeyLease> {
        let ring = self.ring(context);
        let now = self.clock.now();

        let guard = Arc::clone(&ring).read_owned().await;
        let current = if guard.loaded {
            guard.active().filter(|k| now < k.rotation_due).map(|k| k.id)
        } else {
            None
        };
        match current {
            Some(id) => {
                if let Some(lease) = KeyLease::new(guard, context, id) {
                    return Ok(lease);
                }
            }
            None => drop(guard),
        }

        let mut guard = ring.write_owned().await;
        self.ensure_loaded(context, &mut guard).await?;
        let due = guard.active().map_or(true, |k| now >= k.rotation_due);
        if due {
            let trigger = if guard.active().is_some() { "schedule" } else { "first_use" };
            self.rotate_locked(context, &mut guard, trigger).await?;
        }

        let guard = guard.downgrade();
        let missing = || PrivacyError::Encryption(EncryptionFailure::MissingKey(context.to_string()));
        let id = guard.active().map(|k| k.id).ok_or_else(missing)?;
        KeyLease::new(guard, context, id).ok_or_else(missing)
    }

    /// Lease a specific key for decryption
    ///
    /// A key id the context never issued is an integrity failure; a key that
    /// was issued but is past its grace window is [`PrivacyError::KeyNotFound`].
    pub(crate) async fn lease_for_decrypt(
        &self,
        context: &EncryptionContext,
        key_id: Uuid,
    ) -> PrivacyResult<KeyLease> {
        let guard = self.loaded_read(context).await?;
        let now = self.clock.now();
        match guard.find(key_id) {
            None => Err(PrivacyError::Integrity(IntegrityFailure::UnknownKey {
                context: context.to_string(),
                key_id,
            })),
            Some(key) if !key.is_usable(now) => {
                Err(PrivacyError::KeyNotFound { context: context.to_string(), key_id })
            }
            Some(_) => KeyLease::new(guard, context, key_id)
                .ok_or_else(|| PrivacyError::KeyNotFound { context: context.to_string(), key_id }),
        }
    }

    async fn loaded_read(
        &self,
        context: &EncryptionContext,
    ) -> PrivacyResult<OwnedRwLockReadGuard<ContextKeys>> {
        let ring = self.ring(context);
        let guard = Arc::clone(&ring).read_owned().await;
        if guard.loaded {
            return Ok(guard);
        }
        drop(guard);
        let mut guard = ring.write_owned().await;
        self.ensure_loaded(context, &mut guard).await?;
        Ok(guard.downgrade())
    }

    /// Issue a new active key; the previous one starts its grace window
    #[instrument(skip(self), fields(context = %context))]
    pub async fn rotate(&self, context: &EncryptionContext) -> PrivacyResult<KeyMetadata> {
        let mut guard = self.ring(context).write_owned().await;
        self.ensure_loaded(context, &mut guard).await?;
        self.rotate_locked(context, &mut guard, "manual").await
    }

    async fn rotate_locked(
        &self,
        context: &EncryptionContext,
        guard: &mut OwnedRwLockWriteGuard<ContextKeys>,
        trigger: &str,
    ) -> PrivacyResult<KeyMetadata> {
        let now = self.clock.now();
        let schedule = self.schedule();

        let mut next = guard.keys.clone();
        let mut previous = None;
        for key in next.iter_mut().filter(|k| k.state == KeyState::Active) {
            key.begin_retiring(schedule.grace_deadline(now));
            previous = Some(key.id);
        }
        let fresh = SymmetricKey::generate(now, schedule.rotation_due(now));
        let metadata = fresh.metadata(context);
        next.push(fresh);

        self.persist(context, &next).await?;
        guard.keys = next;

        let event = match previous {
            Some(previous) => {
                info!(context = %context, key_id = %metadata.id, previous = %previous, trigger, "Rotated key");
                AuditEvent::new(AuditEventType::KeyRotated).with("previous_key_id", previous.to_string())
            }
            None => {
                info!(context = %context, key_id = %metadata.id, "Created key");
                AuditEvent::new(AuditEventType::KeyCreated)
            }
        };
        self.audit
            .append(
                event
                    .with("context", context.as_str())
                    .with("key_id", metadata.id.to_string())
                    .with("trigger", trigger),
            )
            .await?;
        Ok(metadata)
    }

    /// Move every live key of `context` to retiring
    ///
    /// Returns how many keys changed state. The next lease issues a fresh key.
    #[instrument(skip(self), fields(context = %context))]
    pub async fn revoke(&self, context: &EncryptionContext) -> PrivacyResult<usize> {
        let mut guard = self.ring(context).write_owned().await;
        self.ensure_loaded(context, &mut guard).await?;
        let deadline = self.schedule().grace_deadline(self.clock.now());

        let mut next = guard.keys.clone();
        let mut revoked = Vec::new();
        for key in next.iter_mut().filter(|k| k.state == KeyState::Active) {
            key.begin_retiring(deadline);
            revoked.push(key.id.to_string());
        }
        if revoked.is_empty() {
            return Ok(0);
        }

        self.persist(context, &next).await?;
        guard.keys = next;
        warn!(context = %context, count = revoked.len(), "Revoked keys");

        self.audit
            .append(
                AuditEvent::new(AuditEventType::KeyRevoked)
                    .with("context", context.as_str())
                    .with("key_ids", revoked.clone()),
            )
            .await?;
        Ok(revoked.len())
    }

    /// Retire keys past their grace window or fully migrated, and rotate an
    /// active key past its rotation-due time
    #[instrument(skip(self), fields(context = %context))]
    pub async fn sweep(&self, context: &EncryptionContext) -> PrivacyResult<SweepReport> {
        let mut guard = self.ring(context).write_owned().await;
        self.ensure_loaded(context, &mut guard).await?;
        let now = self.clock.now();

        let mut next = guard.keys.clone();
        let mut retired = Vec::new();
        for key in next.iter_mut().filter(|k| k.state == KeyState::Retiring) {
            let expired = key.grace_deadline.is_some_and(|deadline| now >= deadline);
            let migrated = key.exact_count && key.outstanding_envelopes() == 0;
            if expired || migrated {
                key.retire(now);
                retired.push((key.id, if expired { "grace_elapsed" } else { "migrated" }));
            }
        }

        if !retired.is_empty() {
            self.persist(context, &next).await?;
            guard.keys = next;
            for (id, reason) in &retired {
                info!(context = %context, key_id = %id, reason, "Retired key");
                self.audit
                    .append(
                        AuditEvent::new(AuditEventType::KeyRetired)
                            .with("context", context.as_str())
                            .with("key_id", id.to_string())
                            .with("reason", *reason),
                    )
                    .await?;
            }
        }

        let rotation_due = guard.active().is_some_and(|active| now >= active.rotation_due);
        let rotated_to = if rotation_due {
            Some(self.rotate_locked(context, &mut guard, "schedule").await?.id)
        } else {
            None
        };

        Ok(SweepReport {
            context: context.clone(),
            retired: retired.into_iter().map(|(id, _)| id).collect(),
            rotated_to,
        })
    }

    /// Sweep every known context
    pub async fn sweep_all(&self) -> PrivacyResult<Vec<SweepReport>> {
        let mut reports = Vec::new();
        for context in self.contexts().await? {
            let report = self.sweep(&context).await?;
            if !report.is_empty() {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    /// Metadata for every key in `context`, oldest first
    pub async fn list_keys(&self, context: &EncryptionContext) -> PrivacyResult<Vec<KeyMetadata>> {
        let guard = self.loaded_read(context).await?;
        Ok(guard.keys.iter().map(|k| k.metadata(context)).collect())
    }

    /// Every context with a ring in memory or in storage
    pub async fn contexts(&self) -> PrivacyResult<Vec<EncryptionContext>> {
        let mut contexts: Vec<EncryptionContext> =
            self.rings.iter().map(|entry| entry.key().clone()).collect();
        for key in self.backend.list_keys(KEYSTORE_PREFIX).await? {
            if let Some(name) = key.strip_prefix(KEYSTORE_PREFIX) {
                match EncryptionContext::new(name) {
                    Ok(context) => contexts.push(context),
                    Err(e) => warn!(key = %key, error = %e, "Skipping unparseable key ring entry"),
                }
            }
        }
        contexts.sort();
        contexts.dedup();
        Ok(contexts)
    }

    /// Active keys past their rotation-due time
    pub async fn overdue_active_keys(&self) -> PrivacyResult<Vec<KeyMetadata>> {
        let now = self.clock.now();
        let mut overdue = Vec::new();
        for context in self.contexts().await? {
            let guard = self.loaded_read(&context).await?;
            overdue.extend(
                guard
                    .keys
                    .iter()
                    .filter(|k| k.state == KeyState::Active && now >= k.rotation_due)
                    .map(|k| k.metadata(&context)),
            );
        }
        Ok(overdue)
    }

    /// An envelope sealed under `key_id` was re-encrypted to a newer key
    pub async fn record_migrated(&self, context: &EncryptionContext, key_id: Uuid) -> PrivacyResult<()> {
        let guard = self.loaded_read(context).await?;
        if let Some(key) = guard.find(key_id) {
            key.record_migrated();
        }
        Ok(())
    }

    async fn ensure_loaded(
        &self,
        context: &EncryptionContext,
        guard: &mut OwnedRwLockWriteGuard<ContextKeys>,
    ) -> PrivacyResult<()> {
        if guard.loaded {
            return Ok(());
        }
        let storage_key = format!("{KEYSTORE_PREFIX}{context}");
        let stored = with_retry("load_ring", || self.backend.get(&storage_key)).await?;
        if let Some(bytes) = stored {
            guard.keys = self.unwrap_ring(context, &bytes)?;
            debug!(context = %context, keys = guard.keys.len(), "Loaded key ring");
        }
        guard.loaded = true;
        Ok(())
    }

    fn ring_aad(context: &EncryptionContext) -> Vec<u8> {
        format!("{RING_AAD_LABEL}:{context}").into_bytes()
    }

    async fn persist(&self, context: &EncryptionContext, keys: &[SymmetricKey]) -> PrivacyResult<()> {
        let bytes = self.wrap_ring(context, keys)?;
        let storage_key = format!("{KEYSTORE_PREFIX}{context}");
        with_retry("persist_ring", || self.backend.put(&storage_key, bytes.clone())).await
    }

    fn wrap_ring(&self, context: &EncryptionContext, keys: &[SymmetricKey]) -> PrivacyResult<Vec<u8>> {
        let ring = PersistedRing {
            version: RING_FORMAT_VERSION,
            keys: keys
                .iter()
                .map(|k| PersistedKey {
                    id: k.id,
                    created_at: k.created_at,
                    rotation_due: k.rotation_due,
                    state: k.state,
                    grace_deadline: k.grace_deadline,
                    retired_at: k.retired_at,
                    material: k.material.as_ref().map(|m| BASE64.encode(m.expose())),
                    fingerprint: k.fingerprint.clone(),
                    outstanding: k.outstanding_envelopes(),
                })
                .collect(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&ring)?);
        let sealed = self.master.seal(&plaintext, &Self::ring_aad(context))?;
        let wrapped = WrappedRing {
            version: RING_FORMAT_VERSION,
            nonce: BASE64.encode(sealed.nonce),
            tag: BASE64.encode(sealed.tag),
            ciphertext: BASE64.encode(&sealed.ciphertext),
        };
        Ok(serde_json::to_vec(&wrapped)?)
    }

    fn unwrap_ring(&self, context: &EncryptionContext, bytes: &[u8]) -> PrivacyResult<Vec<SymmetricKey>> {
        let wrapped: WrappedRing =
            serde_json::from_slice(bytes).map_err(|e| malformed(format!("key ring: {e}")))?;
        if wrapped.version != RING_FORMAT_VERSION {
            return Err(malformed(format!("unsupported key ring version {}", wrapped.version)));
        }
        let sealed = SealedPayload {
            nonce: decode_array::<NONCE_LEN>("nonce", &wrapped.nonce)?,
            tag: decode_array::<TAG_LEN>("tag", &wrapped.tag)?,
            ciphertext: BASE64
                .decode(&wrapped.ciphertext)
                .map_err(|e| malformed(format!("key ring ciphertext: {e}")))?,
        };
        let plaintext = Zeroizing::new(self.master.open(&sealed, &Self::ring_aad(context))?);
        let ring: PersistedRing =
            serde_json::from_slice(&plaintext).map_err(|e| malformed(format!("key ring body: {e}")))?;

        ring.keys
            .iter()
            .map(|k| {
                let material = match &k.material {
                    Some(encoded) => Some(SecretBytes::new(
                        BASE64.decode(encoded).map_err(|e| malformed(format!("key material: {e}")))?,
                    )),
                    None => None,
                };
                Ok(SymmetricKey {
                    id: k.id,
                    created_at: k.created_at,
                    rotation_due: k.rotation_due,
                    state: k.state,
                    grace_deadline: k.grace_deadline,
                    retired_at: k.retired_at,
                    material,
                    fingerprint: k.fingerprint.clone(),
                    outstanding: Arc::new(AtomicU64::new(k.outstanding)),
                    exact_count: false,
                })
            })
            .collect()
    }
}
