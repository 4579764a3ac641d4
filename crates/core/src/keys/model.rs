//! Key ring data model

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aegis_common::crypto::aead::key_fingerprint;
use aegis_common::{impl_status_conversions, CommonError, SecretBytes};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PrivacyError, PrivacyResult};

const MAX_CONTEXT_LEN: usize = 64;

/// Named key scope, e.g. `general` or `vision`
///
/// 1 to 64 characters of lowercase ASCII alphanumerics, `-`, `_` or `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EncryptionContext(String);

impl EncryptionContext {
    /// Validated context name
    pub fn new(name: impl Into<String>) -> PrivacyResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// The default `general` context
    pub fn general() -> Self {
        Self("general".to_string())
    }

    /// The context name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn validate(name: &str) -> PrivacyResult<()> {
        if name.is_empty() || name.len() > MAX_CONTEXT_LEN {
            return Err(PrivacyError::Common(CommonError::validation_with_value(
                "context",
                format!("must be 1-{MAX_CONTEXT_LEN} characters"),
                name,
            )));
        }
        let valid = name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'));
        if !valid {
            return Err(PrivacyError::Common(CommonError::validation_with_value(
                "context",
                "only lowercase alphanumerics, '-', '_' and '.' are allowed",
                name,
            )));
        }
        Ok(())
    }
}

impl fmt::Display for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EncryptionContext {
    type Err = PrivacyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EncryptionContext {
    type Error = PrivacyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EncryptionContext> for String {
    fn from(value: EncryptionContext) -> Self {
        value.0
    }
}

/// Key lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    /// Encrypts new data
    Active,
    /// Decrypts only, until its grace deadline
    Retiring,
    /// Material destroyed
    Retired,
}

impl_status_conversions!(KeyState {
    Active => "active",
    Retiring => "retiring",
    Retired => "retired",
});

/// A symmetric key in a context's ring
///
/// Clones share the outstanding-envelope counter.
#[derive(Clone)]
pub struct SymmetricKey {
    pub(crate) id: Uuid,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) rotation_due: DateTime<Utc>,
    pub(crate) state: KeyState,
    pub(crate) grace_deadline: Option<DateTime<Utc>>,
    pub(crate) retired_at: Option<DateTime<Utc>>,
    /// `None` once retired; dropping the `SecretBytes` zeroes it
    pub(crate) material: Option<SecretBytes>,
    pub(crate) fingerprint: String,
    pub(crate) outstanding: Arc<AtomicU64>,
    /// Set only for keys generated by this process, where every envelope
    /// sealed under the key went through the counter
    pub(crate) exact_count: bool,
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("fingerprint", &self.fingerprint)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

impl SymmetricKey {
    pub(crate) fn generate(now: DateTime<Utc>, rotation_due: DateTime<Utc>) -> Self {
        let material = aegis_common::AeadCipher::generate_key();
        let fingerprint = key_fingerprint(material.expose());
        Self {
            id: Uuid::now_v7(),
            created_at: now,
            rotation_due,
            state: KeyState::Active,
            grace_deadline: None,
            retired_at: None,
            material: Some(material),
            fingerprint,
            outstanding: Arc::new(AtomicU64::new(0)),
            exact_count: true,
        }
    }

    /// Key identifier recorded in envelopes
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> KeyState {
        self.state
    }

    /// Usable for decryption at `now`
    pub(crate) fn is_usable(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            KeyState::Active => self.material.is_some(),
            KeyState::Retiring => {
                self.material.is_some() && self.grace_deadline.map_or(true, |deadline| now < deadline)
            }
            KeyState::Retired => false,
        }
    }

    pub(crate) fn begin_retiring(&mut self, grace_deadline: DateTime<Utc>) {
        self.state = KeyState::Retiring;
        self.grace_deadline = Some(grace_deadline);
    }

    pub(crate) fn retire(&mut self, now: DateTime<Utc>) {
        self.state = KeyState::Retired;
        self.retired_at = Some(now);
        self.material = None;
    }

    pub(crate) fn outstanding_envelopes(&self) -> u64 {
        self.outstanding.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn record_envelope(&self) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn record_migrated(&self) {
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    pub fn metadata(&self, context: &EncryptionContext) -> KeyMetadata {
        KeyMetadata {
            id: self.id,
            context: context.clone(),
            state: self.state,
            created_at: self.created_at,
            rotation_due: self.rotation_due,
            grace_deadline: self.grace_deadline,
            retired_at: self.retired_at,
            outstanding_envelopes: self.outstanding_envelopes(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Key description without material, safe to log and export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub id: Uuid,
    pub context: EncryptionContext,
    pub state: KeyState,
    pub created_at: DateTime<Utc>,
    pub rotation_due: DateTime<Utc>,
    pub grace_deadline: Option<DateTime<Utc>>,
    pub retired_at: Option<DateTime<Utc>>,
    pub outstanding_envelopes: u64,
    pub fingerprint: String,
}

/// Key material handed to the cipher for one operation
pub struct KeyHandle {
    pub(crate) id: Uuid,
    pub(crate) context: EncryptionContext,
    pub(crate) material: SecretBytes,
}

impl fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandle")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

impl KeyHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &EncryptionContext {
        &self.context
    }

    pub(crate) fn material(&self) -> &SecretBytes {
        &self.material
    }
}
