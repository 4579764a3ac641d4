//! Reversible surrogate tokens for sensitive substrings

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aegis_common::time::add_saturating;
use aegis_common::{
    CommonError, ContentHasher, HashAlgorithm, PatternClass, PatternMatch, PatternScanner,
    SharedClock,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex as SyncMutex, RwLock};
use rand::RngCore;
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::model::{
    RetentionClass, TokenPurpose, TokenRecord, TokenSpan, TokenizationContext, TokenizationResult,
};
use crate::audit::{AuditEvent, AuditEventType, AuditLogger};
use crate::crypto::EncryptionService;
use crate::error::{PrivacyError, PrivacyResult, TokenFailure};
use crate::keys::EncryptionContext;

/// Prefix of every issued token
pub const TOKEN_PREFIX: &str = "tok_";
const TOKEN_HEX_CHARS: usize = 24;
const TOKEN_CONTEXT: &str = "tokens";

#[allow(clippy::expect_used)]
static TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\btok_[0-9a-f]{24}\b").expect("TOKEN_REGEX should compile - this is a bug"));

fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_HEX_CHARS / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{TOKEN_PREFIX}{}", hex::encode(bytes))
}

/// Live mappings may be reused only for an identical value, retention and
/// reversibility
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ReuseKey {
    content_hash: String,
    retention: RetentionClass,
    reversible: bool,
}

#[derive(Debug, Default)]
struct TokenVault {
    records: HashMap<String, TokenRecord>,
    live: HashMap<ReuseKey, String>,
}

impl TokenVault {
    fn live_token(&self, key: &ReuseKey, now: DateTime<Utc>) -> Option<&str> {
        let token = self.live.get(key)?;
        let record = self.records.get(token)?;
        (!record.is_expired(now)).then_some(token.as_str())
    }

    fn insert(&mut self, key: ReuseKey, record: TokenRecord) {
        self.live.insert(key, record.token.clone());
        self.records.insert(record.token.clone(), record);
    }
}

/// Replaces sensitive spans with random `tok_` surrogates
///
/// Originals of reversible tokens are sealed under the `tokens` key context.
/// Expired records are kept until [`Tokenizer::purge_expired`] so lookups can
/// tell an expired token from an unknown one.
pub struct Tokenizer {
    encryption: Arc<EncryptionService>,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
    hasher: ContentHasher,
    scanner: RwLock<PatternScanner>,
    session_ttl: RwLock<Duration>,
    vault: Mutex<TokenVault>,
    context: EncryptionContext,
    /// Key that sealed the latest original; a change means the context rotated
    last_key: SyncMutex<Option<Uuid>>,
}

impl std::fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tokenizer")
            .field("session_ttl", &*self.session_ttl.read())
            .finish_non_exhaustive()
    }
}

impl Tokenizer {
    /// Tokenizer sealing originals under the `tokens` context
    pub fn new(
        encryption: Arc<EncryptionService>,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
        session_ttl: Duration,
    ) -> PrivacyResult<Self> {
        Ok(Self {
            encryption,
            audit,
            clock,
            hasher: ContentHasher::with_random_salt(HashAlgorithm::Blake3Keyed),
            scanner: RwLock::new(PatternScanner::new()),
            session_ttl: RwLock::new(session_ttl),
            vault: Mutex::new(TokenVault::default()),
            context: EncryptionContext::new(TOKEN_CONTEXT)?,
            last_key: SyncMutex::new(None),
        })
    }

    /// Key context sealing reversible originals
    pub fn context(&self) -> &EncryptionContext {
        &self.context
    }

    /// Lifetime of session-retention tokens
    pub fn session_ttl(&self) -> Duration {
        *self.session_ttl.read()
    }

    /// Applies to tokens created after the call
    pub fn set_session_ttl(&self, ttl: Duration) {
        *self.session_ttl.write() = ttl;
    }

    /// Add a custom pattern class usable as [`TokenPurpose::Custom`]
    pub fn register_pattern(&self, name: &str, pattern: &str) -> PrivacyResult<()> {
        self.scanner.write().add_custom(name, pattern).map_err(|e| {
            PrivacyError::Common(CommonError::validation_with_value("pattern", e.to_string(), name))
        })
    }

    fn find_spans(&self, data: &str, purpose: &TokenPurpose) -> PrivacyResult<Vec<PatternMatch>> {
        let scanner = self.scanner.read().clone();
        let Some(class) = purpose.pattern_class() else {
            return Ok(scanner.scan(data));
        };
        if let PatternClass::Custom(name) = &class {
            if !scanner.custom_names().any(|n| n == name) {
                return Err(CommonError::validation_with_value(
                    "purpose",
                    "no pattern registered under this name",
                    name.as_str(),
                )
                .into());
            }
        }

        let spans: Vec<PatternMatch> =
            scanner.scan(data).into_iter().filter(|m| m.class == class).collect();
        if spans.is_empty() && !data.is_empty() {
            // Specific purpose: the whole value is the sensitive item
            return Ok(vec![PatternMatch { class, start: 0, end: data.len(), value: data.to_string() }]);
        }
        Ok(spans)
    }

    /// Replace sensitive spans in `data` with tokens
    #[instrument(skip(self, data), fields(purpose = context.purpose.label(), retention = %context.retention))]
    pub async fn tokenize(
        &self,
        data: &str,
        context: &TokenizationContext,
    ) -> PrivacyResult<TokenizationResult> {
        let result = self.replace_spans(data, context).await;
        let migrated = match &result {
            Ok((_, migrated)) => *migrated,
            Err(_) => 0,
        };
        let result = result.map(|(result, _)| result);

        let mut event = AuditEvent::new(AuditEventType::DataTokenized)
            .with("purpose", context.purpose.label())
            .with("sensitivity", context.sensitivity.to_string())
            .with("retention", context.retention.to_string())
            .with("reversible", context.reversible)
            .with("bytes", data.len());
        if let Ok(result) = &result {
            event = event
                .with("tokens", result.token_count())
                .with("reused", result.spans.iter().filter(|s| s.reused).count());
        }
        let result = self.audit.record_outcome(event, result).await?;
        if migrated > 0 {
            self.audit_migration(migrated).await?;
        }
        Ok(result)
    }

    async fn replace_spans(
        &self,
        data: &str,
        context: &TokenizationContext,
    ) -> PrivacyResult<(TokenizationResult, usize)> {
        let matches = self.find_spans(data, &context.purpose)?;
        let now = self.clock.now();
        let expires_at = context
            .retention
            .ttl(self.session_ttl())
            .map(|ttl| add_saturating(now, ttl));

        let mut vault = self.vault.lock().await;
        let mut tokenized = String::with_capacity(data.len());
        let mut spans = Vec::with_capacity(matches.len());
        let mut cursor = 0;
        let mut sealed_with = None;

        for m in matches {
            tokenized.push_str(&data[cursor..m.start]);
            cursor = m.end;

            let key = ReuseKey {
                content_hash: self.hasher.hash_str(&m.value),
                retention: context.retention,
                reversible: context.reversible,
            };
            let (token, reused) = match vault.live_token(&key, now) {
                Some(token) => (token.to_string(), true),
                None => {
                    let sealed = if context.reversible {
                        let sealed = self.encryption.seal(m.value.as_bytes(), &self.context).await?;
                        sealed_with = Some(sealed.key_id);
                        Some(sealed)
                    } else {
                        None
                    };
                    let record = TokenRecord::new(
                        new_token(),
                        key.content_hash.clone(),
                        m.class.clone(),
                        context,
                        now,
                        expires_at,
                        sealed,
                    );
                    let token = record.token.clone();
                    vault.insert(key, record);
                    (token, false)
                }
            };

            let start = tokenized.len();
            tokenized.push_str(&token);
            spans.push(TokenSpan { token, class: m.class, start, end: tokenized.len(), reused });
        }
        tokenized.push_str(&data[cursor..]);

        let rotated = sealed_with.is_some_and(|key_id| {
            self.last_key.lock().replace(key_id).is_some_and(|previous| previous != key_id)
        });
        let migrated = match sealed_with {
            Some(active) if rotated => self.migrate_locked(&mut vault, active).await,
            _ => 0,
        };

        debug!(tokens = spans.len(), migrated, "Tokenized payload");
        Ok((TokenizationResult { tokenized, spans }, migrated))
    }

    /// Re-seal live reversible originals held under a key other than the
    /// active one, so they outlive the previous key's grace window
    ///
    /// Runs on its own after the `tokens` context rotates; returns how many
    /// records moved.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> PrivacyResult<usize> {
        let now = self.clock.now();
        let (active, migrated) = {
            let mut vault = self.vault.lock().await;
            if !vault.records.values().any(|r| r.sealed.is_some() && !r.is_expired(now)) {
                return Ok(0);
            }
            let active = self.encryption.keys().get_or_create(&self.context).await?.id;
            (active, self.migrate_locked(&mut vault, active).await)
        };
        *self.last_key.lock() = Some(active);
        if migrated > 0 {
            self.audit_migration(migrated).await?;
        }
        Ok(migrated)
    }

    async fn migrate_locked(&self, vault: &mut TokenVault, active: Uuid) -> usize {
        let now = self.clock.now();
        let mut migrated = 0;
        for record in vault.records.values_mut() {
            if record.is_expired(now) {
                continue;
            }
            let Some(sealed) = record.sealed.as_ref().filter(|s| s.key_id != active) else {
                continue;
            };
            let from = sealed.key_id;
            match self.encryption.migrate(sealed).await {
                Ok(fresh) => {
                    record.sealed = Some(fresh);
                    migrated += 1;
                }
                Err(e) => {
                    warn!(key_id = %from, error = %e, "Token original could not be migrated");
                }
            }
        }
        if migrated > 0 {
            info!(tokens = migrated, key_id = %active, "Migrated token originals to the active key");
        }
        migrated
    }

    async fn audit_migration(&self, migrated: usize) -> PrivacyResult<()> {
        let event = AuditEvent::new(AuditEventType::DataReencrypted)
            .with("context", self.context.as_str())
            .with("tokens", migrated);
        self.audit.append(event).await?;
        Ok(())
    }

    /// Restore every token in `tokenized` to its original value
    ///
    /// Fails with `NotFound` when the input holds no known token, `Expired`
    /// past a record's expiry, and `NonReversible` for one-way records.
    #[instrument(skip_all, fields(bytes = tokenized.len()))]
    pub async fn detokenize(&self, tokenized: &str) -> PrivacyResult<String> {
        let result = self.restore(tokenized).await;

        let event = AuditEvent::new(AuditEventType::DataDetokenized)
            .with("tokens", TOKEN_REGEX.find_iter(tokenized).count())
            .with("bytes", tokenized.len());
        self.audit.record_outcome(event, result).await
    }

    async fn restore(&self, tokenized: &str) -> PrivacyResult<String> {
        let found: Vec<_> = TOKEN_REGEX.find_iter(tokenized).collect();
        if found.is_empty() {
            return Err(TokenFailure::NotFound.into());
        }

        let now = self.clock.now();
        let vault = self.vault.lock().await;
        let mut output = String::with_capacity(tokenized.len());
        let mut cursor = 0;
        for m in found {
            let record = vault.records.get(m.as_str()).ok_or(TokenFailure::NotFound)?;
            if record.is_expired(now) {
                return Err(TokenFailure::Expired.into());
            }
            let sealed = match (&record.sealed, record.is_reversible()) {
                (Some(sealed), true) => sealed,
                _ => return Err(TokenFailure::NonReversible.into()),
            };
            let original = self.encryption.open(sealed).await?;
            let original = String::from_utf8(original).map_err(|e| {
                PrivacyError::Common(CommonError::internal(format!("token original is not UTF-8: {e}")))
            })?;

            output.push_str(&tokenized[cursor..m.start()]);
            output.push_str(&original);
            cursor = m.end();
        }
        output.push_str(&tokenized[cursor..]);
        Ok(output)
    }

    /// Record metadata for a token, without the original
    pub async fn record(&self, token: &str) -> Option<TokenRecord> {
        self.vault.lock().await.records.get(token).map(TokenRecord::redacted)
    }

    /// Number of unexpired token records
    pub async fn live_count(&self) -> usize {
        let now = self.clock.now();
        self.vault.lock().await.records.values().filter(|r| !r.is_expired(now)).count()
    }

    /// Expire every session-retention token now
    pub async fn end_session(&self) -> usize {
        let now = self.clock.now();
        let mut vault = self.vault.lock().await;
        let mut ended = 0;
        for record in vault.records.values_mut() {
            if record.retention == RetentionClass::Session && !record.is_expired(now) {
                record.expires_at = Some(now);
                ended += 1;
            }
        }
        info!(tokens = ended, "Ended tokenization session");
        ended
    }

    /// Drop expired records; their originals are discarded
    pub async fn purge_expired(&self) -> PrivacyResult<usize> {
        let now = self.clock.now();
        let purged = {
            let mut vault = self.vault.lock().await;
            let before = vault.records.len();
            vault.records.retain(|_, record| !record.is_expired(now));
            let TokenVault { records, live } = &mut *vault;
            live.retain(|_, token| records.contains_key(token));
            before - records.len()
        };

        if purged > 0 {
            self.audit
                .append(AuditEvent::new(AuditEventType::TokensPurged).with("tokens", purged))
                .await?;
        }
        Ok(purged)
    }
}
