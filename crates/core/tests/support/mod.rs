//! Shared fixtures for `aegis-core` integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aegis_common::{CommonError, MockClock};
use aegis_core::audit::{AuditEntry, AuditStore, ChainAnchor, ChainHead, MemoryAuditStore};
use aegis_core::biometric::SoftwareAuthenticator;
use aegis_core::{MasterKeySource, PrivacyConfiguration, PrivacyEngine, PrivacyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Fixed start instant shared by the suites.
pub const EPOCH_SECS: i64 = 1_700_000_000;

/// Memory audit store whose appends can be switched to fail.
#[derive(Debug, Default)]
pub struct FlakyAuditStore {
    inner: MemoryAuditStore,
    failing: AtomicBool,
}

impl FlakyAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MemoryAuditStore {
        &self.inner
    }
}

#[async_trait]
impl AuditStore for FlakyAuditStore {
    async fn load_head(&self) -> PrivacyResult<Option<ChainHead>> {
        self.inner.load_head().await
    }

    async fn append(&self, entry: &AuditEntry) -> PrivacyResult<u64> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CommonError::persistence("audit disk full").into());
        }
        self.inner.append(entry).await
    }

    async fn entries(&self) -> PrivacyResult<Vec<AuditEntry>> {
        self.inner.entries().await
    }

    async fn roll_over(&self) -> PrivacyResult<u32> {
        self.inner.roll_over().await
    }

    async fn purge_archived_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PrivacyResult<Option<ChainAnchor>> {
        self.inner.purge_archived_before(cutoff, now).await
    }

    async fn anchor(&self) -> PrivacyResult<Option<ChainAnchor>> {
        self.inner.anchor().await
    }
}

/// Engine on memory backends with a mock clock and an always-matching
/// fingerprint reader.
pub async fn engine_with(clock: &MockClock, config: PrivacyConfiguration) -> PrivacyEngine {
    PrivacyEngine::builder()
        .config(config)
        .clock(clock.shared())
        .master_key(MasterKeySource::ephemeral())
        .platform_authenticator(Arc::new(SoftwareAuthenticator::new()))
        .build()
        .await
        .expect("engine should build")
}

pub async fn engine(clock: &MockClock) -> PrivacyEngine {
    engine_with(clock, PrivacyConfiguration::default()).await
}

pub fn clock() -> MockClock {
    MockClock::at_unix_secs(EPOCH_SECS)
}
