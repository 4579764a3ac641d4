use std::sync::Arc;

use aegis_common::time::to_chrono;
use aegis_common::SharedClock;
use async_trait::async_trait;

use crate::audit::AuditLogger;
use crate::compliance::{ComplianceSignals, ComplianceSnapshot};
use crate::config::ConfigStore;
use crate::error::{PrivacyError, PrivacyResult};
use crate::keys::KeyStore;

/// Window over which audited security failures count against compliance
pub const SECURITY_FAILURE_WINDOW: std::time::Duration =
    std::time::Duration::from_secs(30 * 24 * 60 * 60);

/// Live engine state as seen by the compliance checks
pub(crate) struct EngineSignals {
    config: Arc<ConfigStore>,
    audit: Arc<AuditLogger>,
    keys: Arc<KeyStore>,
    clock: SharedClock,
}

impl EngineSignals {
    pub(crate) fn new(
        config: Arc<ConfigStore>,
        audit: Arc<AuditLogger>,
        keys: Arc<KeyStore>,
        clock: SharedClock,
    ) -> Self {
        Self { config, audit, keys, clock }
    }
}

#[async_trait]
impl ComplianceSignals for EngineSignals {
    async fn snapshot(&self) -> PrivacyResult<ComplianceSnapshot> {
        let config = self.config.current();
        let now = self.clock.now();

        let audit_chain_intact = match self.audit.verify_chain_integrity().await {
            Ok(_) => true,
            Err(PrivacyError::Integrity(_)) => false,
            Err(e) => return Err(e),
        };
        let stats = self.audit.statistics(Some(now - to_chrono(SECURITY_FAILURE_WINDOW))).await?;
        let overdue_keys = self.keys.overdue_active_keys().await?.len();

        Ok(ComplianceSnapshot {
            taken_at: now,
            mode: config.compliance_mode,
            audit_enabled: self.audit.is_enabled(),
            audit_chain_intact,
            audit_retention_period: config.audit_retention_period,
            security_failures: stats.security_failures,
            encryption_level: config.default_encryption_level,
            overdue_keys,
            biometric_enabled: config.biometric_enabled,
            biometric_session_ttl: config.biometric_session_ttl,
            sensitive_scan_enabled: config.sensitive_scan_enabled,
            data_retention_period: config.data_retention_period,
            token_session_ttl: config.token_session_ttl,
        })
    }
}
