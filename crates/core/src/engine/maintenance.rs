//! Periodic upkeep: key sweeps and data migration, token purges, audit
//! retention and compliance re-evaluation

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::{AuditLogger, ChainAnchor};
use crate::compliance::{ComplianceEngine, ComplianceStatus};
use crate::config::ConfigStore;
use crate::error::PrivacyResult;
use crate::keys::{KeyStore, SweepReport};
use crate::storage::SecureStorageService;
use crate::tokenize::Tokenizer;

/// What one maintenance pass changed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Contexts where a key was retired or rotated
    pub swept: Vec<SweepReport>,
    /// Stored items re-encrypted onto their context's active key
    pub items_migrated: usize,
    /// Token originals re-sealed onto the active `tokens` key
    pub tokens_migrated: usize,
    /// Expired token records dropped
    pub tokens_purged: usize,
    /// Set when archived audit segments were dropped
    pub audit_anchor: Option<ChainAnchor>,
    /// Compliance statuses of the enabled regulations
    pub compliance: Vec<ComplianceStatus>,
}

pub(crate) struct Maintenance {
    config: Arc<ConfigStore>,
    keys: Arc<KeyStore>,
    storage: Arc<SecureStorageService>,
    tokenizer: Arc<Tokenizer>,
    audit: Arc<AuditLogger>,
    compliance: Arc<ComplianceEngine>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Maintenance {
    pub(crate) fn new(
        config: Arc<ConfigStore>,
        keys: Arc<KeyStore>,
        storage: Arc<SecureStorageService>,
        tokenizer: Arc<Tokenizer>,
        audit: Arc<AuditLogger>,
        compliance: Arc<ComplianceEngine>,
    ) -> Self {
        Self { config, keys, storage, tokenizer, audit, compliance, task: Mutex::new(None) }
    }

    /// Run every upkeep step once, stopping at the first failure
    #[instrument(skip(self))]
    pub(crate) async fn run_once(&self) -> PrivacyResult<MaintenanceReport> {
        let config = self.config.current();

        let swept: Vec<SweepReport> =
            self.keys.sweep_all().await?.into_iter().filter(|r| !r.is_empty()).collect();
        // Rotations from this sweep or from earlier writes leave data on retiring keys
        let items_migrated = self.storage.migrate_items().await?;
        let tokens_migrated = self.tokenizer.migrate().await?;
        let tokens_purged = self.tokenizer.purge_expired().await?;
        let audit_anchor = self.audit.purge_expired(config.audit_retention_period).await?;
        let compliance = self.compliance.evaluate_all(&config.enabled_regulations).await?;

        debug!(
            swept = swept.len(),
            items_migrated,
            tokens_migrated,
            tokens_purged,
            audit_purged = audit_anchor.is_some(),
            "Maintenance pass complete"
        );
        Ok(MaintenanceReport {
            swept,
            items_migrated,
            tokens_migrated,
            tokens_purged,
            audit_anchor,
            compliance,
        })
    }

    /// Spawn the periodic loop; a no-op while one is already running
    pub(crate) async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let interval = self.config.current().maintenance_interval;
        let this = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            this.run_loop(interval, shutdown).await;
        }));
        info!(interval_secs = interval.as_secs(), "Maintenance task started");
        true
    }

    /// Wait for the loop to exit after `shutdown` was cancelled
    pub(crate) async fn join(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Maintenance task ended abnormally");
            }
        }
    }

    async fn run_loop(&self, interval: std::time::Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Maintenance loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let started = Instant::now();
                    match self.run_once().await {
                        Ok(report) => debug!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            swept = report.swept.len(),
                            tokens_purged = report.tokens_purged,
                            "Maintenance tick"
                        ),
                        Err(e) => error!(error = %e, code = e.code(), "Maintenance pass failed"),
                    }
                }
            }
        }
    }
}
