//! Append-only, hash-chained audit journal

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aegis_common::time::{to_chrono, SharedClock};
use aegis_common::CommonError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, instrument, warn};

use super::event::{
    compute_checksum, genesis_checksum, AuditEntry, AuditEvent, AuditEventType, AuditFilter,
    AuditOutcome, AuditSeverity,
};
use super::ports::{AuditStore, ChainAnchor};
use crate::error::{AuthenticationFailure, IntegrityFailure, PrivacyError, PrivacyResult};
use crate::export::{self, ExportFormat};

const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Debug)]
struct ChainState {
    loaded: bool,
    next_sequence: u64,
    head_checksum: String,
}

/// Result of a successful chain verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Entries whose links were recomputed
    pub entries_verified: u64,
    /// Sequence the verification started from (0, or one past the anchor)
    pub first_sequence: u64,
    /// Checksum of the last verified entry
    pub head_checksum: String,
    /// Whether verification started from a purge anchor
    pub anchored: bool,
}

/// Counts over the retained trail
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    /// Retained entries
    pub total: u64,
    /// Counts keyed by event type label
    pub by_type: BTreeMap<String, u64>,
    /// Counts keyed by severity label
    pub by_severity: BTreeMap<String, u64>,
    /// Counts keyed by outcome label
    pub by_outcome: BTreeMap<String, u64>,
    /// Entries counted by `AuditEvent::is_security_failure`
    pub security_failures: u64,
    /// Timestamp of the oldest retained entry
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Timestamp of the newest retained entry
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// The audit journal
///
/// A single mutex around the chain head gives every append a global order
/// and lets readers see a consistent prefix.
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    chain: Mutex<ChainState>,
    enabled: AtomicBool,
    max_segment_bytes: AtomicU64,
    clock: SharedClock,
    events: broadcast::Sender<AuditEntry>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("store", &self.store)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

fn unavailable(err: PrivacyError) -> PrivacyError {
    match err {
        PrivacyError::AuditUnavailable(_) => err,
        other => PrivacyError::AuditUnavailable(other.to_string()),
    }
}

impl AuditLogger {
    /// Logger over `store`; the chain head is loaded on first use
    pub fn new(
        store: Arc<dyn AuditStore>,
        clock: SharedClock,
        enabled: bool,
        max_segment_bytes: u64,
    ) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            store,
            chain: Mutex::new(ChainState {
                loaded: false,
                next_sequence: 0,
                head_checksum: genesis_checksum(),
            }),
            enabled: AtomicBool::new(enabled),
            max_segment_bytes: AtomicU64::new(max_segment_bytes),
            clock,
            events,
        }
    }

    /// Whether appends are recorded
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Turn recording on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Active segment size that triggers a rollover
    pub fn set_max_segment_bytes(&self, bytes: u64) {
        self.max_segment_bytes.store(bytes, Ordering::Release);
    }

    /// Receive every entry appended from now on
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.events.subscribe()
    }

    async fn ensure_loaded(&self, state: &mut ChainState) -> PrivacyResult<()> {
        if state.loaded {
            return Ok(());
        }
        if let Some(head) = self.store.load_head().await? {
            state.next_sequence = head.sequence + 1;
            state.head_checksum = head.checksum;
        } else if let Some(anchor) = self.store.anchor().await? {
            state.next_sequence = anchor.sequence + 1;
            state.head_checksum = anchor.checksum;
        }
        state.loaded = true;
        Ok(())
    }

    /// Append an event to the chain
    ///
    /// Returns `None` when auditing is disabled. Any persistence failure is
    /// reported as [`PrivacyError::AuditUnavailable`].
    #[instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn append(&self, event: AuditEvent) -> PrivacyResult<Option<AuditEntry>> {
        if !self.is_enabled() {
            return Ok(None);
        }

        let mut state = self.chain.lock().await;
        self.ensure_loaded(&mut state).await.map_err(unavailable)?;

        let (entry, segment_bytes) = self.append_locked(&mut state, event).await?;

        if segment_bytes >= self.max_segment_bytes.load(Ordering::Acquire) {
            let archived = self.store.roll_over().await.map_err(unavailable)?;
            let marker = AuditEvent::new(AuditEventType::SegmentRolledOver)
                .with("archived_segment", archived)
                .with("rollover_hash", state.head_checksum.clone());
            self.append_locked(&mut state, marker).await?;
        }

        Ok(Some(entry))
    }

    /// Audit the outcome of an operation, failing closed
    ///
    /// A successful operation whose entry cannot be written becomes
    /// [`PrivacyError::AuditUnavailable`]. A failed operation keeps its own
    /// error.
    pub async fn record_outcome<T>(
        &self,
        event: AuditEvent,
        result: PrivacyResult<T>,
    ) -> PrivacyResult<T> {
        let event = match &result {
            Ok(_) => event,
            Err(err) => annotate_failure(event, err),
        };
        match (self.append(event).await, result) {
            (Ok(_), result) => result,
            (Err(audit_err), Ok(_)) => Err(audit_err),
            (Err(audit_err), Err(err)) => {
                error!(error = %audit_err, operation_error = %err, "Audit entry for failed operation lost");
                Err(err)
            }
        }
    }

    async fn append_locked(
        &self,
        state: &mut ChainState,
        mut event: AuditEvent,
    ) -> PrivacyResult<(AuditEntry, u64)> {
        event.timestamp = self.clock.now();
        let sequence = state.next_sequence;
        let checksum = compute_checksum(&state.head_checksum, sequence, &event)?;
        let entry = AuditEntry {
            sequence,
            event,
            previous_checksum: state.head_checksum.clone(),
            checksum,
        };

        let segment_bytes = match self.store.append(&entry).await {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, sequence, "Audit append failed");
                // The entry may have reached the store before the failure;
                // re-read the head before the next append
                state.loaded = false;
                return Err(unavailable(e));
            }
        };

        state.next_sequence = sequence + 1;
        state.head_checksum.clone_from(&entry.checksum);

        if entry.event.is_security_relevant() {
            warn!(
                sequence,
                event_type = %entry.event.event_type,
                severity = %entry.event.severity,
                outcome = %entry.event.outcome,
                "Security audit event"
            );
        } else {
            debug!(sequence, event_type = %entry.event.event_type, "Audit event appended");
        }

        let _ = self.events.send(entry.clone());
        Ok((entry, segment_bytes))
    }

    /// Entries matching `filter`, in insertion order
    pub async fn query(&self, filter: &AuditFilter) -> PrivacyResult<Vec<AuditEntry>> {
        let _state = self.chain.lock().await;
        let matching = self.store.entries().await?.into_iter().filter(|e| filter.matches(e));
        Ok(match filter.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }

    /// Re-derive every checksum from genesis (or the purge anchor)
    ///
    /// Fails with [`IntegrityFailure::AuditChainDivergence`] naming the first
    /// sequence number whose link does not verify.
    #[instrument(skip(self))]
    pub async fn verify_chain_integrity(&self) -> PrivacyResult<ChainVerification> {
        let mut state = self.chain.lock().await;
        self.ensure_loaded(&mut state).await?;

        let anchor = self.store.anchor().await?;
        let entries = self.store.entries().await?;

        let (first_sequence, mut previous) = match &anchor {
            Some(anchor) => (anchor.sequence + 1, anchor.checksum.clone()),
            None => (0, genesis_checksum()),
        };
        let mut expected = first_sequence;

        for entry in &entries {
            if entry.sequence != expected || entry.previous_checksum != previous {
                return Err(divergence(expected));
            }
            let recomputed = compute_checksum(&previous, entry.sequence, &entry.event)?;
            if recomputed != entry.checksum {
                return Err(divergence(entry.sequence));
            }
            previous.clone_from(&entry.checksum);
            expected += 1;
        }

        // Entries removed from the tail
        if expected != state.next_sequence || previous != state.head_checksum {
            return Err(divergence(expected));
        }

        Ok(ChainVerification {
            entries_verified: expected - first_sequence,
            first_sequence,
            head_checksum: previous,
            anchored: anchor.is_some(),
        })
    }

    /// Counts over entries at or after `since` (all entries when `None`)
    pub async fn statistics(&self, since: Option<DateTime<Utc>>) -> PrivacyResult<AuditStatistics> {
        let filter = match since {
            Some(from) => AuditFilter::new().since(from),
            None => AuditFilter::new(),
        };
        let mut stats = AuditStatistics::default();
        for entry in self.query(&filter).await? {
            let event = &entry.event;
            stats.total += 1;
            *stats.by_type.entry(event.event_type.to_string()).or_default() += 1;
            *stats.by_severity.entry(event.severity.to_string()).or_default() += 1;
            *stats.by_outcome.entry(event.outcome.to_string()).or_default() += 1;
            if event.is_security_failure() {
                stats.security_failures += 1;
            }
            stats.first_timestamp.get_or_insert(event.timestamp);
            stats.last_timestamp = Some(event.timestamp);
        }
        Ok(stats)
    }

    /// Drop archived segments older than `retention`, then record the purge
    #[instrument(skip(self))]
    pub async fn purge_expired(&self, retention: Duration) -> PrivacyResult<Option<ChainAnchor>> {
        let now = self.clock.now();
        let cutoff = now - to_chrono(retention);
        let anchor = {
            let _state = self.chain.lock().await;
            self.store.purge_archived_before(cutoff, now).await?
        };

        if let Some(anchor) = &anchor {
            self.append(
                AuditEvent::new(AuditEventType::RetentionPurged)
                    .with("anchor_sequence", anchor.sequence)
                    .with("anchor_checksum", anchor.checksum.clone()),
            )
            .await?;
        }
        Ok(anchor)
    }

    /// Render matching entries as JSON or CSV
    pub async fn export(&self, filter: &AuditFilter, format: ExportFormat) -> PrivacyResult<String> {
        let entries = self.query(filter).await?;
        match format {
            ExportFormat::Json => export::to_json(&entries),
            ExportFormat::Csv => Ok(export::to_csv(&entries)),
        }
    }
}

fn annotate_failure(event: AuditEvent, err: &PrivacyError) -> AuditEvent {
    let event = event.with("error", err.code());
    match err {
        PrivacyError::Cancelled | PrivacyError::Authentication(AuthenticationFailure::Cancelled) => {
            event.outcome(AuditOutcome::Cancelled)
        }
        PrivacyError::Integrity(_) => {
            event.outcome(AuditOutcome::Failure).severity(AuditSeverity::Critical)
        }
        PrivacyError::Common(CommonError::Unauthorized { .. }) => event.outcome(AuditOutcome::Denied),
        _ => event.outcome(AuditOutcome::Failure),
    }
}

fn divergence(index: u64) -> PrivacyError {
    error!(index, "Audit chain divergence detected");
    PrivacyError::Integrity(IntegrityFailure::AuditChainDivergence { index })
}

#[cfg(test)]
mod tests {
    //! Unit tests for audit::logger.
    use aegis_common::{Clock, MockClock};

    use super::*;
    use crate::audit::memory::MemoryAuditStore;

    fn logger_with(store: Arc<MemoryAuditStore>, max_segment_bytes: u64) -> AuditLogger {
        AuditLogger::new(store, MockClock::at_unix_secs(1_700_000_000).shared(), true, max_segment_bytes)
    }

    /// Validates `AuditLogger::append` behavior for the chain linkage
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms sequences are contiguous from zero.
    /// - Confirms each entry links to its predecessor's checksum.
    #[tokio::test]
    async fn test_append_links_entries() {
        let logger = logger_with(Arc::new(MemoryAuditStore::new()), u64::MAX);
        let a = logger.append(AuditEvent::new(AuditEventType::EngineStarted)).await.unwrap().unwrap();
        let b = logger.append(AuditEvent::new(AuditEventType::KeyCreated)).await.unwrap().unwrap();

        assert_eq!(a.sequence, 0);
        assert_eq!(a.previous_checksum, genesis_checksum());
        assert_eq!(b.sequence, 1);
        assert_eq!(b.previous_checksum, a.checksum);
        assert_eq!(logger.verify_chain_integrity().await.unwrap().entries_verified, 2);
    }

    /// Validates `AuditLogger::append` behavior for the disabled scenario.
    ///
    /// Assertions:
    /// - Confirms nothing is written while auditing is disabled.
    #[tokio::test]
    async fn test_disabled_logger_skips() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = logger_with(store.clone(), u64::MAX);
        logger.set_enabled(false);
        assert!(logger.append(AuditEvent::new(AuditEventType::KeyCreated)).await.unwrap().is_none());
        assert!(store.entries().await.unwrap().is_empty());
    }

    /// Validates `AuditLogger::verify_chain_integrity` behavior for the
    /// tampered entry scenario.
    ///
    /// Assertions:
    /// - Confirms the divergence index names the edited entry.
    #[tokio::test]
    async fn test_verify_reports_divergence_index() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = logger_with(store.clone(), u64::MAX);
        for i in 0..5u64 {
            logger.append(AuditEvent::new(AuditEventType::DataEncrypted).with("bytes", i)).await.unwrap();
        }

        let mut edited = store.entries().await.unwrap()[3].clone();
        edited.event.metadata.insert("bytes".to_string(), 999.into());
        assert!(store.replace_entry(3, edited));

        match logger.verify_chain_integrity().await {
            Err(PrivacyError::Integrity(IntegrityFailure::AuditChainDivergence { index })) => {
                assert_eq!(index, 3);
            }
            other => panic!("expected divergence, got {other:?}"),
        }
    }

    /// Validates `AuditLogger::append` behavior for the segment rollover
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a rollover marker carrying the rollover hash follows the
    ///   entry that filled the segment.
    /// - Confirms the chain still verifies across segments.
    #[tokio::test]
    async fn test_rollover_links_segments() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = logger_with(store.clone(), 1);
        let first = logger.append(AuditEvent::new(AuditEventType::KeyCreated)).await.unwrap().unwrap();

        let entries = store.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event.event_type, AuditEventType::SegmentRolledOver);
        assert_eq!(entries[1].event.metadata["rollover_hash"], first.checksum.as_str());
        assert!(store.archived_segments() >= 1);
        assert!(logger.verify_chain_integrity().await.is_ok());
    }

    /// Validates `AuditLogger::purge_expired` behavior for the retention
    /// anchor scenario.
    ///
    /// Assertions:
    /// - Confirms the anchor is stamped with the logger's clock.
    /// - Confirms verification restarts from the anchor.
    #[tokio::test]
    async fn test_purge_anchor_uses_logger_clock() {
        let clock = MockClock::at_unix_secs(1_700_000_000);
        let store = Arc::new(MemoryAuditStore::new());
        let logger = AuditLogger::new(store.clone(), clock.shared(), true, 1);
        logger.append(AuditEvent::new(AuditEventType::KeyCreated)).await.unwrap();

        clock.advance(Duration::from_secs(10 * 24 * 60 * 60));
        let anchor = logger.purge_expired(Duration::from_secs(24 * 60 * 60)).await.unwrap().unwrap();
        assert_eq!(anchor.purged_at, clock.now());
        assert_eq!(anchor.sequence, 0);

        let verification = logger.verify_chain_integrity().await.unwrap();
        assert!(verification.anchored);
        assert_eq!(verification.first_sequence, 1);
    }

    /// Validates `AuditLogger::statistics` behavior for the counting
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms totals and per-type counts.
    /// - Confirms failed authentication counts as a security failure.
    #[tokio::test]
    async fn test_statistics_counts() {
        let logger = logger_with(Arc::new(MemoryAuditStore::new()), u64::MAX);
        logger.append(AuditEvent::new(AuditEventType::DataEncrypted)).await.unwrap();
        logger.append(AuditEvent::new(AuditEventType::DataEncrypted)).await.unwrap();
        logger.append(AuditEvent::new(AuditEventType::AuthenticationFailed)).await.unwrap();

        let stats = logger.statistics(None).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type["data_encrypted"], 2);
        assert_eq!(stats.security_failures, 1);
    }

    /// Validates `AuditLogger::record_outcome` behavior for the failed
    /// operation scenario.
    ///
    /// Assertions:
    /// - Confirms the operation error is returned unchanged.
    /// - Confirms the entry records the failure outcome and error code.
    #[tokio::test]
    async fn test_record_outcome_annotates_failures() {
        let store = Arc::new(MemoryAuditStore::new());
        let logger = logger_with(store.clone(), u64::MAX);
        let result: PrivacyResult<()> =
            Err(PrivacyError::Integrity(IntegrityFailure::TagMismatch));

        let err = logger
            .record_outcome(AuditEvent::new(AuditEventType::DataDecrypted), result)
            .await
            .unwrap_err();
        assert!(err.is_integrity_failure());

        let entry = store.entries().await.unwrap().pop().unwrap();
        assert_eq!(entry.event.outcome, AuditOutcome::Failure);
        assert_eq!(entry.event.severity, AuditSeverity::Critical);
        assert_eq!(entry.event.metadata["error"], "integrity.tag_mismatch");
        assert!(entry.event.is_security_failure());
    }

    /// Validates `AuditLogger::subscribe` behavior for the live feed
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms subscribers receive appended entries.
    #[tokio::test]
    async fn test_subscribe_receives_entries() {
        let logger = logger_with(Arc::new(MemoryAuditStore::new()), u64::MAX);
        let mut rx = logger.subscribe();
        logger.append(AuditEvent::new(AuditEventType::KeyRotated)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event.event_type, AuditEventType::KeyRotated);
    }
}
