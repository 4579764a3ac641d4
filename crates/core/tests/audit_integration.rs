//! Integration tests for the audit journal on disk
//!
//! Validates tamper detection against out-of-band file edits, segment
//! rollover, chain continuation across restarts and export.

mod support;

use std::sync::Arc;

use aegis_core::audit::{AuditStore, FileAuditStore};
use aegis_core::error::IntegrityFailure;
use aegis_core::{
    AuditEvent, AuditEventType, AuditFilter, AuditLogger, AuditSeverity, EncryptionContext,
    ExportFormat, PrivacyConfiguration, PrivacyEngine, PrivacyError,
};
use serde_json::Value;
use tempfile::TempDir;

async fn engine_on(dir: &TempDir, config: PrivacyConfiguration) -> (PrivacyEngine, Arc<FileAuditStore>) {
    let store = Arc::new(FileAuditStore::open(dir.path()).await.expect("open audit store"));
    let engine = PrivacyEngine::builder()
        .config(config)
        .audit_store(store.clone())
        .build()
        .await
        .expect("engine should build");
    (engine, store)
}

// ============================================================================
// Tamper detection
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn out_of_band_edit_reports_exact_index() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, store) = engine_on(&dir, PrivacyConfiguration::default()).await;
    let general = EncryptionContext::general();
    for _ in 0..5 {
        engine.encrypt(b"payload", &general).await.expect("encrypt should succeed");
    }
    let verified = engine.verify_audit_chain().await.expect("chain intact before edit");
    assert!(verified.entries_verified >= 6);

    // Rewrite the byte count of the third encryption entry
    let path = store.active_segment_path().await;
    let contents = tokio::fs::read_to_string(&path).await.expect("read segment");
    let mut target = None;
    let mut seen = 0;
    let lines: Vec<String> = contents
        .lines()
        .map(|line| {
            let mut entry: Value = serde_json::from_str(line).expect("entry json");
            if entry["event"]["event_type"] == "data_encrypted" {
                seen += 1;
                if seen == 3 {
                    entry["event"]["metadata"]["bytes"] = Value::from(9_999);
                    target = entry["sequence"].as_u64();
                }
            }
            serde_json::to_string(&entry).expect("serialize entry")
        })
        .collect();
    tokio::fs::write(&path, lines.join("\n") + "\n").await.expect("write segment");
    let target = target.expect("third encryption entry present");

    let err = engine.verify_audit_chain().await.expect_err("edit must be detected");
    let index = match err {
        PrivacyError::Integrity(IntegrityFailure::AuditChainDivergence { index }) => Some(index),
        _ => None,
    };
    assert_eq!(index, Some(target));

    let violations = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::IntegrityViolation))
        .await
        .expect("query");
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].event.severity, AuditSeverity::Critical);
    assert_eq!(violations[0].event.metadata["index"], Value::from(target));
}

#[tokio::test(flavor = "multi_thread")]
async fn deleted_tail_entry_is_detected() {
    let dir = TempDir::new().expect("temp dir");
    let (engine, store) = engine_on(&dir, PrivacyConfiguration::default()).await;
    engine.encrypt(b"a", &EncryptionContext::general()).await.expect("encrypt should succeed");

    let path = store.active_segment_path().await;
    let contents = tokio::fs::read_to_string(&path).await.expect("read segment");
    let mut lines: Vec<&str> = contents.lines().collect();
    let removed = lines.len() as u64 - 1;
    lines.pop();
    tokio::fs::write(&path, lines.join("\n") + "\n").await.expect("write segment");

    let err = engine.verify_audit_chain().await.expect_err("truncation must be detected");
    assert!(matches!(
        err,
        PrivacyError::Integrity(IntegrityFailure::AuditChainDivergence { index }) if index == removed
    ));
}

// ============================================================================
// Segments and restarts
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn rollover_archives_segments_and_chain_still_verifies() {
    let dir = TempDir::new().expect("temp dir");
    let config = PrivacyConfiguration { audit_max_size: 4096, ..PrivacyConfiguration::default() };
    let (engine, store) = engine_on(&dir, config).await;
    let general = EncryptionContext::general();
    for _ in 0..40 {
        engine.encrypt(b"payload", &general).await.expect("encrypt should succeed");
    }

    let archived = store.archived_segment_paths().await.expect("list archive");
    assert!(!archived.is_empty(), "small segments should roll over");
    let rollovers = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::SegmentRolledOver))
        .await
        .expect("query");
    assert_eq!(rollovers.len(), archived.len());
    engine.verify_audit_chain().await.expect("chain spans segments");
}

#[tokio::test(flavor = "multi_thread")]
async fn chain_continues_after_restart() {
    let dir = TempDir::new().expect("temp dir");
    let first_total = {
        let (engine, _) = engine_on(&dir, PrivacyConfiguration::default()).await;
        engine.encrypt(b"a", &EncryptionContext::general()).await.expect("encrypt should succeed");
        engine.shutdown().await.expect("shutdown");
        engine.query_audit(&AuditFilter::new()).await.expect("query").len()
    };

    let (engine, _) = engine_on(&dir, PrivacyConfiguration::default()).await;
    let entries = engine.query_audit(&AuditFilter::new()).await.expect("query");
    assert_eq!(entries[first_total].sequence, first_total as u64);
    assert_eq!(entries[first_total].event.event_type, AuditEventType::EngineStarted);
    engine.verify_audit_chain().await.expect("chain continues across restarts");
}

// ============================================================================
// Export
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn csv_export_has_one_row_per_entry() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    engine.encrypt(b"a", &EncryptionContext::general()).await.expect("encrypt should succeed");

    let total = engine.query_audit(&AuditFilter::new()).await.expect("query").len();
    let csv = engine.export_audit(&AuditFilter::new(), ExportFormat::Csv).await.expect("export");
    assert_eq!(csv.lines().count(), total + 1);

    let json = engine.export_audit(&AuditFilter::new(), ExportFormat::Json).await.expect("export");
    let parsed: Vec<Value> = serde_json::from_str(&json).expect("valid json");
    assert_eq!(parsed.len(), total);
}

// ============================================================================
// Failed appends
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn failed_head_write_does_not_fork_the_chain() {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(FileAuditStore::open(dir.path()).await.expect("open audit store"));
    let clock = support::clock();
    let logger = AuditLogger::new(store.clone(), clock.shared(), true, u64::MAX);

    logger.append(AuditEvent::new(AuditEventType::DataEncrypted)).await.expect("first append");

    // The segment line lands but the head file cannot be replaced
    let blocker = dir.path().join("head.json.tmp");
    tokio::fs::create_dir(&blocker).await.expect("block head write");
    let err = logger
        .append(AuditEvent::new(AuditEventType::DataDecrypted))
        .await
        .expect_err("head write fails");
    assert!(matches!(err, PrivacyError::AuditUnavailable(_)));
    tokio::fs::remove_dir(&blocker).await.expect("unblock head write");

    logger.append(AuditEvent::new(AuditEventType::StorageWrite)).await.expect("append after recovery");

    let sequences: Vec<u64> = store.entries().await.expect("entries").iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    let verified = logger.verify_chain_integrity().await.expect("chain intact");
    assert_eq!(verified.entries_verified, 3);
}
