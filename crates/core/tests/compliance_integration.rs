//! Integration tests for compliance evaluation against live engine state
//!
//! Covers idempotent re-evaluation, targeted resolution, escalation of
//! overdue issues and the signals gathered from the audit trail.

mod support;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use aegis_core::audit::MemoryAuditStore;
use aegis_core::compliance::{issue_id, IssueSeverity, IssueStatus};
use aegis_core::{
    AuditEventType, AuditFilter, EncryptionContext, ExportFormat, PrivacyConfiguration,
    PrivacyEngine, Regulation,
};

const DAY: u64 = 24 * 60 * 60;

fn open_ids(status: &aegis_core::ComplianceStatus) -> BTreeSet<String> {
    status.open_issues().map(|issue| issue.id.clone()).collect()
}

async fn violate_gdpr(engine: &PrivacyEngine) {
    let mut config = PrivacyConfiguration::clone(&engine.configuration());
    config.sensitive_scan_enabled = false;
    config.data_retention_period = Duration::from_secs(1000 * DAY);
    engine.update_configuration(config).await.expect("configuration should apply");
}

// ============================================================================
// Issue tracking
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn default_configuration_is_gdpr_compliant() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;

    let statuses = engine.evaluate_enabled().await.expect("evaluation should succeed");
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].is_compliant);
    assert!(open_ids(&statuses[0]).is_empty());
    assert!((statuses[0].compliance_score - 1.0).abs() < f64::EPSILON);
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_state_yields_identical_issue_ids() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    violate_gdpr(&engine).await;

    let first = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("first evaluation");
    let second = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("second evaluation");

    let expected: BTreeSet<String> = ["gdpr.art25.minimization", "gdpr.art5.storage_limitation"]
        .iter()
        .map(|control| issue_id(&Regulation::Gdpr, control))
        .collect();
    assert_eq!(open_ids(&first), expected);
    assert_eq!(open_ids(&second), expected);

    let opened = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::ComplianceIssueOpened))
        .await
        .expect("query");
    assert_eq!(opened.len(), 2, "re-evaluation must not reopen existing issues");
}

#[tokio::test(flavor = "multi_thread")]
async fn fixing_one_setting_resolves_only_its_issue() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    violate_gdpr(&engine).await;
    engine.evaluate_compliance(&Regulation::Gdpr).await.expect("evaluation");

    let mut config = PrivacyConfiguration::clone(&engine.configuration());
    config.sensitive_scan_enabled = true;
    engine.update_configuration(config).await.expect("configuration should apply");
    let status = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("re-evaluation");

    let minimization = issue_id(&Regulation::Gdpr, "gdpr.art25.minimization");
    let storage = issue_id(&Regulation::Gdpr, "gdpr.art5.storage_limitation");
    assert_eq!(open_ids(&status), BTreeSet::from([storage]));

    let resolved = status
        .issues
        .iter()
        .find(|issue| issue.id == minimization)
        .expect("resolved issue is kept");
    assert_eq!(resolved.status, IssueStatus::Resolved);
    assert!(resolved.resolved_at.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn overdue_issue_escalates_once_per_window() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    violate_gdpr(&engine).await;
    let status = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("evaluation");

    let storage = issue_id(&Regulation::Gdpr, "gdpr.art5.storage_limitation");
    let issue = status.issues.iter().find(|i| i.id == storage).expect("storage issue").clone();
    let due_in = (issue.due_at - issue.detected_at).to_std().expect("due after detection");

    clock.advance(due_in + Duration::from_secs(1));
    let status = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("re-evaluation");
    let escalated = status.issues.iter().find(|i| i.id == storage).expect("storage issue");
    assert_eq!(escalated.escalations, 1);
    assert_eq!(escalated.severity, issue.severity.escalate());

    let again = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("re-evaluation");
    let same = again.issues.iter().find(|i| i.id == storage).expect("storage issue");
    assert_eq!(same.escalations, 1, "a fresh due date follows each escalation");
}

// ============================================================================
// Signals from the audit trail
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn tampered_audit_trail_opens_integrity_issue() {
    let clock = support::clock();
    let store = Arc::new(MemoryAuditStore::new());
    let engine = PrivacyEngine::builder()
        .clock(clock.shared())
        .audit_store(store.clone())
        .build()
        .await
        .expect("engine should build");
    engine.encrypt(b"a", &EncryptionContext::general()).await.expect("encrypt should succeed");

    let mut first = engine.query_audit(&AuditFilter::new()).await.expect("query")[0].clone();
    first.event.actor = Some("intruder".to_string());
    assert!(store.replace_entry(0, first));

    let status = engine.evaluate_compliance(&Regulation::Gdpr).await.expect("evaluation");
    let integrity = issue_id(&Regulation::Gdpr, "gdpr.art32.integrity");
    assert!(open_ids(&status).contains(&integrity));
    assert!(!status.is_compliant);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_decryption_counts_as_ccpa_incident() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let mut bytes = engine
        .encrypt(b"a", &EncryptionContext::general())
        .await
        .expect("encrypt should succeed")
        .to_bytes();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    assert!(engine.decrypt_bytes(&bytes).await.is_err());

    let status = engine.evaluate_compliance(&Regulation::Ccpa).await.expect("evaluation");
    let incidents = issue_id(&Regulation::Ccpa, "ccpa.1798.150.incidents");
    assert!(open_ids(&status).contains(&incidents));

    // Failures age out of the window
    clock.advance(aegis_core::engine::SECURITY_FAILURE_WINDOW + Duration::from_secs(DAY));
    let status = engine.evaluate_compliance(&Regulation::Ccpa).await.expect("re-evaluation");
    assert!(!open_ids(&status).contains(&incidents));
}

#[tokio::test(flavor = "multi_thread")]
async fn hipaa_requires_high_encryption() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;

    let status = engine.evaluate_compliance(&Regulation::Hipaa).await.expect("evaluation");
    let blocking: Vec<IssueSeverity> = status.open_issues().map(|issue| issue.severity).collect();
    assert!(!blocking.is_empty());
    assert!(!status.is_compliant);
}

// ============================================================================
// Reports
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn csv_report_lists_every_issue() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    violate_gdpr(&engine).await;

    let csv = engine.compliance_report(ExportFormat::Csv).await.expect("report");
    let mut lines = csv.lines();
    assert!(lines.next().expect("header").starts_with("id,regulation,control_id"));
    assert_eq!(lines.count(), 2);

    let json = engine.compliance_report(ExportFormat::Json).await.expect("report");
    let rows: Vec<serde_json::Value> = serde_json::from_str(&json).expect("valid json");
    assert_eq!(rows[0]["open_issues"], 2);
}
