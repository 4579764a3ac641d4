//! Integration tests for the engine coordinator
//!
//! Covers fail-closed auditing, domain-engine delivery, concurrency,
//! configuration loading and the maintenance task lifecycle.

mod support;

use std::sync::Arc;
use std::time::Duration;

use aegis_core::{
    AuditEventType, AuditFilter, DomainEngine, EncryptedEnvelope, EncryptionContext,
    PayloadProcessor, PrivacyConfiguration, PrivacyEngine, PrivacyError, PrivacyResult,
    ProtectionRequest,
};
use async_trait::async_trait;
use support::FlakyAuditStore;
use tempfile::TempDir;

// ============================================================================
// Fail-closed auditing
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn operations_fail_when_audit_is_unavailable() {
    let store = Arc::new(FlakyAuditStore::new());
    let engine = PrivacyEngine::builder()
        .audit_store(store.clone())
        .build()
        .await
        .expect("engine should build");
    let general = EncryptionContext::general();
    let envelope = engine.encrypt(b"hello", &general).await.expect("encrypt while healthy");

    store.set_failing(true);
    let err = engine.encrypt(b"hello", &general).await.expect_err("audit down");
    assert!(matches!(err, PrivacyError::AuditUnavailable(_)));
    let err = engine.decrypt(&envelope).await.expect_err("audit down");
    assert!(matches!(err, PrivacyError::AuditUnavailable(_)));

    store.set_failing(false);
    assert_eq!(engine.decrypt(&envelope).await.expect("audit restored"), b"hello");
    engine.verify_audit_chain().await.expect("no gap in the chain");
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_configuration_keeps_previous_and_is_audited() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let before = engine.configuration();

    let candidate = PrivacyConfiguration { audit_max_size: 10, ..PrivacyConfiguration::clone(&before) };
    engine.update_configuration(candidate).await.expect_err("invalid candidate");

    assert_eq!(*engine.configuration(), *before);
    let rejected = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::ConfigurationRejected))
        .await
        .expect("query");
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].event.metadata["error"], "config.rejected");
}

#[tokio::test(flavor = "multi_thread")]
async fn disabling_audit_stops_new_entries() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let mut config = PrivacyConfiguration::clone(&engine.configuration());
    config.audit_enabled = false;
    engine.update_configuration(config).await.expect("apply");

    let before = engine.query_audit(&AuditFilter::new()).await.expect("query").len();
    engine.encrypt(b"quiet", &EncryptionContext::general()).await.expect("encrypt");
    let after = engine.query_audit(&AuditFilter::new()).await.expect("query").len();
    assert_eq!(before, after);
}

#[tokio::test(flavor = "multi_thread")]
async fn reenabling_audit_is_recorded() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let mut config = PrivacyConfiguration::clone(&engine.configuration());
    config.audit_enabled = false;
    engine.update_configuration(config.clone()).await.expect("disable");

    config.audit_enabled = true;
    engine.update_configuration(config).await.expect("re-enable");

    let changes = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::ConfigurationChanged))
        .await
        .expect("query");
    assert_eq!(changes.len(), 2, "both the disable and the re-enable are on the trail");
    assert!(changes[1].event.metadata["fields"].to_string().contains("audit_enabled"));
    engine.verify_audit_chain().await.expect("chain intact");
}

#[tokio::test(flavor = "multi_thread")]
async fn reenabling_audit_rolls_back_when_the_entry_is_lost() {
    let store = Arc::new(FlakyAuditStore::new());
    let engine = PrivacyEngine::builder()
        .audit_store(store.clone())
        .build()
        .await
        .expect("engine should build");
    let mut config = PrivacyConfiguration::clone(&engine.configuration());
    config.audit_enabled = false;
    engine.update_configuration(config.clone()).await.expect("disable");

    store.set_failing(true);
    config.audit_enabled = true;
    let err = engine.update_configuration(config).await.expect_err("entry cannot be written");
    assert!(matches!(err, PrivacyError::AuditUnavailable(_)));
    assert!(!engine.configuration().audit_enabled);
}

// ============================================================================
// Domain engines
// ============================================================================

struct VisionStub {
    engine: Arc<PrivacyEngine>,
}

#[async_trait]
impl PayloadProcessor for VisionStub {
    fn engine(&self) -> DomainEngine {
        DomainEngine::Vision
    }

    async fn process(&self, envelope: Vec<u8>) -> PrivacyResult<Vec<u8>> {
        let parsed = EncryptedEnvelope::from_bytes(&envelope)?;
        assert_eq!(parsed.context.as_str(), "vision");
        let response = self.engine.handle(ProtectionRequest::unprotect(DomainEngine::Vision, envelope)).await?;
        Ok(response.payload.iter().rev().copied().collect())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn deliver_hands_processor_its_own_envelope() {
    let clock = support::clock();
    let engine = Arc::new(support::engine(&clock).await);
    let stub = VisionStub { engine: Arc::clone(&engine) };

    let output = engine.deliver(&stub, b"abc").await.expect("delivery");
    assert_eq!(output, b"cba");
}

#[tokio::test(flavor = "multi_thread")]
async fn every_domain_engine_protects_under_its_own_context() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;

    for source in DomainEngine::ALL {
        let protected = engine
            .handle(ProtectionRequest::protect(source, "payload"))
            .await
            .expect("protect");
        let envelope = EncryptedEnvelope::from_bytes(&protected.payload).expect("envelope");
        assert_eq!(envelope.context.as_str(), source.to_string());
        assert_eq!(protected.sensitive_detected, Some(false));
    }
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_requests_all_complete_under_a_small_limit() {
    let clock = support::clock();
    let config = PrivacyConfiguration { max_concurrent_requests: 2, ..PrivacyConfiguration::default() };
    let engine = Arc::new(support::engine_with(&clock, config).await);

    let tasks = (0..16).map(|i| {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            let context = EncryptionContext::new(format!("ctx-{}", i % 4)).expect("context");
            let payload = format!("payload-{i}");
            let envelope = engine.encrypt(payload.as_bytes(), &context).await?;
            let plaintext = engine.decrypt(&envelope).await?;
            Ok::<_, PrivacyError>(plaintext == payload.as_bytes())
        })
    });

    for outcome in futures::future::join_all(tasks).await {
        assert!(outcome.expect("join").expect("round trip"));
    }
    engine.verify_audit_chain().await.expect("chain intact under concurrency");
}

// ============================================================================
// Configuration and lifecycle
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn engine_builds_from_toml_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("aegis.toml");
    std::fs::write(
        &path,
        "compliance_mode = \"strict\"\nenabled_regulations = [\"gdpr\", \"ccpa\"]\ntoken_session_ttl = 600\n",
    )?;

    let config = PrivacyConfiguration::from_file(&path)?;
    let clock = support::clock();
    let engine = support::engine_with(&clock, config).await;
    assert_eq!(engine.tokenizer().session_ttl(), Duration::from_secs(600));

    let statuses = engine.evaluate_enabled().await?;
    assert_eq!(statuses.len(), 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn maintenance_task_stops_on_shutdown() {
    let config = PrivacyConfiguration {
        maintenance_interval: Duration::from_millis(20),
        ..PrivacyConfiguration::default()
    };
    let engine = PrivacyEngine::builder().config(config).build().await.expect("engine should build");

    assert!(engine.start_maintenance().await);
    tokio::time::sleep(Duration::from_millis(120)).await;
    engine.shutdown().await.expect("shutdown");
    assert!(!engine.start_maintenance().await);

    let evaluations = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::ComplianceEvaluated))
        .await
        .expect("query");
    assert!(!evaluations.is_empty(), "the task ran at least once");

    let settled = engine.query_audit(&AuditFilter::new()).await.expect("query").len();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(engine.query_audit(&AuditFilter::new()).await.expect("query").len(), settled);
}
