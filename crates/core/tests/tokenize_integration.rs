//! Integration tests for tokenization through the engine
//!
//! Walks tokens through their lifecycle: live, expired at the session
//! boundary, purged by maintenance.

mod support;

use std::time::Duration;

use aegis_core::error::TokenFailure;
use aegis_core::tokenize::{RetentionClass, Sensitivity, TokenPurpose};
use aegis_core::{AuditEventType, AuditFilter, PrivacyError, TokenizationContext};

fn email_session() -> TokenizationContext {
    TokenizationContext::new(TokenPurpose::Email)
        .sensitivity(Sensitivity::High)
        .retention(RetentionClass::Session)
}

#[tokio::test(flavor = "multi_thread")]
async fn email_token_expires_at_session_boundary() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;

    let result = engine.tokenize("john@example.com", &email_session()).await.expect("tokenize");
    assert_eq!(result.token_count(), 1);
    assert!(!result.tokenized.contains("john"));
    assert_eq!(
        engine.detokenize(&result.tokenized).await.expect("detokenize before expiry"),
        "john@example.com"
    );

    clock.advance(engine.configuration().token_session_ttl + Duration::from_secs(1));
    let err = engine.detokenize(&result.tokenized).await.expect_err("expired");
    assert!(matches!(err, PrivacyError::Token(TokenFailure::Expired)));
}

#[tokio::test(flavor = "multi_thread")]
async fn ending_the_session_expires_only_session_tokens() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let session = engine.tokenize("john@example.com", &email_session()).await.expect("tokenize");
    let kept = engine
        .tokenize(
            "jane@example.com",
            &TokenizationContext::new(TokenPurpose::Email).retention(RetentionClass::LongTerm),
        )
        .await
        .expect("tokenize");

    assert_eq!(engine.end_token_session().await, 1);
    assert!(matches!(
        engine.detokenize(&session.tokenized).await,
        Err(PrivacyError::Token(TokenFailure::Expired))
    ));
    assert_eq!(engine.detokenize(&kept.tokenized).await.expect("long-term token"), "jane@example.com");
}

#[tokio::test(flavor = "multi_thread")]
async fn maintenance_purges_expired_tokens() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let result = engine.tokenize("john@example.com", &email_session()).await.expect("tokenize");

    clock.advance(engine.configuration().token_session_ttl + Duration::from_secs(1));
    let report = engine.run_maintenance().await.expect("maintenance");
    assert_eq!(report.tokens_purged, 1);

    let err = engine.detokenize(&result.tokenized).await.expect_err("purged");
    assert!(matches!(err, PrivacyError::Token(TokenFailure::NotFound)));
    let purges = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::TokensPurged))
        .await
        .expect("query");
    assert_eq!(purges.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_trail_never_carries_originals() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let result = engine.tokenize("john@example.com", &email_session()).await.expect("tokenize");
    engine.detokenize(&result.tokenized).await.expect("detokenize");

    let trail = engine
        .export_audit(&AuditFilter::new(), aegis_core::ExportFormat::Json)
        .await
        .expect("export");
    assert!(!trail.contains("john@example.com"));
}

#[tokio::test(flavor = "multi_thread")]
async fn tokens_inside_free_text_round_trip() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let text = "Ship to john@example.com, call 555-867-5309 on arrival";

    let result = engine.tokenize(text, &TokenizationContext::default()).await.expect("tokenize");
    assert_eq!(result.token_count(), 2);
    assert!(result.spans.iter().all(|span| span.token.starts_with(aegis_core::tokenize::TOKEN_PREFIX)));
    assert_eq!(engine.detokenize(&result.tokenized).await.expect("detokenize"), text);
}

#[tokio::test(flavor = "multi_thread")]
async fn long_term_tokens_outlive_key_rotation() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let config = engine.configuration();
    let long_term = TokenizationContext::new(TokenPurpose::Email).retention(RetentionClass::LongTerm);

    let kept = engine.tokenize("jane@example.com", &long_term).await.expect("tokenize");
    clock.advance(config.rotation_interval() + Duration::from_secs(24 * 60 * 60));
    // Sealing a new original rotates the tokens key and re-seals the older ones
    engine
        .tokenize(
            "john@example.com",
            &TokenizationContext::new(TokenPurpose::Email).retention(RetentionClass::Permanent),
        )
        .await
        .expect("tokenize after rotation");
    clock.advance(config.key_grace_period + Duration::from_secs(24 * 60 * 60));

    assert_eq!(engine.detokenize(&kept.tokenized).await.expect("detokenize"), "jane@example.com");
    let reencrypted = engine
        .query_audit(&AuditFilter::new().event_type(AuditEventType::DataReencrypted))
        .await
        .expect("query");
    assert_eq!(reencrypted.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn maintenance_reseals_tokens_after_scheduled_rotation() {
    let clock = support::clock();
    let engine = support::engine(&clock).await;
    let config = engine.configuration();
    let permanent = TokenizationContext::new(TokenPurpose::Email).retention(RetentionClass::Permanent);

    let kept = engine.tokenize("jane@example.com", &permanent).await.expect("tokenize");
    clock.advance(config.rotation_interval() + Duration::from_secs(60));
    let report = engine.run_maintenance().await.expect("maintenance");
    assert_eq!(report.tokens_migrated, 1);

    clock.advance(config.key_grace_period + Duration::from_secs(60));
    engine.run_maintenance().await.expect("maintenance retires");
    assert_eq!(engine.detokenize(&kept.tokenized).await.expect("detokenize"), "jane@example.com");
}
