//! Request/response contract for domain engines
//!
//! Domain engines (NLP, vision, speech and so on) are opaque producers and
//! consumers of byte payloads. They reach the privacy core only through
//! [`ProtectionRequest`] and [`ProtectionResponse`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::anonymize::AnonymizationLevel;
use crate::error::PrivacyResult;
use crate::keys::EncryptionContext;
use crate::tokenize::TokenizationContext;

/// Producer or consumer of protected payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainEngine {
    /// Natural-language processing
    Nlp,
    /// Image analysis
    Vision,
    /// Speech recognition and synthesis
    Speech,
    /// Model training and inference
    Ml,
    /// Outbound network traffic
    Network,
    /// Response and artifact caching
    Cache,
    /// Image synthesis
    ImageGeneration,
    /// Reasoning and planning
    Reasoning,
    /// Telemetry collection
    Metrics,
}

aegis_common::impl_status_conversions!(DomainEngine {
    Nlp => "nlp",
    Vision => "vision",
    Speech => "speech",
    Ml => "ml",
    Network => "network",
    Cache => "cache",
    ImageGeneration => "image_generation",
    Reasoning => "reasoning",
    Metrics => "metrics",
});

impl DomainEngine {
    /// Every engine, in declaration order
    pub const ALL: [DomainEngine; 9] = [
        Self::Nlp,
        Self::Vision,
        Self::Speech,
        Self::Ml,
        Self::Network,
        Self::Cache,
        Self::ImageGeneration,
        Self::Reasoning,
        Self::Metrics,
    ];

    /// Key context owned by this engine; named after the engine
    pub fn context(self) -> PrivacyResult<EncryptionContext> {
        EncryptionContext::new(self.to_string())
    }
}

/// What to do with a request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtectionOperation {
    /// Encrypt under the engine's context
    Protect,
    /// Decrypt a serialized envelope
    Unprotect,
    /// UTF-8 payloads only
    Anonymize { level: AnonymizationLevel },
    /// UTF-8 payloads only
    Tokenize { context: TokenizationContext },
}

impl ProtectionOperation {
    /// Label recorded on responses and audit entries
    pub fn name(&self) -> &'static str {
        match self {
            Self::Protect => "protect",
            Self::Unprotect => "unprotect",
            Self::Anonymize { .. } => "anonymize",
            Self::Tokenize { .. } => "tokenize",
        }
    }
}

/// A payload submitted by a domain engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionRequest {
    /// Submitting engine; selects the key context
    pub source: DomainEngine,
    /// Plaintext, or a serialized envelope for `Unprotect`
    pub payload: Vec<u8>,
    /// Requested transformation
    pub operation: ProtectionOperation,
}

impl ProtectionRequest {
    /// Request for an arbitrary operation
    pub fn new(
        source: DomainEngine,
        payload: impl Into<Vec<u8>>,
        operation: ProtectionOperation,
    ) -> Self {
        Self { source, payload: payload.into(), operation }
    }

    /// Request to encrypt `payload` under the engine's context
    pub fn protect(source: DomainEngine, payload: impl Into<Vec<u8>>) -> Self {
        Self::new(source, payload, ProtectionOperation::Protect)
    }

    /// Request to decrypt a serialized envelope
    pub fn unprotect(source: DomainEngine, envelope: impl Into<Vec<u8>>) -> Self {
        Self::new(source, envelope, ProtectionOperation::Unprotect)
    }
}

/// Result handed back to the domain engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionResponse {
    /// Engine that made the request
    pub source: DomainEngine,
    /// Operation label from [`ProtectionOperation::name`]
    pub operation: String,
    /// Transformed bytes
    pub payload: Vec<u8>,
    /// Key that sealed the payload (protect only)
    pub key_id: Option<Uuid>,
    /// Anonymize only
    pub privacy_score: Option<f64>,
    /// Tokenize only
    pub token_count: Option<usize>,
    /// Protect only, when sensitive scanning is enabled
    pub sensitive_detected: Option<bool>,
}

impl ProtectionResponse {
    pub(crate) fn new(
        source: DomainEngine,
        operation: &ProtectionOperation,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            source,
            operation: operation.name().to_string(),
            payload,
            key_id: None,
            privacy_score: None,
            token_count: None,
            sensitive_detected: None,
        }
    }
}

/// A domain engine that consumes protected payloads
///
/// Receives serialized envelopes sealed under its own context and returns
/// an opaque result.
#[async_trait]
pub trait PayloadProcessor: Send + Sync {
    /// Engine whose context sealed the envelopes it receives
    fn engine(&self) -> DomainEngine;

    /// Consume one serialized envelope
    async fn process(&self, envelope: Vec<u8>) -> PrivacyResult<Vec<u8>>;
}
