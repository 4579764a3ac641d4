//! Token records and tokenization contexts

use std::time::Duration;

use aegis_common::{impl_status_conversions, PatternClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::EncryptedEnvelope;

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a token mapping is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    /// Until the session ends or the session TTL passes
    #[default]
    Session,
    Temporary,
    LongTerm,
    Permanent,
}

impl_status_conversions!(RetentionClass {
    Session => "session",
    Temporary => "temporary",
    LongTerm => "long_term",
    Permanent => "permanent",
});

impl RetentionClass {
    /// Lifetime of a mapping; `None` never expires
    pub fn ttl(self, session_ttl: Duration) -> Option<Duration> {
        match self {
            Self::Session => Some(session_ttl),
            Self::Temporary => Some(24 * HOUR),
            Self::LongTerm => Some(365 * DAY),
            Self::Permanent => None,
        }
    }
}

/// How damaging disclosure of the original would be
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Sensitivity {
    /// Low impact
    Low,
    /// Default
    #[default]
    Medium,
    /// Regulated personal data
    High,
    /// Financial or identity credentials
    Critical,
}

impl_status_conversions!(Sensitivity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

/// What the tokenized value is for; selects the pattern classes scanned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// Scan every registered class
    #[default]
    General,
    /// Email addresses only
    Email,
    /// Phone numbers only
    Phone,
    /// National identifiers only
    NationalId,
    /// Payment card numbers only
    CardNumber,
    /// A pattern registered with [`crate::tokenize::Tokenizer::register_pattern`]
    Custom(String),
}

impl TokenPurpose {
    /// Class a specific purpose is restricted to
    pub fn pattern_class(&self) -> Option<PatternClass> {
        match self {
            Self::General => None,
            Self::Email => Some(PatternClass::Email),
            Self::Phone => Some(PatternClass::Phone),
            Self::NationalId => Some(PatternClass::NationalId),
            Self::CardNumber => Some(PatternClass::CardNumber),
            Self::Custom(name) => Some(PatternClass::Custom(name.clone())),
        }
    }

    /// Label recorded in audit metadata
    pub fn label(&self) -> &str {
        match self {
            Self::General => "general",
            Self::Email => "email",
            Self::Phone => "phone",
            Self::NationalId => "national_id",
            Self::CardNumber => "card",
            Self::Custom(name) => name,
        }
    }
}

/// Parameters of one tokenize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationContext {
    /// Selects the pattern classes scanned
    pub purpose: TokenPurpose,
    /// Recorded on each token
    pub sensitivity: Sensitivity,
    /// Decides the token's lifetime
    pub retention: RetentionClass,
    /// Keep a sealed original for detokenize
    pub reversible: bool,
}

impl Default for TokenizationContext {
    fn default() -> Self {
        Self {
            purpose: TokenPurpose::General,
            sensitivity: Sensitivity::Medium,
            retention: RetentionClass::Session,
            reversible: true,
        }
    }
}

impl TokenizationContext {
    /// Reversible session-retention context for `purpose`
    pub fn new(purpose: TokenPurpose) -> Self {
        Self { purpose, ..Self::default() }
    }

    /// Set the sensitivity
    pub fn sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    /// Set the retention class
    pub fn retention(mut self, retention: RetentionClass) -> Self {
        self.retention = retention;
        self
    }

    /// Drop the original after tokenizing; the mapping can never be reversed
    pub fn non_reversible(mut self) -> Self {
        self.reversible = false;
        self
    }
}

/// One token mapping
///
/// The original value is only held sealed under the `tokens` key context,
/// and only for reversible records. Reversibility is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Opaque token string
    pub token: String,
    /// Keyed hash of the original value
    pub content_hash: String,
    /// Pattern class the original matched
    pub class: PatternClass,
    /// Purpose at creation
    pub purpose: TokenPurpose,
    /// Sensitivity at creation
    pub sensitivity: Sensitivity,
    /// Retention class at creation
    pub retention: RetentionClass,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// `None` for permanent tokens
    pub expires_at: Option<DateTime<Utc>>,
    reversible: bool,
    #[serde(skip)]
    pub(crate) sealed: Option<EncryptedEnvelope>,
}

impl TokenRecord {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        token: String,
        content_hash: String,
        class: PatternClass,
        context: &TokenizationContext,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        sealed: Option<EncryptedEnvelope>,
    ) -> Self {
        Self {
            token,
            content_hash,
            class,
            purpose: context.purpose.clone(),
            sensitivity: context.sensitivity,
            retention: context.retention,
            created_at,
            expires_at,
            reversible: context.reversible && sealed.is_some(),
            sealed,
        }
    }

    /// Whether the sealed original was kept
    pub fn is_reversible(&self) -> bool {
        self.reversible
    }

    /// Whether `now` is at or past the expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Copy without the sealed original
    pub(crate) fn redacted(&self) -> Self {
        Self { sealed: None, ..self.clone() }
    }
}

/// One replaced span in a tokenize result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSpan {
    /// Token written into the output
    pub token: String,
    /// Pattern class of the replaced span
    pub class: PatternClass,
    /// Byte range in the tokenized output
    pub start: usize,
    /// Exclusive end
    pub end: usize,
    /// An existing live mapping was reused
    pub reused: bool,
}

/// Output of one tokenize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationResult {
    /// Input with every sensitive span replaced
    pub tokenized: String,
    /// Replaced spans in output order
    pub spans: Vec<TokenSpan>,
}

impl TokenizationResult {
    /// Number of replaced spans
    pub fn token_count(&self) -> usize {
        self.spans.len()
    }
}
