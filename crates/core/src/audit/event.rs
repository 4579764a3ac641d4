//! Audit event model and chain hashing

use std::collections::{BTreeMap, BTreeSet};

use aegis_common::impl_status_conversions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::PrivacyResult;

const GENESIS_LABEL: &[u8] = b"aegis.audit.genesis.v1";

/// Kind of auditable occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A data key was generated
    KeyCreated,
    /// A context moved to a new active key
    KeyRotated,
    /// A key was revoked ahead of schedule
    KeyRevoked,
    /// A key left its grace window
    KeyRetired,
    /// Plaintext was sealed into an envelope
    DataEncrypted,
    /// An envelope was opened
    DataDecrypted,
    /// An envelope was moved to the active key
    DataReencrypted,
    /// An item was written to secure storage
    StorageWrite,
    /// An item was read from secure storage
    StorageRead,
    /// An item was securely deleted
    StorageDelete,
    /// Biometric or fallback authentication passed
    AuthenticationSucceeded,
    /// Authentication was rejected
    AuthenticationFailed,
    /// The user dismissed the authentication prompt
    AuthenticationCancelled,
    /// Text or records were anonymized
    DataAnonymized,
    /// Sensitive spans were replaced by tokens
    DataTokenized,
    /// Tokens were resolved back to originals
    DataDetokenized,
    /// Expired or revoked tokens were dropped
    TokensPurged,
    /// A regulation was evaluated
    ComplianceEvaluated,
    /// A control failed and an issue was opened
    ComplianceIssueOpened,
    /// An open issue stayed unresolved past its deadline
    ComplianceIssueEscalated,
    /// A previously failing control now passes
    ComplianceIssueResolved,
    /// Configuration was replaced
    ConfigurationChanged,
    /// A candidate configuration failed validation
    ConfigurationRejected,
    /// Chain verification found a broken link
    IntegrityViolation,
    /// The active audit segment was archived
    SegmentRolledOver,
    /// Archived segments past retention were removed
    RetentionPurged,
    /// The engine finished building
    EngineStarted,
    /// The engine shut down
    EngineStopped,
}

impl_status_conversions!(AuditEventType {
    KeyCreated => "key_created",
    KeyRotated => "key_rotated",
    KeyRevoked => "key_revoked",
    KeyRetired => "key_retired",
    DataEncrypted => "data_encrypted",
    DataDecrypted => "data_decrypted",
    DataReencrypted => "data_reencrypted",
    StorageWrite => "storage_write",
    StorageRead => "storage_read",
    StorageDelete => "storage_delete",
    AuthenticationSucceeded => "authentication_succeeded",
    AuthenticationFailed => "authentication_failed",
    AuthenticationCancelled => "authentication_cancelled",
    DataAnonymized => "data_anonymized",
    DataTokenized => "data_tokenized",
    DataDetokenized => "data_detokenized",
    TokensPurged => "tokens_purged",
    ComplianceEvaluated => "compliance_evaluated",
    ComplianceIssueOpened => "compliance_issue_opened",
    ComplianceIssueEscalated => "compliance_issue_escalated",
    ComplianceIssueResolved => "compliance_issue_resolved",
    ConfigurationChanged => "configuration_changed",
    ConfigurationRejected => "configuration_rejected",
    IntegrityViolation => "integrity_violation",
    SegmentRolledOver => "segment_rolled_over",
    RetentionPurged => "retention_purged",
    EngineStarted => "engine_started",
    EngineStopped => "engine_stopped",
});

impl AuditEventType {
    /// Severity used when the caller does not set one
    pub fn default_severity(self) -> AuditSeverity {
        match self {
            Self::IntegrityViolation => AuditSeverity::Critical,
            Self::KeyRevoked
            | Self::AuthenticationFailed
            | Self::ConfigurationRejected
            | Self::ComplianceIssueOpened
            | Self::ComplianceIssueEscalated => AuditSeverity::Warning,
            _ => AuditSeverity::Info,
        }
    }
}

/// Ordered severity scale
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    /// Routine activity
    #[default]
    Info,
    /// Unexpected but recovered
    Warning,
    /// An operation failed
    Error,
    /// Integrity or security breach
    Critical,
}

impl_status_conversions!(AuditSeverity {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

/// Result of the audited operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Completed as requested
    #[default]
    Success,
    /// Failed with an error
    Failure,
    /// Refused by policy or authentication
    Denied,
    /// Abandoned by the caller
    Cancelled,
}

impl_status_conversions!(AuditOutcome {
    Success => "success",
    Failure => "failure",
    Denied => "denied",
    Cancelled => "cancelled",
});

/// One auditable occurrence
///
/// Metadata carries sizes, identifiers and error codes. It must never carry
/// plaintext, key material or token originals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Time-ordered (v7) identifier
    pub id: Uuid,
    /// What happened
    pub event_type: AuditEventType,
    /// Starts at the event type's default
    pub severity: AuditSeverity,
    /// Defaults to `Success`
    pub outcome: AuditOutcome,
    /// Stamped by the logger at append time
    pub timestamp: DateTime<Utc>,
    /// Who triggered the event, when known
    pub actor: Option<String>,
    /// Caller session, when known
    pub session_id: Option<String>,
    /// Sizes, identifiers and error codes only
    pub metadata: BTreeMap<String, Value>,
}

impl AuditEvent {
    /// New event with default severity and a `Success` outcome
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            severity: event_type.default_severity(),
            outcome: AuditOutcome::Success,
            timestamp: Utc::now(),
            actor: None,
            session_id: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Override the default severity
    pub fn severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set the outcome; failures raise the severity to at least `Warning`
    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        if matches!(outcome, AuditOutcome::Failure | AuditOutcome::Denied) {
            self.severity = self.severity.max(AuditSeverity::Warning);
        }
        self
    }

    /// Attribute the event to an actor
    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Attach a caller session id
    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Add one metadata value
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Failed authentication, integrity violations and anything at
    /// `Warning` or above
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self.event_type,
            AuditEventType::IntegrityViolation
                | AuditEventType::AuthenticationFailed
                | AuditEventType::KeyRevoked
        ) || self.severity >= AuditSeverity::Warning
    }

    /// Counted towards the security-failure compliance signal
    pub fn is_security_failure(&self) -> bool {
        matches!(
            self.event_type,
            AuditEventType::IntegrityViolation | AuditEventType::AuthenticationFailed
        ) || (self.outcome == AuditOutcome::Failure && self.severity >= AuditSeverity::Error)
    }
}

/// An appended event with its chain link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Zero-based, gap-free position in the chain
    pub sequence: u64,
    /// The recorded event, with its append timestamp
    pub event: AuditEvent,
    /// Checksum of the preceding entry, or the genesis value
    pub previous_checksum: String,
    /// `compute_checksum(previous_checksum, sequence, event)`
    pub checksum: String,
}

#[derive(Serialize)]
struct EntryBody<'a> {
    sequence: u64,
    event: &'a AuditEvent,
}

/// Chain value preceding the first entry
pub fn genesis_checksum() -> String {
    hex::encode(Sha256::digest(GENESIS_LABEL))
}

/// `sha256(previous ‖ canonical_json({sequence, event}))`, hex encoded
pub fn compute_checksum(previous: &str, sequence: u64, event: &AuditEvent) -> PrivacyResult<String> {
    let previous_bytes = hex::decode(previous).unwrap_or_else(|_| previous.as_bytes().to_vec());
    let body = serde_json::to_vec(&EntryBody { sequence, event })?;

    let mut hasher = Sha256::new();
    hasher.update(&previous_bytes);
    hasher.update(&body);
    Ok(hex::encode(hasher.finalize()))
}

/// Query over the audit trail; empty filter matches everything
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Any of these types
    pub event_types: Option<BTreeSet<AuditEventType>>,
    /// At or above this severity
    pub min_severity: Option<AuditSeverity>,
    /// Only this outcome
    pub outcome: Option<AuditOutcome>,
    /// Inclusive lower bound
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound
    pub to: Option<DateTime<Utc>>,
    /// Lower-cased search text
    pub text: Option<String>,
    /// Maximum number of matches returned
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// Filter matching every entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type to the accepted set
    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_types.get_or_insert_with(BTreeSet::new).insert(event_type);
        self
    }

    /// Keep entries at or above `severity`
    pub fn min_severity(mut self, severity: AuditSeverity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Keep entries with this outcome
    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Inclusive lower and exclusive upper bound
    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    /// Entries at or after `from`
    pub fn since(mut self, from: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self
    }

    /// Case-insensitive substring match over type, actor, session and metadata
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into().to_lowercase());
        self
    }

    /// Cap the number of matches
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether the entry passes every set criterion
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        let event = &entry.event;
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if self.min_severity.is_some_and(|min| event.severity < min) {
            return false;
        }
        if self.outcome.is_some_and(|outcome| event.outcome != outcome) {
            return false;
        }
        if self.from.is_some_and(|from| event.timestamp < from) {
            return false;
        }
        if self.to.is_some_and(|to| event.timestamp >= to) {
            return false;
        }
        if let Some(needle) = &self.text {
            let haystack = format!(
                "{} {} {} {}",
                event.event_type,
                event.actor.as_deref().unwrap_or_default(),
                event.session_id.as_deref().unwrap_or_default(),
                serde_json::to_string(&event.metadata).unwrap_or_default()
            )
            .to_lowercase();
            if !haystack.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}
