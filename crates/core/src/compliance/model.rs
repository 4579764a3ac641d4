//! Compliance policies, issues and evaluation state

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use aegis_common::impl_status_conversions;
use aegis_common::time::add_saturating;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ComplianceFailure, PrivacyError, PrivacyResult};
use crate::keys::EncryptionLevel;

const HOUR: u64 = 60 * 60;

/// Regulation a checklist is written against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Regulation {
    /// EU General Data Protection Regulation
    Gdpr,
    /// California Consumer Privacy Act
    Ccpa,
    /// US Health Insurance Portability and Accountability Act
    Hipaa,
    /// Organisation-defined policy registered at runtime
    Custom(String),
}

impl Regulation {
    /// Regulations with a shipped checklist
    pub const BUILT_IN: [Regulation; 3] = [Self::Gdpr, Self::Ccpa, Self::Hipaa];

    /// Lowercase name used in ids, metadata and configuration
    pub fn label(&self) -> &str {
        match self {
            Self::Gdpr => "gdpr",
            Self::Ccpa => "ccpa",
            Self::Hipaa => "hipaa",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Regulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Regulation {
    type Err = ComplianceFailure;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        match name.as_str() {
            "gdpr" => Ok(Self::Gdpr),
            "ccpa" => Ok(Self::Ccpa),
            "hipaa" => Ok(Self::Hipaa),
            _ if !name.is_empty()
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') =>
            {
                Ok(Self::Custom(name))
            }
            _ => Err(ComplianceFailure::UnknownRegulation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Regulation {
    type Error = ComplianceFailure;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Regulation> for String {
    fn from(value: Regulation) -> Self {
        value.label().to_string()
    }
}

/// How strictly issue severities are applied
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceMode {
    /// Severities drop one level
    Permissive,
    /// Severities as written in the checklist
    #[default]
    Standard,
    /// Severities above low rise one level
    Strict,
    /// Same adjustment as strict
    Enterprise,
}

impl_status_conversions!(ComplianceMode {
    Permissive => "permissive",
    Standard => "standard",
    Strict => "strict",
    Enterprise => "enterprise",
});

/// Urgency of an open issue; sets its due window
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Due within 30 days
    Low,
    /// Due within 7 days
    #[default]
    Medium,
    /// Due within 24 hours; blocks compliance
    High,
    /// Due within an hour; blocks compliance
    Critical,
}

impl_status_conversions!(IssueSeverity {
    Low => "low",
    Medium => "medium",
    High => "high",
    Critical => "critical",
});

impl IssueSeverity {
    /// Time allowed between detection and remediation
    pub fn due_window(self) -> Duration {
        Duration::from_secs(match self {
            Self::Critical => HOUR,
            Self::High => 24 * HOUR,
            Self::Medium => 7 * 24 * HOUR,
            Self::Low => 30 * 24 * HOUR,
        })
    }

    /// One level up; critical stays critical
    pub fn escalate(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }

    fn lower(self) -> Self {
        match self {
            Self::Low | Self::Medium => Self::Low,
            Self::High => Self::Medium,
            Self::Critical => Self::High,
        }
    }

    /// Contribution of one unresolved issue to the score penalty
    pub fn weight(self) -> f64 {
        match self {
            Self::Low => 0.25,
            Self::Medium => 0.5,
            Self::High => 0.75,
            Self::Critical => 1.0,
        }
    }

    /// Permissive lowers one level; strict and enterprise raise anything above low
    pub fn adjusted(self, mode: ComplianceMode) -> Self {
        match mode {
            ComplianceMode::Permissive => self.lower(),
            ComplianceMode::Standard => self,
            ComplianceMode::Strict | ComplianceMode::Enterprise if self > Self::Low => {
                self.escalate()
            }
            ComplianceMode::Strict | ComplianceMode::Enterprise => self,
        }
    }

    /// High and critical issues make a regulation non-compliant
    pub fn is_blocking(self) -> bool {
        self >= Self::High
    }
}

/// Area of the system an issue concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Payload encryption strength
    Encryption,
    /// Key lifecycle and rotation
    KeyManagement,
    /// Biometric and session gating
    AccessControl,
    /// Audit journal coverage and integrity
    AuditTrail,
    /// Retention limits on data and logs
    DataRetention,
    /// Sensitive-data scanning and token lifetimes
    DataMinimization,
}

impl_status_conversions!(IssueType {
    Encryption => "encryption",
    KeyManagement => "key_management",
    AccessControl => "access_control",
    AuditTrail => "audit_trail",
    DataRetention => "data_retention",
    DataMinimization => "data_minimization",
});

/// Runtime facts a checklist is evaluated against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceSnapshot {
    /// When the facts were gathered
    pub taken_at: DateTime<Utc>,
    /// Mode the issues are graded under
    pub mode: ComplianceMode,
    /// Audit logging is on
    pub audit_enabled: bool,
    /// The latest chain verification passed
    pub audit_chain_intact: bool,
    /// Configured audit retention
    #[serde(with = "aegis_common::duration_secs")]
    pub audit_retention_period: Duration,
    /// Failed or denied security events in the recent window
    pub security_failures: u64,
    /// Default encryption level
    pub encryption_level: EncryptionLevel,
    /// Active keys past their rotation-due time
    pub overdue_keys: usize,
    /// Biometric gating is available
    pub biometric_enabled: bool,
    /// Idle lifetime of a biometric session
    #[serde(with = "aegis_common::duration_secs")]
    pub biometric_session_ttl: Duration,
    /// Sensitive-data scanning is on
    pub sensitive_scan_enabled: bool,
    /// Configured data retention
    #[serde(with = "aegis_common::duration_secs")]
    pub data_retention_period: Duration,
    /// Lifetime of session-retention tokens
    #[serde(with = "aegis_common::duration_secs")]
    pub token_session_ttl: Duration,
}

/// A single verifiable condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ControlCheck {
    /// Audit logging must be on
    AuditEnabled,
    /// The audit chain must verify
    AuditChainIntact,
    /// Audit entries must be kept at least `period`
    AuditRetentionAtLeast {
        /// Minimum retention
        #[serde(with = "aegis_common::duration_secs")]
        period: Duration,
    },
    /// No more than `count` recent security failures
    SecurityFailuresAtMost {
        /// Highest tolerated failure count
        count: u64,
    },
    /// Default encryption level must be at least `level`
    EncryptionLevelAtLeast {
        /// Weakest acceptable level
        level: EncryptionLevel,
    },
    /// No active key may be overdue for rotation
    KeysRotatedOnSchedule,
    /// Biometric gating must be available
    BiometricEnabled,
    /// Biometric sessions must expire within `ttl`
    BiometricSessionTtlAtMost {
        /// Longest acceptable session
        #[serde(with = "aegis_common::duration_secs")]
        ttl: Duration,
    },
    /// Sensitive-data scanning must be on
    SensitiveScanEnabled,
    /// Data may be kept at most `period`
    DataRetentionAtMost {
        /// Longest acceptable retention
        #[serde(with = "aegis_common::duration_secs")]
        period: Duration,
    },
    /// Session tokens must expire within `ttl`
    TokenSessionTtlAtMost {
        /// Longest acceptable token lifetime
        #[serde(with = "aegis_common::duration_secs")]
        ttl: Duration,
    },
}

impl ControlCheck {
    /// Whether `snapshot` meets this condition
    pub fn is_satisfied(&self, snapshot: &ComplianceSnapshot) -> bool {
        match self {
            Self::AuditEnabled => snapshot.audit_enabled,
            Self::AuditChainIntact => snapshot.audit_chain_intact,
            Self::AuditRetentionAtLeast { period } => snapshot.audit_retention_period >= *period,
            Self::SecurityFailuresAtMost { count } => snapshot.security_failures <= *count,
            Self::EncryptionLevelAtLeast { level } => snapshot.encryption_level >= *level,
            Self::KeysRotatedOnSchedule => snapshot.overdue_keys == 0,
            Self::BiometricEnabled => snapshot.biometric_enabled,
            Self::BiometricSessionTtlAtMost { ttl } => snapshot.biometric_session_ttl <= *ttl,
            Self::SensitiveScanEnabled => snapshot.sensitive_scan_enabled,
            Self::DataRetentionAtMost { period } => snapshot.data_retention_period <= *period,
            Self::TokenSessionTtlAtMost { ttl } => snapshot.token_session_ttl <= *ttl,
        }
    }
}

/// One required control of a policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Stable id, unique within its policy
    pub id: String,
    /// Short description, copied into issues
    pub title: String,
    /// Area the control covers
    pub issue_type: IssueType,
    /// Severity of an issue raised by this control, before mode adjustment
    pub severity: IssueSeverity,
    /// Condition evaluated against the snapshot
    pub check: ControlCheck,
    /// What to change when the control fails
    pub remediation: String,
}

impl Control {
    /// Control from its parts
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        issue_type: IssueType,
        severity: IssueSeverity,
        check: ControlCheck,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            issue_type,
            severity,
            check,
            remediation: remediation.into(),
        }
    }
}

/// Regulation id plus its ordered list of required controls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompliancePolicy {
    /// Regulation the controls belong to
    pub regulation: Regulation,
    /// Controls, evaluated in order
    pub controls: Vec<Control>,
}

impl CompliancePolicy {
    /// Policy from its parts; see [`CompliancePolicy::validate`]
    pub fn new(regulation: Regulation, controls: Vec<Control>) -> Self {
        Self { regulation, controls }
    }

    /// Reject empty policies, blank or duplicate control ids and missing remediation
    pub fn validate(&self) -> PrivacyResult<()> {
        let invalid = |reason: String| -> PrivacyError { ComplianceFailure::InvalidPolicy(reason).into() };
        if self.controls.is_empty() {
            return Err(invalid(format!("{} has no controls", self.regulation)));
        }
        let mut seen = std::collections::HashSet::new();
        for control in &self.controls {
            if control.id.trim().is_empty() {
                return Err(invalid("control id cannot be empty".to_string()));
            }
            if !seen.insert(control.id.as_str()) {
                return Err(invalid(format!("duplicate control id '{}'", control.id)));
            }
            if control.remediation.trim().is_empty() {
                return Err(invalid(format!("control '{}' has no remediation", control.id)));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// The control is currently failing
    #[default]
    Open,
    /// The control passed again, or was withdrawn
    Resolved,
}

impl_status_conversions!(IssueStatus {
    Open => "open",
    Resolved => "resolved",
});

/// An unmet control
///
/// The id is derived from the regulation and control id, so repeated
/// evaluations of the same state refer to the same issue. Issues are
/// resolved, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceIssue {
    /// Derived by [`issue_id`]
    pub id: String,
    /// Regulation whose checklist raised the issue
    pub regulation: Regulation,
    /// Control that failed
    pub control_id: String,
    /// Area of the failing control
    pub issue_type: IssueType,
    /// Current severity after mode adjustment and escalation
    pub severity: IssueSeverity,
    /// Title of the failing control
    pub description: String,
    /// Remediation copied from the control
    pub remediation: String,
    /// When the issue was opened or last reopened
    pub detected_at: DateTime<Utc>,
    /// Deadline before the issue escalates
    pub due_at: DateTime<Utc>,
    /// Open or resolved
    pub status: IssueStatus,
    /// Set while resolved
    pub resolved_at: Option<DateTime<Utc>>,
    /// Times the issue was escalated since it opened
    pub escalations: u32,
}

/// Deterministic issue id for a regulation and control
pub fn issue_id(regulation: &Regulation, control_id: &str) -> String {
    let digest = Sha256::new()
        .chain_update(regulation.label().as_bytes())
        .chain_update([0u8])
        .chain_update(control_id.as_bytes())
        .finalize();
    format!("iss_{}", &hex::encode(digest)[..16])
}

impl ComplianceIssue {
    pub(crate) fn open(
        regulation: &Regulation,
        control: &Control,
        severity: IssueSeverity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: issue_id(regulation, &control.id),
            regulation: regulation.clone(),
            control_id: control.id.clone(),
            issue_type: control.issue_type,
            severity,
            description: control.title.clone(),
            remediation: control.remediation.clone(),
            detected_at: now,
            due_at: add_saturating(now, severity.due_window()),
            status: IssueStatus::Open,
            resolved_at: None,
            escalations: 0,
        }
    }

    /// `true` until resolved
    pub fn is_open(&self) -> bool {
        self.status == IssueStatus::Open
    }

    /// Open and past its due time
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now > self.due_at
    }

    /// Raise one level; the new due date runs from `now`
    pub(crate) fn escalate(&mut self, now: DateTime<Utc>) {
        self.severity = self.severity.escalate();
        self.due_at = add_saturating(now, self.severity.due_window());
        self.escalations += 1;
    }

    pub(crate) fn resolve(&mut self, now: DateTime<Utc>) {
        self.status = IssueStatus::Resolved;
        self.resolved_at = Some(now);
    }

    pub(crate) fn reopen(&mut self, severity: IssueSeverity, now: DateTime<Utc>) {
        self.status = IssueStatus::Open;
        self.severity = severity;
        self.detected_at = now;
        self.due_at = add_saturating(now, severity.due_window());
        self.resolved_at = None;
        self.escalations = 0;
    }
}

/// Outcome of evaluating one regulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceStatus {
    /// Regulation evaluated
    pub regulation: Regulation,
    /// Evaluation time
    pub evaluated_at: DateTime<Utc>,
    /// Mode in effect
    pub mode: ComplianceMode,
    /// Controls in the policy
    pub total_controls: usize,
    /// 1.0 minus the weighted open-issue penalty, clamped to `[0, 1]`
    pub compliance_score: f64,
    /// No open high or critical issue
    pub is_compliant: bool,
    /// Every issue of the regulation, resolved ones included
    pub issues: Vec<ComplianceIssue>,
}

impl ComplianceStatus {
    pub(crate) fn new(
        regulation: Regulation,
        evaluated_at: DateTime<Utc>,
        mode: ComplianceMode,
        total_controls: usize,
        issues: Vec<ComplianceIssue>,
    ) -> Self {
        let penalty: f64 =
            issues.iter().filter(|i| i.is_open()).map(|i| i.severity.weight()).sum();
        let compliance_score = if total_controls == 0 {
            1.0
        } else {
            (1.0 - penalty / total_controls as f64).clamp(0.0, 1.0)
        };
        let is_compliant = !issues.iter().any(|i| i.is_open() && i.severity.is_blocking());
        Self { regulation, evaluated_at, mode, total_controls, compliance_score, is_compliant, issues }
    }

    /// Issues still open
    pub fn open_issues(&self) -> impl Iterator<Item = &ComplianceIssue> {
        self.issues.iter().filter(|i| i.is_open())
    }
}
