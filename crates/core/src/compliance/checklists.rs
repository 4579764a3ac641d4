//! Built-in control checklists

use std::time::Duration;

use super::model::{CompliancePolicy, Control, ControlCheck, IssueSeverity, IssueType, Regulation};
use crate::keys::EncryptionLevel;

const DAY: u64 = 24 * 60 * 60;
const MINUTE: u64 = 60;

fn days(n: u64) -> Duration {
    Duration::from_secs(n * DAY)
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * MINUTE)
}

/// Checklist for a built-in regulation; `None` for custom ones
pub fn builtin(regulation: &Regulation) -> Option<CompliancePolicy> {
    match regulation {
        Regulation::Gdpr => Some(gdpr()),
        Regulation::Ccpa => Some(ccpa()),
        Regulation::Hipaa => Some(hipaa()),
        Regulation::Custom(_) => None,
    }
}

/// GDPR checklist, including data and token retention limits
pub fn gdpr() -> CompliancePolicy {
    CompliancePolicy::new(
        Regulation::Gdpr,
        vec![
            Control::new(
                "gdpr.art30.records",
                "Processing activities are not recorded in the audit log",
                IssueType::AuditTrail,
                IssueSeverity::High,
                ControlCheck::AuditEnabled,
                "Enable audit logging so processing activities are recorded",
            ),
            Control::new(
                "gdpr.art32.integrity",
                "Audit trail integrity cannot be verified",
                IssueType::AuditTrail,
                IssueSeverity::Critical,
                ControlCheck::AuditChainIntact,
                "Investigate the audit store for out-of-band modification and restore from backup",
            ),
            Control::new(
                "gdpr.art32.encryption",
                "Personal data is encrypted below the standard level",
                IssueType::Encryption,
                IssueSeverity::High,
                ControlCheck::EncryptionLevelAtLeast { level: EncryptionLevel::Standard },
                "Raise default_encryption_level to standard or higher",
            ),
            Control::new(
                "gdpr.art32.key_rotation",
                "Encryption keys are past their rotation date",
                IssueType::KeyManagement,
                IssueSeverity::Medium,
                ControlCheck::KeysRotatedOnSchedule,
                "Rotate overdue keys or run the key sweep",
            ),
            Control::new(
                "gdpr.art25.minimization",
                "Sensitive data scanning is disabled",
                IssueType::DataMinimization,
                IssueSeverity::Medium,
                ControlCheck::SensitiveScanEnabled,
                "Enable sensitive_scan_enabled so personal data is detected before storage",
            ),
            Control::new(
                "gdpr.art5.storage_limitation",
                "Personal data is retained longer than two years",
                IssueType::DataRetention,
                IssueSeverity::Medium,
                ControlCheck::DataRetentionAtMost { period: days(730) },
                "Lower data_retention_period to at most 730 days",
            ),
            Control::new(
                "gdpr.art5.token_lifetime",
                "Session tokens outlive a working session",
                IssueType::DataMinimization,
                IssueSeverity::Low,
                ControlCheck::TokenSessionTtlAtMost { ttl: minutes(8 * 60) },
                "Lower token_session_ttl to at most eight hours",
            ),
        ],
    )
}

/// CCPA checklist
pub fn ccpa() -> CompliancePolicy {
    CompliancePolicy::new(
        Regulation::Ccpa,
        vec![
            Control::new(
                "ccpa.1798.100.records",
                "Consumer data access is not recorded in the audit log",
                IssueType::AuditTrail,
                IssueSeverity::High,
                ControlCheck::AuditEnabled,
                "Enable audit logging",
            ),
            Control::new(
                "ccpa.1798.150.security",
                "Consumer data is encrypted below the standard level",
                IssueType::Encryption,
                IssueSeverity::High,
                ControlCheck::EncryptionLevelAtLeast { level: EncryptionLevel::Standard },
                "Raise default_encryption_level to standard or higher",
            ),
            Control::new(
                "ccpa.1798.100.minimization",
                "Sensitive data scanning is disabled",
                IssueType::DataMinimization,
                IssueSeverity::Low,
                ControlCheck::SensitiveScanEnabled,
                "Enable sensitive_scan_enabled",
            ),
            Control::new(
                "ccpa.1798.100.retention",
                "Consumer data is retained longer than one year",
                IssueType::DataRetention,
                IssueSeverity::Medium,
                ControlCheck::DataRetentionAtMost { period: days(365) },
                "Lower data_retention_period to at most 365 days",
            ),
            Control::new(
                "ccpa.1798.150.incidents",
                "Security failures were recorded in the audit trail",
                IssueType::AccessControl,
                IssueSeverity::Medium,
                ControlCheck::SecurityFailuresAtMost { count: 0 },
                "Review failed security operations in the audit log and remediate their cause",
            ),
        ],
    )
}

/// HIPAA checklist; stricter on audit retention and session lifetimes
pub fn hipaa() -> CompliancePolicy {
    CompliancePolicy::new(
        Regulation::Hipaa,
        vec![
            Control::new(
                "hipaa.164.312.b.audit_controls",
                "Access to health data is not recorded in the audit log",
                IssueType::AuditTrail,
                IssueSeverity::Critical,
                ControlCheck::AuditEnabled,
                "Enable audit logging",
            ),
            Control::new(
                "hipaa.164.312.c.integrity",
                "Audit trail integrity cannot be verified",
                IssueType::AuditTrail,
                IssueSeverity::Critical,
                ControlCheck::AuditChainIntact,
                "Investigate the audit store for out-of-band modification",
            ),
            Control::new(
                "hipaa.164.316.retention",
                "Audit records are kept for less than six years",
                IssueType::DataRetention,
                IssueSeverity::High,
                ControlCheck::AuditRetentionAtLeast { period: days(6 * 365) },
                "Raise audit_retention_period to at least six years",
            ),
            Control::new(
                "hipaa.164.312.a.encryption",
                "Health data is encrypted below the high level",
                IssueType::Encryption,
                IssueSeverity::High,
                ControlCheck::EncryptionLevelAtLeast { level: EncryptionLevel::High },
                "Raise default_encryption_level to high or maximum",
            ),
            Control::new(
                "hipaa.164.312.d.authentication",
                "Person or entity authentication is disabled",
                IssueType::AccessControl,
                IssueSeverity::High,
                ControlCheck::BiometricEnabled,
                "Enable biometric_enabled",
            ),
            Control::new(
                "hipaa.164.312.a.automatic_logoff",
                "Authenticated sessions last longer than fifteen minutes",
                IssueType::AccessControl,
                IssueSeverity::Medium,
                ControlCheck::BiometricSessionTtlAtMost { ttl: minutes(15) },
                "Lower biometric_session_ttl to at most fifteen minutes",
            ),
            Control::new(
                "hipaa.164.308.key_management",
                "Encryption keys are past their rotation date",
                IssueType::KeyManagement,
                IssueSeverity::Medium,
                ControlCheck::KeysRotatedOnSchedule,
                "Rotate overdue keys or run the key sweep",
            ),
        ],
    )
}
