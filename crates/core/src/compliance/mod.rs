//! Regulatory compliance evaluation
//!
//! A [`ComplianceEngine`] evaluates a checklist per regulation against a
//! [`ComplianceSnapshot`] of runtime facts supplied by a
//! [`ComplianceSignals`] implementation.

pub mod checklists;
mod engine;
mod model;
pub mod report;

pub use engine::{ComplianceEngine, ComplianceSignals};
pub use model::{
    issue_id, ComplianceIssue, ComplianceMode, CompliancePolicy, ComplianceSnapshot,
    ComplianceStatus, Control, ControlCheck, IssueSeverity, IssueStatus, IssueType, Regulation,
};
