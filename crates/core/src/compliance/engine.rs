//! Checklist evaluation with issue lifecycle tracking

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use aegis_common::SharedClock;
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::checklists;
use super::model::{
    ComplianceIssue, CompliancePolicy, ComplianceSnapshot, ComplianceStatus, Regulation,
};
use crate::audit::{AuditEvent, AuditEventType, AuditLogger, AuditSeverity};
use crate::error::{ComplianceFailure, PrivacyResult};

/// Source of the runtime facts a checklist inspects
#[async_trait]
pub trait ComplianceSignals: Send + Sync {
    /// Gather the current facts
    async fn snapshot(&self) -> PrivacyResult<ComplianceSnapshot>;
}

/// Evaluates regulation checklists and tracks the resulting issues
///
/// Issues are keyed by a deterministic id, so re-evaluating unchanged state
/// touches nothing, and a control that starts passing resolves only its own
/// issue. Every issue transition is audited before it is committed.
pub struct ComplianceEngine {
    signals: Arc<dyn ComplianceSignals>,
    audit: Arc<AuditLogger>,
    clock: SharedClock,
    policies: RwLock<HashMap<Regulation, CompliancePolicy>>,
    issues: Mutex<BTreeMap<String, ComplianceIssue>>,
    last_status: RwLock<HashMap<Regulation, ComplianceStatus>>,
}

impl std::fmt::Debug for ComplianceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceEngine")
            .field("policies", &self.policies.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ComplianceEngine {
    /// Engine loaded with the built-in GDPR, CCPA and HIPAA checklists
    pub fn new(
        signals: Arc<dyn ComplianceSignals>,
        audit: Arc<AuditLogger>,
        clock: SharedClock,
    ) -> Self {
        let policies = Regulation::BUILT_IN
            .iter()
            .filter_map(checklists::builtin)
            .map(|p| (p.regulation.clone(), p))
            .collect();
        Self {
            signals,
            audit,
            clock,
            policies: RwLock::new(policies),
            issues: Mutex::new(BTreeMap::new()),
            last_status: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace the checklist for a regulation
    pub fn register_policy(&self, policy: CompliancePolicy) -> PrivacyResult<()> {
        policy.validate()?;
        info!(regulation = %policy.regulation, controls = policy.controls.len(), "Registered compliance policy");
        self.policies.write().insert(policy.regulation.clone(), policy);
        Ok(())
    }

    /// Registered checklist for `regulation`
    pub fn policy(&self, regulation: &Regulation) -> Option<CompliancePolicy> {
        self.policies.read().get(regulation).cloned()
    }

    /// Regulations with a registered checklist, sorted
    pub fn regulations(&self) -> Vec<Regulation> {
        let mut regulations: Vec<_> = self.policies.read().keys().cloned().collect();
        regulations.sort();
        regulations
    }

    /// Evaluate one regulation against a fresh snapshot
    #[instrument(skip(self), fields(regulation = %regulation))]
    pub async fn evaluate(&self, regulation: &Regulation) -> PrivacyResult<ComplianceStatus> {
        let policy = self
            .policy(regulation)
            .ok_or_else(|| ComplianceFailure::UnknownRegulation(regulation.to_string()))?;
        let snapshot = self.signals.snapshot().await?;
        let now = self.clock.now();

        let mut issues = self.issues.lock().await;
        for control in &policy.controls {
            let id = super::model::issue_id(regulation, &control.id);
            let satisfied = control.check.is_satisfied(&snapshot);
            let severity = control.severity.adjusted(snapshot.mode);

            match (issues.get(&id), satisfied) {
                (None, true) => {}
                (None, false) => {
                    let issue = ComplianceIssue::open(regulation, control, severity, now);
                    self.audit_transition(AuditEventType::ComplianceIssueOpened, &issue).await?;
                    warn!(issue_id = %issue.id, control = %control.id, severity = %severity, "Compliance issue opened");
                    issues.insert(id, issue);
                }
                (Some(existing), false) if !existing.is_open() => {
                    let mut issue = existing.clone();
                    issue.reopen(severity, now);
                    self.audit_transition(AuditEventType::ComplianceIssueOpened, &issue).await?;
                    warn!(issue_id = %issue.id, control = %control.id, "Compliance issue reopened");
                    issues.insert(id, issue);
                }
                (Some(existing), false) if existing.is_overdue(now) => {
                    let mut issue = existing.clone();
                    issue.escalate(now);
                    self.audit_transition(AuditEventType::ComplianceIssueEscalated, &issue).await?;
                    warn!(issue_id = %issue.id, severity = %issue.severity, "Compliance issue escalated");
                    issues.insert(id, issue);
                }
                (Some(_), false) => {}
                (Some(existing), true) if existing.is_open() => {
                    let mut issue = existing.clone();
                    issue.resolve(now);
                    self.audit_transition(AuditEventType::ComplianceIssueResolved, &issue).await?;
                    info!(issue_id = %issue.id, control = %control.id, "Compliance issue resolved");
                    issues.insert(id, issue);
                }
                (Some(_), true) => {}
            }
        }

        // A replaced policy may have withdrawn the control behind an open issue
        let withdrawn: Vec<String> = issues
            .iter()
            .filter(|(_, issue)| {
                &issue.regulation == regulation
                    && issue.is_open()
                    && !policy.controls.iter().any(|c| c.id == issue.control_id)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in withdrawn {
            let Some(mut issue) = issues.get(&id).cloned() else {
                continue;
            };
            issue.resolve(now);
            self.audit_transition(AuditEventType::ComplianceIssueResolved, &issue).await?;
            info!(issue_id = %issue.id, control = %issue.control_id, "Compliance issue resolved, control withdrawn");
            issues.insert(id, issue);
        }

        let regulation_issues: Vec<ComplianceIssue> =
            issues.values().filter(|i| &i.regulation == regulation).cloned().collect();
        drop(issues);

        let status = ComplianceStatus::new(
            regulation.clone(),
            now,
            snapshot.mode,
            policy.controls.len(),
            regulation_issues,
        );
        self.audit
            .append(
                AuditEvent::new(AuditEventType::ComplianceEvaluated)
                    .with("regulation", regulation.label())
                    .with("mode", snapshot.mode.to_string())
                    .with("score", status.compliance_score)
                    .with("compliant", status.is_compliant)
                    .with("open_issues", status.open_issues().count()),
            )
            .await?;

        info!(
            score = status.compliance_score,
            compliant = status.is_compliant,
            open_issues = status.open_issues().count(),
            "Compliance evaluated"
        );
        self.last_status.write().insert(regulation.clone(), status.clone());
        Ok(status)
    }

    /// Evaluate several regulations in order, stopping at the first error
    pub async fn evaluate_all(&self, regulations: &[Regulation]) -> PrivacyResult<Vec<ComplianceStatus>> {
        let mut statuses = Vec::with_capacity(regulations.len());
        for regulation in regulations {
            statuses.push(self.evaluate(regulation).await?);
        }
        Ok(statuses)
    }

    /// Result of the most recent evaluation of `regulation`
    pub fn last_status(&self, regulation: &Regulation) -> Option<ComplianceStatus> {
        self.last_status.read().get(regulation).cloned()
    }

    /// `true` when the latest evaluation left no open high or critical issue
    pub fn is_compliant(&self, regulation: &Regulation) -> Option<bool> {
        self.last_status.read().get(regulation).map(|s| s.is_compliant)
    }

    /// Every tracked issue, resolved ones included
    pub async fn issues(&self) -> Vec<ComplianceIssue> {
        self.issues.lock().await.values().cloned().collect()
    }

    async fn audit_transition(
        &self,
        event_type: AuditEventType,
        issue: &ComplianceIssue,
    ) -> PrivacyResult<()> {
        let severity = if issue.severity.is_blocking() {
            AuditSeverity::Warning
        } else {
            AuditSeverity::Info
        };
        self.audit
            .append(
                AuditEvent::new(event_type)
                    .severity(severity)
                    .with("issue_id", issue.id.as_str())
                    .with("regulation", issue.regulation.label())
                    .with("control_id", issue.control_id.as_str())
                    .with("issue_severity", issue.severity.to_string())
                    .with("due_at", issue.due_at.to_rfc3339()),
            )
            .await?;
        Ok(())
    }
}
