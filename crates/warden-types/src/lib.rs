#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-types** – Shared primitive data structures for the Warden
//! operations-automation platform.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It defines the domain entities from the data model (events, incidents,
//! fingerprints, escalation state, approvals, audit entries) and the
//! schema-less [`Json`] value used for free-form context/metadata fields.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod event;

pub use event::{
    ActionApprovedPayload, ActionDeniedPayload, ActionExecutedPayload, EnrichmentCompletedPayload, Event, EventKind, IncidentCreatedPayload,
    IncidentEscalatedPayload, IncidentSuppressedPayload, IncidentUpdatedPayload, LogIngestedPayload, RunbookCompletedPayload,
    RunbookStartedPayload, RunbookStepCompletedPayload,
};

//─────────────────────────────
//  Schema-less value type
//─────────────────────────────

/// Opaque, JSON-like value used for incident `context`, enrichment `data`,
/// and event `metadata`. Kept as a thin alias rather than a bespoke enum so
/// that `serde_json`'s machinery (indexing, merging, pretty-printing) stays
/// available everywhere the core threads one of these through.
pub type Json = serde_json::Value;

/// Convenience alias for a string-keyed map of [`Json`] values.
pub type JsonMap = serde_json::Map<String, Json>;

//─────────────────────────────
//  Time helper
//─────────────────────────────

/// Returns the current wall-clock time.
///
/// Centralised so that engines call one function rather than
/// `chrono::Utc::now()` scattered throughout the codebase; test doubles can
/// wrap this later without touching call sites.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

//─────────────────────────────
//  Identifiers
//─────────────────────────────

/// Generates a fresh random identifier, rendered as a hyphenated UUID string.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a prefixed identifier, e.g. `new_prefixed_id("INC")` → `INC-<uuid>`.
pub fn new_prefixed_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

//─────────────────────────────
//  Severity
//─────────────────────────────

/// Incident severity. Ordered `Info < Warning < Critical` for filter
/// comparisons (escalation policy severity filters, anomaly metric
/// severity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, non-actionable.
    Info,
    /// Actionable but not urgent.
    Warning,
    /// Requires prompt attention.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

//─────────────────────────────
//  Incident
//─────────────────────────────

/// Lifecycle status of an [`Incident`].
///
/// Transitions are `Open -> Acknowledged -> (Resolved | Closed)`; `Closed`
/// is terminal. The store does not enforce the transition graph itself
/// (callers request a specific status) but modules should respect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    /// Newly detected, no human or automated action taken yet.
    Open,
    /// A human or policy has acknowledged the incident.
    Acknowledged,
    /// The underlying issue has been remediated.
    Resolved,
    /// Terminal: no further transitions are expected.
    Closed,
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IncidentStatus::Open => "open",
            IncidentStatus::Acknowledged => "acknowledged",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A single append-only entry in an incident's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// When the entry was recorded.
    pub at: DateTime<Utc>,
    /// Short machine-readable kind, e.g. `"status_change"`, `"enrichment"`.
    pub kind: String,
    /// Human-readable summary.
    pub message: String,
    /// Arbitrary structured detail.
    pub details: Option<Json>,
}

/// The canonical incident record owned exclusively by the Incident Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    /// Globally unique incident identifier.
    pub incident_id: String,
    /// Short human-readable title.
    pub title: String,
    /// Longer human-readable description.
    pub description: String,
    /// Severity classification.
    pub severity: Severity,
    /// Identifier of the module that detected this incident.
    pub detected_by: String,
    /// When the incident was first detected.
    pub detected_at: DateTime<Utc>,
    /// Free-form detection context (metric values, log lines, etc.).
    pub context: Json,
    /// Current lifecycle status.
    pub status: IncidentStatus,
    /// Append-only history of everything that has happened to this incident.
    pub timeline: Vec<TimelineEntry>,
    /// Enrichment data keyed by the enriching module's id.
    pub enrichments: HashMap<String, Json>,
}

impl Incident {
    /// Builds a new, freshly-detected incident in `Open` status with an
    /// empty timeline and no enrichments.
    pub fn new(
        incident_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        detected_by: impl Into<String>,
        context: Json,
    ) -> Self {
        Self {
            incident_id: incident_id.into(),
            title: title.into(),
            description: description.into(),
            severity,
            detected_by: detected_by.into(),
            detected_at: now(),
            context,
            status: IncidentStatus::Open,
            timeline: Vec::new(),
            enrichments: HashMap::new(),
        }
    }
}

//─────────────────────────────
//  Fingerprint tracking (Dedup)
//─────────────────────────────

/// A single tracked fingerprint window, owned exclusively by the Dedup
/// engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintEntry {
    /// Lowercase hex SHA-256 digest of the configured field values.
    pub fingerprint: String,
    /// The incident id that first produced this fingerprint.
    pub original_incident_id: String,
    /// Number of sightings (including the original) observed so far.
    pub occurrences: u64,
    /// When this fingerprint was first seen.
    pub first_seen_at: DateTime<Utc>,
    /// When this fingerprint was most recently seen.
    pub last_seen_at: DateTime<Utc>,
}

//─────────────────────────────
//  Escalation
//─────────────────────────────

/// Status of a tracked escalation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationStatus {
    /// Tracked, not yet escalated or acknowledged.
    Open,
    /// A human has acknowledged the underlying incident.
    Acknowledged,
    /// At least one escalation level has fired.
    Escalated,
}

/// Per-incident escalation tracking state, owned exclusively by the
/// Escalation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationState {
    /// Incident being tracked.
    pub incident_id: String,
    /// The policy that matched this incident.
    pub policy_id: String,
    /// When tracking began.
    pub started_at: DateTime<Utc>,
    /// Highest level reached so far (0 = none yet).
    pub current_level: u32,
    /// Current status.
    pub status: EscalationStatus,
    /// When the incident was acknowledged, if it has been.
    pub acknowledged_at: Option<DateTime<Utc>>,
    /// Last notification timestamp per level.
    pub last_notified_at: HashMap<u32, DateTime<Utc>>,
}

//─────────────────────────────
//  Approvals
//─────────────────────────────

/// Lifecycle status of an [`ApprovalRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by a human/approver; a token has been minted.
    Approved,
    /// Denied by a human/approver.
    Denied,
    /// Expired without a decision before `requestTTL` elapsed.
    Expired,
}

/// A request for human approval of a mutating action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Unique request identifier.
    pub id: String,
    /// The kind of action being requested, e.g. `"service.restart"`.
    pub action_type: String,
    /// Human-readable description of the requested action.
    pub description: String,
    /// Why this action is being proposed.
    pub reasoning: String,
    /// Who/what is requesting the action (module id or user).
    pub requested_by: String,
    /// Arbitrary metadata describing the action (target host, command, …).
    pub metadata: Json,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// Current state-machine status.
    pub status: ApprovalStatus,
}

/// Parameters supplied when creating an [`ApprovalRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestParams {
    /// The kind of action being requested.
    pub action_type: String,
    /// Human-readable description.
    pub description: String,
    /// Why this action is being proposed.
    pub reasoning: String,
    /// Who/what is requesting the action.
    pub requested_by: String,
    /// Arbitrary metadata.
    pub metadata: Json,
}

/// A short-lived credential minted by the Approval Gate. The only key that
/// unlocks mutating execution.
///
/// Validity is never self-contained: callers must pass the token to the
/// gate's `validate_token`, which consults its own authoritative tables
/// rather than trusting any field on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    /// Unique token identifier.
    pub id: String,
    /// The request this token authorizes.
    pub request_id: String,
    /// Who approved the request.
    pub approved_by: String,
    /// When the request was approved.
    pub approved_at: DateTime<Utc>,
    /// When this token stops being valid.
    pub expires_at: DateTime<Utc>,
}

//─────────────────────────────
//  Runbook execution
//─────────────────────────────

/// Lifecycle status of a [`RunbookExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunbookExecutionStatus {
    /// Selected, not yet started.
    Proposed,
    /// Waiting on a whole-runbook or per-step approval.
    AwaitingApproval,
    /// Actively advancing through steps.
    Running,
    /// Every step terminated without failure.
    Completed,
    /// At least one step failed.
    Failed,
    /// Denied before any step ran.
    Cancelled,
}

/// Lifecycle status of a [`RunbookStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunbookStepStatus {
    /// Not yet reached.
    Pending,
    /// Proposed for per-step approval, awaiting a decision.
    AwaitingApproval,
    /// Currently running under the step executor.
    Executing,
    /// Finished without error.
    Completed,
    /// Finished with an error or timed out.
    Failed,
    /// Never run because an earlier step failed.
    Skipped,
}

/// One step of a [`RunbookExecution`], owned exclusively by the Runbook
/// Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookStep {
    /// Step identifier, unique within its runbook definition.
    pub step_id: String,
    /// Human-readable step name.
    pub name: String,
    /// Opaque action identifier the step executor interprets.
    pub action: String,
    /// Parameters passed to the step executor.
    pub params: Json,
    /// Current status.
    pub status: RunbookStepStatus,
    /// When execution of this step began.
    pub started_at: Option<DateTime<Utc>>,
    /// When this step reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Executor output, present once `Completed`.
    pub output: Option<Json>,
    /// Failure detail, present once `Failed`.
    pub error: Option<String>,
}

/// A single run of a runbook against one incident, owned exclusively by
/// the Runbook Orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookExecution {
    /// Unique execution identifier.
    pub execution_id: String,
    /// The incident this execution is remediating.
    pub incident_id: String,
    /// The runbook definition identifier.
    pub runbook_id: String,
    /// Human-readable runbook name.
    pub runbook_name: String,
    /// Steps in execution order.
    pub steps: Vec<RunbookStep>,
    /// Current overall status.
    pub status: RunbookExecutionStatus,
    /// When the execution was proposed.
    pub created_at: DateTime<Utc>,
    /// When the execution reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunbookExecution {
    /// Count of steps that reached `Completed`.
    pub fn completed_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.status == RunbookStepStatus::Completed).count()
    }
}

//─────────────────────────────
//  Audit log
//─────────────────────────────

/// One append-only record in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// When the entry was recorded.
    pub timestamp: DateTime<Utc>,
    /// Dotted action name, e.g. `"approval.requested"`.
    pub action: String,
    /// Human-readable actor string, e.g. `"oncall-admin"` or a module id.
    pub actor: String,
    /// Human-readable subject string, e.g. a request or incident id.
    pub subject: String,
    /// Structured detail. Never a stack trace.
    pub details: Json,
}

//─────────────────────────────
//  Action execution
//─────────────────────────────

/// Outcome of an executed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionResult {
    /// The action completed without error.
    Success,
    /// The action failed.
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_round_trips_through_json() {
        for s in [Severity::Info, Severity::Warning, Severity::Critical] {
            let json = serde_json::to_string(&s).unwrap();
            let back: Severity = serde_json::from_str(&json).unwrap();
            assert_eq!(s, back);
        }
    }

    #[test]
    fn severity_from_str_is_case_insensitive() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn severity_ordering_is_info_lt_warning_lt_critical() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn new_incident_starts_open_with_empty_timeline() {
        let inc = Incident::new("INC-1", "t", "d", Severity::Warning, "detector", Json::Null);
        assert_eq!(inc.status, IncidentStatus::Open);
        assert!(inc.timeline.is_empty());
        assert!(inc.enrichments.is_empty());
    }
}
