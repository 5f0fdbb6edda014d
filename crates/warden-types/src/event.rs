//! Typed event envelope and per-kind payload structs.
//!
//! Events are heterogeneous by dotted `type` string. Rather than a single
//! giant enum (which would force every subscriber to match on variants it
//! does not care about) each event kind is a standalone, strongly-typed
//! payload struct; [`Event`] wraps one of them behind a `serde_json::Value`
//! so the bus itself stays generic (see `warden-bus`), while producers and
//! consumers that know the concrete kind can deserialize the payload into
//! the matching struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{now, Json};

/// The canonical set of dotted event-type strings the core recognizes.
/// `#[non_exhaustive]`-style extensibility is achieved by keeping this a
/// plain string newtype rather than a closed enum: connectors/notifiers
/// outside the core may mint their own event types.
pub mod kind {
    /// Emitted by a Connector for every ingested raw log line.
    pub const LOG_INGESTED: &str = "log.ingested";
    /// Emitted by a Detector when a new incident is identified.
    pub const INCIDENT_CREATED: &str = "incident.created";
    /// Emitted by the Incident Store whenever a field changes.
    pub const INCIDENT_UPDATED: &str = "incident.updated";
    /// Emitted by the Dedup engine when a duplicate incident is suppressed.
    pub const INCIDENT_SUPPRESSED: &str = "incident.suppressed";
    /// Emitted by the Escalation engine when a level fires.
    pub const INCIDENT_ESCALATED: &str = "incident.escalated";
    /// Emitted by any Enricher when it finishes enriching an incident.
    pub const ENRICHMENT_COMPLETED: &str = "enrichment.completed";
    /// Emitted by the Approval Gate when a new request is created.
    pub const ACTION_PROPOSED: &str = "action.proposed";
    /// Emitted by the Approval Gate when a request is approved.
    pub const ACTION_APPROVED: &str = "action.approved";
    /// Emitted by the Approval Gate when a request is denied.
    pub const ACTION_DENIED: &str = "action.denied";
    /// Emitted by an Action module after it executes.
    pub const ACTION_EXECUTED: &str = "action.executed";
    /// Emitted by the Runbook Orchestrator when an execution starts.
    pub const RUNBOOK_STARTED: &str = "runbook.started";
    /// Emitted by the Runbook Orchestrator after each step completes.
    pub const RUNBOOK_STEP_COMPLETED: &str = "runbook.stepCompleted";
    /// Emitted by the Runbook Orchestrator when an execution finishes.
    pub const RUNBOOK_COMPLETED: &str = "runbook.completed";
}

/// Marker alias for a dotted event-type string (e.g. `"incident.created"`).
pub type EventKind = str;

/// Immutable event record flowing through the bus.
///
/// Once constructed an `Event` is never mutated; it lives from the moment
/// `publish` is called until every currently-registered handler for its
/// `event_type` has settled, then it is discarded. The bus keeps no history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Dotted event-type string, e.g. `"incident.created"`.
    pub event_type: String,
    /// Identifier of the producing module.
    pub source: String,
    /// When the event was constructed.
    pub timestamp: DateTime<Utc>,
    /// Optional identifier tying related events together across modules.
    pub correlation_id: Option<String>,
    /// Type-specific payload, serialized as JSON so the bus can stay
    /// generic; consumers deserialize into the struct matching
    /// `event_type`.
    pub payload: Json,
}

impl Event {
    /// Builds a new event with the given type, source, and payload.
    /// `payload` must serialize without error — callers pass already-typed
    /// structs via [`Event::new`]'s `serde_json::to_value`, so a failure
    /// here indicates a programmer error (non-serializable payload type),
    /// not a runtime condition; it is surfaced as a panic the same way
    /// `serde_json::json!` panics on cyclic `Value` construction would.
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: impl Serialize) -> Self {
        Self {
            event_type: event_type.into(),
            source: source.into(),
            timestamp: now(),
            correlation_id: None,
            payload: serde_json::to_value(payload).expect("event payload must serialize to JSON"),
        }
    }

    /// Attaches a correlation id, returning `self` for chaining.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Deserializes the payload into the caller-specified type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

//─────────────────────────────
//  Payload structs (one per event kind, §6 EXTERNAL INTERFACES)
//─────────────────────────────

/// Payload for [`kind::LOG_INGESTED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogIngestedPayload {
    /// Identifier of the connector/source that produced this line.
    pub source: String,
    /// The raw ingested line.
    pub line: String,
    /// Line number within the source, if known.
    pub line_number: Option<u64>,
    /// When the connector ingested the line.
    pub ingested_at: DateTime<Utc>,
    /// Arbitrary connector-specific metadata.
    pub metadata: Option<Json>,
}

/// Payload for [`kind::INCIDENT_CREATED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCreatedPayload {
    /// New incident identifier.
    pub incident_id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Severity classification.
    pub severity: crate::Severity,
    /// Identifier of the detecting module.
    pub detected_by: String,
    /// The upstream event (usually a `log.ingested`) that triggered detection.
    pub source_event: Option<Json>,
    /// Detection timestamp.
    pub detected_at: DateTime<Utc>,
    /// Free-form detection context.
    pub context: Option<Json>,
}

/// Payload for [`kind::INCIDENT_UPDATED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentUpdatedPayload {
    /// Incident identifier.
    pub incident_id: String,
    /// Name of the field that changed, e.g. `"status"`.
    pub field: String,
    /// Previous value.
    pub old_value: Json,
    /// New value.
    pub new_value: Json,
    /// Who/what made the change.
    pub updated_by: String,
    /// When the change occurred.
    pub updated_at: DateTime<Utc>,
}

/// Payload for [`kind::INCIDENT_SUPPRESSED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentSuppressedPayload {
    /// The duplicate incident's id (the one that did not pass through).
    pub suppressed_incident_id: String,
    /// The original incident's id this fingerprint first mapped to.
    pub original_incident_id: String,
    /// The SHA-256 hex fingerprint shared by both incidents.
    pub fingerprint: String,
    /// Total sightings of this fingerprint so far, including the original.
    pub occurrences: u64,
    /// The suppression window, in milliseconds.
    pub window_ms: u64,
}

/// Payload for [`kind::INCIDENT_ESCALATED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEscalatedPayload {
    /// Incident identifier.
    pub incident_id: String,
    /// The policy that fired.
    pub policy_id: String,
    /// The level that fired.
    pub level: u32,
    /// Notification targets for this level.
    pub notify: Vec<String>,
    /// Milliseconds elapsed since tracking began.
    pub elapsed_ms: u64,
    /// Incident severity, carried for notifier convenience.
    pub severity: crate::Severity,
    /// Incident title, carried for notifier convenience.
    pub title: String,
}

/// Payload for [`kind::ENRICHMENT_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentCompletedPayload {
    /// Incident identifier.
    pub incident_id: String,
    /// Identifier of the enriching module.
    pub enricher_module: String,
    /// Kind of enrichment, e.g. `"dedup_occurrence"`, `"escalation"`, `"ai-summary"`.
    pub enrichment_type: String,
    /// Enrichment payload.
    pub data: Json,
    /// When enrichment completed.
    pub completed_at: DateTime<Utc>,
}

/// Payload for [`kind::ACTION_APPROVED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionApprovedPayload {
    /// The now-approved request.
    pub request: crate::ApprovalRequest,
    /// The freshly minted token.
    pub token: crate::ApprovalToken,
}

/// Payload for [`kind::ACTION_DENIED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDeniedPayload {
    /// The now-denied request.
    pub request: crate::ApprovalRequest,
    /// Why it was denied.
    pub reason: String,
}

/// Payload for [`kind::ACTION_EXECUTED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecutedPayload {
    /// The approval request that authorized this execution.
    pub request_id: String,
    /// The token id consumed (or the `"runbook-step"` literal, §4.7).
    pub token_id: String,
    /// The kind of action performed.
    pub action_type: String,
    /// Outcome.
    pub result: crate::ActionResult,
    /// Execution output/log.
    pub output: Json,
    /// Who/what executed the action.
    pub executed_by: String,
    /// When execution completed.
    pub executed_at: DateTime<Utc>,
}

/// Payload for [`kind::RUNBOOK_STARTED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookStartedPayload {
    /// The execution that started.
    pub execution_id: String,
    /// The incident being remediated.
    pub incident_id: String,
    /// The runbook definition identifier.
    pub runbook_id: String,
    /// Total number of steps in this execution.
    pub step_count: usize,
    /// When the execution transitioned to `running`.
    pub started_at: DateTime<Utc>,
}

/// Payload for [`kind::RUNBOOK_STEP_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookStepCompletedPayload {
    /// The execution this step belongs to.
    pub execution_id: String,
    /// Index of the step within the execution, zero-based.
    pub step_index: usize,
    /// The step's identifier.
    pub step_id: String,
    /// The step's terminal status, as a string (`"completed"`, `"failed"`,
    /// `"skipped"`).
    pub status: String,
    /// Executor output, if any.
    pub output: Option<Json>,
    /// Failure detail, if the step failed.
    pub error: Option<String>,
    /// When the step reached its terminal status.
    pub completed_at: DateTime<Utc>,
}

/// Payload for [`kind::RUNBOOK_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookCompletedPayload {
    /// The execution that finished.
    pub execution_id: String,
    /// The incident that was remediated.
    pub incident_id: String,
    /// Final status, as a string (`"completed"`, `"failed"`).
    pub status: String,
    /// How many steps reached `completed`.
    pub completed_steps: usize,
    /// Total number of steps in this execution.
    pub total_steps: usize,
    /// When the execution reached its terminal status.
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_payload_round_trips() {
        let payload = LogIngestedPayload {
            source: "file-tail".into(),
            line: "hello".into(),
            line_number: Some(1),
            ingested_at: now(),
            metadata: None,
        };
        let event = Event::new(kind::LOG_INGESTED, "file-tail", payload.clone());
        let back: LogIngestedPayload = event.payload_as().unwrap();
        assert_eq!(back.line, payload.line);
        assert_eq!(event.event_type, kind::LOG_INGESTED);
        assert!(event.correlation_id.is_none());
    }

    #[test]
    fn with_correlation_id_sets_field() {
        let event = Event::new("x.y", "src", serde_json::json!({})).with_correlation_id("corr-1");
        assert_eq!(event.correlation_id.as_deref(), Some("corr-1"));
    }
}
