//! The shape of a runbook as proposed by an enricher's `ai-summary`
//! `enrichment.completed` payload (§4.7, "Responsibility").

use serde::Deserialize;
use warden_types::{Json, Severity};

/// One step of a proposed runbook, as carried in enrichment data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookStepDef {
    /// Step identifier, unique within the runbook.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Opaque action identifier the step executor interprets.
    pub action: String,
    /// Parameters passed to the step executor.
    #[serde(default)]
    pub params: Json,
}

/// A proposed runbook, as carried in enrichment data.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunbookDef {
    /// Runbook identifier.
    pub id: String,
    /// Human-readable runbook name.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<RunbookStepDef>,
}

/// The `ai-summary` enrichment's data shape this orchestrator consumes.
/// Any other fields the enricher attached are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiSummaryData {
    /// Candidate runbooks; the orchestrator selects the first.
    #[serde(default)]
    pub suggested_runbooks: Vec<RunbookDef>,
    /// Optional severity carried alongside the summary, checked against the
    /// configured severity filter.
    #[serde(default)]
    pub severity: Option<Severity>,
}
