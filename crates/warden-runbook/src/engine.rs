//! The Runbook Orchestrator engine: entry gates, mode selection, and the
//! approval-gated step advance loop (§4.7).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use warden_audit::ApprovalGate;
use warden_bus::EventBus;
use warden_types::{
    event::kind, new_prefixed_id, now, ActionApprovedPayload, ActionDeniedPayload, ActionExecutedPayload, ActionResult,
    ApprovalRequestParams, ApprovalToken, EnrichmentCompletedPayload, Event, RunbookCompletedPayload, RunbookExecution,
    RunbookExecutionStatus, RunbookStartedPayload, RunbookStep, RunbookStepCompletedPayload, RunbookStepStatus, Severity,
};

use crate::definition::{AiSummaryData, RunbookDef};
use crate::executor::{StepExecutor, StepOutcome};

/// Literal token id stamped on `action.executed` when a step ran without its
/// own per-step approval token (§4.7, §9 "Open questions — decisions").
pub const RUNBOOK_STEP_TOKEN: &str = "runbook-step";

/// Configuration governing entry gates and execution mode (§4.7).
#[derive(Debug, Clone)]
pub struct RunbookConfig {
    /// If non-empty, only `ai-summary` enrichments carrying one of these
    /// severities are accepted.
    pub severity_filter: Vec<Severity>,
    /// Minimum time between runbook proposals for the same incident.
    pub cooldown_ms: i64,
    /// Maximum number of executions tracked concurrently.
    pub max_concurrent_runbooks: usize,
    /// Maximum number of completed/cancelled executions retained in history.
    pub max_runbook_history: usize,
    /// Skip all approvals and run every step immediately.
    pub auto_execute: bool,
    /// When not auto-executing, propose each step individually rather than
    /// running the whole runbook under one approval.
    pub require_approval_per_step: bool,
    /// Per-step execution timeout.
    pub step_timeout_ms: u64,
}

impl Default for RunbookConfig {
    fn default() -> Self {
        Self {
            severity_filter: Vec::new(),
            cooldown_ms: 15 * 60 * 1000,
            max_concurrent_runbooks: 5,
            max_runbook_history: 100,
            auto_execute: false,
            require_approval_per_step: true,
            step_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PendingApproval {
    Runbook,
    Step(usize),
}

struct Tracking {
    execution: RunbookExecution,
    pending_kind: Option<PendingApproval>,
}

/// Drives runbook executions from proposal through completion. Owns its
/// executions and history exclusively (§3, "Ownership") — no other engine
/// mutates them.
pub struct RunbookEngine {
    config: RunbookConfig,
    bus: Arc<dyn EventBus>,
    approval_gate: Arc<ApprovalGate>,
    executor: Arc<dyn StepExecutor>,
    active: Mutex<HashMap<String, Tracking>>,
    request_index: Mutex<HashMap<String, String>>,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
    history: Mutex<VecDeque<RunbookExecution>>,
}

impl RunbookEngine {
    /// Builds an engine bound to `bus` (for event emission) and
    /// `approval_gate` (for proposing and validating approvals).
    pub fn new(config: RunbookConfig, bus: Arc<dyn EventBus>, approval_gate: Arc<ApprovalGate>, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            config,
            bus,
            approval_gate,
            executor,
            active: Mutex::new(HashMap::new()),
            request_index: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of executions currently tracked (not yet terminal).
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Snapshot of completed/failed/cancelled executions, oldest first.
    pub async fn history(&self) -> Vec<RunbookExecution> {
        self.history.lock().await.iter().cloned().collect()
    }

    /// Looks up an execution by id, active or historical.
    pub async fn get_execution(&self, execution_id: &str) -> Option<RunbookExecution> {
        if let Some(tracking) = self.active.lock().await.get(execution_id) {
            return Some(tracking.execution.clone());
        }
        self.history.lock().await.iter().find(|e| e.execution_id == execution_id).cloned()
    }

    async fn cooldown_active(&self, incident_id: &str) -> bool {
        match self.cooldowns.lock().await.get(incident_id) {
            Some(at) => now().signed_duration_since(*at) < chrono::Duration::milliseconds(self.config.cooldown_ms),
            None => false,
        }
    }

    /// Entry point for `enrichment.completed` (§4.7, "Entry gates").
    pub async fn handle_enrichment_completed(&self, payload: EnrichmentCompletedPayload) -> anyhow::Result<()> {
        if payload.enrichment_type != "ai-summary" {
            return Ok(());
        }
        let Ok(data) = serde_json::from_value::<AiSummaryData>(payload.data.clone()) else {
            return Ok(());
        };
        let Some(def) = data.suggested_runbooks.into_iter().next() else {
            return Ok(());
        };

        if !self.config.severity_filter.is_empty() {
            if let Some(severity) = data.severity {
                if !self.config.severity_filter.contains(&severity) {
                    return Ok(());
                }
            }
        }

        if self.cooldown_active(&payload.incident_id).await {
            tracing::debug!(incident_id = %payload.incident_id, "runbook proposal dropped: cooldown active");
            return Ok(());
        }
        if self.active.lock().await.len() >= self.config.max_concurrent_runbooks {
            tracing::warn!(incident_id = %payload.incident_id, max = self.config.max_concurrent_runbooks, "runbook proposal dropped: at capacity");
            return Ok(());
        }

        let execution = build_execution(&payload.incident_id, def);
        self.start_or_propose(execution).await
    }

    async fn start_or_propose(&self, mut execution: RunbookExecution) -> anyhow::Result<()> {
        let execution_id = execution.execution_id.clone();

        if self.config.auto_execute {
            execution.status = RunbookExecutionStatus::Running;
            self.publish_started(&execution).await?;
            self.active.lock().await.insert(execution_id.clone(), Tracking { execution, pending_kind: None });
            return self.run_steps_from(&execution_id, 0, &execution_id, RUNBOOK_STEP_TOKEN).await;
        }

        let request = self
            .approval_gate
            .request_approval(ApprovalRequestParams {
                action_type: "runbook.execute".to_string(),
                description: format!("Execute runbook `{}` for incident {}", execution.runbook_name, execution.incident_id),
                reasoning: "proposed by enrichment ai-summary".to_string(),
                requested_by: "runbook".to_string(),
                metadata: serde_json::json!({ "executionId": execution.execution_id, "runbookId": execution.runbook_id }),
            })
            .await;

        execution.status = RunbookExecutionStatus::AwaitingApproval;
        self.request_index.lock().await.insert(request.id.clone(), execution_id.clone());
        self.active.lock().await.insert(execution_id, Tracking { execution, pending_kind: Some(PendingApproval::Runbook) });
        Ok(())
    }

    async fn propose_step(&self, execution_id: &str, index: usize) -> anyhow::Result<()> {
        let (action, name, runbook_name, incident_id) = {
            let mut active = self.active.lock().await;
            let Some(tracking) = active.get_mut(execution_id) else { return Ok(()) };
            tracking.execution.steps[index].status = RunbookStepStatus::AwaitingApproval;
            let step = &tracking.execution.steps[index];
            (step.action.clone(), step.name.clone(), tracking.execution.runbook_name.clone(), tracking.execution.incident_id.clone())
        };

        let request = self
            .approval_gate
            .request_approval(ApprovalRequestParams {
                action_type: action,
                description: format!("Runbook `{runbook_name}` step `{name}` for incident {incident_id}"),
                reasoning: "runbook step execution".to_string(),
                requested_by: "runbook".to_string(),
                metadata: serde_json::json!({ "executionId": execution_id, "stepIndex": index }),
            })
            .await;

        self.request_index.lock().await.insert(request.id.clone(), execution_id.to_string());
        if let Some(tracking) = self.active.lock().await.get_mut(execution_id) {
            tracking.pending_kind = Some(PendingApproval::Step(index));
        }
        Ok(())
    }

    /// Entry point for `action.approved` (§4.7, "Advance loop").
    pub async fn handle_action_approved(&self, payload: ActionApprovedPayload) -> anyhow::Result<()> {
        let request_id = payload.request.id.clone();
        let Some(execution_id) = self.request_index.lock().await.remove(&request_id) else {
            return Ok(());
        };

        if !self.approval_gate.validate_token(&payload.token).await {
            tracing::warn!(request_id, execution_id, "runbook approval token failed validation; ignoring");
            return Ok(());
        }

        let kind = {
            let mut active = self.active.lock().await;
            let Some(tracking) = active.get_mut(&execution_id) else { return Ok(()) };
            tracking.pending_kind.take()
        };

        match kind {
            Some(PendingApproval::Runbook) => self.on_runbook_approved(&execution_id, &request_id).await,
            Some(PendingApproval::Step(index)) => self.on_step_approved(&execution_id, index, &request_id, &payload.token).await,
            None => Ok(()),
        }
    }

    /// Entry point for `action.denied`: a denied whole-runbook or step
    /// approval cancels the execution outright.
    pub async fn handle_action_denied(&self, payload: ActionDeniedPayload) -> anyhow::Result<()> {
        let request_id = payload.request.id.clone();
        let Some(execution_id) = self.request_index.lock().await.remove(&request_id) else {
            return Ok(());
        };

        let execution = {
            let mut active = self.active.lock().await;
            let Some(mut tracking) = active.remove(&execution_id) else { return Ok(()) };
            tracking.execution.status = RunbookExecutionStatus::Cancelled;
            tracking.execution.completed_at = Some(now());
            tracking.execution
        };
        tracing::info!(execution_id = %execution.execution_id, "runbook execution cancelled: approval denied");
        self.retire(execution).await;
        Ok(())
    }

    async fn on_runbook_approved(&self, execution_id: &str, request_id: &str) -> anyhow::Result<()> {
        let execution = {
            let mut active = self.active.lock().await;
            let Some(tracking) = active.get_mut(execution_id) else { return Ok(()) };
            tracking.execution.status = RunbookExecutionStatus::Running;
            tracking.execution.clone()
        };
        self.publish_started(&execution).await?;

        if self.config.require_approval_per_step {
            self.propose_step(execution_id, 0).await
        } else {
            self.run_steps_from(execution_id, 0, request_id, RUNBOOK_STEP_TOKEN).await
        }
    }

    async fn on_step_approved(&self, execution_id: &str, index: usize, request_id: &str, token: &ApprovalToken) -> anyhow::Result<()> {
        let failed = self.run_step(execution_id, index, request_id, &token.id).await?;
        if failed {
            self.mark_remaining_skipped(execution_id, index + 1).await;
            return self.complete_execution(execution_id).await;
        }

        let next = index + 1;
        let has_next = {
            let active = self.active.lock().await;
            active.get(execution_id).map(|t| next < t.execution.steps.len()).unwrap_or(false)
        };
        if has_next {
            self.propose_step(execution_id, next).await
        } else {
            self.complete_execution(execution_id).await
        }
    }

    async fn run_steps_from(&self, execution_id: &str, start_index: usize, request_id: &str, token_id: &str) -> anyhow::Result<()> {
        let step_count = {
            let active = self.active.lock().await;
            active.get(execution_id).map(|t| t.execution.steps.len()).unwrap_or(0)
        };
        for index in start_index..step_count {
            let failed = self.run_step(execution_id, index, request_id, token_id).await?;
            if failed {
                self.mark_remaining_skipped(execution_id, index + 1).await;
                break;
            }
        }
        self.complete_execution(execution_id).await
    }

    async fn run_step(&self, execution_id: &str, index: usize, request_id: &str, token_id: &str) -> anyhow::Result<bool> {
        let step: RunbookStep = {
            let mut active = self.active.lock().await;
            let Some(tracking) = active.get_mut(execution_id) else { return Ok(true) };
            let step = &mut tracking.execution.steps[index];
            step.status = RunbookStepStatus::Executing;
            step.started_at = Some(now());
            step.clone()
        };

        let timeout = Duration::from_millis(self.config.step_timeout_ms.max(1));
        let outcome = match tokio::time::timeout(timeout, self.executor.execute(&step)).await {
            Ok(outcome) => outcome,
            Err(_) => StepOutcome::failure("step timed out"),
        };

        let (step_id, status, completed_at) = {
            let mut active = self.active.lock().await;
            let Some(tracking) = active.get_mut(execution_id) else { return Ok(true) };
            let step = &mut tracking.execution.steps[index];
            let completed_at = now();
            step.completed_at = Some(completed_at);
            step.output = Some(outcome.output.clone());
            step.error = outcome.error.clone();
            step.status = if outcome.success { RunbookStepStatus::Completed } else { RunbookStepStatus::Failed };
            (step.step_id.clone(), step.status, completed_at)
        };

        let status_str = match status {
            RunbookStepStatus::Completed => "completed",
            RunbookStepStatus::Failed => "failed",
            _ => "skipped",
        };

        let step_completed = RunbookStepCompletedPayload {
            execution_id: execution_id.to_string(),
            step_index: index,
            step_id,
            status: status_str.to_string(),
            output: Some(outcome.output.clone()),
            error: outcome.error.clone(),
            completed_at,
        };
        self.bus.publish(Event::new(kind::RUNBOOK_STEP_COMPLETED, "runbook", step_completed)).await?;

        let executed = ActionExecutedPayload {
            request_id: request_id.to_string(),
            token_id: token_id.to_string(),
            action_type: "runbook.step".to_string(),
            result: if outcome.success { ActionResult::Success } else { ActionResult::Failure },
            output: outcome.output,
            executed_by: "runbook".to_string(),
            executed_at: completed_at,
        };
        self.bus.publish(Event::new(kind::ACTION_EXECUTED, "runbook", executed)).await?;

        Ok(!outcome.success)
    }

    async fn mark_remaining_skipped(&self, execution_id: &str, from_index: usize) {
        let mut active = self.active.lock().await;
        if let Some(tracking) = active.get_mut(execution_id) {
            for step in tracking.execution.steps.iter_mut().skip(from_index) {
                if step.status == RunbookStepStatus::Pending {
                    step.status = RunbookStepStatus::Skipped;
                }
            }
        }
    }

    async fn complete_execution(&self, execution_id: &str) -> anyhow::Result<()> {
        let execution = {
            let mut active = self.active.lock().await;
            let Some(mut tracking) = active.remove(execution_id) else { return Ok(()) };
            let any_failed = tracking.execution.steps.iter().any(|s| s.status == RunbookStepStatus::Failed);
            tracking.execution.status = if any_failed { RunbookExecutionStatus::Failed } else { RunbookExecutionStatus::Completed };
            tracking.execution.completed_at = Some(now());
            tracking.execution
        };

        let completed = RunbookCompletedPayload {
            execution_id: execution.execution_id.clone(),
            incident_id: execution.incident_id.clone(),
            status: match execution.status {
                RunbookExecutionStatus::Completed => "completed".to_string(),
                _ => "failed".to_string(),
            },
            completed_steps: execution.completed_step_count(),
            total_steps: execution.steps.len(),
            completed_at: execution.completed_at.expect("set above"),
        };
        self.bus.publish(Event::new(kind::RUNBOOK_COMPLETED, "runbook", completed)).await?;

        self.retire(execution).await;
        Ok(())
    }

    async fn retire(&self, execution: RunbookExecution) {
        self.cooldowns.lock().await.insert(execution.incident_id.clone(), now());
        let mut history = self.history.lock().await;
        history.push_back(execution);
        while history.len() > self.config.max_runbook_history {
            history.pop_front();
        }
    }

    async fn publish_started(&self, execution: &RunbookExecution) -> anyhow::Result<()> {
        let payload = RunbookStartedPayload {
            execution_id: execution.execution_id.clone(),
            incident_id: execution.incident_id.clone(),
            runbook_id: execution.runbook_id.clone(),
            step_count: execution.steps.len(),
            started_at: now(),
        };
        self.bus.publish(Event::new(kind::RUNBOOK_STARTED, "runbook", payload)).await?;
        Ok(())
    }
}

fn build_execution(incident_id: &str, def: RunbookDef) -> RunbookExecution {
    let steps = def
        .steps
        .into_iter()
        .map(|s| RunbookStep {
            step_id: s.id,
            name: s.name,
            action: s.action,
            params: s.params,
            status: RunbookStepStatus::Pending,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        })
        .collect();

    RunbookExecution {
        execution_id: new_prefixed_id("RBX"),
        incident_id: incident_id.to_string(),
        runbook_id: def.id,
        runbook_name: def.name,
        steps,
        status: RunbookExecutionStatus::Proposed,
        created_at: now(),
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warden_audit::AuditLog;
    use warden_bus::InMemoryBus;
    use warden_types::Json;

    fn ai_summary_enrichment(incident_id: &str, runbook_id: &str, step_count: usize) -> EnrichmentCompletedPayload {
        let steps: Vec<Json> = (0..step_count)
            .map(|i| serde_json::json!({ "id": format!("step-{i}"), "name": format!("Step {i}"), "action": "noop" }))
            .collect();
        EnrichmentCompletedPayload {
            incident_id: incident_id.to_string(),
            enricher_module: "ai-summary".to_string(),
            enrichment_type: "ai-summary".to_string(),
            data: serde_json::json!({
                "suggestedRunbooks": [{ "id": runbook_id, "name": "Restart service", "steps": steps }]
            }),
            completed_at: now(),
        }
    }

    fn engine(config: RunbookConfig) -> (Arc<InMemoryBus>, Arc<ApprovalGate>, RunbookEngine) {
        let bus = Arc::new(InMemoryBus::new());
        let gate = Arc::new(ApprovalGate::new(Arc::clone(&bus) as Arc<dyn EventBus>, Arc::new(AuditLog::new())));
        let engine = RunbookEngine::new(config, Arc::clone(&bus) as Arc<dyn EventBus>, Arc::clone(&gate), Arc::new(crate::executor::SandboxStepExecutor));
        (bus, gate, engine)
    }

    /// Collects every `action.proposed` request id published on `bus`, in
    /// order, so tests can drive approvals through the same gate the engine
    /// uses without reaching into its private state.
    async fn collect_proposed_ids(bus: &Arc<InMemoryBus>) -> Arc<Mutex<Vec<String>>> {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let c = Arc::clone(&ids);
        bus.subscribe(
            kind::ACTION_PROPOSED,
            Arc::new(move |event| {
                let c = Arc::clone(&c);
                Box::pin(async move {
                    let request: warden_types::ApprovalRequest = event.payload_as()?;
                    c.lock().await.push(request.id);
                    Ok(())
                })
            }),
        )
        .await;
        ids
    }

    /// Approves the next not-yet-approved proposed request and feeds the
    /// resulting `action.approved` back into `engine` — mirrors how module
    /// wiring relays the gate's events in production.
    async fn approve_next(gate: &ApprovalGate, engine: &RunbookEngine, ids: &Mutex<Vec<String>>, cursor: &mut usize) {
        let request_id = {
            let ids = ids.lock().await;
            ids[*cursor].clone()
        };
        *cursor += 1;
        let token = gate.approve(&request_id, "oncall-admin").await.unwrap();
        let request = gate.get_request(&request_id).await.unwrap();
        engine.handle_action_approved(ActionApprovedPayload { request, token }).await.unwrap();
    }

    async fn count_events(bus: &Arc<InMemoryBus>, event_type: &'static str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        bus.subscribe(
            event_type,
            Arc::new(move |_event| {
                let c = Arc::clone(&c);
                Box::pin(async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
        .await;
        counter
    }

    #[tokio::test]
    async fn non_auto_execute_runs_no_steps_before_runbook_approval() {
        let (bus, _gate, engine) = engine(RunbookConfig { auto_execute: false, require_approval_per_step: false, ..Default::default() });
        let step_completed = count_events(&bus, kind::RUNBOOK_STEP_COMPLETED).await;

        engine.handle_enrichment_completed(ai_summary_enrichment("INC-1", "rb-1", 2)).await.unwrap();
        assert_eq!(engine.active_count().await, 1);
        assert_eq!(step_completed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn per_step_mode_proposes_one_step_at_a_time_and_completes() {
        let (bus, gate, engine) = engine(RunbookConfig { auto_execute: false, require_approval_per_step: true, ..Default::default() });
        let proposed_ids = collect_proposed_ids(&bus).await;
        let step_completed = count_events(&bus, kind::RUNBOOK_STEP_COMPLETED).await;
        let runbook_completed = count_events(&bus, kind::RUNBOOK_COMPLETED).await;

        engine.handle_enrichment_completed(ai_summary_enrichment("INC-1", "rb-1", 3)).await.unwrap();
        assert_eq!(proposed_ids.lock().await.len(), 1, "only the whole-runbook request is outstanding");

        let mut cursor = 0;
        approve_next(&gate, &engine, &proposed_ids, &mut cursor).await; // whole-runbook approval
        assert_eq!(proposed_ids.lock().await.len(), 2, "exactly one step proposal is outstanding at a time");

        approve_next(&gate, &engine, &proposed_ids, &mut cursor).await; // step 0
        assert_eq!(proposed_ids.lock().await.len(), 3);
        approve_next(&gate, &engine, &proposed_ids, &mut cursor).await; // step 1
        assert_eq!(proposed_ids.lock().await.len(), 4);
        approve_next(&gate, &engine, &proposed_ids, &mut cursor).await; // step 2

        assert_eq!(proposed_ids.lock().await.len(), 4, "four approval requests total: one runbook + three steps");
        assert_eq!(step_completed.load(Ordering::SeqCst), 3);
        assert_eq!(runbook_completed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.history().await[0].completed_step_count(), 3);
    }

    #[tokio::test]
    async fn whole_runbook_approval_without_per_step_runs_all_steps() {
        let (bus, gate, engine) = engine(RunbookConfig { auto_execute: false, require_approval_per_step: false, ..Default::default() });
        let proposed_ids = collect_proposed_ids(&bus).await;
        let step_completed = count_events(&bus, kind::RUNBOOK_STEP_COMPLETED).await;

        engine.handle_enrichment_completed(ai_summary_enrichment("INC-1", "rb-1", 2)).await.unwrap();
        let mut cursor = 0;
        approve_next(&gate, &engine, &proposed_ids, &mut cursor).await;

        assert_eq!(proposed_ids.lock().await.len(), 1, "no further approvals are proposed");
        assert_eq!(step_completed.load(Ordering::SeqCst), 2);
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn denied_whole_runbook_approval_cancels_without_running_steps() {
        let (bus, gate, engine) = engine(RunbookConfig { auto_execute: false, ..Default::default() });
        let proposed_ids = collect_proposed_ids(&bus).await;
        let step_completed = count_events(&bus, kind::RUNBOOK_STEP_COMPLETED).await;

        engine.handle_enrichment_completed(ai_summary_enrichment("INC-1", "rb-1", 1)).await.unwrap();
        let request_id = proposed_ids.lock().await[0].clone();
        gate.deny(&request_id, "oncall-admin", "not now").await.unwrap();
        let request = gate.get_request(&request_id).await.unwrap();
        engine.handle_action_denied(ActionDeniedPayload { request, reason: "not now".to_string() }).await.unwrap();

        assert_eq!(step_completed.load(Ordering::SeqCst), 0);
        assert_eq!(engine.active_count().await, 0);
        assert_eq!(engine.history().await[0].status, RunbookExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn auto_execute_runs_every_step_without_approval() {
        let (bus, _gate, engine) = engine(RunbookConfig { auto_execute: true, ..Default::default() });
        let step_completed = count_events(&bus, kind::RUNBOOK_STEP_COMPLETED).await;
        let runbook_completed = count_events(&bus, kind::RUNBOOK_COMPLETED).await;
        let executed = count_events(&bus, kind::ACTION_EXECUTED).await;

        engine.handle_enrichment_completed(ai_summary_enrichment("INC-1", "rb-1", 3)).await.unwrap();

        assert_eq!(step_completed.load(Ordering::SeqCst), 3);
        assert_eq!(executed.load(Ordering::SeqCst), 3);
        assert_eq!(runbook_completed.load(Ordering::SeqCst), 1);
        assert_eq!(engine.active_count().await, 0);
        assert_eq!(engine.history().await.len(), 1);
        assert_eq!(engine.history().await[0].completed_step_count(), 3);
    }

    #[tokio::test]
    async fn history_never_exceeds_max_runbook_history() {
        let (_bus, _gate, engine) = engine(RunbookConfig { auto_execute: true, max_runbook_history: 2, max_concurrent_runbooks: 10, ..Default::default() });
        for i in 0..5 {
            engine.handle_enrichment_completed(ai_summary_enrichment(&format!("INC-{i}"), "rb-1", 1)).await.unwrap();
        }
        assert_eq!(engine.history().await.len(), 2);
    }

    #[tokio::test]
    async fn entry_gate_drops_non_ai_summary_enrichment() {
        let (_bus, _gate, engine) = engine(RunbookConfig::default());
        let mut payload = ai_summary_enrichment("INC-1", "rb-1", 1);
        payload.enrichment_type = "dedup_occurrence".to_string();
        engine.handle_enrichment_completed(payload).await.unwrap();
        assert_eq!(engine.active_count().await, 0);
    }

    #[tokio::test]
    async fn entry_gate_drops_when_at_capacity() {
        let (_bus, _gate, engine) = engine(RunbookConfig { max_concurrent_runbooks: 1, require_approval_per_step: false, ..Default::default() });
        engine.handle_enrichment_completed(ai_summary_enrichment("INC-1", "rb-1", 1)).await.unwrap();
        engine.handle_enrichment_completed(ai_summary_enrichment("INC-2", "rb-1", 1)).await.unwrap();
        assert_eq!(engine.active_count().await, 1);
    }
}
