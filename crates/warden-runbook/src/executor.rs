//! The pluggable step execution surface (§4.7, "Ambient-stack note").
//!
//! Grounded directly on the teacher's opcode-handler extension point
//! (`toka-kernel::registry`): the core stays opaque to what a step actually
//! does, exposing only this trait. [`SandboxStepExecutor`] is the default —
//! it never performs the action, only logs it.

use async_trait::async_trait;
use warden_types::{Json, RunbookStep};

/// Result of running one runbook step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Whether the step succeeded.
    pub success: bool,
    /// Executor output, regardless of outcome.
    pub output: Json,
    /// Failure detail, present only when `success` is `false`.
    pub error: Option<String>,
}

impl StepOutcome {
    /// Builds a successful outcome.
    pub fn success(output: Json) -> Self {
        Self { success: true, output, error: None }
    }

    /// Builds a failed outcome.
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, output: Json::Null, error: Some(error.into()) }
    }
}

/// Executes one runbook step. Implementations plug in whatever a tool
/// registry eventually provides; the orchestrator itself never inspects
/// `step.action` beyond passing it through.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Runs `step`, returning its outcome. Must not panic on ordinary
    /// failures — use [`StepOutcome::failure`] instead.
    async fn execute(&self, step: &RunbookStep) -> StepOutcome;
}

/// Sandboxed default: logs the action it would have taken and reports
/// success without performing it (§4.7, "sandboxed — simulated in this
/// core").
#[derive(Debug, Default)]
pub struct SandboxStepExecutor;

#[async_trait]
impl StepExecutor for SandboxStepExecutor {
    async fn execute(&self, step: &RunbookStep) -> StepOutcome {
        tracing::info!(step_id = %step.step_id, action = %step.action, sandbox = true, "simulated runbook step execution");
        StepOutcome::success(serde_json::json!({ "sandbox": true, "action": step.action }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_types::RunbookStepStatus;

    fn step() -> RunbookStep {
        RunbookStep {
            step_id: "s1".into(),
            name: "restart".into(),
            action: "service.restart".into(),
            params: Json::Null,
            status: RunbookStepStatus::Pending,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn sandbox_executor_always_succeeds_without_acting() {
        let outcome = SandboxStepExecutor.execute(&step()).await;
        assert!(outcome.success);
        assert_eq!(outcome.output["sandbox"], true);
    }
}
