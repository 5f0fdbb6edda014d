//! Wires [`RunbookEngine`] into the Module Lifecycle Manager.
//!
//! Unlike `EscalationModule`, the engine cannot be built in `from_config`:
//! it needs the shared bus and approval gate, which only become available
//! at `initialize(context)` time. The module instead holds the parsed
//! [`RunbookConfig`] and step executor, and constructs the engine lazily.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use warden_config::ModuleConfig;
use warden_lifecycle::{HealthStatus, Manifest, Module, ModuleContext, ModuleHealth, ModuleType};
use warden_types::{event::kind, now, ActionApprovedPayload, ActionDeniedPayload, EnrichmentCompletedPayload, Severity};

use crate::engine::{RunbookConfig, RunbookEngine};
use crate::executor::{SandboxStepExecutor, StepExecutor};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawRunbookConfig {
    #[serde(default)]
    severity_filter: Vec<Severity>,
    #[serde(default)]
    cooldown_ms: Option<i64>,
    #[serde(default)]
    max_concurrent_runbooks: Option<usize>,
    #[serde(default)]
    max_runbook_history: Option<usize>,
    #[serde(default)]
    auto_execute: Option<bool>,
    #[serde(default)]
    require_approval_per_step: Option<bool>,
    #[serde(default)]
    step_timeout_ms: Option<u64>,
}

/// Errors raised compiling configuration into engine state.
#[derive(Debug, thiserror::Error)]
pub enum RunbookConfigError {
    /// The configuration document did not match the expected shape.
    #[error(transparent)]
    Config(#[from] warden_config::ConfigError),
}

fn compile_config(raw: RawRunbookConfig) -> RunbookConfig {
    let defaults = RunbookConfig::default();
    RunbookConfig {
        severity_filter: raw.severity_filter,
        cooldown_ms: raw.cooldown_ms.unwrap_or(defaults.cooldown_ms),
        max_concurrent_runbooks: raw.max_concurrent_runbooks.unwrap_or(defaults.max_concurrent_runbooks),
        max_runbook_history: raw.max_runbook_history.unwrap_or(defaults.max_runbook_history),
        auto_execute: raw.auto_execute.unwrap_or(defaults.auto_execute),
        require_approval_per_step: raw.require_approval_per_step.unwrap_or(defaults.require_approval_per_step),
        step_timeout_ms: raw.step_timeout_ms.unwrap_or(defaults.step_timeout_ms),
    }
}

/// The Runbook Orchestrator module (§4.7).
pub struct RunbookModule {
    manifest: Manifest,
    config: RunbookConfig,
    executor: Arc<dyn StepExecutor>,
    engine: Mutex<Option<Arc<RunbookEngine>>>,
}

impl RunbookModule {
    /// Builds the module from an already-assembled config and step executor
    /// (primarily for tests; production wiring goes through
    /// [`RunbookModule::from_config`] with the default sandboxed executor).
    pub fn new(config: RunbookConfig, executor: Arc<dyn StepExecutor>) -> Self {
        Self {
            manifest: Manifest::new("runbook", "Runbook Orchestrator", "0.1.0", ModuleType::Action),
            config,
            executor,
            engine: Mutex::new(None),
        }
    }

    /// Builds the module by compiling `config`'s scalar settings, wired to
    /// the sandboxed step executor.
    pub fn from_config(config: &ModuleConfig) -> Result<Self, RunbookConfigError> {
        let raw: RawRunbookConfig = config.parse()?;
        Ok(Self::new(compile_config(raw), Arc::new(SandboxStepExecutor)))
    }

    /// The engine backing this module, once initialized.
    pub async fn engine(&self) -> Option<Arc<RunbookEngine>> {
        self.engine.lock().await.clone()
    }
}

async fn handle_enrichment_completed(engine: Arc<RunbookEngine>, event: warden_types::Event) -> anyhow::Result<()> {
    let payload: EnrichmentCompletedPayload = event.payload_as()?;
    engine.handle_enrichment_completed(payload).await
}

async fn handle_action_approved(engine: Arc<RunbookEngine>, event: warden_types::Event) -> anyhow::Result<()> {
    let payload: ActionApprovedPayload = event.payload_as()?;
    engine.handle_action_approved(payload).await
}

async fn handle_action_denied(engine: Arc<RunbookEngine>, event: warden_types::Event) -> anyhow::Result<()> {
    let payload: ActionDeniedPayload = event.payload_as()?;
    engine.handle_action_denied(payload).await
}

#[async_trait]
impl Module for RunbookModule {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn initialize(&self, context: ModuleContext) -> anyhow::Result<()> {
        let engine = Arc::new(RunbookEngine::new(
            self.config.clone(),
            Arc::clone(&context.bus),
            Arc::clone(&context.approval_gate),
            Arc::clone(&self.executor),
        ));
        *self.engine.lock().await = Some(Arc::clone(&engine));

        let e = Arc::clone(&engine);
        context
            .bus
            .subscribe(
                kind::ENRICHMENT_COMPLETED,
                Arc::new(move |event| {
                    let e = Arc::clone(&e);
                    Box::pin(async move { handle_enrichment_completed(e, event).await })
                }),
            )
            .await;

        let e = Arc::clone(&engine);
        context
            .bus
            .subscribe(
                kind::ACTION_APPROVED,
                Arc::new(move |event| {
                    let e = Arc::clone(&e);
                    Box::pin(async move { handle_action_approved(e, event).await })
                }),
            )
            .await;

        let e = Arc::clone(&engine);
        context
            .bus
            .subscribe(
                kind::ACTION_DENIED,
                Arc::new(move |event| {
                    let e = Arc::clone(&e);
                    Box::pin(async move { handle_action_denied(e, event).await })
                }),
            )
            .await;

        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn health(&self) -> ModuleHealth {
        let details = self.engine.try_lock().ok().and_then(|g| g.as_ref().map(|_| serde_json::json!({ "initialized": true })));
        ModuleHealth {
            status: HealthStatus::Healthy,
            message: None,
            details,
            last_check: now(),
        }
    }
}
