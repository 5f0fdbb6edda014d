//! Wires [`EscalationEngine`] into the Module Lifecycle Manager and
//! compiles its configuration into [`Policy`] values.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use warden_bus::EventBus;
use warden_config::ModuleConfig;
use warden_lifecycle::{HealthStatus, Manifest, Module, ModuleContext, ModuleHealth, ModuleType};
use warden_types::{event::kind, now, EnrichmentCompletedPayload, Event, IncidentCreatedPayload, IncidentUpdatedPayload, Severity};

use crate::engine::{EscalationConfig, EscalationEngine};
use crate::policy::{Level, Policy, PolicyError};

/// Raw, still-JSON shape of one escalation level in configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLevel {
    level: u32,
    after_ms: u64,
    #[serde(default)]
    notify: Vec<String>,
    #[serde(default)]
    repeat: bool,
    #[serde(default)]
    repeat_interval_ms: Option<u64>,
}

/// Raw, still-JSON shape of one policy in configuration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPolicy {
    id: String,
    #[serde(default)]
    severity: Vec<Severity>,
    #[serde(default)]
    title_regex: Option<String>,
    levels: Vec<RawLevel>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawEscalationConfig {
    #[serde(default)]
    max_tracked_incidents: Option<usize>,
    #[serde(default)]
    resolved_statuses: Option<Vec<String>>,
    #[serde(default)]
    acknowledged_pauses_escalation: Option<bool>,
    #[serde(default)]
    check_interval_ms: Option<u64>,
    #[serde(default)]
    policies: Vec<RawPolicy>,
}

/// Errors raised compiling configuration into engine state.
#[derive(Debug, thiserror::Error)]
pub enum EscalationConfigError {
    /// The configuration document did not match the expected shape.
    #[error(transparent)]
    Config(#[from] warden_config::ConfigError),
    /// A policy's title regex failed to compile.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

fn compile_policies(raw: Vec<RawPolicy>) -> Result<Vec<Policy>, PolicyError> {
    raw.into_iter()
        .map(|p| {
            let levels = p
                .levels
                .into_iter()
                .map(|l| Level { level: l.level, after_ms: l.after_ms, notify: l.notify, repeat: l.repeat, repeat_interval_ms: l.repeat_interval_ms })
                .collect();
            Policy::compile(p.id, p.severity, p.title_regex.as_deref(), levels)
        })
        .collect()
}

/// The Escalation Engine module (§4.5).
pub struct EscalationModule {
    manifest: Manifest,
    engine: Arc<EscalationEngine>,
    bus: Mutex<Option<Arc<dyn EventBus>>>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EscalationModule {
    /// Builds the module directly from engine state (primarily for tests).
    pub fn new(config: EscalationConfig, policies: Vec<Policy>) -> Self {
        Self {
            manifest: Manifest::new("escalation", "Escalation Engine", "0.1.0", ModuleType::Enricher),
            engine: Arc::new(EscalationEngine::new(config, policies)),
            bus: Mutex::new(None),
            sweep_handle: Mutex::new(None),
        }
    }

    /// Builds the module by compiling `config`'s `policies` array and
    /// scalar settings (§4.5).
    pub fn from_config(config: &ModuleConfig) -> Result<Self, EscalationConfigError> {
        let raw: RawEscalationConfig = config.parse()?;
        let policies = compile_policies(raw.policies)?;
        let defaults = EscalationConfig::default();
        let engine_config = EscalationConfig {
            max_tracked_incidents: raw.max_tracked_incidents.unwrap_or(defaults.max_tracked_incidents),
            resolved_statuses: raw.resolved_statuses.unwrap_or(defaults.resolved_statuses),
            acknowledged_pauses_escalation: raw.acknowledged_pauses_escalation.unwrap_or(defaults.acknowledged_pauses_escalation),
            check_interval_ms: raw.check_interval_ms.unwrap_or(defaults.check_interval_ms),
        };
        Ok(Self::new(engine_config, policies))
    }
}

async fn emit_firing(bus: &Arc<dyn EventBus>, firing: &crate::engine::EscalationFiring) -> anyhow::Result<()> {
    let escalated = warden_types::IncidentEscalatedPayload {
        incident_id: firing.incident_id.clone(),
        policy_id: firing.policy_id.clone(),
        level: firing.level,
        notify: firing.notify.clone(),
        elapsed_ms: firing.elapsed_ms,
        severity: firing.severity,
        title: firing.title.clone(),
    };
    bus.publish(Event::new(kind::INCIDENT_ESCALATED, "escalation", escalated)).await?;

    let enrichment = EnrichmentCompletedPayload {
        incident_id: firing.incident_id.clone(),
        enricher_module: "escalation".to_string(),
        enrichment_type: "escalation".to_string(),
        data: serde_json::json!({ "policyId": firing.policy_id, "level": firing.level, "notify": firing.notify }),
        completed_at: now(),
    };
    bus.publish(Event::new(kind::ENRICHMENT_COMPLETED, "escalation", enrichment)).await?;
    Ok(())
}

async fn handle_incident_created(engine: Arc<EscalationEngine>, event: Event) -> anyhow::Result<()> {
    let payload: IncidentCreatedPayload = event.payload_as()?;
    if let Some(policy_id) = engine.on_incident_created(&payload) {
        tracing::debug!(incident_id = %payload.incident_id, policy_id, "escalation tracking started");
    }
    Ok(())
}

async fn handle_incident_updated(engine: Arc<EscalationEngine>, event: Event) -> anyhow::Result<()> {
    let payload: IncidentUpdatedPayload = event.payload_as()?;
    if payload.field == "status" {
        if let Some(new_status) = payload.new_value.as_str() {
            engine.on_status_changed(&payload.incident_id, new_status);
        }
    }
    Ok(())
}

#[async_trait]
impl Module for EscalationModule {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn initialize(&self, context: ModuleContext) -> anyhow::Result<()> {
        *self.bus.lock().await = Some(Arc::clone(&context.bus));

        let engine = Arc::clone(&self.engine);
        context
            .bus
            .subscribe(
                kind::INCIDENT_CREATED,
                Arc::new(move |event| {
                    let engine = Arc::clone(&engine);
                    Box::pin(async move { handle_incident_created(engine, event).await })
                }),
            )
            .await;

        let engine = Arc::clone(&self.engine);
        context
            .bus
            .subscribe(
                kind::INCIDENT_UPDATED,
                Arc::new(move |event| {
                    let engine = Arc::clone(&engine);
                    Box::pin(async move { handle_incident_updated(engine, event).await })
                }),
            )
            .await;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let engine = Arc::clone(&self.engine);
        let bus = self.bus.lock().await.clone().expect("start called after initialize");
        let period = std::time::Duration::from_millis(engine.check_interval_ms().max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                for firing in engine.sweep() {
                    if let Err(err) = emit_firing(&bus, &firing).await {
                        tracing::warn!(%err, incident_id = %firing.incident_id, "failed to publish escalation firing");
                    }
                }
            }
        });
        *self.sweep_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.sweep_handle.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn health(&self) -> ModuleHealth {
        ModuleHealth {
            status: HealthStatus::Healthy,
            message: None,
            details: Some(serde_json::json!({ "tracked_incidents": self.engine.tracked_count() })),
            last_check: now(),
        }
    }
}
