//! Wires [`DedupEngine`] into the Module Lifecycle Manager.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::interval;
use warden_config::ModuleConfig;
use warden_lifecycle::{HealthStatus, Manifest, Module, ModuleContext, ModuleHealth, ModuleType};
use warden_types::{event::kind, now, EnrichmentCompletedPayload, Event, IncidentCreatedPayload, IncidentSuppressedPayload};

use crate::engine::{DedupConfig, DedupEngine, DedupOutcome};

/// The Deduplication / Suppression Engine module (§4.4).
pub struct DedupModule {
    manifest: Manifest,
    engine: Arc<DedupEngine>,
    sweep_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DedupModule {
    /// Builds the module with the given configuration. Actual dependency
    /// wiring (bus subscription, sweep task) happens in `initialize`/`start`.
    pub fn new(config: DedupConfig) -> Self {
        Self { manifest: Manifest::new("dedup", "Deduplication Engine", "0.1.0", ModuleType::Enricher), engine: Arc::new(DedupEngine::new(config)), sweep_handle: Mutex::new(None) }
    }

    /// Builds the module from `config`'s scalar fields (§4.4). `fields`
    /// falls back to the default fingerprint field set when absent.
    pub fn from_config(config: &ModuleConfig) -> Self {
        let defaults = DedupConfig::default();
        let fields = config
            .as_json()
            .get("fields")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or(defaults.fields);
        Self::new(DedupConfig {
            fields,
            window_ms: config.get_u64_or("windowMs", defaults.window_ms),
            max_fingerprints: config.get_u64_or("maxFingerprints", defaults.max_fingerprints as u64) as usize,
            emit_suppressed: config.get_bool_or("emitSuppressed", defaults.emit_suppressed),
        })
    }
}

async fn handle_incident_created(engine: Arc<DedupEngine>, context: ModuleContext, event: Event) -> anyhow::Result<()> {
    let payload: IncidentCreatedPayload = event.payload_as()?;
    match engine.on_incident_created(&payload) {
        DedupOutcome::Passed => {}
        DedupOutcome::Suppressed { original_incident_id, fingerprint, occurrences } => {
            tracing::info!(incident_id = %payload.incident_id, %fingerprint, occurrences, "incident suppressed as duplicate");

            let enrichment = EnrichmentCompletedPayload {
                incident_id: original_incident_id.clone(),
                enricher_module: "dedup".to_string(),
                enrichment_type: "dedup_occurrence".to_string(),
                data: serde_json::json!({ "occurrences": occurrences, "fingerprint": fingerprint }),
                completed_at: now(),
            };
            context.bus.publish(Event::new(kind::ENRICHMENT_COMPLETED, "dedup", enrichment)).await?;

            if engine.emit_suppressed() {
                let suppressed = IncidentSuppressedPayload {
                    suppressed_incident_id: payload.incident_id.clone(),
                    original_incident_id,
                    fingerprint,
                    occurrences,
                    window_ms: engine.window_ms(),
                };
                context.bus.publish(Event::new(kind::INCIDENT_SUPPRESSED, "dedup", suppressed)).await?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Module for DedupModule {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn initialize(&self, context: ModuleContext) -> anyhow::Result<()> {
        let engine = Arc::clone(&self.engine);
        context
            .bus
            .subscribe(
                kind::INCIDENT_CREATED,
                Arc::new(move |event| {
                    let engine = Arc::clone(&engine);
                    let context = context.clone();
                    Box::pin(async move { handle_incident_created(engine, context, event).await })
                }),
            )
            .await;
        Ok(())
    }

    async fn start(&self) -> anyhow::Result<()> {
        let engine = Arc::clone(&self.engine);
        let period = std::time::Duration::from_millis(engine.sweep_period_ms().max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                engine.expire_sweep();
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
            details: Some(serde_json::json!({ "tracked_fingerprints": self.engine.tracked_count() })),
            last_check: now(),
        }
    }
}
