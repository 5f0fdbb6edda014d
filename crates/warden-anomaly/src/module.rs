//! Wires [`AnomalyEngine`] into the Module Lifecycle Manager and compiles
//! its configuration into [`MetricConfig`] values.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use warden_config::ModuleConfig;
use warden_lifecycle::{HealthStatus, Manifest, Module, ModuleContext, ModuleHealth, ModuleType};
use warden_types::{event::kind, new_prefixed_id, now, Event, IncidentCreatedPayload, LogIngestedPayload};

use crate::engine::{AnomalyEngine, AnomalyFiring};
use crate::metric::{Direction, MetricConfig, MetricError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetric {
    id: String,
    metric_regex: String,
    value_regex: String,
    method: RawMethod,
    #[serde(default = "default_sensitivity")]
    sensitivity: f64,
    #[serde(default = "default_training_window_size")]
    training_window_size: usize,
    #[serde(default = "default_min_training_samples")]
    min_training_samples: usize,
    #[serde(default)]
    direction: RawDirection,
    #[serde(default)]
    cooldown_ms: u64,
    #[serde(default = "default_severity")]
    severity: warden_types::Severity,
    #[serde(default = "default_alpha")]
    alpha: f64,
}

fn default_severity() -> warden_types::Severity {
    warden_types::Severity::Warning
}

fn default_sensitivity() -> f64 {
    3.0
}

fn default_training_window_size() -> usize {
    100
}

fn default_min_training_samples() -> usize {
    10
}

fn default_alpha() -> f64 {
    0.3
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum RawMethod {
    Zscore,
    Mad,
    Iqr,
    Ewma,
}

#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
enum RawDirection {
    High,
    Low,
    #[default]
    Both,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawAnomalyConfig {
    #[serde(default = "default_max_incidents_per_minute")]
    max_incidents_per_minute: usize,
    #[serde(default)]
    metrics: Vec<RawMetric>,
}

fn default_max_incidents_per_minute() -> usize {
    60
}

/// Errors raised compiling configuration into engine state.
#[derive(Debug, thiserror::Error)]
pub enum AnomalyConfigError {
    /// The configuration document did not match the expected shape.
    #[error(transparent)]
    Config(#[from] warden_config::ConfigError),
    /// A metric's regex failed to compile.
    #[error(transparent)]
    Metric(#[from] MetricError),
}

fn compile_metrics(raw: Vec<RawMetric>) -> Result<Vec<MetricConfig>, MetricError> {
    raw.into_iter()
        .map(|m| {
            let method = match m.method {
                RawMethod::Zscore => crate::metric::DetectionMethod::Zscore,
                RawMethod::Mad => crate::metric::DetectionMethod::Mad,
                RawMethod::Iqr => crate::metric::DetectionMethod::Iqr,
                RawMethod::Ewma => crate::metric::DetectionMethod::Ewma,
            };
            let direction = match m.direction {
                RawDirection::High => Direction::High,
                RawDirection::Low => Direction::Low,
                RawDirection::Both => Direction::Both,
            };
            MetricConfig::compile(m.id, &m.metric_regex, &m.value_regex, method, m.sensitivity, m.training_window_size, m.min_training_samples, direction, m.cooldown_ms, m.severity, m.alpha)
        })
        .collect()
}

/// The Anomaly Detection Engine module (§4.6).
pub struct AnomalyModule {
    manifest: Manifest,
    engine: Arc<AnomalyEngine>,
}

impl AnomalyModule {
    /// Builds the module directly from engine state (primarily for tests).
    pub fn new(metrics: Vec<MetricConfig>, max_incidents_per_minute: usize) -> Self {
        Self {
            manifest: Manifest::new("anomaly", "Anomaly Detection Engine", "0.1.0", ModuleType::Detector),
            engine: Arc::new(AnomalyEngine::new(metrics, max_incidents_per_minute)),
        }
    }

    /// Builds the module by compiling `config`'s `metrics` array (§4.6).
    pub fn from_config(config: &ModuleConfig) -> Result<Self, AnomalyConfigError> {
        let raw: RawAnomalyConfig = config.parse()?;
        let metrics = compile_metrics(raw.metrics)?;
        Ok(Self::new(metrics, raw.max_incidents_per_minute))
    }
}

fn firing_to_incident(firing: &AnomalyFiring) -> (String, IncidentCreatedPayload) {
    let incident_id = new_prefixed_id("INC-ANOM");
    let context = serde_json::json!({
        "metricId": firing.metric_id,
        "method": firing.method,
        "value": firing.value,
        "expected": firing.expected,
        "lowerBound": firing.lower_bound,
        "upperBound": firing.upper_bound,
        "deviationScore": firing.deviation_score,
        "windowSize": firing.window_size,
        "direction": firing.direction,
    });
    let payload = IncidentCreatedPayload {
        incident_id: incident_id.clone(),
        title: format!("Anomalous {} ({} {})", firing.metric_id, firing.direction, firing.value),
        description: format!(
            "Metric `{}` observed value {} (expected ~{:.3}, bounds [{:.3}, {:.3}], deviation {:.3})",
            firing.metric_id, firing.value, firing.expected, firing.lower_bound, firing.upper_bound, firing.deviation_score
        ),
        severity: firing.severity,
        detected_by: "anomaly".to_string(),
        source_event: None,
        detected_at: now(),
        context: Some(context),
    };
    (incident_id, payload)
}

async fn handle_log_ingested(engine: Arc<AnomalyEngine>, context: ModuleContext, event: Event) -> anyhow::Result<()> {
    let payload: LogIngestedPayload = event.payload_as()?;
    for firing in engine.ingest_line(&payload.line) {
        let (incident_id, incident_payload) = firing_to_incident(&firing);
        tracing::info!(incident_id, metric_id = %firing.metric_id, value = firing.value, "anomaly detected");
        context.bus.publish(Event::new(kind::INCIDENT_CREATED, "anomaly", incident_payload)).await?;
    }
    Ok(())
}

#[async_trait]
impl Module for AnomalyModule {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn initialize(&self, context: ModuleContext) -> anyhow::Result<()> {
        let engine = Arc::clone(&self.engine);
        context
            .bus
            .subscribe(
                kind::LOG_INGESTED,
                Arc::new(move |event| {
                    let engine = Arc::clone(&engine);
                    let context = context.clone();
                    Box::pin(async move { handle_log_ingested(engine, context, event).await })
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
        ModuleHealth { status: HealthStatus::Healthy, message: None, details: None, last_check: now() }
    }
}
