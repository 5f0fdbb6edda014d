#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-runtime** – Assembles the safety kernel and every built-in
//! module into one running platform, the way the teacher's `toka-runtime`
//! assembles storage adapters, the event bus, and agents into its `Runtime`
//! (§2, "Dependency order").
//!
//! Construction follows the spec's leaves-first dependency order: Storage →
//! Audit Log → Event Bus → Approval Gate → Module Context → Lifecycle
//! Manager → built-in modules (Incident Store, Dedup, Escalation, Anomaly,
//! Runbook).

use std::path::PathBuf;
use std::sync::Arc;

use warden_anomaly::{AnomalyConfigError, AnomalyModule};
use warden_audit::{ApprovalGate, AuditLog, AuditQuery};
use warden_bus::{EventBus, InMemoryBus};
use warden_config::WardenConfig;
use warden_dedup::DedupModule;
use warden_escalation::{EscalationConfigError, EscalationModule};
use warden_incident_store::{IncidentStore, IncidentStoreModule};
use warden_lifecycle::{ContextFactory, LifecycleError, LifecycleManager, Module, ModuleHealth, ShutdownReport};
use warden_runbook::{RunbookConfigError, RunbookEngine, RunbookModule};
use warden_storage::{MemoryStorage, SqliteStorage, StorageBackend, StorageError};
use warden_types::AuditEntry;

/// Which [`StorageBackend`] the runtime should assemble.
#[derive(Debug, Clone)]
pub enum StorageChoice {
    /// Ephemeral, in-memory storage. Lost on restart.
    Memory,
    /// Durable SQLite-backed storage at the given path.
    Sqlite(PathBuf),
}

/// Top-level configuration for assembling a [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// The merged, layered configuration document (§2a, "Configuration").
    pub config: WardenConfig,
    /// Which storage backend to construct.
    pub storage: StorageChoice,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self { config: WardenConfig::from_json(serde_json::json!({})), storage: StorageChoice::Memory }
    }
}

/// Errors raised assembling a [`Runtime`] from a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The requested storage backend failed to open.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Escalation module configuration did not compile.
    #[error("escalation module configuration error: {0}")]
    Escalation(#[from] EscalationConfigError),
    /// Anomaly module configuration did not compile.
    #[error("anomaly module configuration error: {0}")]
    Anomaly(#[from] AnomalyConfigError),
    /// Runbook module configuration did not compile.
    #[error("runbook module configuration error: {0}")]
    Runbook(#[from] RunbookConfigError),
    /// A module failed to start or initialize.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// The assembled platform: every shared collaborator plus the dependency-
/// ordered set of built-in modules, ready for [`Runtime::start`].
pub struct Runtime {
    bus: Arc<dyn EventBus>,
    storage: Arc<dyn StorageBackend>,
    audit_log: Arc<AuditLog>,
    approval_gate: Arc<ApprovalGate>,
    lifecycle: LifecycleManager,
    modules: Vec<Arc<dyn Module>>,
    incident_store_module: Arc<IncidentStoreModule>,
    runbook_module: Arc<RunbookModule>,
}

impl Runtime {
    /// Assembles every shared collaborator and the five built-in modules,
    /// but does not start anything — call [`Runtime::start`] next.
    pub fn assemble(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let storage: Arc<dyn StorageBackend> = match config.storage {
            StorageChoice::Memory => Arc::new(MemoryStorage::new()),
            StorageChoice::Sqlite(path) => Arc::new(SqliteStorage::open(path)?),
        };
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
        let audit_log = Arc::new(AuditLog::new());
        let approval_gate = Arc::new(ApprovalGate::new(Arc::clone(&bus), Arc::clone(&audit_log)));

        let config = Arc::new(config.config);
        let context_factory = ContextFactory::new(Arc::clone(&bus), Arc::clone(&storage), Arc::clone(&config), Arc::clone(&approval_gate));
        let mut lifecycle = LifecycleManager::new(context_factory);

        let incident_store_module = Arc::new(IncidentStoreModule::new());
        let dedup_module = Arc::new(DedupModule::from_config(&config.module_config("dedup")));
        let escalation_module = Arc::new(EscalationModule::from_config(&config.module_config("escalation"))?);
        let anomaly_module = Arc::new(AnomalyModule::from_config(&config.module_config("anomaly"))?);
        let runbook_module = Arc::new(RunbookModule::from_config(&config.module_config("runbook"))?);

        let modules: Vec<Arc<dyn Module>> = vec![
            Arc::clone(&incident_store_module) as Arc<dyn Module>,
            Arc::clone(&dedup_module) as Arc<dyn Module>,
            Arc::clone(&escalation_module) as Arc<dyn Module>,
            Arc::clone(&anomaly_module) as Arc<dyn Module>,
            Arc::clone(&runbook_module) as Arc<dyn Module>,
        ];
        for module in &modules {
            lifecycle.register(Arc::clone(module));
        }

        Ok(Self { bus, storage, audit_log, approval_gate, lifecycle, modules, incident_store_module, runbook_module })
    }

    /// Initializes and starts every registered module, in dependency order.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        self.lifecycle.startup().await?;
        tracing::info!(modules = self.lifecycle.started_modules().len(), "runtime started");
        Ok(())
    }

    /// Stops and destroys every started module, in reverse order. Failures
    /// in individual modules are aggregated rather than fatal.
    pub async fn stop(&mut self) -> ShutdownReport {
        let report = self.lifecycle.shutdown().await;
        if !report.is_clean() {
            tracing::warn!(failures = report.failures.len(), "runtime stopped with module failures");
        }
        report
    }

    /// The shared event bus, for external publishers (e.g. a connector the
    /// embedding application wires in) or subscribers (e.g. a notifier).
    pub fn bus(&self) -> Arc<dyn EventBus> {
        Arc::clone(&self.bus)
    }

    /// The shared storage backend.
    pub fn storage(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.storage)
    }

    /// The shared approval gate, for an embedding application's own
    /// approval UI.
    pub fn approval_gate(&self) -> Arc<ApprovalGate> {
        Arc::clone(&self.approval_gate)
    }

    /// Queries the append-only audit trail.
    pub async fn audit_query(&self, filter: &AuditQuery) -> Vec<AuditEntry> {
        self.audit_log.query(filter).await
    }

    /// A handle to the Incident Store, once started, for direct querying
    /// (CLI, dashboards).
    pub async fn incident_store(&self) -> Option<Arc<IncidentStore>> {
        self.incident_store_module.store().await
    }

    /// A handle to the Runbook Orchestrator engine, once started.
    pub async fn runbook_engine(&self) -> Option<Arc<RunbookEngine>> {
        self.runbook_module.engine().await
    }

    /// Current health of every registered module, `(module_id, health)`.
    pub fn health(&self) -> Vec<(String, ModuleHealth)> {
        self.modules.iter().map(|m| (m.manifest().id.clone(), m.health())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn assembles_and_starts_with_default_config() {
        let mut runtime = Runtime::assemble(RuntimeConfig::default()).unwrap();
        runtime.start().await.unwrap();

        let health = runtime.health();
        assert_eq!(health.len(), 5);
        assert!(health.iter().all(|(_, h)| h.status == warden_lifecycle::HealthStatus::Healthy));

        let report = runtime.stop().await;
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn incident_flows_from_detection_through_store_after_start() {
        let mut runtime = Runtime::assemble(RuntimeConfig::default()).unwrap();
        runtime.start().await.unwrap();

        let payload = warden_types::IncidentCreatedPayload {
            incident_id: "INC-1".to_string(),
            title: "disk full".to_string(),
            description: "disk usage at 98%".to_string(),
            severity: warden_types::Severity::Critical,
            detected_by: "test".to_string(),
            source_event: None,
            detected_at: warden_types::now(),
            context: None,
        };
        runtime.bus().publish(warden_types::Event::new(warden_types::event::kind::INCIDENT_CREATED, "test", payload)).await.unwrap();

        let store = runtime.incident_store().await.unwrap();
        assert!(store.get("INC-1").await.unwrap().is_some());

        runtime.stop().await;
    }
}
