//! Dependency-ordered startup and shutdown of registered modules.

use std::sync::Arc;

use warden_audit::ApprovalGate;
use warden_bus::EventBus;
use warden_config::WardenConfig;
use warden_storage::{NamespacedStorage, StorageBackend};

use crate::context::ModuleContext;
use crate::dependency::{resolve_order, DependencyError};
use crate::module::Module;

/// Errors raised by [`LifecycleManager::startup`] / `shutdown`.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The dependency graph could not be resolved.
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    /// A module's `initialize` failed. Already-initialized modules were
    /// rolled back (destroyed, in reverse order) before this was returned.
    #[error("module '{module_id}' failed to initialize: {source}")]
    InitFailed {
        /// The failing module's id.
        module_id: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },
    /// A module's `start` failed. Already-started modules were rolled back
    /// (stopped and destroyed, in reverse order) before this was returned.
    #[error("module '{module_id}' failed to start: {source}")]
    StartFailed {
        /// The failing module's id.
        module_id: String,
        /// The underlying error.
        #[source]
        source: anyhow::Error,
    },
}

/// Aggregated, non-fatal failures encountered while stopping modules.
/// A failure in one module's `stop`/`destroy` never prevents the others
/// from being attempted (§4.2, "Shutdown").
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Module ids that stopped and destroyed cleanly.
    pub clean: Vec<String>,
    /// `(module_id, message)` pairs for modules that errored while
    /// stopping or destroying.
    pub failures: Vec<(String, String)>,
}

impl ShutdownReport {
    /// Whether every module shut down without error.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builds the per-module [`ModuleContext`] from the shared platform
/// collaborators. One factory is shared by the whole manager; each module
/// gets its own namespaced storage view and logging span.
pub struct ContextFactory {
    bus: Arc<dyn EventBus>,
    storage: Arc<dyn StorageBackend>,
    config: Arc<WardenConfig>,
    approval_gate: Arc<ApprovalGate>,
}

impl ContextFactory {
    /// Builds a factory from the platform's shared collaborators.
    pub fn new(bus: Arc<dyn EventBus>, storage: Arc<dyn StorageBackend>, config: Arc<WardenConfig>, approval_gate: Arc<ApprovalGate>) -> Self {
        Self { bus, storage, config, approval_gate }
    }

    /// Builds the context for `module_id`.
    pub fn build(&self, module_id: &str) -> ModuleContext {
        ModuleContext {
            module_id: module_id.to_string(),
            config: self.config.module_config(module_id),
            bus: Arc::clone(&self.bus),
            storage: Arc::new(NamespacedStorage::new(module_id, Arc::clone(&self.storage))),
            logger: tracing::info_span!("module", module_id = %module_id),
            approval_gate: Arc::clone(&self.approval_gate),
        }
    }
}

/// Drives dependency-ordered `initialize`/`start` and reverse-order
/// `stop`/`destroy` across a set of registered [`Module`]s (§4.2).
pub struct LifecycleManager {
    modules: Vec<Arc<dyn Module>>,
    context_factory: ContextFactory,
    started_order: Vec<String>,
}

impl LifecycleManager {
    /// Builds an empty manager around the given context factory.
    pub fn new(context_factory: ContextFactory) -> Self {
        Self { modules: Vec::new(), context_factory, started_order: Vec::new() }
    }

    /// Registers a module. Order of registration does not matter —
    /// startup order is derived entirely from declared dependencies.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.push(module);
    }

    fn module_by_id(&self, id: &str) -> &Arc<dyn Module> {
        self.modules.iter().find(|m| m.manifest().id == id).expect("resolved order only contains registered module ids")
    }

    /// Resolves dependency order, then `initialize`s and `start`s every
    /// module in that order. On any failure, rolls back everything already
    /// initialized/started (in reverse order) before returning.
    pub async fn startup(&mut self) -> Result<(), LifecycleError> {
        let manifests: Vec<_> = self.modules.iter().map(|m| m.manifest().clone()).collect();
        let order = resolve_order(&manifests)?;

        let mut initialized: Vec<String> = Vec::new();
        for module_id in &order {
            let module = self.module_by_id(module_id);
            let context = self.context_factory.build(module_id);
            if let Err(source) = module.initialize(context).await {
                tracing::error!(module_id, error = %source, "module failed to initialize; rolling back");
                self.rollback_destroy(&initialized).await;
                return Err(LifecycleError::InitFailed { module_id: module_id.clone(), source });
            }
            initialized.push(module_id.clone());
        }

        let mut started: Vec<String> = Vec::new();
        for module_id in &order {
            let module = self.module_by_id(module_id);
            if let Err(source) = module.start().await {
                tracing::error!(module_id, error = %source, "module failed to start; rolling back");
                self.rollback_stop_and_destroy(&started).await;
                self.rollback_destroy(&initialized.iter().filter(|id| !started.contains(id)).cloned().collect::<Vec<_>>()).await;
                return Err(LifecycleError::StartFailed { module_id: module_id.clone(), source });
            }
            started.push(module_id.clone());
        }

        self.started_order = order;
        Ok(())
    }

    async fn rollback_destroy(&self, initialized: &[String]) {
        for module_id in initialized.iter().rev() {
            let module = self.module_by_id(module_id);
            if let Err(e) = module.destroy().await {
                tracing::warn!(module_id, error = %e, "rollback destroy failed");
            }
        }
    }

    async fn rollback_stop_and_destroy(&self, started: &[String]) {
        for module_id in started.iter().rev() {
            let module = self.module_by_id(module_id);
            if let Err(e) = module.stop().await {
                tracing::warn!(module_id, error = %e, "rollback stop failed");
            }
            if let Err(e) = module.destroy().await {
                tracing::warn!(module_id, error = %e, "rollback destroy failed");
            }
        }
    }

    /// Stops then destroys every started module in reverse startup order.
    /// A failure in one module never prevents the others from being
    /// attempted; failures are aggregated and returned (§4.2, "Shutdown").
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        for module_id in self.started_order.iter().rev() {
            let module = self.module_by_id(module_id);
            let mut ok = true;
            if let Err(e) = module.stop().await {
                report.failures.push((module_id.clone(), format!("stop: {e}")));
                ok = false;
            }
            if let Err(e) = module.destroy().await {
                report.failures.push((module_id.clone(), format!("destroy: {e}")));
                ok = false;
            }
            if ok {
                report.clean.push(module_id.clone());
            }
        }
        self.started_order.clear();
        report
    }

    /// The ids of currently-started modules, in startup order.
    pub fn started_modules(&self) -> &[String] {
        &self.started_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ModuleHealth;
    use crate::manifest::{Manifest, ModuleType};
    use warden_audit::AuditLog;
    use warden_bus::InMemoryBus;
    use warden_config::WardenConfig;
    use warden_storage::MemoryStorage;
    use async_trait::async_trait;

    struct RecordingModule {
        manifest: Manifest,
        log: Arc<tokio::sync::Mutex<Vec<String>>>,
        fail_init: bool,
    }

    #[async_trait]
    impl Module for RecordingModule {
        fn manifest(&self) -> &Manifest {
            &self.manifest
        }

        async fn initialize(&self, _context: ModuleContext) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("synthetic init failure");
            }
            self.log.lock().await.push(format!("init:{}", self.manifest.id));
            Ok(())
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.log.lock().await.push(format!("start:{}", self.manifest.id));
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().await.push(format!("stop:{}", self.manifest.id));
            Ok(())
        }

        async fn destroy(&self) -> anyhow::Result<()> {
            self.log.lock().await.push(format!("destroy:{}", self.manifest.id));
            Ok(())
        }

        fn health(&self) -> ModuleHealth {
            ModuleHealth::healthy()
        }
    }

    fn factory() -> ContextFactory {
        ContextFactory::new(
            Arc::new(InMemoryBus::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(WardenConfig::from_json(serde_json::json!({}))),
            Arc::new(ApprovalGate::new(Arc::new(InMemoryBus::new()), Arc::new(AuditLog::new()))),
        )
    }

    #[tokio::test]
    async fn startup_respects_dependency_order_then_shutdown_is_reverse() {
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new(factory());
        manager.register(Arc::new(RecordingModule {
            manifest: Manifest::new("b", "b", "1.0", ModuleType::Detector).with_dependencies(["a"]),
            log: Arc::clone(&log),
            fail_init: false,
        }));
        manager.register(Arc::new(RecordingModule {
            manifest: Manifest::new("a", "a", "1.0", ModuleType::Connector),
            log: Arc::clone(&log),
            fail_init: false,
        }));

        manager.startup().await.unwrap();
        let report = manager.shutdown().await;
        assert!(report.is_clean());

        let events = log.lock().await.clone();
        assert_eq!(events, vec!["init:a", "init:b", "start:a", "start:b", "stop:b", "destroy:b", "stop:a", "destroy:a"]);
    }

    #[tokio::test]
    async fn init_failure_rolls_back_already_initialized_modules() {
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new(factory());
        manager.register(Arc::new(RecordingModule {
            manifest: Manifest::new("a", "a", "1.0", ModuleType::Connector),
            log: Arc::clone(&log),
            fail_init: false,
        }));
        manager.register(Arc::new(RecordingModule {
            manifest: Manifest::new("b", "b", "1.0", ModuleType::Detector).with_dependencies(["a"]),
            log: Arc::clone(&log),
            fail_init: true,
        }));

        let result = manager.startup().await;
        assert!(matches!(result, Err(LifecycleError::InitFailed { .. })));

        let events = log.lock().await.clone();
        assert_eq!(events, vec!["init:a", "destroy:a"]);
    }

    #[tokio::test]
    async fn cycle_is_surfaced_as_dependency_error() {
        let log = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut manager = LifecycleManager::new(factory());
        manager.register(Arc::new(RecordingModule {
            manifest: Manifest::new("a", "a", "1.0", ModuleType::Connector).with_dependencies(["b"]),
            log: Arc::clone(&log),
            fail_init: false,
        }));
        manager.register(Arc::new(RecordingModule {
            manifest: Manifest::new("b", "b", "1.0", ModuleType::Connector).with_dependencies(["a"]),
            log,
            fail_init: false,
        }));

        assert!(matches!(manager.startup().await, Err(LifecycleError::Dependency(DependencyError::CycleDetected(_)))));
    }
}
