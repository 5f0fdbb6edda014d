//! Wires [`IncidentStore`] into the Module Lifecycle Manager as the sole
//! owner of the incidents collection (§2, "Ownership"; §4.2 "IncidentStore
//! module, an Enricher-typed module").

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use warden_lifecycle::{HealthStatus, Manifest, Module, ModuleContext, ModuleHealth, ModuleType};
use warden_types::{event::kind, now, Event, Incident, IncidentCreatedPayload};

use crate::IncidentStore;

/// The Incident Store module. Subscribes to `incident.created` and is the
/// only component that ever calls [`IncidentStore::create`]; every other
/// module interacts with the incidents collection purely through events.
pub struct IncidentStoreModule {
    manifest: Manifest,
    store: Mutex<Option<Arc<IncidentStore>>>,
}

impl Default for IncidentStoreModule {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentStoreModule {
    /// Builds an uninitialized module; the inner [`IncidentStore`] is
    /// constructed once `initialize` supplies storage and a bus.
    pub fn new() -> Self {
        Self { manifest: Manifest::new("incident-store", "Incident Store", "0.1.0", ModuleType::Enricher), store: Mutex::new(None) }
    }

    /// Returns a handle to the underlying store for direct querying (CLI,
    /// dashboards), once `initialize` has run. `None` beforehand.
    pub async fn store(&self) -> Option<Arc<IncidentStore>> {
        self.store.lock().await.clone()
    }
}

async fn handle_incident_created(store: Arc<IncidentStore>, event: Event) -> anyhow::Result<()> {
    let payload: IncidentCreatedPayload = event.payload_as()?;
    let incident = Incident::new(
        payload.incident_id.clone(),
        payload.title,
        payload.description,
        payload.severity,
        payload.detected_by,
        payload.context.unwrap_or(serde_json::Value::Null),
    );
    store.create(incident).await?;
    tracing::debug!(incident_id = %payload.incident_id, "incident persisted");
    Ok(())
}

#[async_trait]
impl Module for IncidentStoreModule {
    fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    async fn initialize(&self, context: ModuleContext) -> anyhow::Result<()> {
        let store = Arc::new(IncidentStore::new(context.storage.clone(), context.bus.clone()));
        *self.store.lock().await = Some(Arc::clone(&store));

        context
            .bus
            .subscribe(
                kind::INCIDENT_CREATED,
                Arc::new(move |event| {
                    let store = Arc::clone(&store);
                    Box::pin(async move { handle_incident_created(store, event).await })
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
