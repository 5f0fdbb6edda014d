#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-incident-store** – The narrow incident persistence interface
//! (§6a).
//!
//! Named out of scope by the distilled spec as "a simple key/value store
//! used via a narrow interface", but the interface itself —
//! create/get/update-status/append-timeline-entry/record-enrichment/
//! query-by-status — is the minimal glue the data flow (§2) needs for
//! `incident.updated` to exist at all. Built directly atop
//! [`warden_storage::StorageBackend`], grounded on the teacher's
//! `toka-store-memory`/`toka-store-sqlite` narrow-trait pattern.

use std::sync::Arc;

use warden_bus::EventBus;
use warden_storage::{StorageBackend, StorageError};
use warden_types::{
    event::kind, now, Incident, IncidentStatus, IncidentUpdatedPayload, Json, TimelineEntry,
};

mod module;

pub use module::IncidentStoreModule;

const COLLECTION: &str = "incidents";

/// Errors raised by [`IncidentStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum IncidentStoreError {
    /// No incident exists with the given id.
    #[error("unknown incident: {0}")]
    NotFound(String),
    /// The underlying storage backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The Incident Store: the sole owner of the incidents collection (§3,
/// "Ownership").
pub struct IncidentStore {
    storage: Arc<dyn StorageBackend>,
    bus: Arc<dyn EventBus>,
}

impl IncidentStore {
    /// Builds a store backed by `storage`, publishing mutations on `bus`.
    pub fn new(storage: Arc<dyn StorageBackend>, bus: Arc<dyn EventBus>) -> Self {
        Self { storage, bus }
    }

    /// Persists a freshly-detected incident. Does not itself publish
    /// `incident.updated` — creation is observed via the detector's own
    /// `incident.created`, not a store mutation event.
    pub async fn create(&self, incident: Incident) -> Result<(), IncidentStoreError> {
        let value = serde_json::to_value(&incident).expect("Incident must serialize to JSON");
        self.storage.set(COLLECTION, &incident.incident_id, value).await?;
        Ok(())
    }

    /// Fetches an incident by id.
    pub async fn get(&self, incident_id: &str) -> Result<Option<Incident>, IncidentStoreError> {
        let Some(value) = self.storage.get(COLLECTION, incident_id).await? else {
            return Ok(None);
        };
        let incident: Incident = serde_json::from_value(value).map_err(|e| {
            IncidentStoreError::Storage(StorageError::Corrupt { collection: COLLECTION.into(), key: incident_id.into(), message: e.to_string() })
        })?;
        Ok(Some(incident))
    }

    async fn load(&self, incident_id: &str) -> Result<Incident, IncidentStoreError> {
        self.get(incident_id).await?.ok_or_else(|| IncidentStoreError::NotFound(incident_id.to_string()))
    }

    async fn save_and_publish(&self, incident: Incident, field: &str, old_value: Json, new_value: Json, updated_by: &str) -> Result<(), IncidentStoreError> {
        let value = serde_json::to_value(&incident).expect("Incident must serialize to JSON");
        self.storage.set(COLLECTION, &incident.incident_id, value).await?;

        let payload = IncidentUpdatedPayload {
            incident_id: incident.incident_id.clone(),
            field: field.to_string(),
            old_value,
            new_value,
            updated_by: updated_by.to_string(),
            updated_at: now(),
        };
        tracing::debug!(incident_id = %incident.incident_id, field, updated_by, "incident updated");
        let _ = self.bus.publish(warden_types::Event::new(kind::INCIDENT_UPDATED, "incident-store", payload)).await;
        Ok(())
    }

    /// Transitions an incident's status, appends a timeline entry
    /// describing the transition, and publishes `incident.updated`.
    pub async fn update_status(&self, incident_id: &str, new_status: IncidentStatus, updated_by: &str) -> Result<(), IncidentStoreError> {
        let mut incident = self.load(incident_id).await?;
        let old_status = incident.status;
        incident.status = new_status;
        incident.timeline.push(TimelineEntry {
            at: now(),
            kind: "status_change".to_string(),
            message: format!("status changed from {old_status} to {new_status}"),
            details: None,
        });

        self.save_and_publish(
            incident,
            "status",
            serde_json::json!(old_status),
            serde_json::json!(new_status),
            updated_by,
        )
        .await
    }

    /// Appends a timeline entry without changing status.
    pub async fn append_timeline_entry(
        &self,
        incident_id: &str,
        kind: &str,
        message: &str,
        details: Option<Json>,
        updated_by: &str,
    ) -> Result<(), IncidentStoreError> {
        let mut incident = self.load(incident_id).await?;
        let old_len = incident.timeline.len();
        incident.timeline.push(TimelineEntry { at: now(), kind: kind.to_string(), message: message.to_string(), details });

        self.save_and_publish(incident, "timeline", serde_json::json!(old_len), serde_json::json!(old_len + 1), updated_by).await
    }

    /// Records (or overwrites) an enricher's contribution and publishes
    /// `incident.updated`.
    pub async fn record_enrichment(&self, incident_id: &str, enricher_module: &str, data: Json) -> Result<(), IncidentStoreError> {
        let mut incident = self.load(incident_id).await?;
        let old_value = incident.enrichments.get(enricher_module).cloned().unwrap_or(Json::Null);
        incident.enrichments.insert(enricher_module.to_string(), data.clone());

        self.save_and_publish(incident, &format!("enrichments.{enricher_module}"), old_value, data, enricher_module).await
    }

    /// Lists every incident currently in the given status. `O(n)` over the
    /// whole collection — acceptable given the in-core store has no
    /// secondary-index requirement beyond this (§6, storage contract is
    /// get/set/delete/list/has/count/clear only).
    pub async fn query_by_status(&self, status: IncidentStatus) -> Result<Vec<Incident>, IncidentStoreError> {
        let rows = self.storage.list(COLLECTION).await?;
        let mut matched = Vec::new();
        for (key, value) in rows {
            let incident: Incident = serde_json::from_value(value).map_err(|e| {
                IncidentStoreError::Storage(StorageError::Corrupt { collection: COLLECTION.into(), key: key.clone(), message: e.to_string() })
            })?;
            if incident.status == status {
                matched.push(incident);
            }
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_bus::InMemoryBus;
    use warden_storage::MemoryStorage;
    use warden_types::Severity;

    fn store() -> IncidentStore {
        IncidentStore::new(Arc::new(MemoryStorage::new()), Arc::new(InMemoryBus::new()))
    }

    fn incident(id: &str) -> Incident {
        Incident::new(id, "title", "desc", Severity::Warning, "detector", Json::Null)
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store();
        store.create(incident("INC-1")).await.unwrap();
        let fetched = store.get("INC-1").await.unwrap().unwrap();
        assert_eq!(fetched.incident_id, "INC-1");
        assert_eq!(fetched.status, IncidentStatus::Open);
    }

    #[tokio::test]
    async fn update_status_changes_status_and_appends_timeline() {
        let store = store();
        store.create(incident("INC-1")).await.unwrap();
        store.update_status("INC-1", IncidentStatus::Acknowledged, "oncall").await.unwrap();

        let fetched = store.get("INC-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, IncidentStatus::Acknowledged);
        assert_eq!(fetched.timeline.len(), 1);
    }

    #[tokio::test]
    async fn update_status_on_missing_incident_fails() {
        let store = store();
        assert!(matches!(store.update_status("missing", IncidentStatus::Closed, "oncall").await, Err(IncidentStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn record_enrichment_is_visible_on_subsequent_get() {
        let store = store();
        store.create(incident("INC-1")).await.unwrap();
        store.record_enrichment("INC-1", "dedup", serde_json::json!({"occurrences": 2})).await.unwrap();

        let fetched = store.get("INC-1").await.unwrap().unwrap();
        assert_eq!(fetched.enrichments.get("dedup"), Some(&serde_json::json!({"occurrences": 2})));
    }

    #[tokio::test]
    async fn query_by_status_filters_correctly() {
        let store = store();
        store.create(incident("INC-1")).await.unwrap();
        store.create(incident("INC-2")).await.unwrap();
        store.update_status("INC-2", IncidentStatus::Resolved, "oncall").await.unwrap();

        let open = store.query_by_status(IncidentStatus::Open).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].incident_id, "INC-1");
    }
}
