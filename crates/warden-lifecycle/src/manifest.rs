//! Module manifests — the static description every module carries.

use serde::{Deserialize, Serialize};
use warden_types::Json;

/// The kind of component a module implements (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModuleType {
    /// Ingests raw operational signals (file tail, syslog, Kubernetes, …).
    Connector,
    /// Identifies incidents from ingested signals.
    Detector,
    /// Adds data to an already-created incident.
    Enricher,
    /// Executes a mutating operation once approved.
    Action,
    /// Delivers human-facing notifications.
    Notifier,
    /// Extends the dashboard UI.
    UiExtension,
    /// A tool exposed through the OpenClaw tool registry.
    OpenClawTool,
}

/// Static description of a module, independent of any running instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Unique module identifier, also used as its storage namespace prefix.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Semantic version string.
    pub version: String,
    /// Module kind.
    #[serde(rename = "type")]
    pub module_type: ModuleType,
    /// Ids of modules that must be initialized and started before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Optional JSON Schema describing this module's configuration shape.
    /// Advisory only — the CORE does not validate against it at runtime.
    #[serde(default)]
    pub config_schema: Option<Json>,
}

impl Manifest {
    /// Builds a manifest with no dependencies and no config schema.
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>, module_type: ModuleType) -> Self {
        Self { id: id.into(), name: name.into(), version: version.into(), module_type, dependencies: Vec::new(), config_schema: None }
    }

    /// Builder method attaching required dependencies.
    pub fn with_dependencies(mut self, dependencies: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }
}
