//! The shared context handed to every module at `initialize` time.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_audit::ApprovalGate;
use warden_bus::EventBus;
use warden_config::ModuleConfig;
use warden_storage::NamespacedStorage;
use warden_types::{now, Json};

/// Health status reported synchronously by a module's `health()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Operating with reduced capability.
    Degraded,
    /// Not operating correctly.
    Unhealthy,
}

/// A module's current health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleHealth {
    /// Current status.
    pub status: HealthStatus,
    /// Optional human-readable detail.
    pub message: Option<String>,
    /// Optional structured detail.
    pub details: Option<Json>,
    /// When this snapshot was produced.
    pub last_check: DateTime<Utc>,
}

impl ModuleHealth {
    /// A plain healthy snapshot with no message or detail.
    pub fn healthy() -> Self {
        Self { status: HealthStatus::Healthy, message: None, details: None, last_check: now() }
    }

    /// A degraded snapshot carrying `message`.
    pub fn degraded(message: impl Into<String>) -> Self {
        Self { status: HealthStatus::Degraded, message: Some(message.into()), details: None, last_check: now() }
    }

    /// An unhealthy snapshot carrying `message`.
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self { status: HealthStatus::Unhealthy, message: Some(message.into()), details: None, last_check: now() }
    }
}

/// Everything a module needs to do its work, assembled once by the
/// Lifecycle Manager and handed to `initialize`.
///
/// Storage is pre-namespaced (§4.2, "the module sees a collection key space
/// automatically prefixed by `<module-id>::`") so modules can never reach
/// into each other's data even by accident.
#[derive(Clone)]
pub struct ModuleContext {
    /// This module's own id, repeated here for convenience/assertions.
    pub module_id: String,
    /// Already-validated configuration for this module.
    pub config: ModuleConfig,
    /// Shared event bus.
    pub bus: Arc<dyn EventBus>,
    /// Storage pre-namespaced to this module.
    pub storage: Arc<NamespacedStorage>,
    /// A span-scoped logger tagged with `module_id`, following the
    /// teacher's convention of threading `tracing` spans through
    /// component constructors rather than ad hoc field interpolation.
    pub logger: tracing::Span,
    /// Shared approval gate.
    pub approval_gate: Arc<ApprovalGate>,
}
