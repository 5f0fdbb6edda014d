//! The `Module` trait every pluggable component implements.

use async_trait::async_trait;

use crate::context::{ModuleContext, ModuleHealth};
use crate::manifest::Manifest;

/// A pluggable component of the platform.
///
/// Lifecycle methods run in the order `initialize` → `start` → … → `stop` →
/// `destroy`, driven by the [`crate::manager::LifecycleManager`] in
/// dependency order (§4.2). `health()` is synchronous and side-effect-free
/// so it can be polled cheaply.
#[async_trait]
pub trait Module: Send + Sync {
    /// This module's static description.
    fn manifest(&self) -> &Manifest;

    /// One-time setup: wire up subscriptions, validate configuration,
    /// acquire resources. Receives the assembled [`ModuleContext`].
    async fn initialize(&self, context: ModuleContext) -> anyhow::Result<()>;

    /// Begin active operation (spawn background tasks, open connections).
    async fn start(&self) -> anyhow::Result<()>;

    /// Cease active operation; must cancel any internal timers (§9, "Timer
    /// pattern") and stop accepting new work. Idempotent.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Release any remaining resources. Called after `stop`, even if this
    /// module never successfully started (rollback path).
    async fn destroy(&self) -> anyhow::Result<()>;

    /// Current health, computed synchronously from in-memory state.
    fn health(&self) -> ModuleHealth;
}
