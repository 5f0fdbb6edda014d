#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **warden-bus** – Typed, in-process pub/sub event bus for Warden.
//!
//! The bus is the deterministic core layer every other module-facing
//! component (Lifecycle Manager, Approval Gate, engines) depends on. It
//! provides a publish/subscribe mechanism with strict delivery semantics:
//!
//! - a `publish` resolves only after every handler registered *before* the
//!   publish began has settled (succeeded or failed);
//! - a handler's failure is isolated — logged, never surfaced to the
//!   publisher, never aborts dispatch of the remaining handlers;
//! - `subscribeOnce` handlers are revoked before they are invoked, so they
//!   cannot be re-entered;
//! - handler invocation order, for a single event type, is registration
//!   order.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error};
use warden_types::Event;

/// Boxed future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A subscribed callback. Handlers are `Fn`, not `FnMut`, because the bus
/// may (in principle) invoke the same handler concurrently across distinct
/// publishes; any interior mutability a handler needs is the subscriber's
/// responsibility (typically an `Arc<Mutex<..>>`/`Arc<RwLock<..>>` captured
/// in the closure, the same pattern every engine in this workspace uses for
/// its own state).
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Errors surfaced directly by the bus API (not by handlers — those are
/// isolated, see [`HandlerErrorRecord`]).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// `unsubscribe` was called with an id that is not (or is no longer)
    /// registered. Unsubscribe is idempotent, so this is informational and
    /// not treated as a hard failure by callers.
    #[error("unknown subscription id: {0}")]
    UnknownSubscription(String),
}

/// A record of a handler failure, kept for diagnostics only. Never
/// propagated to the publisher (§4.1 "Fails with `HandlerError` entries in
/// a diagnostic log only — never propagated").
#[derive(Debug, Clone)]
pub struct HandlerErrorRecord {
    /// The event type being dispatched when the handler failed.
    pub event_type: String,
    /// The failing subscription's id.
    pub subscription_id: String,
    /// The error message.
    pub message: String,
}

/// A cancellable handle returned by `subscribe`/`subscribe_once`.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    /// Unique subscription identifier.
    pub id: String,
    /// The event type this subscription was registered against.
    pub event_type: String,
}

struct Subscription {
    id: String,
    handler: Handler,
    once: bool,
}

/// Core event bus abstraction. Implementations must be `Send + Sync` and
/// safe to call from multiple producer contexts concurrently.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes `event` to every handler currently registered for
    /// `event.event_type`. Resolves after all of them have settled.
    /// Handler errors are isolated; this call itself only fails for
    /// structural bus errors, which do not currently exist for the
    /// in-memory implementation.
    async fn publish(&self, event: Event) -> anyhow::Result<()>;

    /// Registers `handler` for `event_type`, returning a handle that can be
    /// passed to `unsubscribe`.
    async fn subscribe(&self, event_type: &str, handler: Handler) -> SubscriptionHandle;

    /// Registers `handler` for `event_type`; the subscription is revoked
    /// (before the handler runs) the first time a matching event is
    /// published.
    async fn subscribe_once(&self, event_type: &str, handler: Handler) -> SubscriptionHandle;

    /// Revokes a subscription. Idempotent: revoking an already-revoked or
    /// unknown id is not an error.
    async fn unsubscribe(&self, id: &str);

    /// Revokes every subscription for `event_type`, or every subscription
    /// on the bus if `event_type` is `None`.
    async fn unsubscribe_all(&self, event_type: Option<&str>);

    /// Number of active subscriptions for `event_type`, or across all
    /// event types if `event_type` is `None`.
    async fn listener_count(&self, event_type: Option<&str>) -> usize;
}

/// The in-memory, single-process implementation of [`EventBus`].
///
/// Registration and revocation are synchronized through a `tokio::sync::RwLock`
/// guarding the subscription table. A publish takes a snapshot of the
/// handler list for its event type while holding a read lock, then releases
/// the lock before awaiting handlers sequentially in registration order —
/// this is what guarantees handlers registered *during* a publish are never
/// invoked by that publish.
pub struct InMemoryBus {
    subs: RwLock<HashMap<String, Vec<Subscription>>>,
    next_id: AtomicU64,
    recent_errors: RwLock<Vec<HandlerErrorRecord>>,
    max_recent_errors: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self {
            subs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            recent_errors: RwLock::new(Vec::new()),
            max_recent_errors: 256,
        }
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        format!("sub-{n}")
    }

    async fn register(&self, event_type: &str, handler: Handler, once: bool) -> SubscriptionHandle {
        let id = self.fresh_id();
        let mut subs = self.subs.write().await;
        subs.entry(event_type.to_string()).or_default().push(Subscription {
            id: id.clone(),
            handler,
            once,
        });
        debug!(event_type, subscription_id = %id, once, "subscribed");
        SubscriptionHandle { id, event_type: event_type.to_string() }
    }

    async fn record_handler_error(&self, event_type: &str, subscription_id: &str, message: String) {
        error!(event_type, subscription_id, %message, "handler failed");
        let mut log = self.recent_errors.write().await;
        log.push(HandlerErrorRecord {
            event_type: event_type.to_string(),
            subscription_id: subscription_id.to_string(),
            message,
        });
        if log.len() > self.max_recent_errors {
            let excess = log.len() - self.max_recent_errors;
            log.drain(0..excess);
        }
    }

    /// Returns a snapshot of recently recorded handler failures, most
    /// recent last. Diagnostic-only; never consulted for control flow.
    pub async fn recent_handler_errors(&self) -> Vec<HandlerErrorRecord> {
        self.recent_errors.read().await.clone()
    }
}

#[async_trait::async_trait]
impl EventBus for InMemoryBus {
    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        // Snapshot under the read lock, then drop it before awaiting
        // handlers so registrations made by a handler (or anyone else)
        // during dispatch never affect this publish's handler set.
        let (snapshot, once_ids): (Vec<(String, Handler)>, Vec<String>) = {
            let subs = self.subs.read().await;
            let Some(list) = subs.get(&event.event_type) else {
                return Ok(());
            };
            let snapshot = list.iter().map(|s| (s.id.clone(), Arc::clone(&s.handler))).collect();
            let once_ids = list.iter().filter(|s| s.once).map(|s| s.id.clone()).collect();
            (snapshot, once_ids)
        };

        if !once_ids.is_empty() {
            let mut subs = self.subs.write().await;
            if let Some(list) = subs.get_mut(&event.event_type) {
                list.retain(|s| !once_ids.contains(&s.id));
            }
        }

        for (subscription_id, handler) in snapshot {
            let fut = handler(event.clone());
            if let Err(e) = fut.await {
                self.record_handler_error(&event.event_type, &subscription_id, e.to_string()).await;
            }
        }

        Ok(())
    }

    async fn subscribe(&self, event_type: &str, handler: Handler) -> SubscriptionHandle {
        self.register(event_type, handler, false).await
    }

    async fn subscribe_once(&self, event_type: &str, handler: Handler) -> SubscriptionHandle {
        self.register(event_type, handler, true).await
    }

    async fn unsubscribe(&self, id: &str) {
        let mut subs = self.subs.write().await;
        for list in subs.values_mut() {
            list.retain(|s| s.id != id);
        }
    }

    async fn unsubscribe_all(&self, event_type: Option<&str>) {
        let mut subs = self.subs.write().await;
        match event_type {
            Some(t) => {
                subs.remove(t);
            }
            None => subs.clear(),
        }
    }

    async fn listener_count(&self, event_type: Option<&str>) -> usize {
        let subs = self.subs.read().await;
        match event_type {
            Some(t) => subs.get(t).map(Vec::len).unwrap_or(0),
            None => subs.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use warden_types::Event;

    fn count_handler(counter: Arc<AtomicUsize>) -> Handler {
        Arc::new(move |_event| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn each_registered_handler_is_invoked_exactly_once() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe("x.y", count_handler(Arc::clone(&counter))).await;
        bus.subscribe("x.y", count_handler(Arc::clone(&counter))).await;

        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_the_rest() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let failing: Handler = Arc::new(|_event| Box::pin(async move { anyhow::bail!("boom") }));
        bus.subscribe("x.y", failing).await;
        bus.subscribe("x.y", count_handler(Arc::clone(&counter))).await;

        let result = bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(bus.recent_handler_errors().await.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_once_fires_exactly_once_and_revokes_before_invoking() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bus.subscribe_once("x.y", count_handler(Arc::clone(&counter))).await;

        assert_eq!(bus.listener_count(Some("x.y")).await, 1);
        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();
        assert_eq!(bus.listener_count(Some("x.y")).await, 0);

        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();
        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_prevents_future_invocations() {
        let bus = InMemoryBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = bus.subscribe("x.y", count_handler(Arc::clone(&counter))).await;

        bus.unsubscribe(&handle.id).await;
        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn handlers_registered_during_publish_do_not_receive_that_publish() {
        let bus = Arc::new(InMemoryBus::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let bus_clone = Arc::clone(&bus);
        let counter_clone = Arc::clone(&counter);
        let registrar: Handler = Arc::new(move |_event| {
            let bus = Arc::clone(&bus_clone);
            let counter = Arc::clone(&counter_clone);
            Box::pin(async move {
                bus.subscribe("x.y", count_handler(counter)).await;
                Ok(())
            })
        });
        bus.subscribe("x.y", registrar).await;

        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invocation_order_matches_registration_order() {
        let bus = InMemoryBus::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            let handler: Handler = Arc::new(move |_event| {
                let order = Arc::clone(&order);
                Box::pin(async move {
                    order.lock().await.push(i);
                    Ok(())
                })
            });
            bus.subscribe("x.y", handler).await;
        }

        bus.publish(Event::new("x.y", "test", serde_json::json!({}))).await.unwrap();
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }
}
