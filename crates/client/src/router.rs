//! Publish/subscribe fan-out of server-pushed events.

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, Weak},
};

use tracing::warn;

use deckhand_protocol::{GatewayEvent, subscriptions::WILDCARD};

/// Subscriber callback. Wildcard subscribers see the same [`GatewayEvent`],
/// so the event name is always available.
pub type EventHandler = Arc<dyn Fn(&GatewayEvent) + Send + Sync>;

struct Entry {
    id: u64,
    handler: EventHandler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_event: HashMap<String, Vec<Entry>>,
}

/// Event name → handler set. Subscriptions outlive reconnects; only
/// [`Subscription::unsubscribe`] removes them.
#[derive(Clone, Default)]
pub struct EventRouter {
    registry: Arc<Mutex<Registry>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event` (or [`WILDCARD`]).
    ///
    /// Registering the same `Arc` twice under one name is a no-op; both
    /// returned subscriptions then refer to the single registration.
    pub fn on(&self, event: &str, handler: EventHandler) -> Subscription {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        let existing = registry.by_event.get(event).and_then(|entries| {
            entries
                .iter()
                .find(|entry| Arc::ptr_eq(&entry.handler, &handler))
                .map(|entry| entry.id)
        });
        let id = match existing {
            Some(id) => id,
            None => {
                registry.next_id += 1;
                let id = registry.next_id;
                registry
                    .by_event
                    .entry(event.to_string())
                    .or_default()
                    .push(Entry { id, handler });
                id
            },
        };
        Subscription {
            registry: Arc::downgrade(&self.registry),
            event: event.to_string(),
            id,
        }
    }

    /// Deliver `event` to its named handlers, then to wildcard handlers.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe freely. A panicking handler is logged and skipped.
    pub fn emit(&self, event: &GatewayEvent) {
        let handlers: Vec<EventHandler> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            let named = registry.by_event.get(event.name.as_str());
            let wildcard = if event.name == WILDCARD {
                None
            } else {
                registry.by_event.get(WILDCARD)
            };
            named
                .into_iter()
                .chain(wildcard)
                .flatten()
                .map(|entry| Arc::clone(&entry.handler))
                .collect()
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(event = %event.name, "event handler panicked");
            }
        }
    }

    /// Number of handlers registered under `event` (not counting wildcards).
    pub fn handler_count(&self, event: &str) -> usize {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.by_event.get(event).map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventRouter::on`].
///
/// Dropping it does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event: String,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Idempotent.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entries) = registry.by_event.get_mut(&self.event) {
            entries.retain(|entry| entry.id != self.id);
            if entries.is_empty() {
                registry.by_event.remove(&self.event);
            }
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }
}
