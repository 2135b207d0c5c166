//! Typed publish/subscribe bus
//!
//! `on` returns a [`Subscription`] handle; dropping the handle (or passing it
//! to [`EventBus::off`]) unsubscribes. Async consumers can take an mpsc
//! receiver through [`EventBus::subscribe_channel`] instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tokio::sync::mpsc;

use super::events::{ChatEvent, EventKind};

type Handler = Arc<dyn Fn(&ChatEvent) + Send + Sync>;

struct HandlerEntry {
    id: u64,
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    handlers: RwLock<Vec<HandlerEntry>>,
    channels: Mutex<Vec<mpsc::UnboundedSender<ChatEvent>>>,
}

impl BusInner {
    fn remove(&self, id: u64) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.retain(|entry| entry.id != id);
        }
    }
}

/// Cloneable handle to a shared event bus
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to one kind of event
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event
    pub fn on_any<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Unsubscribe explicitly; equivalent to dropping the handle
    pub fn off(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Deliver an event to every matching handler and channel
    ///
    /// Handlers run on the caller's thread, outside the registry lock, so a
    /// handler may itself subscribe or unsubscribe.
    pub fn emit(&self, event: ChatEvent) {
        let kind = event.kind();
        let matching: Vec<Handler> = match self.inner.handlers.read() {
            Ok(handlers) => handlers
                .iter()
                .filter(|entry| entry.kind.map_or(true, |k| k == kind))
                .map(|entry| Arc::clone(&entry.handler))
                .collect(),
            Err(_) => Vec::new(),
        };

        for handler in matching {
            handler(&event);
        }

        if let Ok(mut channels) = self.inner.channels.lock() {
            channels.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// Receive every event on an unbounded channel until the receiver drops
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ChatEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut channels) = self.inner.channels.lock() {
            channels.push(tx);
        }
        rx
    }

    /// Number of live handler subscriptions
    pub fn handler_count(&self) -> usize {
        self.inner.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    fn register(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut handlers) = self.inner.handlers.write() {
            handlers.push(HandlerEntry { id, kind, handler });
        }
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: true,
        }
    }
}

/// Live subscription; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: bool,
}

impl Subscription {
    /// Keep the handler registered for the bus lifetime
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}
