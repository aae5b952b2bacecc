//! Concrete `EventBus`: a handler list per event name behind a
//! `parking_lot::RwLock`, snapshotted before each emit so handlers that
//! subscribe or unsubscribe mid-emission never race the dispatch loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use taskflow_traits::event::{BoxFuture, DEFAULT_MAX_LISTENERS, EventBus, EventHandler, Subscription};
use tracing::warn;

struct HandlerEntry {
    id: u64,
    once: bool,
    handler: Arc<EventHandler>,
}

#[derive(Default)]
struct Handlers {
    by_event: HashMap<String, Vec<HandlerEntry>>,
}

/// In-process, single-bus implementation of `EventBus`. Holds its handler
/// map behind an `Arc` internally so unsubscribe closures can outlive any
/// particular borrow of the bus.
pub struct InProcessEventBus {
    handlers: Arc<RwLock<Handlers>>,
    next_id: AtomicU64,
    max_listeners: usize,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Handlers::default())),
            next_id: AtomicU64::new(0),
            max_listeners: DEFAULT_MAX_LISTENERS,
        }
    }

    fn register(&self, name: &str, handler: EventHandler, once: bool) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let handler = Arc::new(handler);
        {
            let mut guard = self.handlers.write();
            let list = guard.by_event.entry(name.to_string()).or_default();
            list.push(HandlerEntry { id, once, handler });
            if list.len() > self.max_listeners {
                warn!(
                    event = name,
                    count = list.len(),
                    "listener count exceeds soft cap"
                );
            }
        }

        let handlers = self.handlers.clone();
        let name = name.to_string();
        Subscription::new(move || {
            let mut guard = handlers.write();
            if let Some(list) = guard.by_event.get_mut(&name) {
                list.retain(|entry| entry.id != id);
            }
        })
    }
}

impl Default for InProcessEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InProcessEventBus {
    fn on(&self, name: &str, handler: EventHandler) -> Subscription {
        self.register(name, handler, false)
    }

    fn once(&self, name: &str, handler: EventHandler) -> Subscription {
        self.register(name, handler, true)
    }

    async fn emit(&self, name: &str, payload: Value) {
        let snapshot: Vec<Arc<EventHandler>> = {
            let guard = self.handlers.read();
            guard
                .by_event
                .get(name)
                .map(|list| list.iter().map(|entry| entry.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in &snapshot {
            let fut: BoxFuture<'_> = handler(payload.clone());
            fut.await;
        }

        let mut guard = self.handlers.write();
        if let Some(list) = guard.by_event.get_mut(name) {
            list.retain(|entry| !entry.once || !snapshot.iter().any(|h| Arc::ptr_eq(h, &entry.handler)));
        }
    }

    fn listener_count(&self, name: &str) -> usize {
        self.handlers
            .read()
            .by_event
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
