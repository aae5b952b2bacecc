//! Event bus abstraction.
//!
//! No teacher analog exists for a typed pub/sub bus in the retrieved
//! pack; this is built fresh from the crate's general
//! `Arc<dyn Fn(...) + Send + Sync>` handler-registration idiom (see
//! `wrapper.rs`'s `ToolWrapper` chain for the same shape applied to a
//! different seam).

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use serde_json::Value;

/// Soft cap on handlers per event name; exceeding it is a warn, not an
/// error.
pub const DEFAULT_MAX_LISTENERS: usize = 100;

pub type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// An event handler. Boxed so the bus can hold a heterogeneous list per
/// event name; takes the event's JSON payload.
pub type EventHandler = Box<dyn Fn(Value) -> BoxFuture<'static> + Send + Sync>;

/// An unsubscribe token returned by `on`/`once`. Dropping it does nothing;
/// call `unsubscribe` explicitly.
pub struct Subscription {
    unsubscribe: Box<dyn FnOnce() + Send>,
}

impl Subscription {
    /// Builds a subscription token from the closure that removes its
    /// handler from the bus. Called by `EventBus` implementations.
    pub fn new(unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unsubscribe: Box::new(unsubscribe),
        }
    }

    pub fn unsubscribe(self) {
        (self.unsubscribe)()
    }
}

/// Single-process, synchronous (per-emission) publish/subscribe bus.
///
/// `emit` snapshots the current handler list, awaits each handler in
/// registration order, swallows and logs any handler panic/error, then
/// drops any once-handlers that fired. Handlers registered during an
/// emission are not invoked in that same emission.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Register a persistent handler; returns an unsubscribe token.
    fn on(&self, name: &str, handler: EventHandler) -> Subscription;

    /// Register a handler that self-removes after its first firing.
    fn once(&self, name: &str, handler: EventHandler) -> Subscription;

    /// Invoke every handler registered for `name` with `payload`.
    async fn emit(&self, name: &str, payload: Value);

    /// Number of handlers currently registered for `name`.
    fn listener_count(&self, name: &str) -> usize;
}
