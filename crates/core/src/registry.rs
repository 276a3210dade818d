//! Subscription registry - event name to ordered handler list
//!
//! Handlers for one event run in registration order. Registering the same
//! handler twice makes it fire twice.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};

/// Callback invoked with the payload of a dispatched event
pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Value) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Multi-handler-per-event registry
#[derive(Default)]
pub struct Subscriptions {
    handlers: HashMap<String, Vec<EventHandler>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for an event
    pub fn subscribe(&mut self, event: &str, handler: EventHandler) -> Result<()> {
        if event.is_empty() {
            return Err(Error::InvalidArgument(
                "event name must be a non-empty string".into(),
            ));
        }
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    /// Remove every registration of `handler` for `event`
    ///
    /// Handlers are compared by pointer identity. Returns the number removed.
    pub fn unsubscribe(&mut self, event: &str, handler: &EventHandler) -> usize {
        let Some(list) = self.handlers.get_mut(event) else {
            return 0;
        };

        let before = list.len();
        list.retain(|h| !Arc::ptr_eq(h, handler));
        let removed = before - list.len();

        if list.is_empty() {
            self.handlers.remove(event);
        }
        removed
    }

    /// Copy of the handler list for an event, in registration order
    pub fn snapshot(&self, event: &str) -> Vec<EventHandler> {
        self.handlers.get(event).cloned().unwrap_or_default()
    }

    /// Invoke every handler registered for `event`
    ///
    /// Returns how many handlers were invoked. A panicking handler is logged
    /// and skipped; later handlers still run.
    pub fn dispatch(&self, event: &str, data: &Value) -> usize {
        invoke_all(event, &self.snapshot(event), data)
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, Vec::len)
    }

    /// Event names with at least one handler
    pub fn events(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Run a snapshot of handlers with panic isolation
pub(crate) fn invoke_all(event: &str, handlers: &[EventHandler], data: &Value) -> usize {
    for (index, handler) in handlers.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
            tracing::warn!(event = %event, index, "Event handler panicked");
        }
    }
    handlers.len()
}
