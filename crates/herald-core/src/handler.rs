//! Event handler registry.

use crate::error::Error;
use crate::target::Payload;
use crate::websocket::Websocket;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A registered event handler.
///
/// Handlers receive the targeting context of the current dispatch and the
/// payload that came out of the middleware chain.
pub type Handler = Arc<dyn Fn(&mut Websocket, Payload) -> Result<Value, Error> + Send + Sync>;

/// Mapping from event name to handler.
#[derive(Default, Clone)]
pub struct EventRegistry {
    handlers: HashMap<String, Handler>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `event`, replacing any previous handler.
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(&mut Websocket, Payload) -> Result<Value, Error> + Send + Sync + 'static,
    {
        let event = event.into();
        if self.handlers.insert(event.clone(), Arc::new(handler)).is_some() {
            debug!(event = %event, "Replaced event handler");
        }
    }

    /// Check if a handler is registered for `event`.
    #[must_use]
    pub fn exists(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Get the handler for `event`.
    #[must_use]
    pub fn get(&self, event: &str) -> Option<Handler> {
        self.handlers.get(event).cloned()
    }

    /// Registered event names.
    #[must_use]
    pub fn events(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("events", &self.events())
            .finish()
    }
}
