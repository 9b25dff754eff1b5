//! Middleware pipeline.
//!
//! A dispatch travels through an ordered list of middleware before reaching
//! its terminal stage. Each middleware receives the payload and a [`Next`]
//! handle: calling [`Next::run`] passes control on, returning without it
//! short-circuits the chain.

use crate::error::Error;
use crate::target::Payload;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

/// Terminal stage of a pipeline.
pub type Destination<'a> = &'a mut dyn FnMut(Payload) -> Result<Value, Error>;

/// A single interceptor in the dispatch chain.
pub trait Middleware: Send + Sync {
    /// Name used in configuration and logs.
    fn name(&self) -> &str;

    /// Handle the payload, optionally handing it to the rest of the chain.
    ///
    /// # Errors
    ///
    /// Whatever the middleware or the remaining chain fails with.
    fn handle(&self, payload: Payload, next: Next<'_>) -> Result<Value, Error>;
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    stack: &'a [Arc<dyn Middleware>],
    destination: Destination<'a>,
}

impl<'a> Next<'a> {
    /// Start a chain over `stack` ending in `destination`.
    pub fn new(stack: &'a [Arc<dyn Middleware>], destination: Destination<'a>) -> Self {
        Self { stack, destination }
    }

    /// Pass the payload to the next middleware, or to the terminal stage once
    /// the chain is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates failures from the remaining stages untouched.
    pub fn run(self, payload: Payload) -> Result<Value, Error> {
        match self.stack.split_first() {
            Some((middleware, rest)) => {
                trace!(middleware = %middleware.name(), event = %payload.event, "Entering middleware");
                middleware.handle(payload, Next::new(rest, self.destination))
            }
            None => (self.destination)(payload),
        }
    }

    /// Number of middleware still ahead.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stack.len()
    }
}

/// Executes a payload through a middleware list and a terminal stage.
pub trait Pipeline: Send + Sync {
    /// Send `payload` through `middleware`, then to `destination`.
    ///
    /// # Errors
    ///
    /// Propagates failures from any stage.
    fn send<'a>(
        &self,
        payload: Payload,
        middleware: &'a [Arc<dyn Middleware>],
        destination: Destination<'a>,
    ) -> Result<Value, Error>;
}

/// Synchronous pipeline that runs middleware in list order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainPipeline;

impl Pipeline for ChainPipeline {
    fn send<'a>(
        &self,
        payload: Payload,
        middleware: &'a [Arc<dyn Middleware>],
        destination: Destination<'a>,
    ) -> Result<Value, Error> {
        Next::new(middleware, destination).run(payload)
    }
}
