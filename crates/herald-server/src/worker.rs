//! Dispatch workers.
//!
//! Each worker owns one targeting context and processes its inbound queue
//! one event at a time, resetting the context between events. Connections
//! are pinned to a worker so their events keep arrival order.

use crate::hub::{Hub, Packet};
use crate::metrics;
use herald_core::{ConnectionId, MemoryRoomStore, Websocket};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Work items handed to a dispatch worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A connection was accepted.
    Connected(ConnectionId),
    /// A connection sent an event.
    Event {
        /// Sending connection.
        sender: ConnectionId,
        /// Event name.
        event: String,
        /// Event data.
        data: Value,
    },
    /// A connection went away.
    Disconnected(ConnectionId),
}

impl Inbound {
    /// Connection the work item belongs to.
    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::Connected(id) | Self::Disconnected(id) => *id,
            Self::Event { sender, .. } => *sender,
        }
    }
}

/// A single dispatch worker.
pub struct Worker {
    id: usize,
    websocket: Websocket,
    rooms: Arc<MemoryRoomStore>,
    hub: Arc<Hub>,
}

impl Worker {
    /// Create a worker around a configured context.
    #[must_use]
    pub fn new(
        id: usize,
        websocket: Websocket,
        rooms: Arc<MemoryRoomStore>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            id,
            websocket,
            rooms,
            hub,
        }
    }

    /// Process the queue until every sender is dropped.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<Inbound>) {
        debug!(worker = self.id, "Dispatch worker started");
        while let Some(item) = inbound.recv().await {
            self.handle(item);
        }
        debug!(worker = self.id, "Dispatch worker stopped");
    }

    /// Process one work item.
    pub fn handle(&mut self, item: Inbound) {
        match item {
            Inbound::Connected(id) => self.dispatch(id, "connect", Value::Null),
            Inbound::Event {
                sender,
                event,
                data,
            } => self.dispatch(sender, &event, data),
            Inbound::Disconnected(id) => {
                self.dispatch(id, "disconnect", Value::Null);
                let left = self.rooms.remove_connection(id);
                debug!(worker = self.id, connection = %id, rooms = left.len(), "Connection cleaned up");
                metrics::set_active_rooms(self.rooms.stats().room_count);
            }
        }
    }

    fn dispatch(&mut self, sender: ConnectionId, event: &str, data: Value) {
        let start = Instant::now();

        self.websocket.set_sender(sender);
        let result = self.websocket.call(event, data);
        self.websocket.reset();

        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(Some(reply)) => {
                metrics::record_event("ok", elapsed);
                if !reply.is_null() {
                    self.hub.send_packet(sender, &Packet::new(event, reply));
                }
            }
            Ok(None) => {
                metrics::record_event("unhandled", elapsed);
                debug!(worker = self.id, connection = %sender, event = %event, "No handler for event");
            }
            Err(e) => {
                metrics::record_event("error", elapsed);
                metrics::record_error(e.kind());
                warn!(worker = self.id, connection = %sender, event = %event, error = %e, "Event failed");
                self.hub
                    .send_packet(sender, &Packet::error(event, e.kind(), e.to_string()));
            }
        }

        metrics::set_active_rooms(self.rooms.stats().room_count);
    }
}

/// Handles to every running worker.
#[derive(Debug, Clone)]
pub struct Workers {
    queues: Vec<mpsc::UnboundedSender<Inbound>>,
}

impl Workers {
    /// Spawn one task per worker context.
    #[must_use]
    pub fn spawn(workers: Vec<Worker>) -> Self {
        let queues = workers
            .into_iter()
            .map(|worker| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(worker.run(rx));
                tx
            })
            .collect();

        Self { queues }
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Check if there are no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Index of the worker a connection is pinned to.
    #[must_use]
    pub fn worker_for(&self, connection: ConnectionId) -> usize {
        (connection.as_u64() % self.len().max(1) as u64) as usize
    }

    /// Queue a work item on its connection's worker.
    ///
    /// Returns `false` if the worker has stopped.
    pub fn route(&self, item: Inbound) -> bool {
        if self.is_empty() {
            return false;
        }
        let index = self.worker_for(item.connection());
        self.queues[index].send(item).is_ok()
    }
}
