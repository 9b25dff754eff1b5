//! Connection hub.
//!
//! Keeps an outbound queue per live connection and delivers resolved pushes
//! to them. Workers hand pushes to the hub; each connection task drains its
//! own queue onto the socket.

use crate::metrics;
use dashmap::DashMap;
use herald_core::{ConnectionId, Push, PushSink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Text packet exchanged with clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    /// Event name.
    pub event: String,
    /// Event data.
    #[serde(default)]
    pub data: Value,
}

impl Packet {
    /// Create a new packet.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Error reply for a failed event.
    #[must_use]
    pub fn error(event: &str, kind: &str, message: impl Into<String>) -> Self {
        Self::new(
            "error",
            serde_json::json!({
                "event": event,
                "kind": kind,
                "message": message.into(),
            }),
        )
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the data cannot be serialized.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid packet.
    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Registry of live connections and their outbound queues.
#[derive(Debug, Default)]
pub struct Hub {
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<String>>,
    next_id: AtomicU64,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection, returning its id and outbound queue.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.insert(id, tx);
        (id, rx)
    }

    /// Forget a connection.
    pub fn unregister(&self, id: ConnectionId) {
        self.connections.remove(&id);
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue encoded text for a connection.
    ///
    /// Returns `false` if the connection is gone.
    pub fn send_text(&self, id: ConnectionId, text: String) -> bool {
        match self.connections.get(&id) {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Queue a packet for a connection.
    pub fn send_packet(&self, id: ConnectionId, packet: &Packet) -> bool {
        match packet.encode() {
            Ok(text) => self.send_text(id, text),
            Err(e) => {
                warn!(connection = %id, error = %e, "Failed to encode packet");
                metrics::record_error("encode");
                false
            }
        }
    }

    fn connected(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }
}

impl PushSink for Hub {
    fn push(&self, push: Push) -> usize {
        if self.is_empty() {
            trace!(event = %push.event, "No live connections, dropping push");
            return 0;
        }

        let recipients = if push.should_broadcast() {
            push.recipients(self.connected())
        } else {
            push.recipients([])
        };

        let text = match Packet::new(push.event.as_str(), push.data.clone()).encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(event = %push.event, error = %e, "Failed to encode push");
                metrics::record_error("encode");
                return 0;
            }
        };

        let delivered = recipients
            .into_iter()
            .filter(|id| self.send_text(*id, text.clone()))
            .count();

        trace!(event = %push.event, delivered, "Delivered push");
        metrics::record_push(delivered);
        delivered
    }
}
