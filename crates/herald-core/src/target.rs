//! Connection handles, message targets and dispatch payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque identifier of a single live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Get the raw handle.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A recipient of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// A single connection.
    Connection(ConnectionId),
    /// Every connection currently in a room.
    Room(String),
}

impl From<ConnectionId> for Target {
    fn from(id: ConnectionId) -> Self {
        Self::Connection(id)
    }
}

impl From<&str> for Target {
    fn from(room: &str) -> Self {
        Self::Room(room.to_string())
    }
}

impl From<String> for Target {
    fn from(room: String) -> Self {
        Self::Room(room)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(id) => write!(f, "connection:{id}"),
            Self::Room(name) => write!(f, "room:{name}"),
        }
    }
}

/// What travels through the middleware pipeline for a single dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Event name being dispatched.
    pub event: String,
    /// Connection that sent the event, if known.
    pub sender: Option<ConnectionId>,
    /// Event data.
    pub data: Value,
}

impl Payload {
    /// Create a new payload without a sender.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            sender: None,
            data,
        }
    }

    /// Attach the sending connection.
    #[must_use]
    pub fn with_sender(mut self, sender: ConnectionId) -> Self {
        self.sender = Some(sender);
        self
    }
}
