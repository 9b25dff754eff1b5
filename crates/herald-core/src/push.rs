//! Resolved deliveries.
//!
//! A [`Push`] is the targeting state of a dispatch turned into concrete
//! connections. The transport receives it through a [`PushSink`] and owns the
//! actual frame writes.

use crate::rooms::{RoomError, RoomStore};
use crate::target::{ConnectionId, Target};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::trace;

/// An outgoing message with its resolved recipients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Push {
    /// Connection that triggered the message.
    pub sender: Option<ConnectionId>,
    /// Event name.
    pub event: String,
    /// Event data.
    pub data: Value,
    /// Whether the sender is excluded from delivery.
    pub broadcast: bool,
    /// Whether explicit targets were given.
    pub assigned: bool,
    /// Explicit recipients, deduplicated, in target order.
    pub descriptors: Vec<ConnectionId>,
}

impl Push {
    /// Resolve targets against the room store.
    ///
    /// Rooms expand to their current clients. Duplicates are dropped, keeping
    /// the first occurrence.
    ///
    /// # Errors
    ///
    /// Returns the store error if a room lookup fails.
    pub fn resolve(
        rooms: &dyn RoomStore,
        sender: Option<ConnectionId>,
        broadcast: bool,
        targets: &[Target],
        event: impl Into<String>,
        data: Value,
    ) -> Result<Self, RoomError> {
        let mut seen = HashSet::new();
        let mut descriptors = Vec::new();

        for target in targets {
            match target {
                Target::Connection(id) => {
                    if seen.insert(*id) {
                        descriptors.push(*id);
                    }
                }
                Target::Room(room) => {
                    for id in rooms.get_clients(room)? {
                        if seen.insert(id) {
                            descriptors.push(id);
                        }
                    }
                }
            }
        }

        let event = event.into();
        trace!(event = %event, recipients = descriptors.len(), broadcast, "Resolved push");

        Ok(Self {
            sender,
            event,
            data,
            broadcast,
            assigned: !targets.is_empty(),
            descriptors,
        })
    }

    /// True when the message goes to every connection except the sender.
    #[must_use]
    pub fn should_broadcast(&self) -> bool {
        self.broadcast && !self.assigned
    }

    /// Check whether a connection must be skipped.
    #[must_use]
    pub fn excludes(&self, connection: ConnectionId) -> bool {
        self.broadcast && self.sender == Some(connection)
    }

    /// Final recipient list given every currently open connection.
    ///
    /// `connected` is only consulted for an unassigned broadcast.
    #[must_use]
    pub fn recipients(
        &self,
        connected: impl IntoIterator<Item = ConnectionId>,
    ) -> Vec<ConnectionId> {
        if self.should_broadcast() {
            connected
                .into_iter()
                .filter(|id| !self.excludes(*id))
                .collect()
        } else {
            self.descriptors
                .iter()
                .copied()
                .filter(|id| !self.excludes(*id))
                .collect()
        }
    }
}

/// Receives resolved pushes. Implemented by the transport.
pub trait PushSink: Send + Sync {
    /// Deliver a push, returning how many connections it was handed to.
    fn push(&self, push: Push) -> usize;
}
