//! In-memory room store backed by sharded concurrent maps.

use super::{validate_room_name, RoomConfig, RoomError, RoomStats, RoomStore};
use crate::target::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, trace};

/// Room store that keeps every membership in process memory.
///
/// Both directions of the mapping are kept in insertion order, so
/// `get_rooms` reflects join order.
pub struct MemoryRoomStore {
    /// Room name -> member connections.
    rooms: DashMap<String, Vec<ConnectionId>>,
    /// Connection -> joined rooms.
    memberships: DashMap<ConnectionId, Vec<String>>,
    /// Configuration.
    config: RoomConfig,
}

impl MemoryRoomStore {
    /// Create a new store with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RoomConfig::default())
    }

    /// Create a new store with custom configuration.
    #[must_use]
    pub fn with_config(config: RoomConfig) -> Self {
        info!("Creating memory room store with config: {:?}", config);
        Self {
            rooms: DashMap::new(),
            memberships: DashMap::new(),
            config,
        }
    }

    /// Get store statistics.
    #[must_use]
    pub fn stats(&self) -> RoomStats {
        RoomStats {
            room_count: self.rooms.len(),
            connection_count: self.memberships.len(),
            total_memberships: self.memberships.iter().map(|m| m.len()).sum(),
        }
    }

    /// Check if a room has any members.
    #[must_use]
    pub fn room_exists(&self, room: &str) -> bool {
        self.rooms.get(room).is_some_and(|members| !members.is_empty())
    }

    /// Number of connections in a room.
    #[must_use]
    pub fn client_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Remove a connection from every room it joined.
    ///
    /// Returns the rooms the connection was removed from.
    pub fn remove_connection(&self, connection: ConnectionId) -> Vec<String> {
        let Entry::Occupied(entry) = self.memberships.entry(connection) else {
            return Vec::new();
        };

        for room in entry.get() {
            self.detach(connection, room);
        }
        let (_, joined) = entry.remove_entry();

        debug!(connection = %connection, rooms = joined.len(), "Removed from all rooms");
        joined
    }

    /// Drop `connection` from a room's member list.
    ///
    /// Callers hold the connection's `memberships` entry, which orders every
    /// change to that connection's rooms.
    fn detach(&self, connection: ConnectionId, room: &str) {
        let now_empty = match self.rooms.get_mut(room) {
            Some(mut members) => {
                members.retain(|member| *member != connection);
                members.is_empty()
            }
            None => return,
        };

        if now_empty && self.config.auto_delete_empty_rooms {
            self.rooms.remove_if(room, |_, members| members.is_empty());
            debug!(room = %room, "Deleted empty room");
        }
    }
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomStore for MemoryRoomStore {
    fn add(&self, connection: ConnectionId, rooms: &[String]) -> Result<(), RoomError> {
        for room in rooms {
            validate_room_name(room).map_err(RoomError::InvalidRoom)?;
        }

        let mut joined = self.memberships.entry(connection).or_default();

        let mut fresh: Vec<String> = Vec::new();
        for room in rooms {
            if !joined.contains(room) && !fresh.contains(room) {
                fresh.push(room.clone());
            }
        }

        if joined.len() + fresh.len() > self.config.max_rooms_per_connection {
            drop(joined);
            self.memberships
                .remove_if(&connection, |_, joined| joined.is_empty());
            return Err(RoomError::MaxRoomsReached);
        }

        // Lock order: memberships entry, then rooms
        for room in fresh {
            self.rooms.entry(room.clone()).or_default().push(connection);
            debug!(room = %room, connection = %connection, "Joined room");
            joined.push(room);
        }

        if joined.is_empty() {
            drop(joined);
            self.memberships
                .remove_if(&connection, |_, joined| joined.is_empty());
        }

        Ok(())
    }

    fn delete(&self, connection: ConnectionId, rooms: &[String]) -> Result<(), RoomError> {
        let Entry::Occupied(mut entry) = self.memberships.entry(connection) else {
            return Ok(());
        };

        for room in entry.get().iter().filter(|room| rooms.contains(room)) {
            self.detach(connection, room);
            debug!(room = %room, connection = %connection, "Left room");
        }
        entry.get_mut().retain(|room| !rooms.contains(room));

        if entry.get().is_empty() {
            entry.remove();
        }

        Ok(())
    }

    fn get_clients(&self, room: &str) -> Result<Vec<ConnectionId>, RoomError> {
        let clients = self
            .rooms
            .get(room)
            .map(|members| members.clone())
            .unwrap_or_default();
        trace!(room = %room, clients = clients.len(), "Resolved room clients");
        Ok(clients)
    }

    fn get_rooms(&self, connection: ConnectionId) -> Result<Vec<String>, RoomError> {
        Ok(self
            .memberships
            .get(&connection)
            .map(|joined| joined.clone())
            .unwrap_or_default())
    }
}
