//! Room membership for Herald.
//!
//! Rooms are named groups of connections. They are used for fan-out and,
//! through the `uid_` naming scheme, as an index from authenticated users to
//! their live connections.

mod memory;

pub use memory::MemoryRoomStore;

use crate::target::ConnectionId;
use thiserror::Error;

/// Maximum room name length.
pub const MAX_ROOM_NAME_LENGTH: usize = 256;

/// Room store errors.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Invalid room name.
    #[error("Invalid room name: {0}")]
    InvalidRoom(&'static str),

    /// The connection is already in as many rooms as allowed.
    #[error("Maximum rooms per connection reached")]
    MaxRoomsReached,

    /// Backend could not be reached.
    #[error("Room store unavailable: {0}")]
    Unavailable(String),
}

/// Validate a room name.
///
/// # Errors
///
/// Returns an error message if the room name is invalid.
pub fn validate_room_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Room name cannot be empty");
    }
    if name.len() > MAX_ROOM_NAME_LENGTH {
        return Err("Room name too long");
    }
    if name.chars().any(char::is_control) {
        return Err("Room name contains control characters");
    }
    Ok(())
}

/// Mapping between connections and the rooms they belong to.
///
/// Implementations are shared by every worker and must tolerate concurrent
/// calls. `get_rooms` returns rooms in the order they were joined.
#[cfg_attr(test, mockall::automock)]
pub trait RoomStore: Send + Sync {
    /// Add a connection to each room. Already joined rooms are left alone.
    fn add(&self, connection: ConnectionId, rooms: &[String]) -> Result<(), RoomError>;

    /// Remove a connection from each room. Unknown rooms are ignored.
    fn delete(&self, connection: ConnectionId, rooms: &[String]) -> Result<(), RoomError>;

    /// All connections currently in a room.
    fn get_clients(&self, room: &str) -> Result<Vec<ConnectionId>, RoomError>;

    /// All rooms a connection currently belongs to.
    fn get_rooms(&self, connection: ConnectionId) -> Result<Vec<String>, RoomError>;
}

/// Room store configuration.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    /// Maximum rooms a single connection may join.
    pub max_rooms_per_connection: usize,
    /// Whether to drop rooms once their last member leaves.
    pub auto_delete_empty_rooms: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_rooms_per_connection: 100,
            auto_delete_empty_rooms: true,
        }
    }
}

/// Room store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStats {
    /// Number of non-empty rooms.
    pub room_count: usize,
    /// Number of connections in at least one room.
    pub connection_count: usize,
    /// Total number of memberships.
    pub total_memberships: usize,
}
