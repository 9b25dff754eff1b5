//! Identity resolution.
//!
//! Authenticated users are indexed through rooms: logging a connection in
//! joins it to `uid_<identifier>`, so looking a user up is a room query.

use std::fmt;

/// Prefix of the per-user identity rooms.
pub const USER_ROOM_PREFIX: &str = "uid_";

/// A value that can produce a stable user identifier.
pub trait Authenticatable {
    /// Identifier type.
    type Id: fmt::Display;

    /// The identifier used to index this user's connections.
    fn auth_identifier(&self) -> Self::Id;
}

impl<T: Authenticatable + ?Sized> Authenticatable for &T {
    type Id = T::Id;

    fn auth_identifier(&self) -> Self::Id {
        (**self).auth_identifier()
    }
}

/// Room name for a user identifier.
#[must_use]
pub fn user_room(id: impl fmt::Display) -> String {
    format!("{USER_ROOM_PREFIX}{id}")
}

/// Extract the user identifier from an identity room name.
#[must_use]
pub fn parse_user_room(room: &str) -> Option<&str> {
    room.strip_prefix(USER_ROOM_PREFIX)
        .filter(|id| !id.is_empty())
}
