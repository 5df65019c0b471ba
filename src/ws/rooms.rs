//! Named delivery groups a connection can belong to.

use crate::models::UserId;
use crate::ws::types::ConnectionId;
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;

/// A delivery group label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every connection bound to one user, so "send to user X" is "emit to room X".
    Personal(UserId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Personal(user_id) => write!(f, "user:{user_id}"),
        }
    }
}

/// Maps each room to the connections currently in it.
///
/// Membership is additive; a connection leaves its rooms only when it
/// disconnects, via [`RoomIndex::remove_connection`].
#[derive(Default)]
pub struct RoomIndex {
    members: DashMap<Room, HashSet<ConnectionId>>,
}

impl RoomIndex {
    /// Returns `true` if the connection was not already in the room.
    pub fn join(&self, room: Room, conn_id: ConnectionId) -> bool {
        self.members.entry(room).or_default().insert(conn_id)
    }

    pub fn members(&self, room: &Room) -> Vec<ConnectionId> {
        self.members
            .get(room)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops `conn_id` from each of `rooms`, discarding rooms left empty.
    pub fn remove_connection<'a>(
        &self,
        conn_id: ConnectionId,
        rooms: impl IntoIterator<Item = &'a Room>,
    ) {
        for room in rooms {
            let now_empty = match self.members.get_mut(room) {
                Some(mut set) => {
                    set.remove(&conn_id);
                    set.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.members.remove_if(room, |_, set| set.is_empty());
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}

impl fmt::Debug for RoomIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomIndex")
            .field("rooms_count", &self.members.len())
            .finish()
    }
}
