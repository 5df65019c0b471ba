//! Tracks every live connection and the identity bound to it.

use crate::events::ServerEvent;
use crate::models::UserId;
use crate::ws::rooms::{Room, RoomIndex};
use crate::ws::types::{Binding, ConnectionId, Outbox};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

struct ConnectionEntry {
    outbox: Outbox,
    binding: Option<Binding>,
    rooms: HashSet<Room>,
}

/// A read-only view of one registered connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub binding: Option<Binding>,
    pub rooms: Vec<Room>,
}

/// The registry owns every connection's outbox, binding and room memberships.
///
/// Operations on an unknown connection id are no-ops: disconnect races are
/// expected. A connection's own events are handled sequentially by its reader
/// task, so `bind`/`join_room` never race `unregister` for the same id.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    /// Bound connections per user, oldest binding first.
    by_user: DashMap<UserId, Vec<ConnectionId>>,
    rooms: RoomIndex,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection with no bound user.
    pub fn register(&self, conn_id: ConnectionId, outbox: Outbox) -> Connection {
        self.connections.insert(
            conn_id,
            ConnectionEntry {
                outbox,
                binding: None,
                rooms: HashSet::new(),
            },
        );
        Connection {
            id: conn_id,
            binding: None,
            rooms: Vec::new(),
        }
    }

    /// Attaches an identity to a connection, replacing any earlier one.
    ///
    /// Returns `false` if the connection is already gone.
    pub fn bind(&self, conn_id: ConnectionId, binding: Binding) -> bool {
        let user_id = binding.user_id;
        let previous = match self.connections.get_mut(&conn_id) {
            Some(mut entry) => entry.binding.replace(binding),
            None => {
                debug!(%conn_id, "Bind on unknown connection ignored");
                return false;
            }
        };

        if let Some(previous) = previous {
            self.forget_user_connection(previous.user_id, conn_id);
        }
        // Most recent binding goes last.
        self.by_user.entry(user_id).or_default().push(conn_id);
        true
    }

    /// Adds the connection to a delivery group. Returns `false` if it is gone.
    pub fn join_room(&self, conn_id: ConnectionId, room: Room) -> bool {
        match self.connections.get_mut(&conn_id) {
            Some(mut entry) => {
                entry.rooms.insert(room.clone());
            }
            None => return false,
        }
        self.rooms.join(room, conn_id);
        true
    }

    /// Removes the connection and all of its room memberships.
    ///
    /// Returns the identity that was last bound to it, if any.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<Binding> {
        let (_, entry) = self.connections.remove(&conn_id)?;
        self.rooms.remove_connection(conn_id, entry.rooms.iter());
        if let Some(binding) = &entry.binding {
            self.forget_user_connection(binding.user_id, conn_id);
        }
        entry.binding
    }

    /// Live connections currently bound to `user_id`, most recently bound first.
    pub fn connections_for_user(&self, user_id: UserId) -> Vec<ConnectionId> {
        let candidates: Vec<ConnectionId> = self
            .by_user
            .get(&user_id)
            .map(|ids| ids.iter().rev().copied().collect())
            .unwrap_or_default();

        candidates
            .into_iter()
            .filter(|conn_id| {
                self.connections
                    .get(conn_id)
                    .is_some_and(|e| e.binding.as_ref().is_some_and(|b| b.user_id == user_id))
            })
            .collect()
    }

    /// Live members of a room.
    pub fn room_members(&self, room: &Room) -> Vec<ConnectionId> {
        self.rooms
            .members(room)
            .into_iter()
            .filter(|conn_id| self.connections.contains_key(conn_id))
            .collect()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|e| *e.key()).collect()
    }

    pub fn binding(&self, conn_id: ConnectionId) -> Option<Binding> {
        self.connections
            .get(&conn_id)
            .and_then(|entry| entry.binding.clone())
    }

    /// Queues `event` on the connection's outbox. Returns whether it was accepted.
    pub fn send(&self, conn_id: ConnectionId, event: Arc<ServerEvent>) -> bool {
        let Some(outbox) = self.connections.get(&conn_id).map(|e| e.outbox.clone()) else {
            return false;
        };
        if outbox.send(event).is_err() {
            warn!(%conn_id, "Outbox closed, client likely disconnected");
            return false;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn bound_count(&self) -> usize {
        self.connections
            .iter()
            .filter(|e| e.value().binding.is_some())
            .count()
    }

    fn forget_user_connection(&self, user_id: UserId, conn_id: ConnectionId) {
        let now_empty = match self.by_user.get_mut(&user_id) {
            Some(mut ids) => {
                ids.retain(|id| *id != conn_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.by_user.remove_if(&user_id, |_, ids| ids.is_empty());
        }
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections_count", &self.connections.len())
            .field("users_count", &self.by_user.len())
            .field("rooms", &self.rooms)
            .finish()
    }
}
