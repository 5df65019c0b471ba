//! Connection-level types shared by the registry, dispatcher and hub.

use crate::events::ServerEvent;
use crate::models::UserId;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A unique identifier for a single WebSocket connection.
pub type ConnectionId = Uuid;

/// The sending half of a connection's outbound queue.
///
/// A writer task owns the socket sink and drains the matching receiver, so any
/// part of the system can push to a client without touching the socket.
pub type Outbox = mpsc::UnboundedSender<Arc<ServerEvent>>;

/// The receiving half, drained by the connection's writer task.
pub type OutboxReceiver = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

/// Creates a fresh outbound queue for one connection.
pub fn outbox() -> (Outbox, OutboxReceiver) {
    mpsc::unbounded_channel()
}

/// The identity a connection declared through its presence signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub user_id: UserId,
    pub display_name: String,
    pub manual: bool,
}
