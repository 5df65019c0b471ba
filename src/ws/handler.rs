//! Rules for inbound client events.
//!
//! [`plan_inbound`] turns a parsed [`ClientEvent`] into the action the hub
//! should take, without touching any shared state, so the identity rules can
//! be checked in isolation.

use crate::error::ChatError;
use crate::events::ClientEvent;
use crate::models::{Actor, MessageId, UserId};
use crate::ws::dispatch::ChatEvent;
use crate::ws::types::{Binding, ConnectionId};

/// Per-connection state handed to every inbound event.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// The unique ID of the connection.
    pub conn_id: ConnectionId,
    /// Identity proven by a token at handshake. `None` for anonymous sockets,
    /// whose declared identity is trusted as sent.
    pub authenticated: Option<Actor>,
}

impl ConnectionContext {
    pub fn new(conn_id: ConnectionId, authenticated: Option<Actor>) -> Self {
        Self {
            conn_id,
            authenticated,
        }
    }

    /// An authenticated socket may only speak for its own user id.
    pub fn check_identity(&self, user_id: UserId) -> Result<(), ChatError> {
        match &self.authenticated {
            Some(actor) if actor.id != user_id => Err(ChatError::IdentityMismatch),
            _ => Ok(()),
        }
    }
}

/// What the hub must do in response to one client event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    JoinPersonalRoom(UserId),
    GoOnline(Binding),
    GoOffline(UserId),
    Relay(ChatEvent),
    /// A private delete echo. The hub checks `sender_id` against the stored
    /// message before anything is emitted.
    DeletePrivate {
        id: MessageId,
        sender_id: UserId,
        recipient_id: Option<UserId>,
    },
    /// Ignore the event without answering the client.
    Drop(&'static str),
}

/// Decides how to handle `event` arriving on a connection currently bound to `bound`.
pub fn plan_inbound(
    ctx: &ConnectionContext,
    bound: Option<&Binding>,
    event: ClientEvent,
) -> Result<Inbound, ChatError> {
    match event {
        ClientEvent::Join { user_id } => {
            ctx.check_identity(user_id)?;
            Ok(Inbound::JoinPersonalRoom(user_id))
        }
        ClientEvent::PresenceSignal {
            user_id,
            display_name,
            online,
            manual,
        } => {
            ctx.check_identity(user_id)?;
            if online {
                Ok(Inbound::GoOnline(Binding {
                    user_id,
                    display_name,
                    manual,
                }))
            } else {
                Ok(Inbound::GoOffline(user_id))
            }
        }
        ClientEvent::NewPrivateMessage(msg) => {
            let Some(bound) = bound else {
                return Ok(Inbound::Drop("private message relay from unbound connection"));
            };
            if msg.sender_id != bound.user_id {
                return Err(ChatError::Forbidden("only the sender may relay a private message"));
            }
            Ok(Inbound::Relay(ChatEvent::PrivateMessageCreated(msg)))
        }
        ClientEvent::PrivateMessageEdited(msg) => {
            let Some(bound) = bound else {
                return Ok(Inbound::Drop("private edit relay from unbound connection"));
            };
            if msg.sender_id != bound.user_id {
                return Err(ChatError::Forbidden("only the sender may edit a private message"));
            }
            Ok(Inbound::Relay(ChatEvent::PrivateMessageEdited(msg)))
        }
        ClientEvent::PrivateMessageDeleted { id, recipient_id } => {
            let Some(bound) = bound else {
                return Ok(Inbound::Drop("private delete relay from unbound connection"));
            };
            Ok(Inbound::DeletePrivate {
                id,
                sender_id: bound.user_id,
                recipient_id,
            })
        }
    }
}
