//! The `ChatHub`: connection lifecycle, presence broadcasting and the publish
//! API used by the HTTP layer after it has persisted a change.

use crate::attachments::{AttachmentNotifier, AttachmentTarget};
use crate::error::ChatError;
use crate::events::{ClientEvent, RosterEntry, ServerEvent};
use crate::models::{Actor, Attachment, GroupMessage, MessageId, Participants, PrivateMessage};
use crate::presence::{InMemoryPresence, PresenceEntry, PresenceStore};
use crate::store::MessageStore;
use crate::ws::{
    dispatch::{ChatEvent, Dispatcher},
    handler::{ConnectionContext, Inbound, plan_inbound},
    registry::ConnectionRegistry,
    rooms::Room,
    types::{ConnectionId, Outbox, OutboxReceiver, outbox},
};
use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use futures_util::{
    SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Point-in-time counters for monitoring.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HubStats {
    /// Live connections, bound or not.
    pub connections: usize,
    /// Connections that have declared an identity.
    pub bound_connections: usize,
    /// Users in the presence roster.
    pub online_users: usize,
}

/// Owns the connection registry and presence set for one process and routes
/// everything that must reach connected clients.
pub struct ChatHub {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<dyn PresenceStore>,
    /// Held from a presence change until its roster is queued everywhere, and
    /// while a new connection takes its first snapshot, so outboxes receive
    /// rosters in mutation order.
    presence_order: Mutex<()>,
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    attachments: AttachmentNotifier,
}

impl ChatHub {
    /// Creates a hub over the given persistence and presence backends.
    pub fn new(store: Arc<dyn MessageStore>, presence: Arc<dyn PresenceStore>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let attachments = AttachmentNotifier::new(store.clone(), dispatcher.clone());
        Arc::new(Self {
            registry,
            presence,
            presence_order: Mutex::new(()),
            store,
            dispatcher,
            attachments,
        })
    }

    /// A hub with single-process presence.
    pub fn in_memory(store: Arc<dyn MessageStore>) -> Arc<Self> {
        Self::new(store, Arc::new(InMemoryPresence::new()))
    }

    // --- Connection lifecycle ---

    /// Registers a new connection and immediately sends it the current roster.
    #[instrument(skip_all, fields(conn_id))]
    pub async fn connect(&self, outbox: Outbox, authenticated: Option<Actor>) -> ConnectionContext {
        let conn_id = ConnectionId::new_v4();
        tracing::Span::current().record("conn_id", tracing::field::display(conn_id));

        {
            let _order = self.presence_order.lock().await;
            self.registry.register(conn_id, outbox);
            let roster = self.roster().await;
            self.dispatcher
                .send_to(conn_id, ServerEvent::PresenceRoster(roster));
        }

        info!(
            authenticated = authenticated.as_ref().map(|a| a.id),
            "Client connected."
        );
        ConnectionContext::new(conn_id, authenticated)
    }

    /// Applies one inbound client event. Events from one connection must be
    /// applied in arrival order.
    #[instrument(skip(self, ctx), fields(conn_id = %ctx.conn_id))]
    pub async fn handle_event(
        &self,
        ctx: &ConnectionContext,
        event: ClientEvent,
    ) -> Result<(), ChatError> {
        let bound = self.registry.binding(ctx.conn_id);
        match plan_inbound(ctx, bound.as_ref(), event)? {
            Inbound::JoinPersonalRoom(user_id) => {
                self.registry
                    .join_room(ctx.conn_id, Room::Personal(user_id));
                debug!(user_id, "Joined personal room");
            }
            Inbound::GoOnline(binding) => {
                let user_id = binding.user_id;
                let _order = self.presence_order.lock().await;
                if !self.registry.bind(ctx.conn_id, binding.clone()) {
                    return Ok(());
                }
                self.registry
                    .join_room(ctx.conn_id, Room::Personal(user_id));
                // Switching identity releases the entry owned for the previous user.
                if let Some(previous) = bound.filter(|b| b.user_id != user_id) {
                    if self.presence.release(previous.user_id, ctx.conn_id).await {
                        info!(
                            previous_user_id = previous.user_id,
                            user_id, "Rebound connection released its previous user"
                        );
                    }
                }
                self.presence
                    .set_online(PresenceEntry {
                        user_id,
                        display_name: binding.display_name,
                        manual: binding.manual,
                        owner: ctx.conn_id,
                    })
                    .await;
                info!(user_id, manual = binding.manual, "User signalled online");
                self.broadcast_roster().await;
            }
            Inbound::GoOffline(user_id) => {
                let _order = self.presence_order.lock().await;
                let removed = self.presence.set_offline(user_id).await;
                info!(user_id, removed, "User signalled offline");
                self.broadcast_roster().await;
            }
            Inbound::Relay(event) => {
                self.dispatcher.dispatch(event);
            }
            Inbound::DeletePrivate {
                id,
                sender_id,
                recipient_id,
            } => {
                let participants = match self.store.private_message(id).await? {
                    Some(msg) if msg.sender_id != sender_id => {
                        return Err(ChatError::Forbidden(
                            "only the sender may delete a private message",
                        ));
                    }
                    Some(msg) => msg.participants(),
                    // Already deleted over HTTP; the echo names the other side.
                    None => match recipient_id {
                        Some(recipient_id) => Participants::new(sender_id, recipient_id),
                        None => {
                            debug!(message_id = id, "Private delete echo without participants dropped");
                            return Ok(());
                        }
                    },
                };
                self.dispatcher
                    .dispatch(ChatEvent::PrivateMessageDeleted { id, participants });
            }
            Inbound::Drop(reason) => {
                debug!(reason, "Dropped client event");
            }
        }
        Ok(())
    }

    /// Removes the connection. The bound user leaves the roster only if this
    /// connection was the one that last signalled them online.
    #[instrument(skip_all, fields(conn_id = %ctx.conn_id))]
    pub async fn disconnect(&self, ctx: &ConnectionContext) {
        let Some(binding) = self.registry.unregister(ctx.conn_id) else {
            info!("Unbound client disconnected.");
            return;
        };

        let user_id = binding.user_id;
        let _order = self.presence_order.lock().await;
        if self.presence.release(user_id, ctx.conn_id).await {
            info!(user_id, "Presence owner disconnected, user now offline.");
            self.broadcast_roster().await;
        } else {
            info!(user_id, "Client disconnected, presence owned elsewhere.");
        }
    }

    // --- Presence broadcasting ---

    pub async fn roster(&self) -> Vec<RosterEntry> {
        self.presence
            .snapshot()
            .await
            .iter()
            .map(RosterEntry::from)
            .collect()
    }

    /// Pushes the full roster to every connection. Callers hold `presence_order`.
    async fn broadcast_roster(&self) {
        let roster = self.roster().await;
        let online = roster.len();
        let emitted = self.dispatcher.dispatch(ChatEvent::Roster(roster));
        debug!(online, emitted, "Roster broadcast");
    }

    // --- Publish API, called after a successful write ---

    pub fn group_message_created(&self, msg: GroupMessage) -> usize {
        self.dispatcher.dispatch(ChatEvent::GroupMessageCreated(msg))
    }

    pub fn group_message_edited(&self, msg: GroupMessage) -> usize {
        self.dispatcher.dispatch(ChatEvent::GroupMessageEdited(msg))
    }

    pub fn group_message_deleted(&self, id: MessageId) -> usize {
        self.dispatcher.dispatch(ChatEvent::GroupMessageDeleted(id))
    }

    pub fn private_message_created(&self, msg: PrivateMessage) -> usize {
        self.dispatcher
            .dispatch(ChatEvent::PrivateMessageCreated(msg))
    }

    pub fn private_message_edited(&self, msg: PrivateMessage) -> usize {
        self.dispatcher.dispatch(ChatEvent::PrivateMessageEdited(msg))
    }

    pub fn private_message_deleted(&self, id: MessageId, participants: Participants) -> usize {
        self.dispatcher.dispatch(ChatEvent::PrivateMessageDeleted {
            id,
            participants,
        })
    }

    /// Wipes the group history. Privileged roles only; nothing is emitted on refusal.
    #[instrument(skip_all, fields(actor_id = actor.id))]
    pub async fn clear_group_chat(&self, actor: &Actor) -> Result<u64, ChatError> {
        if !actor.role.is_privileged() {
            warn!("Group clear refused for non-privileged actor");
            return Err(ChatError::Forbidden("only moderators may clear the chat"));
        }
        let removed = self.store.clear_group_messages().await.map_err(|e| {
            error!("Failed to clear group messages: {}", e);
            e
        })?;
        info!(removed, "Group chat cleared");
        self.dispatcher.dispatch(ChatEvent::GroupChatCleared);
        Ok(removed)
    }

    pub async fn remove_attachment(
        &self,
        actor: &Actor,
        target: AttachmentTarget,
        index: usize,
    ) -> Result<Vec<Attachment>, ChatError> {
        self.attachments.remove(actor, target, index).await
    }

    pub async fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            bound_connections: self.registry.bound_count(),
            online_users: self.presence.len().await,
        }
    }

    // --- Socket plumbing ---

    /// Entry point for an upgraded socket. Returns when the client disconnects.
    #[instrument(skip_all)]
    pub async fn handle_connection(self: Arc<Self>, socket: WebSocket, authenticated: Option<Actor>) {
        let (sink, stream) = socket.split();
        let (tx, rx) = outbox();
        let ctx = self.connect(tx, authenticated).await;

        tokio::spawn(run_client_writer(ctx.conn_id, sink, rx));
        self.run_client_message_receiver(stream, &ctx).await;
        self.disconnect(&ctx).await;
    }

    async fn run_client_message_receiver(
        &self,
        mut stream: SplitStream<WebSocket>,
        ctx: &ConnectionContext,
    ) {
        debug!(conn_id = %ctx.conn_id, "Starting message receiver loop for client.");
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(ctx, event).await {
                            warn!(conn_id = %ctx.conn_id, "Client event refused: {}", e);
                            self.dispatcher
                                .send_to(ctx.conn_id, ServerEvent::error(e.to_string()));
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = %ctx.conn_id, "Failed to parse message from client: {}", e);
                        self.dispatcher
                            .send_to(ctx.conn_id, ServerEvent::error("Invalid message format"));
                    }
                },
                Message::Close(_) => {
                    debug!(conn_id = %ctx.conn_id, "Received close frame from client.");
                    break;
                }
                _ => {}
            }
        }
    }
}

/// Drains a connection's outbox into its socket until either side closes.
async fn run_client_writer(
    conn_id: Uuid,
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: OutboxReceiver,
) {
    while let Some(event) = rx.recv().await {
        let json = match serde_json::to_string(event.as_ref()) {
            Ok(json) => json,
            Err(e) => {
                error!(%conn_id, "Failed to serialize event for client: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(Utf8Bytes::from(json))).await {
            warn!(%conn_id, "Failed to send to client sink: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

impl fmt::Debug for ChatHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatHub")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
