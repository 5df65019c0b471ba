//! Fan-out: decides who hears about each chat event and emits it exactly there.
//!
//! Routing is a pure function from [`ChatEvent`] to an [`Audience`] plus the
//! wire event. Delivery goes through the [`Fanout`] trait, implemented here by
//! the local [`ConnectionRegistry`]; a broker-backed deployment would supply its
//! own implementation without changing the routing table.

use crate::events::{AttachmentRemoval, RosterEntry, ServerEvent};
use crate::models::{GroupMessage, MessageId, Participants, PrivateMessage, UserId};
use crate::ws::registry::ConnectionRegistry;
use crate::ws::rooms::Room;
use crate::ws::types::ConnectionId;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Something that happened which connected clients may need to see.
///
/// Every variant has already been persisted (or, for the roster, applied) by
/// the time it is dispatched. Emission is never optimistic.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Roster(Vec<RosterEntry>),
    GroupMessageCreated(GroupMessage),
    GroupMessageEdited(GroupMessage),
    GroupMessageDeleted(MessageId),
    GroupChatCleared,
    GroupAttachmentRemoved(AttachmentRemoval),
    PrivateMessageCreated(PrivateMessage),
    PrivateMessageEdited(PrivateMessage),
    PrivateMessageDeleted {
        id: MessageId,
        participants: Participants,
    },
    PrivateAttachmentRemoved {
        removal: AttachmentRemoval,
        participants: Participants,
    },
}

/// The recipient set of one emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every live connection.
    Everyone,
    /// A single connection.
    Connection(ConnectionId),
    /// One representative connection per distinct user id.
    OncePerUser(Vec<UserId>),
    /// Every member of any of these rooms, each connection at most once.
    Rooms(Vec<Room>),
}

impl Audience {
    fn participant_rooms(participants: Participants) -> Self {
        Audience::Rooms(
            participants
                .user_ids()
                .into_iter()
                .map(Room::Personal)
                .collect(),
        )
    }
}

/// Maps a chat event to its audience and wire form.
pub fn route(event: ChatEvent) -> (Audience, ServerEvent) {
    match event {
        ChatEvent::Roster(roster) => (Audience::Everyone, ServerEvent::PresenceRoster(roster)),
        ChatEvent::GroupMessageCreated(msg) => (Audience::Everyone, ServerEvent::NewMessage(msg)),
        ChatEvent::GroupMessageEdited(msg) => {
            (Audience::Everyone, ServerEvent::MessageEdited(msg))
        }
        ChatEvent::GroupMessageDeleted(id) => {
            (Audience::Everyone, ServerEvent::MessageDeleted(id))
        }
        ChatEvent::GroupChatCleared => (Audience::Everyone, ServerEvent::GroupChatCleared),
        ChatEvent::GroupAttachmentRemoved(removal) => {
            (Audience::Everyone, ServerEvent::AttachmentRemoved(removal))
        }
        ChatEvent::PrivateMessageCreated(msg) => (
            Audience::OncePerUser(msg.participants().user_ids()),
            ServerEvent::NewPrivateMessage(msg),
        ),
        ChatEvent::PrivateMessageEdited(msg) => (
            Audience::participant_rooms(msg.participants()),
            ServerEvent::PrivateMessageEdited(msg),
        ),
        ChatEvent::PrivateMessageDeleted { id, participants } => (
            Audience::participant_rooms(participants),
            ServerEvent::PrivateMessageDeleted(id),
        ),
        ChatEvent::PrivateAttachmentRemoved {
            removal,
            participants,
        } => (
            Audience::participant_rooms(participants),
            ServerEvent::PrivateAttachmentRemoved(removal),
        ),
    }
}

/// Delivers a wire event to an audience. Returns the number of emissions.
///
/// Delivery is fire-and-forget: a recipient that is gone simply misses it.
pub trait Fanout: Send + Sync + 'static {
    fn deliver(&self, audience: &Audience, event: Arc<ServerEvent>) -> usize;
}

impl Fanout for ConnectionRegistry {
    fn deliver(&self, audience: &Audience, event: Arc<ServerEvent>) -> usize {
        match audience {
            Audience::Everyone => self
                .connection_ids()
                .into_iter()
                .filter(|conn_id| self.send(*conn_id, Arc::clone(&event)))
                .count(),
            Audience::Connection(conn_id) => usize::from(self.send(*conn_id, event)),
            Audience::OncePerUser(user_ids) => {
                let mut notified: HashSet<UserId> = HashSet::new();
                for &user_id in user_ids {
                    if notified.contains(&user_id) {
                        continue;
                    }
                    // First connection that accepts the event represents the user.
                    let reached = self
                        .connections_for_user(user_id)
                        .into_iter()
                        .find(|conn_id| self.send(*conn_id, Arc::clone(&event)));
                    match reached {
                        Some(conn_id) => {
                            trace!(user_id, %conn_id, "Delivered once for user");
                            notified.insert(user_id);
                        }
                        None => trace!(user_id, "User has no live connection"),
                    }
                }
                notified.len()
            }
            Audience::Rooms(rooms) => {
                let mut reached: HashSet<ConnectionId> = HashSet::new();
                for room in rooms {
                    for conn_id in self.room_members(room) {
                        if reached.contains(&conn_id) {
                            continue;
                        }
                        if self.send(conn_id, Arc::clone(&event)) {
                            reached.insert(conn_id);
                        }
                    }
                }
                reached.len()
            }
        }
    }
}

/// Routes chat events and hands them to a [`Fanout`] backend.
#[derive(Clone)]
pub struct Dispatcher {
    fanout: Arc<dyn Fanout>,
}

impl Dispatcher {
    pub fn new(fanout: Arc<dyn Fanout>) -> Self {
        Self { fanout }
    }

    /// Emits `event` to exactly the audience the routing table assigns it.
    pub fn dispatch(&self, event: ChatEvent) -> usize {
        let (audience, wire) = route(event);
        let name = wire.name();
        let emitted = self.fanout.deliver(&audience, Arc::new(wire));
        debug!(event = name, ?audience, emitted, "Dispatched event");
        emitted
    }

    /// Sends a wire event to one connection only.
    pub fn send_to(&self, conn_id: ConnectionId, event: ServerEvent) -> bool {
        self.fanout
            .deliver(&Audience::Connection(conn_id), Arc::new(event))
            == 1
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::types::{Binding, OutboxReceiver, outbox};
    use time::OffsetDateTime;
    use uuid::Uuid;

    struct Client {
        id: ConnectionId,
        rx: OutboxReceiver,
    }

    impl Client {
        fn drain(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.rx.try_recv() {
                events.push((*event).clone());
            }
            events
        }
    }

    fn connect(registry: &ConnectionRegistry, user: Option<UserId>) -> Client {
        let id = Uuid::new_v4();
        let (tx, rx) = outbox();
        registry.register(id, tx);
        if let Some(user_id) = user {
            registry.bind(
                id,
                Binding {
                    user_id,
                    display_name: format!("user-{user_id}"),
                    manual: false,
                },
            );
            registry.join_room(id, Room::Personal(user_id));
        }
        Client { id, rx }
    }

    fn private(id: MessageId, sender_id: UserId, recipient_id: UserId) -> PrivateMessage {
        PrivateMessage {
            id,
            sender_id,
            recipient_id,
            sender_name: format!("user-{sender_id}"),
            text: Some("psst".into()),
            attachments: vec![],
            created_at: OffsetDateTime::UNIX_EPOCH,
            edited: false,
            previous_text: None,
            edited_at: None,
            read: false,
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, Dispatcher) {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        (registry, dispatcher)
    }

    #[test]
    fn new_private_message_reaches_each_participant_once() {
        let (registry, dispatcher) = setup();
        let mut a1 = connect(&registry, Some(1));
        let mut a2 = connect(&registry, Some(1));
        let mut b = connect(&registry, Some(2));
        let mut bystander = connect(&registry, Some(3));

        let emitted = dispatcher.dispatch(ChatEvent::PrivateMessageCreated(private(10, 1, 2)));

        assert_eq!(emitted, 2);
        let a_total = a1.drain().len() + a2.drain().len();
        assert_eq!(a_total, 1, "user 1 must be notified through exactly one tab");
        assert_eq!(
            b.drain(),
            vec![ServerEvent::NewPrivateMessage(private(10, 1, 2))]
        );
        assert!(bystander.drain().is_empty());
    }

    #[test]
    fn dedup_falls_back_when_representative_outbox_is_closed() {
        let (registry, dispatcher) = setup();
        let mut older = connect(&registry, Some(1));
        let closing = connect(&registry, Some(1));
        drop(closing.rx);
        let _b = connect(&registry, Some(2));

        let emitted = dispatcher.dispatch(ChatEvent::PrivateMessageCreated(private(11, 2, 1)));

        assert_eq!(emitted, 2);
        assert_eq!(older.drain().len(), 1);
    }

    #[test]
    fn unbound_connections_never_receive_private_events() {
        let (registry, dispatcher) = setup();
        let mut anon = connect(&registry, None);
        let _a = connect(&registry, Some(1));

        let emitted = dispatcher.dispatch(ChatEvent::PrivateMessageCreated(private(12, 1, 2)));

        assert_eq!(emitted, 1);
        assert!(anon.drain().is_empty());
    }

    #[test]
    fn private_edits_reach_every_tab_of_both_participants() {
        let (registry, dispatcher) = setup();
        let mut a1 = connect(&registry, Some(1));
        let mut a2 = connect(&registry, Some(1));
        let mut b = connect(&registry, Some(2));
        let mut c = connect(&registry, Some(3));

        let emitted = dispatcher.dispatch(ChatEvent::PrivateMessageEdited(private(13, 1, 2)));

        assert_eq!(emitted, 3);
        assert_eq!(a1.drain().len(), 1);
        assert_eq!(a2.drain().len(), 1);
        assert_eq!(b.drain().len(), 1);
        assert!(c.drain().is_empty());
    }

    #[test]
    fn private_attachment_removal_is_scoped_to_participants() {
        let (registry, dispatcher) = setup();
        let mut a = connect(&registry, Some(1));
        let mut b = connect(&registry, Some(2));
        let mut c = connect(&registry, None);
        let removal = AttachmentRemoval {
            message_id: 4,
            attachment_index: 0,
        };

        dispatcher.dispatch(ChatEvent::PrivateAttachmentRemoved {
            removal,
            participants: Participants::new(1, 2),
        });

        assert_eq!(a.drain(), vec![ServerEvent::PrivateAttachmentRemoved(removal)]);
        assert_eq!(b.drain(), vec![ServerEvent::PrivateAttachmentRemoved(removal)]);
        assert!(c.drain().is_empty());
    }

    #[test]
    fn group_events_reach_every_connection() {
        let (registry, dispatcher) = setup();
        let mut clients: Vec<Client> = vec![
            connect(&registry, None),
            connect(&registry, Some(1)),
            connect(&registry, Some(1)),
        ];

        assert_eq!(dispatcher.dispatch(ChatEvent::GroupChatCleared), 3);
        for client in &mut clients {
            assert_eq!(client.drain(), vec![ServerEvent::GroupChatCleared]);
        }
    }

    #[test]
    fn private_delete_is_scoped_to_participant_rooms() {
        let (audience, wire) = route(ChatEvent::PrivateMessageDeleted {
            id: 9,
            participants: Participants::new(1, 2),
        });
        assert_eq!(wire, ServerEvent::PrivateMessageDeleted(9));
        assert_eq!(
            audience,
            Audience::Rooms(vec![Room::Personal(1), Room::Personal(2)])
        );
    }

    #[test]
    fn send_to_targets_a_single_connection() {
        let (registry, dispatcher) = setup();
        let mut a = connect(&registry, None);
        let mut b = connect(&registry, None);

        assert!(dispatcher.send_to(a.id, ServerEvent::error("nope")));
        assert_eq!(a.drain(), vec![ServerEvent::error("nope")]);
        assert!(b.drain().is_empty());
        assert!(!dispatcher.send_to(Uuid::new_v4(), ServerEvent::GroupChatCleared));
    }
}
