//! Attachment removal and the scoped notification that follows it.
//!
//! Attachments are addressed by index. Removing index `k` shifts everything
//! after it, so the store removes by index in one atomic step and clients
//! apply the same index to their local copy, in the same order.

use crate::error::ChatError;
use crate::events::AttachmentRemoval;
use crate::models::{Actor, Attachment, MessageId};
use crate::store::{MessageStore, Removal};
use crate::ws::dispatch::{ChatEvent, Dispatcher};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

/// Which message an attachment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentTarget {
    Group(MessageId),
    Private(MessageId),
}

#[derive(Clone)]
pub struct AttachmentNotifier {
    store: Arc<dyn MessageStore>,
    dispatcher: Dispatcher,
    /// Held from the store write until the notification is queued, so
    /// clients receive removals in the order the store applied them.
    order: Arc<Mutex<()>>,
}

impl AttachmentNotifier {
    pub fn new(store: Arc<dyn MessageStore>, dispatcher: Dispatcher) -> Self {
        Self {
            store,
            dispatcher,
            order: Arc::new(Mutex::new(())),
        }
    }

    /// Removes one attachment and notifies the affected connections.
    ///
    /// Group messages may be edited by their author, private ones by either
    /// participant; privileged roles may edit any. Returns the remaining list.
    #[instrument(skip(self, actor), fields(actor_id = actor.id))]
    pub async fn remove(
        &self,
        actor: &Actor,
        target: AttachmentTarget,
        index: usize,
    ) -> Result<Vec<Attachment>, ChatError> {
        match target {
            AttachmentTarget::Group(id) => {
                let msg = self
                    .store
                    .group_message(id)
                    .await?
                    .ok_or(ChatError::MessageNotFound(id))?;
                if msg.user_id != actor.id && !actor.role.is_privileged() {
                    return Err(ChatError::Forbidden("only the author may remove attachments"));
                }

                let _order = self.order.lock().await;
                let attachments =
                    accept(id, index, self.store.remove_group_attachment(id, index).await?)?;

                info!(message_id = id, index, "Group attachment removed");
                self.dispatcher
                    .dispatch(ChatEvent::GroupAttachmentRemoved(AttachmentRemoval {
                        message_id: id,
                        attachment_index: index,
                    }));
                Ok(attachments)
            }
            AttachmentTarget::Private(id) => {
                let msg = self
                    .store
                    .private_message(id)
                    .await?
                    .ok_or(ChatError::MessageNotFound(id))?;
                let participants = msg.participants();
                if !participants.includes(actor.id) && !actor.role.is_privileged() {
                    return Err(ChatError::Forbidden(
                        "only participants may remove attachments",
                    ));
                }

                let _order = self.order.lock().await;
                let attachments =
                    accept(id, index, self.store.remove_private_attachment(id, index).await?)?;

                info!(message_id = id, index, "Private attachment removed");
                self.dispatcher.dispatch(ChatEvent::PrivateAttachmentRemoved {
                    removal: AttachmentRemoval {
                        message_id: id,
                        attachment_index: index,
                    },
                    participants,
                });
                Ok(attachments)
            }
        }
    }
}

fn accept(id: MessageId, index: usize, removal: Removal) -> Result<Vec<Attachment>, ChatError> {
    match removal {
        Removal::Removed(left) => Ok(left),
        Removal::MessageMissing => Err(ChatError::MessageNotFound(id)),
        Removal::IndexOutOfRange { len } => Err(ChatError::AttachmentIndexOutOfRange { index, len }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ServerEvent;
    use crate::models::{GroupMessage, PrivateMessage, Role};
    use crate::store::MemoryMessageStore;
    use crate::ws::registry::ConnectionRegistry;
    use crate::ws::rooms::Room;
    use crate::ws::types::{Binding, OutboxReceiver, outbox};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn file(name: &str) -> Attachment {
        Attachment {
            url: format!("/uploads/{name}"),
            filename: name.to_string(),
            mime_type: None,
            size: None,
        }
    }

    fn group_message(id: MessageId, author: i64, names: &[&str]) -> GroupMessage {
        GroupMessage {
            id,
            user_id: author,
            display_name: "author".into(),
            text: None,
            attachments: names.iter().map(|n| file(n)).collect(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            edited: false,
            previous_text: None,
            edited_at: None,
        }
    }

    fn private_message(id: MessageId, sender: i64, recipient: i64) -> PrivateMessage {
        PrivateMessage {
            id,
            sender_id: sender,
            recipient_id: recipient,
            sender_name: "sender".into(),
            text: None,
            attachments: vec![file("a"), file("b")],
            created_at: OffsetDateTime::UNIX_EPOCH,
            edited: false,
            previous_text: None,
            edited_at: None,
            read: false,
        }
    }

    struct Fixture {
        store: Arc<MemoryMessageStore>,
        registry: Arc<ConnectionRegistry>,
        notifier: AttachmentNotifier,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryMessageStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = AttachmentNotifier::new(store.clone(), Dispatcher::new(registry.clone()));
        Fixture {
            store,
            registry,
            notifier,
        }
    }

    fn listen(registry: &ConnectionRegistry, user: Option<i64>) -> OutboxReceiver {
        let id = Uuid::new_v4();
        let (tx, rx) = outbox();
        registry.register(id, tx);
        if let Some(user_id) = user {
            registry.bind(
                id,
                Binding {
                    user_id,
                    display_name: "x".into(),
                    manual: false,
                },
            );
            registry.join_room(id, Room::Personal(user_id));
        }
        rx
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push((*event).clone());
        }
        out
    }

    #[tokio::test]
    async fn removing_by_index_shifts_the_remaining_attachments() {
        let fx = fixture();
        fx.store.insert_group(group_message(1, 7, &["x", "y", "z"]));
        let mut watcher = listen(&fx.registry, None);
        let author = Actor::new(7, "author", Role::Member);

        let left = fx
            .notifier
            .remove(&author, AttachmentTarget::Group(1), 1)
            .await
            .unwrap();
        assert_eq!(left, vec![file("x"), file("z")]);
        assert_eq!(
            drain(&mut watcher),
            vec![ServerEvent::AttachmentRemoved(AttachmentRemoval {
                message_id: 1,
                attachment_index: 1
            })]
        );

        let left = fx
            .notifier
            .remove(&author, AttachmentTarget::Group(1), 0)
            .await
            .unwrap();
        assert_eq!(left, vec![file("z")]);
        let stored = fx.store.group_message(1).await.unwrap().unwrap();
        assert_eq!(stored.attachments, vec![file("z")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_removals_keep_clients_in_step_with_the_store() {
        let fx = fixture();
        fx.store.insert_group(group_message(1, 7, &["x", "y", "z"]));
        let mut watcher = listen(&fx.registry, None);
        let author = Actor::new(7, "author", Role::Member);

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let notifier = fx.notifier.clone();
                let author = author.clone();
                tokio::spawn(async move {
                    notifier.remove(&author, AttachmentTarget::Group(1), 0).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        // Replay what a client saw against its original copy.
        let mut client_view = vec![file("x"), file("y"), file("z")];
        for event in drain(&mut watcher) {
            match event {
                ServerEvent::AttachmentRemoved(removal) => {
                    client_view.remove(removal.attachment_index);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        let stored = fx.store.group_message(1).await.unwrap().unwrap();
        assert_eq!(stored.attachments, vec![file("z")]);
        assert_eq!(client_view, stored.attachments);
    }

    #[tokio::test]
    async fn out_of_range_index_is_a_client_error_and_emits_nothing() {
        let fx = fixture();
        fx.store.insert_group(group_message(1, 7, &["x"]));
        let mut watcher = listen(&fx.registry, None);

        let err = fx
            .notifier
            .remove(&Actor::new(7, "a", Role::Member), AttachmentTarget::Group(1), 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ChatError::AttachmentIndexOutOfRange { index: 1, len: 1 }
        ));
        assert!(err.is_client_error());
        assert!(drain(&mut watcher).is_empty());
    }

    #[tokio::test]
    async fn missing_message_is_not_found() {
        let fx = fixture();
        let err = fx
            .notifier
            .remove(&Actor::new(1, "a", Role::Admin), AttachmentTarget::Private(99), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MessageNotFound(99)));
    }

    #[tokio::test]
    async fn strangers_cannot_remove_but_moderators_can() {
        let fx = fixture();
        fx.store.insert_group(group_message(1, 7, &["x", "y"]));

        let err = fx
            .notifier
            .remove(&Actor::new(8, "other", Role::Member), AttachmentTarget::Group(1), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));

        let left = fx
            .notifier
            .remove(&Actor::new(8, "mod", Role::Moderator), AttachmentTarget::Group(1), 0)
            .await
            .unwrap();
        assert_eq!(left, vec![file("y")]);
    }

    #[tokio::test]
    async fn private_removal_notifies_only_the_participants() {
        let fx = fixture();
        fx.store.insert_private(private_message(5, 1, 2));
        let mut sender = listen(&fx.registry, Some(1));
        let mut recipient = listen(&fx.registry, Some(2));
        let mut outsider = listen(&fx.registry, Some(3));

        // The recipient is a participant too.
        fx.notifier
            .remove(&Actor::new(2, "b", Role::Member), AttachmentTarget::Private(5), 0)
            .await
            .unwrap();

        let expected = vec![ServerEvent::PrivateAttachmentRemoved(AttachmentRemoval {
            message_id: 5,
            attachment_index: 0,
        })];
        assert_eq!(drain(&mut sender), expected);
        assert_eq!(drain(&mut recipient), expected);
        assert!(drain(&mut outsider).is_empty());

        let err = fx
            .notifier
            .remove(&Actor::new(3, "c", Role::Member), AttachmentTarget::Private(5), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
    }
}
