//! Wire events exchanged over the real-time transport.
//!
//! Both directions are closed enums, adjacently tagged as
//! `{"event": "<kebab-case-name>", "data": ...}`.

use crate::models::{GroupMessage, MessageId, PrivateMessage, UserId};
use crate::presence::PresenceEntry;
use serde::{Deserialize, Serialize};

/// Events a client may send over its socket.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Put this connection into the personal room of `user_id`.
    Join { user_id: UserId },
    /// Declare the sender online or offline.
    PresenceSignal {
        user_id: UserId,
        display_name: String,
        online: bool,
        #[serde(default)]
        manual: bool,
    },
    NewPrivateMessage(PrivateMessage),
    PrivateMessageEdited(PrivateMessage),
    PrivateMessageDeleted {
        id: MessageId,
        #[serde(default)]
        recipient_id: Option<UserId>,
    },
}

/// One row of the online roster as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub user_id: UserId,
    pub display_name: String,
    pub manual: bool,
}

impl From<&PresenceEntry> for RosterEntry {
    fn from(entry: &PresenceEntry) -> Self {
        Self {
            user_id: entry.user_id,
            display_name: entry.display_name.clone(),
            manual: entry.manual,
        }
    }
}

/// Tells clients to drop the attachment at `attachment_index` of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRemoval {
    pub message_id: MessageId,
    pub attachment_index: usize,
}

/// Events the server pushes to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    PresenceRoster(Vec<RosterEntry>),
    NewMessage(GroupMessage),
    MessageEdited(GroupMessage),
    MessageDeleted(MessageId),
    GroupChatCleared,
    NewPrivateMessage(PrivateMessage),
    PrivateMessageEdited(PrivateMessage),
    PrivateMessageDeleted(MessageId),
    AttachmentRemoved(AttachmentRemoval),
    PrivateAttachmentRemoved(AttachmentRemoval),
    /// Sent only to the connection whose event was refused.
    Error { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// The wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PresenceRoster(_) => "presence-roster",
            ServerEvent::NewMessage(_) => "new-message",
            ServerEvent::MessageEdited(_) => "message-edited",
            ServerEvent::MessageDeleted(_) => "message-deleted",
            ServerEvent::GroupChatCleared => "group-chat-cleared",
            ServerEvent::NewPrivateMessage(_) => "new-private-message",
            ServerEvent::PrivateMessageEdited(_) => "private-message-edited",
            ServerEvent::PrivateMessageDeleted(_) => "private-message-deleted",
            ServerEvent::AttachmentRemoved(_) => "attachment-removed",
            ServerEvent::PrivateAttachmentRemoved(_) => "private-attachment-removed",
            ServerEvent::Error { .. } => "error",
        }
    }
}
