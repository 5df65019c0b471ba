//! Domain types shared by the presence core and its collaborators.
//!
//! Messages are persisted elsewhere; the real-time core only relays the
//! representation it is handed and never assigns ids or timestamps itself.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Identifier of a user account, as issued by the relational store.
pub type UserId = i64;

/// Identifier of a persisted group or private message.
pub type MessageId = i64;

/// Authorization role attached to an authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Member,
    Moderator,
    Admin,
}

impl Role {
    /// Privileged roles may clear the group chat and remove any attachment.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "member" | "user" => Some(Role::Member),
            "moderator" | "mod" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// The authenticated identity behind a request or a socket handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: UserId, display_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            role,
        }
    }
}

/// A stored file referenced by a message. Treated as opaque by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// A message posted to the general room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub previous_text: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
}

/// A one-to-one message. Exactly two participants, sender and recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub sender_name: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub previous_text: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub read: bool,
}

impl PrivateMessage {
    pub fn participants(&self) -> Participants {
        Participants {
            sender: self.sender_id,
            recipient: self.recipient_id,
        }
    }
}

/// The two sides of a private conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants {
    pub sender: UserId,
    pub recipient: UserId,
}

impl Participants {
    pub fn new(sender: UserId, recipient: UserId) -> Self {
        Self { sender, recipient }
    }

    pub fn includes(&self, user_id: UserId) -> bool {
        self.sender == user_id || self.recipient == user_id
    }

    /// Distinct participant ids, sender first. A self-addressed note yields one id.
    pub fn user_ids(&self) -> Vec<UserId> {
        if self.sender == self.recipient {
            vec![self.sender]
        } else {
            vec![self.sender, self.recipient]
        }
    }
}
