//! # Axum Chat Presence
//!
//! The real-time core of a small chat application: a general room, one-to-one
//! private chat, file attachments and a live "who is online" roster, served
//! over Axum WebSockets.
//!
//! ## Core Features
//!
//! - **`ChatHub`**: owns every live connection and the presence roster for the process.
//! - **Explicit presence**: users come online by signalling it; a stale tab closing
//!   never evicts the session that signalled last.
//! - **Exhaustive fan-out**: every event type maps to exactly one audience, and new
//!   private messages reach each participant once no matter how many tabs they have.
//! - **Attachment notifications**: index-based removal announced only to those affected.
//! - **Replaceable seams**: `PresenceStore`, `MessageStore` and `Fanout` are traits.
//!
//! ## Getting Started
//!
//! See `demos/chat_server.rs` for a runnable server.
//!
//! ---

pub mod attachments;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod presence;
pub mod store;
pub mod ws;

// Only part of the crate if the "auth" feature is enabled.
#[cfg(feature = "auth")]
pub mod auth;
#[cfg(feature = "auth")]
pub mod http;

/// Public prelude for convenience.
///
/// `use axum_chat_presence::prelude::*;`
pub mod prelude {
    pub use crate::attachments::AttachmentTarget;
    pub use crate::config::ChatConfig;
    pub use crate::error::ChatError;
    pub use crate::events::{ClientEvent, RosterEntry, ServerEvent};
    pub use crate::models::{
        Actor, Attachment, GroupMessage, MessageId, Participants, PrivateMessage, Role, UserId,
    };
    pub use crate::presence::{InMemoryPresence, PresenceStore};
    pub use crate::store::{MemoryMessageStore, MessageStore, Removal};
    pub use crate::ws::{
        dispatch::{ChatEvent, Dispatcher, Fanout},
        service::{ChatHub, HubStats},
        upgrade::upgrade_handler,
    };

    #[cfg(feature = "auth")]
    pub use crate::auth::{Auth, MaybeAuth, TokenValidator};
    #[cfg(feature = "auth")]
    pub use crate::http::{HttpState, router};
}
