//! Persistence boundary.
//!
//! The relational store lives outside this crate. The core needs only the
//! handful of operations below: fetch a message fresh, remove one of its
//! attachments, and wipe the group history.

use crate::models::{Attachment, GroupMessage, MessageId, PrivateMessage};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;

/// A failure reported by the persistence layer.
#[derive(Debug, thiserror::Error)]
#[error("storage failure: {message}")]
pub struct StoreError {
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Result of removing one attachment by index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// The attachments left after the removal, in order.
    Removed(Vec<Attachment>),
    MessageMissing,
    IndexOutOfRange { len: usize },
}

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    async fn group_message(&self, id: MessageId) -> Result<Option<GroupMessage>, StoreError>;

    async fn private_message(&self, id: MessageId) -> Result<Option<PrivateMessage>, StoreError>;

    /// Removes the attachment at `index` as one atomic step, so concurrent
    /// removals on the same message each apply to the list the last one left.
    async fn remove_group_attachment(
        &self,
        id: MessageId,
        index: usize,
    ) -> Result<Removal, StoreError>;

    /// Same as [`MessageStore::remove_group_attachment`] for a private message.
    async fn remove_private_attachment(
        &self,
        id: MessageId,
        index: usize,
    ) -> Result<Removal, StoreError>;

    /// Deletes every group message. Returns how many were removed.
    async fn clear_group_messages(&self) -> Result<u64, StoreError>;
}

/// In-process store for tests and the demo server.
#[derive(Default)]
pub struct MemoryMessageStore {
    group: DashMap<MessageId, GroupMessage>,
    private: DashMap<MessageId, PrivateMessage>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_group(&self, message: GroupMessage) {
        self.group.insert(message.id, message);
    }

    pub fn insert_private(&self, message: PrivateMessage) {
        self.private.insert(message.id, message);
    }

    pub fn group_count(&self) -> usize {
        self.group.len()
    }
}

impl fmt::Debug for MemoryMessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryMessageStore")
            .field("group_count", &self.group.len())
            .field("private_count", &self.private.len())
            .finish()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn group_message(&self, id: MessageId) -> Result<Option<GroupMessage>, StoreError> {
        Ok(self.group.get(&id).map(|m| m.value().clone()))
    }

    async fn private_message(&self, id: MessageId) -> Result<Option<PrivateMessage>, StoreError> {
        Ok(self.private.get(&id).map(|m| m.value().clone()))
    }

    async fn remove_group_attachment(
        &self,
        id: MessageId,
        index: usize,
    ) -> Result<Removal, StoreError> {
        // The shard guard is held for the whole read-modify-write.
        Ok(match self.group.get_mut(&id) {
            Some(mut msg) => remove_at(&mut msg.attachments, index),
            None => Removal::MessageMissing,
        })
    }

    async fn remove_private_attachment(
        &self,
        id: MessageId,
        index: usize,
    ) -> Result<Removal, StoreError> {
        Ok(match self.private.get_mut(&id) {
            Some(mut msg) => remove_at(&mut msg.attachments, index),
            None => Removal::MessageMissing,
        })
    }

    async fn clear_group_messages(&self) -> Result<u64, StoreError> {
        let removed = self.group.len() as u64;
        self.group.clear();
        Ok(removed)
    }
}

fn remove_at(attachments: &mut Vec<Attachment>, index: usize) -> Removal {
    if index >= attachments.len() {
        return Removal::IndexOutOfRange {
            len: attachments.len(),
        };
    }
    attachments.remove(index);
    Removal::Removed(attachments.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::OffsetDateTime;

    fn file(name: &str) -> Attachment {
        Attachment {
            url: format!("/uploads/{name}"),
            filename: name.to_string(),
            mime_type: None,
            size: None,
        }
    }

    fn store_with(names: &[&str]) -> MemoryMessageStore {
        let store = MemoryMessageStore::new();
        store.insert_group(GroupMessage {
            id: 1,
            user_id: 1,
            display_name: "ana".into(),
            text: None,
            attachments: names.iter().map(|n| file(n)).collect(),
            created_at: OffsetDateTime::UNIX_EPOCH,
            edited: false,
            previous_text: None,
            edited_at: None,
        });
        store
    }

    #[tokio::test]
    async fn removal_reports_missing_messages_and_bad_indexes() {
        let store = store_with(&["x"]);
        assert_eq!(
            store.remove_group_attachment(1, 1).await.unwrap(),
            Removal::IndexOutOfRange { len: 1 }
        );
        assert_eq!(
            store.remove_group_attachment(2, 0).await.unwrap(),
            Removal::MessageMissing
        );
        assert_eq!(
            store.remove_private_attachment(1, 0).await.unwrap(),
            Removal::MessageMissing
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_removals_never_lose_an_update() {
        let store = Arc::new(store_with(&["a", "b", "c", "d", "e", "f"]));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.remove_group_attachment(1, 0).await })
            })
            .collect();
        for task in tasks {
            assert!(matches!(task.await.unwrap().unwrap(), Removal::Removed(_)));
        }

        let msg = store.group_message(1).await.unwrap().unwrap();
        assert!(msg.attachments.is_empty());
    }
}
