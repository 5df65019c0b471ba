//! The authoritative set of online users.
//!
//! Presence is driven by explicit online/offline signals, not by raw socket
//! connects. Each entry remembers which connection last signalled it online
//! (its owner) so that a stale tab closing cannot evict a live session.

use crate::models::UserId;
use crate::ws::types::ConnectionId;
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// One user currently considered online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub user_id: UserId,
    pub display_name: String,
    /// Opaque pass-through: whether the user toggled their status by hand.
    pub manual: bool,
    /// The connection that most recently signalled this user online.
    pub owner: ConnectionId,
}

/// Storage for the online roster.
///
/// The in-process implementation is [`InMemoryPresence`]. A multi-instance
/// deployment would provide a broker-backed implementation with the same
/// contract.
#[async_trait]
pub trait PresenceStore: Send + Sync + 'static {
    /// Replaces any entry for `entry.user_id` with `entry`. Last writer wins.
    async fn set_online(&self, entry: PresenceEntry);

    /// Removes the entry for `user_id`. Returns whether one was present.
    async fn set_offline(&self, user_id: UserId) -> bool;

    /// Removes the entry for `user_id` only if `conn_id` owns it.
    async fn release(&self, user_id: UserId, conn_id: ConnectionId) -> bool;

    /// The full roster, in (re)insertion order. Never holds duplicate user ids.
    async fn snapshot(&self) -> Vec<PresenceEntry>;

    async fn len(&self) -> usize;
}

/// Single-process presence set keyed by user id.
#[derive(Default)]
pub struct InMemoryPresence {
    entries: DashMap<UserId, (u64, PresenceEntry)>,
    seq: AtomicU64,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for InMemoryPresence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryPresence")
            .field("online_count", &self.entries.len())
            .finish()
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresence {
    async fn set_online(&self, entry: PresenceEntry) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let user_id = entry.user_id;
        // Remove first so the fresh entry moves to the end of the roster.
        let replaced = self.entries.remove(&user_id).is_some();
        self.entries.insert(user_id, (seq, entry));
        debug!(user_id, replaced, "Presence entry set online");
    }

    async fn set_offline(&self, user_id: UserId) -> bool {
        self.entries.remove(&user_id).is_some()
    }

    async fn release(&self, user_id: UserId, conn_id: ConnectionId) -> bool {
        self.entries
            .remove_if(&user_id, |_, (_, entry)| entry.owner == conn_id)
            .is_some()
    }

    async fn snapshot(&self) -> Vec<PresenceEntry> {
        let mut rows: Vec<(u64, PresenceEntry)> = self
            .entries
            .iter()
            .map(|e| e.value().clone())
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, entry)| entry).collect()
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use uuid::Uuid;

    fn entry(user_id: UserId, name: &str, manual: bool, owner: ConnectionId) -> PresenceEntry {
        PresenceEntry {
            user_id,
            display_name: name.to_string(),
            manual,
            owner,
        }
    }

    #[tokio::test]
    async fn snapshot_never_holds_duplicate_user_ids() {
        let presence = InMemoryPresence::new();
        let conns: Vec<ConnectionId> = (0..3).map(|_| Uuid::new_v4()).collect();

        // A fixed interleaving of signals over four users and three connections.
        for step in 0..40u64 {
            let user = (step * 7 % 4) as UserId;
            let conn = conns[(step % 3) as usize];
            if step % 5 == 0 {
                presence.set_offline(user).await;
            } else {
                presence.set_online(entry(user, "u", step % 2 == 0, conn)).await;
            }

            let snapshot = presence.snapshot().await;
            let ids: HashSet<UserId> = snapshot.iter().map(|e| e.user_id).collect();
            assert_eq!(ids.len(), snapshot.len(), "duplicate user id at step {step}");
        }
    }

    #[tokio::test]
    async fn later_online_signal_replaces_earlier_one() {
        let presence = InMemoryPresence::new();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());

        presence.set_online(entry(1, "ana (tab 1)", false, c1)).await;
        presence.set_online(entry(1, "ana (tab 2)", true, c2)).await;

        let snapshot = presence.snapshot().await;
        assert_eq!(snapshot, vec![entry(1, "ana (tab 2)", true, c2)]);
    }

    #[tokio::test]
    async fn release_only_evicts_for_the_owner() {
        let presence = InMemoryPresence::new();
        let (c1, c2) = (Uuid::new_v4(), Uuid::new_v4());
        presence.set_online(entry(1, "ana", false, c1)).await;
        presence.set_online(entry(1, "ana", false, c2)).await;

        assert!(!presence.release(1, c1).await);
        assert_eq!(presence.len().await, 1);

        assert!(presence.release(1, c2).await);
        assert!(presence.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn set_offline_for_unknown_user_is_a_noop() {
        let presence = InMemoryPresence::new();
        assert!(!presence.set_offline(42).await);
        assert_eq!(presence.len().await, 0);
    }

    #[tokio::test]
    async fn snapshot_follows_reinsertion_order() {
        let presence = InMemoryPresence::new();
        let c = Uuid::new_v4();
        presence.set_online(entry(1, "a", false, c)).await;
        presence.set_online(entry(2, "b", false, c)).await;
        presence.set_online(entry(1, "a", false, c)).await;

        let order: Vec<UserId> = presence.snapshot().await.iter().map(|e| e.user_id).collect();
        assert_eq!(order, vec![2, 1]);
    }
}
