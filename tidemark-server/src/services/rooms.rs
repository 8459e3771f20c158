//! Chat room membership index.
//!
//! Maps a chat id to the set of connections currently subscribed to it. The
//! index holds connection ids only, never connection state; ownership stays
//! with the registry.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ChatRoomIndex {
    inner: RwLock<HashMap<i64, HashSet<Uuid>>>,
}

impl ChatRoomIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, chat_id: i64, connection_id: Uuid) {
        let mut guard = self.inner.write().await;
        guard.entry(chat_id).or_default().insert(connection_id);
    }

    pub async fn remove(&self, chat_id: i64, connection_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.get_mut(&chat_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                guard.remove(&chat_id);
            }
        }
    }

    /// Retract the connection from every room it joined. Called on close so
    /// the next scan's floor computation no longer sees its watermark.
    pub async fn retract(&self, connection_id: Uuid) {
        let mut guard = self.inner.write().await;
        guard.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    pub async fn members(&self, chat_id: i64) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        guard
            .get(&chat_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every room that currently has at least one connection; the scan
    /// targets of the new-message detector.
    pub async fn rooms_with_members(&self) -> Vec<(i64, Vec<Uuid>)> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .map(|(chat_id, members)| (*chat_id, members.iter().copied().collect()))
            .collect()
    }

    pub async fn contains(&self, chat_id: i64, connection_id: Uuid) -> bool {
        let guard = self.inner.read().await;
        guard
            .get(&chat_id)
            .is_some_and(|members| members.contains(&connection_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retract_removes_connection_from_all_rooms() {
        let index = ChatRoomIndex::new();
        let connection = Uuid::new_v4();
        let other = Uuid::new_v4();
        index.insert(1, connection).await;
        index.insert(2, connection).await;
        index.insert(2, other).await;

        index.retract(connection).await;

        assert!(index.members(1).await.is_empty());
        assert_eq!(index.members(2).await, vec![other]);
    }

    #[tokio::test]
    async fn empty_rooms_are_dropped() {
        let index = ChatRoomIndex::new();
        let connection = Uuid::new_v4();
        index.insert(5, connection).await;
        index.remove(5, connection).await;

        assert!(index.rooms_with_members().await.is_empty());
    }

    #[tokio::test]
    async fn rooms_with_members_lists_each_room_once() {
        let index = ChatRoomIndex::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.insert(1, a).await;
        index.insert(1, b).await;

        let rooms = index.rooms_with_members().await;
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].0, 1);
        assert_eq!(rooms[0].1.len(), 2);
    }
}
