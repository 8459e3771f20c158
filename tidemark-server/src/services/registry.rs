//! Connection registries: who is connected, through which transport, and how
//! far each connection has been caught up.
//!
//! All mutation happens through open/close/join/leave; the detectors only
//! read snapshots. Sending to a stale connection is not an error — a
//! disconnect racing with a scan is an expected condition, signalled by a
//! `false` return.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::models::StreamEvent;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use super::broadcaster::Envelope;

#[derive(Debug)]
struct ConnectionState {
    subscriber_id: Uuid,
    sender: mpsc::Sender<Envelope>,
    /// chat id -> highest message id already delivered. Never decreases.
    watermarks: HashMap<i64, i64>,
    /// chat id -> reference point of the last update/delete/edit/view scan.
    delta_cursors: HashMap<i64, DateTime<Utc>>,
}

/// One entry of the update scanner's work list.
#[derive(Debug, Clone)]
pub struct DeltaCursor {
    pub connection_id: Uuid,
    pub subscriber_id: Uuid,
    pub chat_id: i64,
    pub since: DateTime<Utc>,
}

/// Registry of open message-stream connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<Uuid, ConnectionState>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and issue its identity.
    pub async fn open(&self, subscriber_id: Uuid, sender: mpsc::Sender<Envelope>) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut guard = self.inner.write().await;
        guard.insert(
            connection_id,
            ConnectionState {
                subscriber_id,
                sender,
                watermarks: HashMap::new(),
                delta_cursors: HashMap::new(),
            },
        );
        connection_id
    }

    /// Remove a connection; returns the chats it was attached to so the room
    /// index can retract membership.
    pub async fn close(&self, connection_id: Uuid) -> Option<Vec<i64>> {
        let mut guard = self.inner.write().await;
        guard
            .remove(&connection_id)
            .map(|state| state.watermarks.keys().copied().collect())
    }

    pub async fn subscriber_of(&self, connection_id: Uuid) -> Option<Uuid> {
        let guard = self.inner.read().await;
        guard.get(&connection_id).map(|state| state.subscriber_id)
    }

    /// Write one event to the connection's transport.
    ///
    /// Returns `false` when the transport is closed or cannot keep up; the
    /// caller reaps the connection, nothing is buffered.
    pub async fn send(&self, connection_id: Uuid, event: &StreamEvent) -> bool {
        let sender = {
            let guard = self.inner.read().await;
            match guard.get(&connection_id) {
                Some(state) => state.sender.clone(),
                None => return false,
            }
        };

        if sender.is_closed() {
            return false;
        }

        sender.try_send(Envelope::from_event(event)).is_ok()
    }

    /// Attach a chat to the connection, seeding both the delivery watermark
    /// and the delta-scan cursor. Returns `false` when the connection is
    /// gone.
    pub async fn attach_chat(&self, connection_id: Uuid, chat_id: i64, watermark: i64) -> bool {
        let mut guard = self.inner.write().await;
        match guard.get_mut(&connection_id) {
            Some(state) => {
                state.watermarks.insert(chat_id, watermark);
                state.delta_cursors.insert(chat_id, Utc::now());
                true
            }
            None => false,
        }
    }

    pub async fn detach_chat(&self, connection_id: Uuid, chat_id: i64) {
        let mut guard = self.inner.write().await;
        if let Some(state) = guard.get_mut(&connection_id) {
            state.watermarks.remove(&chat_id);
            state.delta_cursors.remove(&chat_id);
        }
    }

    /// Advance the delivery watermark; lower candidates are ignored so the
    /// watermark never moves backwards.
    pub async fn advance_watermark(&self, connection_id: Uuid, chat_id: i64, candidate: i64) {
        let mut guard = self.inner.write().await;
        if let Some(state) = guard.get_mut(&connection_id) {
            let entry = state.watermarks.entry(chat_id).or_insert(candidate);
            *entry = (*entry).max(candidate);
        }
    }

    /// Watermarks of the given members for one chat, skipping connections
    /// that vanished since the membership snapshot was taken.
    pub async fn watermarks_for(&self, members: &[Uuid], chat_id: i64) -> Vec<(Uuid, i64)> {
        let guard = self.inner.read().await;
        members
            .iter()
            .filter_map(|id| {
                guard
                    .get(id)
                    .and_then(|state| state.watermarks.get(&chat_id))
                    .map(|watermark| (*id, *watermark))
            })
            .collect()
    }

    /// Snapshot of every (connection, chat) pair with its delta cursor.
    pub async fn delta_snapshot(&self) -> Vec<DeltaCursor> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .flat_map(|(connection_id, state)| {
                state
                    .delta_cursors
                    .iter()
                    .map(|(chat_id, since)| DeltaCursor {
                        connection_id: *connection_id,
                        subscriber_id: state.subscriber_id,
                        chat_id: *chat_id,
                        since: *since,
                    })
            })
            .collect()
    }

    /// Unconditionally advance the delta cursor; bounded staleness instead
    /// of blocking.
    pub async fn advance_delta_cursor(
        &self,
        connection_id: Uuid,
        chat_id: i64,
        to: DateTime<Utc>,
    ) {
        let mut guard = self.inner.write().await;
        if let Some(state) = guard.get_mut(&connection_id) {
            if let Some(cursor) = state.delta_cursors.get_mut(&chat_id) {
                *cursor = to;
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[derive(Debug)]
struct ChatListState {
    subscriber_id: Uuid,
    sender: mpsc::Sender<Envelope>,
}

/// Parallel registry for users watching their conversation list rather than
/// a single chat.
#[derive(Debug, Default)]
pub struct ChatListRegistry {
    inner: RwLock<HashMap<Uuid, ChatListState>>,
}

impl ChatListRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open(&self, subscriber_id: Uuid, sender: mpsc::Sender<Envelope>) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut guard = self.inner.write().await;
        guard.insert(
            connection_id,
            ChatListState {
                subscriber_id,
                sender,
            },
        );
        connection_id
    }

    pub async fn close(&self, connection_id: Uuid) {
        let mut guard = self.inner.write().await;
        guard.remove(&connection_id);
    }

    pub async fn send(&self, connection_id: Uuid, event: &StreamEvent) -> bool {
        let sender = {
            let guard = self.inner.read().await;
            match guard.get(&connection_id) {
                Some(state) => state.sender.clone(),
                None => return false,
            }
        };

        if sender.is_closed() {
            return false;
        }

        sender.try_send(Envelope::from_event(event)).is_ok()
    }

    /// All open list connections as (connection, subscriber) pairs.
    pub async fn snapshot(&self) -> Vec<(Uuid, Uuid)> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .map(|(id, state)| (*id, state.subscriber_id))
            .collect()
    }

    /// Connections belonging to one subscriber.
    pub async fn connections_for(&self, subscriber_id: Uuid) -> Vec<Uuid> {
        let guard = self.inner.read().await;
        guard
            .iter()
            .filter(|(_, state)| state.subscriber_id == subscriber_id)
            .map(|(id, _)| *id)
            .collect()
    }
}
