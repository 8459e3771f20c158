//! SSE endpoints: the per-chat message stream and the conversation-list
//! stream.
//!
//! A connection is a channel pair: the registry holds the sender, the SSE
//! response drains the receiver. When the client goes away the receiver is
//! dropped and the next write to the sender fails, which is how every
//! polling loop learns the connection is dead.

use std::{convert::Infallible, time::Duration};

use axum::{
    extract::{Extension, Query},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use serde::Deserialize;
use shared::models::StreamEvent;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::{
    broadcaster::{HeartbeatTarget, spawn_heartbeat},
    chat_list,
    hub::SharedHub,
};

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub subscriber_id: Uuid,
    /// Chat to join immediately; omit to open a bare connection.
    pub chat_id: Option<i64>,
    /// Highest message id the client already holds. Zero or absent means a
    /// first open; the backlog is then the most recent page.
    pub last_message_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ChatListQuery {
    pub subscriber_id: Uuid,
}

/// `GET /api/stream` — open a message-stream connection.
pub async fn stream_handler(
    Extension(hub): Extension<SharedHub>,
    Query(query): Query<StreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (connection_id, receiver) = hub.connect(query.subscriber_id).await;
    info!(%connection_id, subscriber_id = %query.subscriber_id, "stream opened");

    hub.registry
        .send(connection_id, &StreamEvent::Connected { connection_id })
        .await;

    if let Some(chat_id) = query.chat_id {
        let watermark = query.last_message_id.unwrap_or(0);
        match hub.join_chat(connection_id, chat_id, watermark).await {
            Ok(initial) => {
                hub.registry
                    .send(connection_id, &StreamEvent::JoinedChat { chat_id })
                    .await;
                hub.registry
                    .send(connection_id, &StreamEvent::InitialMessages(initial))
                    .await;
            }
            Err(err) => {
                warn!(%connection_id, chat_id, error = %err, "join on connect failed");
                hub.registry
                    .send(
                        connection_id,
                        &StreamEvent::Error {
                            message: err.to_string(),
                        },
                    )
                    .await;
            }
        }
    }

    let heartbeat_secs = hub.config().stream.heartbeat_secs;
    spawn_heartbeat(hub, HeartbeatTarget::Stream(connection_id));

    sse_response(heartbeat_secs, receiver)
}

/// `GET /api/stream/chats` — open a conversation-list connection.
///
/// The first list snapshot is pushed immediately; after that the projector
/// tick owns the cadence.
pub async fn chat_list_handler(
    Extension(hub): Extension<SharedHub>,
    Query(query): Query<ChatListQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (connection_id, receiver) = hub.connect_chat_list(query.subscriber_id).await;
    info!(%connection_id, subscriber_id = %query.subscriber_id, "chat-list stream opened");

    hub.chat_list
        .send(connection_id, &StreamEvent::Connected { connection_id })
        .await;

    match chat_list::compute(&hub, query.subscriber_id).await {
        Ok(payload) => {
            hub.chat_list
                .send(connection_id, &StreamEvent::ChatList(payload))
                .await;
        }
        Err(err) => {
            warn!(%connection_id, error = %err, "initial chat-list push failed");
            hub.chat_list
                .send(
                    connection_id,
                    &StreamEvent::Error {
                        message: "chat list unavailable".to_string(),
                    },
                )
                .await;
        }
    }

    let heartbeat_secs = hub.config().stream.heartbeat_secs;
    spawn_heartbeat(hub, HeartbeatTarget::ChatList(connection_id));

    sse_response(heartbeat_secs, receiver)
}

fn sse_response(
    heartbeat_secs: u64,
    receiver: tokio::sync::mpsc::Receiver<crate::services::broadcaster::Envelope>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(receiver)
        .map(|envelope| Ok::<_, Infallible>(envelope.into_sse_event()));

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(heartbeat_secs.max(5)))
        .text("keep-alive");

    Sse::new(stream).keep_alive(keepalive)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shared::config::Config;

    use super::*;
    use crate::repo::MockChatRepository;
    use crate::services::hub::StreamHub;

    fn message(id: i64, chat_id: i64) -> shared::models::Message {
        shared::models::Message {
            id,
            chat_id,
            author_id: Uuid::new_v4(),
            text: format!("m{id}"),
            reply_to: None,
            is_edited: false,
            is_pinned: false,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn connect_registers_the_connection_and_joins_the_chat() {
        let mut repo = MockChatRepository::new();
        repo.expect_chat_exists().returning(|_| Ok(true));
        repo.expect_latest_message_id().returning(|_| Ok(7));
        repo.expect_fetch_messages_before()
            .returning(|chat, _, _| Ok(vec![message(7, chat)]));
        repo.expect_has_messages_before().returning(|_, _| Ok(false));
        repo.expect_count_messages().returning(|_| Ok(1));
        repo.expect_fetch_reactions().returning(|_| Ok(vec![]));
        repo.expect_fetch_views().returning(|_| Ok(vec![]));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let query = StreamQuery {
            subscriber_id: Uuid::new_v4(),
            chat_id: Some(3),
            last_message_id: None,
        };

        let _response = stream_handler(Extension(hub.clone()), Query(query)).await;

        assert_eq!(hub.registry.connection_count().await, 1);
        assert!(!hub.rooms.members(3).await.is_empty());
    }

    #[tokio::test]
    async fn join_failure_keeps_the_connection_open() {
        let mut repo = MockChatRepository::new();
        repo.expect_chat_exists().returning(|_| Ok(false));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let query = StreamQuery {
            subscriber_id: Uuid::new_v4(),
            chat_id: Some(99),
            last_message_id: None,
        };

        let _response = stream_handler(Extension(hub.clone()), Query(query)).await;

        // The connection survives; the client received an error event and
        // may join a different chat later.
        assert_eq!(hub.registry.connection_count().await, 1);
        assert!(hub.rooms.members(99).await.is_empty());
    }

    #[tokio::test]
    async fn chat_list_connect_pushes_an_initial_snapshot() {
        let mut repo = MockChatRepository::new();
        repo.expect_fetch_chat_summaries().returning(|_| Ok(vec![]));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let subscriber = Uuid::new_v4();
        let query = ChatListQuery {
            subscriber_id: subscriber,
        };

        let _response = chat_list_handler(Extension(hub.clone()), Query(query)).await;

        assert_eq!(hub.chat_list.connections_for(subscriber).await.len(), 1);
    }
}
