//! Request/response control operations that ride alongside the streams.
//!
//! These never write through the registries directly; they hit the store
//! and let the polling loops pick the change up, except for view marking
//! which also triggers an immediate chat-list push so read receipts do not
//! wait for the projector tick.

use axum::{
    Json,
    extract::{Extension, Path, Query},
};
use serde::{Deserialize, Serialize};
use shared::models::{MessagePage, ReactionSummary, StreamEvent};
use uuid::Uuid;

use crate::http::error::AppResult;
use crate::services::{chat_list, hub::SharedHub};

#[derive(Debug, Deserialize)]
pub struct OlderMessagesRequest {
    pub subscriber_id: Uuid,
    /// Exclusive upper bound; only messages with a smaller id are returned.
    pub before_id: i64,
    pub limit: i64,
    /// When set, the page is also pushed to this stream connection as an
    /// `older_messages` event.
    pub connection_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct MarkViewedRequest {
    pub subscriber_id: Uuid,
    pub message_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkAllViewedRequest {
    pub subscriber_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct LeaveChatRequest {
    pub connection_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ViewedResponse {
    pub marked: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReactionsQuery {
    pub viewer_id: Uuid,
}

/// `POST /api/chats/{chat_id}/messages/older` — pull-based backfill.
///
/// The page always comes back in the response body; a caller holding an
/// open stream can also have it mirrored there so all message rendering
/// arrives through one channel.
pub async fn older_messages(
    Extension(hub): Extension<SharedHub>,
    Path(chat_id): Path<i64>,
    Json(request): Json<OlderMessagesRequest>,
) -> AppResult<Json<MessagePage>> {
    let page = hub
        .older_messages(chat_id, request.before_id, request.limit, request.subscriber_id)
        .await?;
    if let Some(connection_id) = request.connection_id {
        hub.registry
            .send(connection_id, &StreamEvent::OlderMessages(page.clone()))
            .await;
    }
    Ok(Json(page))
}

/// `POST /api/chats/{chat_id}/views` — record view rows for a batch of
/// messages. Idempotent.
pub async fn mark_viewed(
    Extension(hub): Extension<SharedHub>,
    Path(chat_id): Path<i64>,
    Json(request): Json<MarkViewedRequest>,
) -> AppResult<Json<ViewedResponse>> {
    let marked = hub
        .mark_viewed(chat_id, request.subscriber_id, &request.message_ids)
        .await?;
    // Unread counts changed; refresh participants ahead of the next tick.
    chat_list::push_for_chat(&hub, chat_id).await;
    Ok(Json(ViewedResponse { marked }))
}

/// `POST /api/chats/{chat_id}/views/all` — mark every unread message in
/// the chat viewed.
pub async fn mark_all_viewed(
    Extension(hub): Extension<SharedHub>,
    Path(chat_id): Path<i64>,
    Json(request): Json<MarkAllViewedRequest>,
) -> AppResult<Json<ViewedResponse>> {
    let marked = hub.mark_all_viewed(chat_id, request.subscriber_id).await?;
    chat_list::push_for_chat(&hub, chat_id).await;
    Ok(Json(ViewedResponse { marked }))
}

/// `POST /api/chats/{chat_id}/leave` — detach a connection from a chat
/// without closing its stream.
pub async fn leave_chat(
    Extension(hub): Extension<SharedHub>,
    Path(chat_id): Path<i64>,
    Json(request): Json<LeaveChatRequest>,
) -> AppResult<Json<serde_json::Value>> {
    hub.leave_chat(request.connection_id, chat_id).await?;
    Ok(Json(serde_json::json!({ "left": chat_id })))
}

/// `GET /api/messages/{message_id}/reactions` — aggregated reactions shaped
/// for the requesting viewer.
pub async fn message_reactions(
    Extension(hub): Extension<SharedHub>,
    Path(message_id): Path<i64>,
    Query(query): Query<ReactionsQuery>,
) -> AppResult<Json<ReactionSummary>> {
    let summary = hub.reactions_for(message_id, query.viewer_id).await?;
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shared::config::Config;

    use super::*;
    use crate::repo::MockChatRepository;
    use crate::services::hub::StreamHub;

    #[tokio::test]
    async fn mark_viewed_writes_rows_and_reports_the_count() {
        let mut repo = MockChatRepository::new();
        repo.expect_chat_exists().returning(|_| Ok(true));
        repo.expect_insert_views()
            .withf(|views| views.len() == 2)
            .returning(|views| Ok(views.len() as u64));
        repo.expect_fetch_chat_participants().returning(|_| Ok(vec![]));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let request = MarkViewedRequest {
            subscriber_id: Uuid::new_v4(),
            // Duplicates collapse before the write.
            message_ids: vec![5, 5, 9],
        };

        let Json(response) = mark_viewed(Extension(hub), Path(1), Json(request))
            .await
            .expect("mark viewed");
        assert_eq!(response.marked, 2);
    }

    #[tokio::test]
    async fn older_messages_rejects_a_non_positive_limit() {
        let repo = MockChatRepository::new();
        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let request = OlderMessagesRequest {
            subscriber_id: Uuid::new_v4(),
            before_id: 50,
            limit: 0,
            connection_id: None,
        };

        let result = older_messages(Extension(hub), Path(1), Json(request)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn older_messages_page_is_mirrored_to_the_stream_connection() {
        let mut repo = MockChatRepository::new();
        repo.expect_chat_exists().returning(|_| Ok(true));
        repo.expect_fetch_messages_before().returning(|chat, _, _| {
            Ok(vec![shared::models::Message {
                id: 40,
                chat_id: chat,
                author_id: Uuid::new_v4(),
                text: "older".to_string(),
                reply_to: None,
                is_edited: false,
                is_pinned: false,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            }])
        });
        repo.expect_fetch_reactions().returning(|_| Ok(vec![]));
        repo.expect_fetch_views().returning(|_| Ok(vec![]));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let subscriber = Uuid::new_v4();
        let (connection, mut rx) = hub.connect(subscriber).await;

        let request = OlderMessagesRequest {
            subscriber_id: subscriber,
            before_id: 50,
            limit: 10,
            connection_id: Some(connection),
        };

        let Json(page) = older_messages(Extension(hub), Path(1), Json(request))
            .await
            .expect("backfill");
        assert_eq!(page.messages.len(), 1);

        let event = rx.try_recv().expect("stream copy of the page");
        assert_eq!(event.event, "older_messages");
        assert_eq!(event.data["messages"][0]["id"], 40);
    }

    #[tokio::test]
    async fn reactions_for_a_missing_message_is_not_found() {
        let mut repo = MockChatRepository::new();
        repo.expect_fetch_message().returning(|_| Ok(None));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let query = ReactionsQuery {
            viewer_id: Uuid::new_v4(),
        };

        let result = message_reactions(Extension(hub), Path(404), Query(query)).await;
        assert!(result.is_err());
    }
}
