//! Chat list projector.
//!
//! Recomputes each watcher's full ordered conversation summary on a fixed
//! cadence and pushes the whole list every time; no diffing, so client
//! state stays simple and self-healing. View-marking operations trigger an
//! out-of-band push to the affected chat's participants so perceived
//! read-receipt latency is not bound to the tick.

use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use shared::models::{ChatListPayload, StreamEvent};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use super::{
    aggregators,
    hub::{SharedHub, StreamHub},
};

pub fn spawn(hub: SharedHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(
            hub.config().stream.chat_list_interval_ms,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = hub.shutdown_token();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            push_all(&hub).await;
        }
    })
}

/// One projector tick: recompute and push for every open list connection.
pub(crate) async fn push_all(hub: &StreamHub) {
    for (connection_id, subscriber_id) in hub.chat_list.snapshot().await {
        push_to(hub, connection_id, subscriber_id).await;
    }
}

/// Recompute one user's list and push it to every list connection they
/// hold. Called out-of-band when a view-marking operation completes.
pub async fn push_for_user(hub: &StreamHub, subscriber_id: Uuid) {
    for connection_id in hub.chat_list.connections_for(subscriber_id).await {
        push_to(hub, connection_id, subscriber_id).await;
    }
}

/// Out-of-band push to every participant of a chat.
pub async fn push_for_chat(hub: &StreamHub, chat_id: i64) {
    match hub.repo().fetch_chat_participants(chat_id).await {
        Ok(participants) => {
            for participant in participants {
                push_for_user(hub, participant.user_id).await;
            }
        }
        Err(err) => warn!(chat_id, error = %err, "chat-list push skipped"),
    }
}

async fn push_to(hub: &StreamHub, connection_id: Uuid, subscriber_id: Uuid) {
    let payload = match compute(hub, subscriber_id).await {
        Ok(payload) => payload,
        Err(err) => {
            warn!(%subscriber_id, error = %err, "chat-list recompute failed; will retry next tick");
            return;
        }
    };

    if hub
        .chat_list
        .send(connection_id, &StreamEvent::ChatList(payload))
        .await
    {
        counter!("tidemark_events_delivered_total", "event" => "chat_list").increment(1);
    } else {
        hub.chat_list.close(connection_id).await;
    }
}

/// The full ordered conversation summary for one user.
pub async fn compute(hub: &StreamHub, subscriber_id: Uuid) -> Result<ChatListPayload, sqlx::Error> {
    let rows = hub.repo().fetch_chat_summaries(subscriber_id).await?;
    let chats = aggregators::project_chat_list(
        rows,
        Utc::now(),
        hub.config().stream.online_window_secs,
    );
    Ok(ChatListPayload { chats })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use shared::config::Config;

    use super::*;
    use crate::repo::{ChatSummaryRow, MockChatRepository};
    use crate::services::hub::StreamHub;

    fn row(chat_id: i64) -> ChatSummaryRow {
        ChatSummaryRow {
            chat_id,
            name: format!("chat-{chat_id}"),
            is_private: false,
            last_message_id: None,
            last_author_id: None,
            last_text: None,
            last_created_at: None,
            unread_count: 2,
            participant_count: 3,
            pinned_count: 0,
            counterpart_last_seen: None,
        }
    }

    #[tokio::test]
    async fn tick_pushes_the_full_list_to_each_watcher() {
        let mut repo = MockChatRepository::new();
        repo.expect_fetch_chat_summaries()
            .returning(|_| Ok(vec![row(1), row(2)]));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let subscriber = uuid::Uuid::new_v4();
        let (_connection, mut rx) = hub.connect_chat_list(subscriber).await;

        push_all(&hub).await;

        let event = rx.try_recv().expect("chat list push");
        assert_eq!(event.event, "chat_list");
        assert_eq!(event.data["chats"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn dead_watcher_is_dropped_from_the_registry() {
        let mut repo = MockChatRepository::new();
        repo.expect_fetch_chat_summaries().returning(|_| Ok(vec![]));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let subscriber = uuid::Uuid::new_v4();
        let (_connection, rx) = hub.connect_chat_list(subscriber).await;
        drop(rx);

        push_all(&hub).await;

        assert!(hub.chat_list.connections_for(subscriber).await.is_empty());
    }
}
