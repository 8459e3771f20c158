//! New-message scanner.
//!
//! For every chat room with at least one connection, one shared query
//! scoped by the floor (the minimum watermark across members) finds fresh
//! messages, which are then enriched per viewer and fanned out. The floor
//! guarantees no connection is skipped at the cost of sharing one query
//! window with the slowest straggler in the room.

use std::{collections::HashSet, time::Duration};

use metrics::counter;
use shared::models::StreamEvent;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::services::hub::{SharedHub, StreamHub};

pub fn spawn(hub: SharedHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(
            hub.config().stream.new_message_interval_ms,
        ));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = hub.shutdown_token();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            scan(&hub).await;
        }
    })
}

/// One full pass over every active room. Failures are isolated per room.
pub(crate) async fn scan(hub: &StreamHub) {
    for (chat_id, members) in hub.rooms.rooms_with_members().await {
        if let Err(err) = scan_room(hub, chat_id, &members).await {
            warn!(chat_id, error = %err, "new-message scan failed for room");
        }
    }
}

async fn scan_room(hub: &StreamHub, chat_id: i64, members: &[Uuid]) -> Result<(), sqlx::Error> {
    let watermarks = hub.registry.watermarks_for(members, chat_id).await;
    let Some(floor) = watermarks.iter().map(|(_, w)| *w).min() else {
        return Ok(());
    };

    let fresh = hub
        .repo()
        .fetch_messages_after(chat_id, floor, i64::MAX)
        .await?;
    let Some(top) = fresh.last().map(|m| m.id) else {
        return Ok(());
    };

    // (message, viewer) pairs queued for automatic read receipts: being
    // subscribed and receiving counts as implicit viewing.
    let mut receipts: HashSet<(i64, Uuid)> = HashSet::new();
    let mut dead: HashSet<Uuid> = HashSet::new();

    for message in &fresh {
        let reactions = hub.repo().fetch_reactions(message.id).await?;
        let views = hub.repo().fetch_views(message.id).await?;

        for (connection_id, watermark) in &watermarks {
            // The floor query window is shared; skip what this connection
            // already has.
            if message.id <= *watermark || dead.contains(connection_id) {
                continue;
            }
            let Some(subscriber_id) = hub.registry.subscriber_of(*connection_id).await else {
                continue;
            };

            let enriched = crate::services::aggregators::enrich_message(
                message.clone(),
                &reactions,
                &views,
                subscriber_id,
            );

            if hub
                .registry
                .send(*connection_id, &StreamEvent::NewMessage(enriched))
                .await
            {
                counter!("tidemark_events_delivered_total", "event" => "new_message")
                    .increment(1);
                if message.author_id != subscriber_id {
                    receipts.insert((message.id, subscriber_id));
                }
            } else {
                dead.insert(*connection_id);
            }
        }
    }

    for (connection_id, _) in &watermarks {
        if dead.contains(connection_id) {
            continue;
        }
        hub.registry
            .advance_watermark(*connection_id, chat_id, top)
            .await;
    }

    for connection_id in dead {
        hub.disconnect(connection_id).await;
    }

    if !receipts.is_empty() {
        hub.repo().insert_views(receipts.into_iter().collect()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use shared::{config::Config, models::Message};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::*;
    use crate::repo::MockChatRepository;
    use crate::services::hub::StreamHub;

    fn message(id: i64, chat_id: i64, author_id: Uuid) -> Message {
        Message {
            id,
            chat_id,
            author_id,
            text: format!("message {id}"),
            reply_to: None,
            is_edited: false,
            is_pinned: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn attach(
        hub: &StreamHub,
        subscriber: Uuid,
        chat_id: i64,
        watermark: i64,
    ) -> (Uuid, mpsc::Receiver<crate::services::broadcaster::Envelope>) {
        let (connection, receiver) = hub.connect(subscriber).await;
        assert!(hub.registry.attach_chat(connection, chat_id, watermark).await);
        hub.rooms.insert(chat_id, connection).await;
        (connection, receiver)
    }

    #[tokio::test]
    async fn delivers_once_to_every_member_and_advances_watermarks() {
        let author = Uuid::new_v4();
        let mut repo = MockChatRepository::new();

        // Floor is min(100, 80) = 80; message 101 is above both watermarks.
        repo.expect_fetch_messages_after()
            .withf(|chat, after, _| *chat == 42 && *after == 80)
            .times(1)
            .returning(move |chat, _, _| Ok(vec![message(101, chat, author)]));
        // Second pass: both watermarks are at 101, nothing fresh.
        repo.expect_fetch_messages_after()
            .withf(|chat, after, _| *chat == 42 && *after == 101)
            .times(1)
            .returning(|_, _, _| Ok(vec![]));
        repo.expect_fetch_reactions().returning(|_| Ok(vec![]));
        repo.expect_fetch_views().returning(|_| Ok(vec![]));
        repo.expect_insert_views()
            .withf(|views| views.len() == 2 && views.iter().all(|(id, _)| *id == 101))
            .times(1)
            .returning(|views| Ok(views.len() as u64));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let (_conn_a, mut rx_a) = attach(&hub, Uuid::new_v4(), 42, 100).await;
        let (_conn_b, mut rx_b) = attach(&hub, Uuid::new_v4(), 42, 80).await;

        scan(&hub).await;
        scan(&hub).await;

        let event_a = rx_a.try_recv().expect("a receives the message");
        let event_b = rx_b.try_recv().expect("b receives the message");
        assert_eq!(event_a.event, "new_message");
        assert_eq!(event_a.data["id"], 101);
        assert_eq!(event_b.data["id"], 101);
        assert!(rx_a.try_recv().is_err(), "no duplicate on the second pass");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn skips_messages_a_fast_connection_already_has() {
        let author = Uuid::new_v4();
        let mut repo = MockChatRepository::new();

        // Floor is 80; ids 90 and 101 come back, but the connection at 100
        // must only see 101.
        repo.expect_fetch_messages_after()
            .returning(move |chat, _, _| {
                Ok(vec![message(90, chat, author), message(101, chat, author)])
            });
        repo.expect_fetch_reactions().returning(|_| Ok(vec![]));
        repo.expect_fetch_views().returning(|_| Ok(vec![]));
        repo.expect_insert_views().returning(|views| Ok(views.len() as u64));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let (_fast, mut rx_fast) = attach(&hub, Uuid::new_v4(), 1, 100).await;
        let (_slow, mut rx_slow) = attach(&hub, Uuid::new_v4(), 1, 80).await;

        scan(&hub).await;

        let fast_event = rx_fast.try_recv().expect("fast gets 101");
        assert_eq!(fast_event.data["id"], 101);
        assert!(rx_fast.try_recv().is_err());

        assert_eq!(rx_slow.try_recv().expect("slow gets 90").data["id"], 90);
        assert_eq!(rx_slow.try_recv().expect("slow gets 101").data["id"], 101);
    }

    #[tokio::test]
    async fn no_connections_means_no_queries() {
        // An empty room index never touches the repository; the mock panics
        // on any unexpected call.
        let repo = MockChatRepository::new();
        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));

        scan(&hub).await;
    }

    #[tokio::test]
    async fn author_gets_no_automatic_receipt() {
        let author = Uuid::new_v4();
        let mut repo = MockChatRepository::new();

        repo.expect_fetch_messages_after()
            .returning(move |chat, _, _| Ok(vec![message(5, chat, author)]));
        repo.expect_fetch_reactions().returning(|_| Ok(vec![]));
        repo.expect_fetch_views().returning(|_| Ok(vec![]));
        // Only the non-author subscriber lands in the receipt batch.
        repo.expect_insert_views()
            .withf(move |views| {
                views.len() == 1 && views.iter().all(|(_, user)| *user != author)
            })
            .times(1)
            .returning(|views| Ok(views.len() as u64));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let (_a, _rx_a) = attach(&hub, author, 9, 0).await;
        let (_b, _rx_b) = attach(&hub, Uuid::new_v4(), 9, 0).await;

        scan(&hub).await;
    }

    #[tokio::test]
    async fn dead_connection_is_reaped_during_scan() {
        let author = Uuid::new_v4();
        let mut repo = MockChatRepository::new();

        repo.expect_fetch_messages_after()
            .returning(move |chat, _, _| Ok(vec![message(11, chat, author)]));
        repo.expect_fetch_reactions().returning(|_| Ok(vec![]));
        repo.expect_fetch_views().returning(|_| Ok(vec![]));
        repo.expect_insert_views().returning(|views| Ok(views.len() as u64));

        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let (gone, rx_gone) = attach(&hub, Uuid::new_v4(), 3, 0).await;
        let (_alive, _rx_alive) = attach(&hub, Uuid::new_v4(), 3, 0).await;
        drop(rx_gone);

        scan(&hub).await;

        assert!(hub.registry.subscriber_of(gone).await.is_none());
        assert!(!hub.rooms.contains(3, gone).await);
    }
}
