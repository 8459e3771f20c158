//! Update/delete/edit/view scanner.
//!
//! Runs per connection against that connection's own delta cursor, which is
//! distinct from the message watermark. After a successful pass the cursor
//! advances to "now" unconditionally, even when nothing was found: a write
//! landing in the gap between query and advancement is caught on a later
//! pass of another scanner, never blocked on. On a failed pass the cursor
//! stays put and the whole window is retried next tick.

use std::{collections::BTreeSet, time::Duration};

use chrono::Utc;
use metrics::counter;
use shared::models::{StreamEvent, UpdateKind};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::services::{
    aggregators,
    hub::{SharedHub, StreamHub},
    registry::DeltaCursor,
};

pub fn spawn(hub: SharedHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(
            hub.config().stream.update_scan_interval_ms,
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

/// One pass over every (connection, chat) cursor. Failures are isolated per
/// connection and chat.
pub(crate) async fn scan(hub: &StreamHub) {
    for cursor in hub.registry.delta_snapshot().await {
        match scan_cursor(hub, &cursor).await {
            Ok(true) => {
                hub.registry
                    .advance_delta_cursor(cursor.connection_id, cursor.chat_id, Utc::now())
                    .await;
            }
            Ok(false) => {
                // Transport gone; reap and move on.
                hub.disconnect(cursor.connection_id).await;
            }
            Err(err) => {
                warn!(
                    chat_id = cursor.chat_id,
                    connection_id = %cursor.connection_id,
                    error = %err,
                    "update scan failed; will retry next tick"
                );
            }
        }
    }
}

/// Returns `Ok(false)` when the connection's transport is dead.
async fn scan_cursor(hub: &StreamHub, cursor: &DeltaCursor) -> Result<bool, sqlx::Error> {
    let DeltaCursor {
        connection_id,
        subscriber_id,
        chat_id,
        since,
    } = *cursor;

    // (a) Deletions.
    let deletions = hub
        .repo()
        .fetch_updates_since(chat_id, since, UpdateKind::Delete)
        .await?;
    for entry in deletions {
        let event = StreamEvent::MessageDeleted {
            message_id: entry.message_id,
            chat_id,
        };
        if !hub.registry.send(connection_id, &event).await {
            return Ok(false);
        }
        counter!("tidemark_events_delivered_total", "event" => "message_deleted").increment(1);
    }

    // (b) Reactions: the audit log, unioned with reaction rows created since
    // the cursor in case a log write raced, deduplicated by message.
    let logged = hub
        .repo()
        .fetch_updates_since(chat_id, since, UpdateKind::Reaction)
        .await?;
    let recent = hub.repo().fetch_reactions_since(chat_id, since).await?;
    let touched: BTreeSet<i64> = logged
        .iter()
        .map(|entry| entry.message_id)
        .chain(recent.iter().map(|row| row.message_id))
        .collect();
    for message_id in touched {
        // Full recomputation, not a diff.
        let rows = hub.repo().fetch_reactions(message_id).await?;
        let event = StreamEvent::ReactionUpdate {
            message_id,
            chat_id,
            reactions: aggregators::aggregate_reactions(&rows, subscriber_id),
        };
        if !hub.registry.send(connection_id, &event).await {
            return Ok(false);
        }
        counter!("tidemark_events_delivered_total", "event" => "reaction_update").increment(1);
    }

    // (c) Edits.
    let edited = hub.repo().fetch_edited_since(chat_id, since).await?;
    for message in edited {
        let event = StreamEvent::MessageEdited {
            message_id: message.id,
            chat_id,
            text: message.text,
            updated_at: message.updated_at,
        };
        if !hub.registry.send(connection_id, &event).await {
            return Ok(false);
        }
        counter!("tidemark_events_delivered_total", "event" => "message_edited").increment(1);
    }

    // (d) View updates, aggregated to the full viewer list per message.
    let fresh_views = hub.repo().fetch_view_updates_since(chat_id, since).await?;
    let viewed: BTreeSet<i64> = fresh_views.iter().map(|row| row.message_id).collect();
    for message_id in viewed {
        let Some(message) = hub.repo().fetch_message(message_id).await? else {
            // Deleted since; the deletion event covers it.
            continue;
        };
        let rows = hub.repo().fetch_views(message_id).await?;
        let summary = aggregators::aggregate_views(&rows, message.author_id, subscriber_id);
        let event = StreamEvent::ViewUpdate {
            message_id,
            chat_id,
            is_read: summary.is_read,
            viewed_by: summary.viewed_by,
            view_count: summary.view_count,
        };
        if !hub.registry.send(connection_id, &event).await {
            return Ok(false);
        }
        counter!("tidemark_events_delivered_total", "event" => "view_update").increment(1);
    }

    Ok(true)
}
