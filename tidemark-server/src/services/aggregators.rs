//! Pure folds from raw rows to per-viewer response shapes.
//!
//! Viewer identity is always a parameter here; nothing viewer-specific is
//! ever cached server-side.

use chrono::{DateTime, Utc};
use shared::models::{
    ChatSummary, EnrichedMessage, LastMessage, Message, MessageView, Reaction, ReactionGroup,
    ReactionSummary, ViewSummary,
};
use uuid::Uuid;

use crate::repo::ChatSummaryRow;

/// Fold raw reaction rows into the per-viewer aggregate, keyed by emoji.
#[must_use]
pub fn aggregate_reactions(rows: &[Reaction], viewer: Uuid) -> ReactionSummary {
    let mut summary = ReactionSummary::new();
    for row in rows {
        let group = summary
            .entry(row.emoji.clone())
            .or_insert_with(|| ReactionGroup {
                count: 0,
                user_ids: Vec::new(),
                has_reacted: false,
            });
        group.count += 1;
        group.user_ids.push(row.user_id);
        if row.user_id == viewer {
            group.has_reacted = true;
        }
    }
    summary
}

/// Fold view rows into read state relative to one viewer.
///
/// The author's own view row never counts; for the author "read" means
/// someone else saw it, for anyone else it means they saw it themselves.
#[must_use]
pub fn aggregate_views(rows: &[MessageView], author: Uuid, viewer: Uuid) -> ViewSummary {
    let viewed_by: Vec<Uuid> = rows
        .iter()
        .filter(|row| row.user_id != author)
        .map(|row| row.user_id)
        .collect();

    let is_read = if viewer == author {
        !viewed_by.is_empty()
    } else {
        viewed_by.contains(&viewer)
    };

    ViewSummary {
        view_count: viewed_by.len(),
        viewed_by,
        is_read,
    }
}

/// Combine a message with its reaction and view rows into the shape one
/// viewer receives.
#[must_use]
pub fn enrich_message(
    message: Message,
    reactions: &[Reaction],
    views: &[MessageView],
    viewer: Uuid,
) -> EnrichedMessage {
    let reactions = aggregate_reactions(reactions, viewer);
    let views = aggregate_views(views, message.author_id, viewer);
    EnrichedMessage {
        message,
        reactions,
        is_read: views.is_read,
        viewed_by: views.viewed_by,
        view_count: views.view_count,
    }
}

/// Whether a "last seen" timestamp falls within the recency window.
#[must_use]
pub fn is_online(last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>, window_secs: i64) -> bool {
    last_seen.is_some_and(|seen| (now - seen).num_seconds() < window_secs)
}

/// Project raw summary rows into the ordered conversation list: chats with
/// pinned messages first, then by last-message timestamp descending.
#[must_use]
pub fn project_chat_list(
    rows: Vec<ChatSummaryRow>,
    now: DateTime<Utc>,
    online_window_secs: i64,
) -> Vec<ChatSummary> {
    let mut chats: Vec<ChatSummary> = rows
        .into_iter()
        .map(|row| {
            let last_message = match (
                row.last_message_id,
                row.last_author_id,
                row.last_text,
                row.last_created_at,
            ) {
                (Some(id), Some(author_id), Some(text), Some(created_at)) => Some(LastMessage {
                    id,
                    author_id,
                    text,
                    created_at,
                }),
                _ => None,
            };

            let counterpart_online = row
                .is_private
                .then(|| is_online(row.counterpart_last_seen, now, online_window_secs));

            ChatSummary {
                chat_id: row.chat_id,
                name: row.name,
                is_private: row.is_private,
                last_message,
                unread_count: row.unread_count,
                participant_count: row.participant_count,
                pinned_count: row.pinned_count,
                counterpart_online,
            }
        })
        .collect();

    chats.sort_by(|a, b| {
        let pinned = (b.pinned_count > 0).cmp(&(a.pinned_count > 0));
        pinned.then_with(|| {
            let a_time = a.last_message.as_ref().map(|m| m.created_at);
            let b_time = b.last_message.as_ref().map(|m| m.created_at);
            b_time.cmp(&a_time)
        })
    });

    chats
}
