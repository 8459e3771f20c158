use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::reaction::ReactionSummary;

/// A single chat message as stored in the relational store.
///
/// Within one chat, `id` strictly increases with insertion order; that
/// ordering key is what the per-connection watermarks are measured against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Message {
    /// Chat-scoped monotonic ordering key.
    pub id: i64,

    /// The chat this message belongs to.
    pub chat_id: i64,

    /// The user who authored the message.
    pub author_id: Uuid,

    /// Message body.
    pub text: String,

    /// Id of the message this one replies to, if any.
    pub reply_to: Option<i64>,

    /// Whether the message has been edited after creation.
    pub is_edited: bool,

    /// Whether the message is pinned in its chat.
    pub is_pinned: bool,

    /// When the message was created.
    pub created_at: DateTime<Utc>,

    /// When the message was last modified.
    pub updated_at: DateTime<Utc>,
}

/// A message enriched for one specific viewer.
///
/// Reaction `has_reacted` flags and read state depend on the requesting
/// identity, so this shape is always computed on demand and never cached
/// server-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedMessage {
    #[serde(flatten)]
    pub message: Message,

    /// Per-viewer reaction aggregate, keyed by emoji.
    pub reactions: ReactionSummary,

    /// Read state relative to the viewer (see [`super::view::ViewSummary`]).
    pub is_read: bool,

    /// Users other than the author who have viewed the message.
    pub viewed_by: Vec<Uuid>,

    /// Number of entries in `viewed_by`.
    pub view_count: usize,
}
