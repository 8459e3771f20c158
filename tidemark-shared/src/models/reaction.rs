use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A raw reaction row: one user, one emoji, one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Reaction {
    pub message_id: i64,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

/// One emoji's aggregate on a message, shaped for a specific viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReactionGroup {
    /// Number of users who reacted with this emoji.
    pub count: usize,

    /// The users behind `count`.
    pub user_ids: Vec<Uuid>,

    /// Whether the requesting viewer is among them.
    pub has_reacted: bool,
}

/// Aggregated reactions for a message, keyed by emoji.
///
/// A `BTreeMap` keeps the wire shape deterministic across recomputations.
pub type ReactionSummary = BTreeMap<String, ReactionGroup>;
