//! Repository seam over the relational store.
//!
//! The streaming core never touches SQL directly; everything goes through
//! [`ChatRepository`] so the detectors can be exercised against a mock. The
//! Postgres implementation lives in [`postgres`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{ChatParticipant, Message, MessageView, Reaction, UpdateKind, UpdateLogEntry};
use uuid::Uuid;

pub mod postgres;

pub use postgres::PgChatRepository;

/// Raw conversation-summary row as the store returns it, before per-viewer
/// projection.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChatSummaryRow {
    pub chat_id: i64,
    pub name: String,
    pub is_private: bool,
    pub last_message_id: Option<i64>,
    pub last_author_id: Option<Uuid>,
    pub last_text: Option<String>,
    pub last_created_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub participant_count: i64,
    pub pinned_count: i64,
    pub counterpart_last_seen: Option<DateTime<Utc>>,
}

/// Read/write operations the streaming core needs from the store.
///
/// All message queries are chat-scoped; `id` is the chat-scoped monotonic
/// ordering key the watermarks are measured against.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Whether the chat exists at all.
    async fn chat_exists(&self, chat_id: i64) -> Result<bool, sqlx::Error>;

    /// Messages with `id > after_id`, ascending, capped at `limit`.
    async fn fetch_messages_after(
        &self,
        chat_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error>;

    /// Messages with `id < before_id`, descending, capped at `limit`.
    async fn fetch_messages_before(
        &self,
        chat_id: i64,
        before_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error>;

    /// A single message by id.
    async fn fetch_message(&self, message_id: i64) -> Result<Option<Message>, sqlx::Error>;

    /// Highest message id in the chat, or 0 when empty.
    async fn latest_message_id(&self, chat_id: i64) -> Result<i64, sqlx::Error>;

    /// Whether any message exists below the given id.
    async fn has_messages_before(&self, chat_id: i64, id: i64) -> Result<bool, sqlx::Error>;

    /// Total message count in the chat.
    async fn count_messages(&self, chat_id: i64) -> Result<i64, sqlx::Error>;

    /// All reaction rows for one message.
    async fn fetch_reactions(&self, message_id: i64) -> Result<Vec<Reaction>, sqlx::Error>;

    /// Reaction rows in the chat created after the timestamp. Scanned
    /// alongside the reaction audit log.
    async fn fetch_reactions_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reaction>, sqlx::Error>;

    /// Batch-insert view rows; existing `(message_id, user_id)` pairs are
    /// left untouched. Returns the number of rows actually written.
    async fn insert_views(&self, views: Vec<(i64, Uuid)>) -> Result<u64, sqlx::Error>;

    /// Insert view rows for every message in the chat the user has not
    /// authored and not yet viewed. Returns the number of rows written.
    async fn mark_chat_viewed(&self, chat_id: i64, user_id: Uuid) -> Result<u64, sqlx::Error>;

    /// All view rows for one message.
    async fn fetch_views(&self, message_id: i64) -> Result<Vec<MessageView>, sqlx::Error>;

    /// View rows in the chat created after the timestamp.
    async fn fetch_view_updates_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<MessageView>, sqlx::Error>;

    /// Audit-log entries of one kind in the chat after the timestamp.
    async fn fetch_updates_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
        kind: UpdateKind,
    ) -> Result<Vec<UpdateLogEntry>, sqlx::Error>;

    /// Edited messages whose `updated_at` is after the timestamp.
    async fn fetch_edited_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, sqlx::Error>;

    /// Members of the chat with presence timestamps.
    async fn fetch_chat_participants(
        &self,
        chat_id: i64,
    ) -> Result<Vec<ChatParticipant>, sqlx::Error>;

    /// One summary row per chat the user participates in.
    async fn fetch_chat_summaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ChatSummaryRow>, sqlx::Error>;

    /// Drop reaction-type audit rows created before the cutoff. Returns the
    /// number of rows removed.
    async fn delete_reaction_log_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>;
}
