use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{ChatParticipant, Message, MessageView, Reaction, UpdateKind, UpdateLogEntry};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ChatRepository, ChatSummaryRow};

/// Postgres-backed [`ChatRepository`].
#[derive(Debug, Clone)]
pub struct PgChatRepository {
    pool: PgPool,
}

impl PgChatRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const MESSAGE_COLUMNS: &str = "id, chat_id, author_id, text, reply_to, is_edited, is_pinned, \
     created_at, updated_at";

#[async_trait]
impl ChatRepository for PgChatRepository {
    async fn chat_exists(&self, chat_id: i64) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM chats WHERE id = $1)")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn fetch_messages_after(
        &self,
        chat_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = $1 AND id > $2
             ORDER BY id ASC
             LIMIT $3"
        ))
        .bind(chat_id)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_messages_before(
        &self,
        chat_id: i64,
        before_id: i64,
        limit: i64,
    ) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = $1 AND id < $2
             ORDER BY id DESC
             LIMIT $3"
        ))
        .bind(chat_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_message(&self, message_id: i64) -> Result<Option<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn latest_message_id(&self, chat_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM messages WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn has_messages_before(&self, chat_id: i64, id: i64) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE chat_id = $1 AND id < $2)")
            .bind(chat_id)
            .bind(id)
            .fetch_one(&self.pool)
            .await
    }

    async fn count_messages(&self, chat_id: i64) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn fetch_reactions(&self, message_id: i64) -> Result<Vec<Reaction>, sqlx::Error> {
        sqlx::query_as::<_, Reaction>(
            "SELECT message_id, user_id, emoji, created_at
             FROM reactions
             WHERE message_id = $1
             ORDER BY created_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_reactions_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reaction>, sqlx::Error> {
        sqlx::query_as::<_, Reaction>(
            "SELECT r.message_id, r.user_id, r.emoji, r.created_at
             FROM reactions r
             JOIN messages m ON m.id = r.message_id
             WHERE m.chat_id = $1 AND r.created_at > $2",
        )
        .bind(chat_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
    }

    async fn insert_views(&self, views: Vec<(i64, Uuid)>) -> Result<u64, sqlx::Error> {
        if views.is_empty() {
            return Ok(0);
        }

        let (message_ids, user_ids): (Vec<i64>, Vec<Uuid>) = views.into_iter().unzip();
        let result = sqlx::query(
            "INSERT INTO message_views (message_id, user_id, viewed_at)
             SELECT t.message_id, t.user_id, NOW()
             FROM UNNEST($1::BIGINT[], $2::UUID[]) AS t(message_id, user_id)
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(&message_ids)
        .bind(&user_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_chat_viewed(&self, chat_id: i64, user_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO message_views (message_id, user_id, viewed_at)
             SELECT m.id, $2, NOW()
             FROM messages m
             WHERE m.chat_id = $1 AND m.author_id <> $2
             ON CONFLICT (message_id, user_id) DO NOTHING",
        )
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn fetch_views(&self, message_id: i64) -> Result<Vec<MessageView>, sqlx::Error> {
        sqlx::query_as::<_, MessageView>(
            "SELECT message_id, user_id, viewed_at
             FROM message_views
             WHERE message_id = $1
             ORDER BY viewed_at ASC",
        )
        .bind(message_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_view_updates_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<MessageView>, sqlx::Error> {
        sqlx::query_as::<_, MessageView>(
            "SELECT v.message_id, v.user_id, v.viewed_at
             FROM message_views v
             JOIN messages m ON m.id = v.message_id
             WHERE m.chat_id = $1 AND v.viewed_at > $2",
        )
        .bind(chat_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_updates_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
        kind: UpdateKind,
    ) -> Result<Vec<UpdateLogEntry>, sqlx::Error> {
        #[derive(sqlx::FromRow)]
        struct UpdateRow {
            chat_id: i64,
            message_id: i64,
            user_id: Uuid,
            kind: String,
            created_at: DateTime<Utc>,
        }

        let rows = sqlx::query_as::<_, UpdateRow>(
            "SELECT chat_id, message_id, user_id, kind, created_at
             FROM update_log
             WHERE chat_id = $1 AND kind = $2 AND created_at > $3
             ORDER BY created_at ASC",
        )
        .bind(chat_id)
        .bind(kind.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let kind = UpdateKind::try_from(row.kind.as_str())
                    .map_err(|err| sqlx::Error::Decode(err.into()))?;
                Ok(UpdateLogEntry {
                    chat_id: row.chat_id,
                    message_id: row.message_id,
                    user_id: row.user_id,
                    kind,
                    created_at: row.created_at,
                })
            })
            .collect()
    }

    async fn fetch_edited_since(
        &self,
        chat_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as::<_, Message>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = $1 AND is_edited AND updated_at > $2
             ORDER BY id ASC"
        ))
        .bind(chat_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_chat_participants(
        &self,
        chat_id: i64,
    ) -> Result<Vec<ChatParticipant>, sqlx::Error> {
        sqlx::query_as::<_, ChatParticipant>(
            "SELECT user_id, last_seen_at FROM chat_participants WHERE chat_id = $1",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn fetch_chat_summaries(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ChatSummaryRow>, sqlx::Error> {
        sqlx::query_as::<_, ChatSummaryRow>(
            "SELECT c.id AS chat_id,
                    c.name,
                    c.is_private,
                    lm.id AS last_message_id,
                    lm.author_id AS last_author_id,
                    lm.text AS last_text,
                    lm.created_at AS last_created_at,
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.chat_id = c.id
                       AND m.author_id <> $1
                       AND NOT EXISTS (SELECT 1 FROM message_views v
                                       WHERE v.message_id = m.id AND v.user_id = $1)
                    ) AS unread_count,
                    (SELECT COUNT(*) FROM chat_participants p
                     WHERE p.chat_id = c.id) AS participant_count,
                    (SELECT COUNT(*) FROM messages m
                     WHERE m.chat_id = c.id AND m.is_pinned) AS pinned_count,
                    (SELECT p.last_seen_at FROM chat_participants p
                     WHERE p.chat_id = c.id AND p.user_id <> $1 AND c.is_private
                     ORDER BY p.last_seen_at DESC NULLS LAST
                     LIMIT 1) AS counterpart_last_seen
             FROM chats c
             JOIN chat_participants me ON me.chat_id = c.id AND me.user_id = $1
             LEFT JOIN LATERAL (
                 SELECT id, author_id, text, created_at
                 FROM messages
                 WHERE chat_id = c.id
                 ORDER BY id DESC
                 LIMIT 1
             ) lm ON TRUE",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn delete_reaction_log_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM update_log WHERE kind = 'reaction' AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
