//! The stream hub: one explicitly constructed service instance owning the
//! connection registries, the room index, and the repository handle.
//!
//! Handlers and detectors all go through this type; there is no process-wide
//! mutable state. Teardown cancels the shutdown token, which every periodic
//! task selects on.

use std::{collections::HashSet, sync::Arc};

use metrics::counter;
use shared::{
    config::Config,
    models::{EnrichedMessage, InitialMessages, Message, MessagePage, ReactionSummary},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{
    aggregators,
    broadcaster::Envelope,
    registry::{ChatListRegistry, ConnectionRegistry},
    rooms::ChatRoomIndex,
};
use crate::repo::ChatRepository;

/// Errors surfaced by hub operations.
///
/// `NotFound` and `Validation` are caller mistakes and map to 4xx; only
/// `Database` is a transient server-side failure.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("validation error: {0}")]
    Validation(String),
}

pub type StreamResult<T> = Result<T, StreamError>;

pub type SharedHub = Arc<StreamHub>;

pub struct StreamHub {
    pub registry: ConnectionRegistry,
    pub rooms: ChatRoomIndex,
    pub chat_list: ChatListRegistry,
    repo: Arc<dyn ChatRepository>,
    config: Config,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub").finish()
    }
}

impl StreamHub {
    #[must_use]
    pub fn new(repo: Arc<dyn ChatRepository>, config: Config) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: ChatRoomIndex::new(),
            chat_list: ChatListRegistry::new(),
            repo,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn repo(&self) -> &Arc<dyn ChatRepository> {
        &self.repo
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every periodic task and heartbeat.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Open a message-stream connection; the receiver feeds the SSE response.
    pub async fn connect(&self, subscriber_id: Uuid) -> (Uuid, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(self.config.stream.channel_capacity);
        let connection_id = self.registry.open(subscriber_id, sender).await;
        counter!("tidemark_connections_opened_total", "kind" => "stream").increment(1);
        (connection_id, receiver)
    }

    /// Open a conversation-list connection.
    pub async fn connect_chat_list(&self, subscriber_id: Uuid) -> (Uuid, mpsc::Receiver<Envelope>) {
        let (sender, receiver) = mpsc::channel(self.config.stream.channel_capacity);
        let connection_id = self.chat_list.open(subscriber_id, sender).await;
        counter!("tidemark_connections_opened_total", "kind" => "chat_list").increment(1);
        (connection_id, receiver)
    }

    /// Remove a connection from the registry and every room it joined.
    /// In-flight scans for other connections are unaffected.
    pub async fn disconnect(&self, connection_id: Uuid) {
        if self.registry.close(connection_id).await.is_some() {
            self.rooms.retract(connection_id).await;
            debug!(%connection_id, "connection closed");
        }
    }

    /// Attach a connection to a chat and compute its initial backlog.
    ///
    /// A zero watermark means "first open": the connection is treated as
    /// caught up at the chat's newest id and receives the most recent page.
    /// A positive watermark means "reconnect": only messages above it are
    /// returned, capped at the page size.
    pub async fn join_chat(
        &self,
        connection_id: Uuid,
        chat_id: i64,
        requested_watermark: i64,
    ) -> StreamResult<InitialMessages> {
        if requested_watermark < 0 {
            return Err(StreamError::Validation(
                "last message id must not be negative".to_string(),
            ));
        }
        if !self.repo.chat_exists(chat_id).await? {
            return Err(StreamError::NotFound(format!("chat {chat_id} not found")));
        }
        let subscriber_id = self
            .registry
            .subscriber_of(connection_id)
            .await
            .ok_or_else(|| StreamError::NotFound("connection not found".to_string()))?;

        let page_size = self.config.stream.page_size;
        let (messages, has_more, watermark) = if requested_watermark == 0 {
            let latest = self.repo.latest_message_id(chat_id).await?;
            let mut page = self
                .repo
                .fetch_messages_before(chat_id, i64::MAX, page_size)
                .await?;
            page.reverse();
            let has_more = match page.first() {
                Some(oldest) => self.repo.has_messages_before(chat_id, oldest.id).await?,
                None => false,
            };
            // A message can commit between the two queries above. Seeding
            // from whichever id is higher keeps the invariant that a message
            // is either in the backlog or above the watermark, never both.
            let watermark = latest.max(page.last().map_or(0, |m| m.id));
            (page, has_more, watermark)
        } else {
            let mut page = self
                .repo
                .fetch_messages_after(chat_id, requested_watermark, page_size + 1)
                .await?;
            let has_more = page.len() as i64 > page_size;
            if has_more {
                page.truncate(usize::try_from(page_size).unwrap_or(usize::MAX));
            }
            let watermark = page.last().map_or(requested_watermark, |m| m.id);
            (page, has_more, watermark)
        };

        let total_messages = self.repo.count_messages(chat_id).await?;

        let mut enriched = Vec::with_capacity(messages.len());
        for message in messages {
            enriched.push(self.enrich_for(message, subscriber_id).await?);
        }

        if !self
            .registry
            .attach_chat(connection_id, chat_id, watermark)
            .await
        {
            return Err(StreamError::NotFound(
                "connection closed during join".to_string(),
            ));
        }
        self.rooms.insert(chat_id, connection_id).await;

        Ok(InitialMessages {
            loaded_count: enriched.len(),
            messages: enriched,
            has_more,
            total_messages,
        })
    }

    /// Detach a connection from a chat without closing it.
    pub async fn leave_chat(&self, connection_id: Uuid, chat_id: i64) -> StreamResult<()> {
        if self.registry.subscriber_of(connection_id).await.is_none() {
            return Err(StreamError::NotFound("connection not found".to_string()));
        }
        self.rooms.remove(chat_id, connection_id).await;
        self.registry.detach_chat(connection_id, chat_id).await;
        Ok(())
    }

    /// Explicit pull-based backfill below a boundary id. Not part of any
    /// polling loop.
    pub async fn older_messages(
        &self,
        chat_id: i64,
        before_id: i64,
        limit: i64,
        viewer: Uuid,
    ) -> StreamResult<MessagePage> {
        if limit <= 0 {
            return Err(StreamError::Validation(
                "limit must be positive".to_string(),
            ));
        }
        if !self.repo.chat_exists(chat_id).await? {
            return Err(StreamError::NotFound(format!("chat {chat_id} not found")));
        }

        let limit = limit.min(self.config.stream.page_size);
        let mut page = self
            .repo
            .fetch_messages_before(chat_id, before_id, limit)
            .await?;
        // Heuristic: a full page means there is probably more.
        let has_more = page.len() as i64 == limit;
        page.reverse();

        let mut messages = Vec::with_capacity(page.len());
        for message in page {
            messages.push(self.enrich_for(message, viewer).await?);
        }

        Ok(MessagePage { messages, has_more })
    }

    /// Record view rows for the given messages. Idempotent; duplicates are
    /// dropped both in the batch and against existing rows.
    pub async fn mark_viewed(
        &self,
        chat_id: i64,
        user_id: Uuid,
        message_ids: &[i64],
    ) -> StreamResult<u64> {
        if message_ids.is_empty() {
            return Err(StreamError::Validation(
                "message_ids must not be empty".to_string(),
            ));
        }
        if !self.repo.chat_exists(chat_id).await? {
            return Err(StreamError::NotFound(format!("chat {chat_id} not found")));
        }

        let unique: HashSet<i64> = message_ids.iter().copied().collect();
        let views: Vec<(i64, Uuid)> = unique.into_iter().map(|id| (id, user_id)).collect();
        let written = self.repo.insert_views(views).await?;
        Ok(written)
    }

    /// Record view rows for every unread message in the chat.
    pub async fn mark_all_viewed(&self, chat_id: i64, user_id: Uuid) -> StreamResult<u64> {
        if !self.repo.chat_exists(chat_id).await? {
            return Err(StreamError::NotFound(format!("chat {chat_id} not found")));
        }
        Ok(self.repo.mark_chat_viewed(chat_id, user_id).await?)
    }

    /// Aggregated reactions for one message, shaped for the viewer.
    pub async fn reactions_for(
        &self,
        message_id: i64,
        viewer: Uuid,
    ) -> StreamResult<ReactionSummary> {
        if self.repo.fetch_message(message_id).await?.is_none() {
            return Err(StreamError::NotFound(format!(
                "message {message_id} not found"
            )));
        }
        let rows = self.repo.fetch_reactions(message_id).await?;
        Ok(aggregators::aggregate_reactions(&rows, viewer))
    }

    /// Fetch reaction and view rows for a message and fold them for one
    /// viewer.
    pub async fn enrich_for(
        &self,
        message: Message,
        viewer: Uuid,
    ) -> Result<EnrichedMessage, sqlx::Error> {
        let reactions = self.repo.fetch_reactions(message.id).await?;
        let views = self.repo.fetch_views(message.id).await?;
        Ok(aggregators::enrich_message(message, &reactions, &views, viewer))
    }
}
