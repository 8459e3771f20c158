use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use super::chat::ChatSummary;
use super::message::EnrichedMessage;
use super::reaction::ReactionSummary;

/// Initial backlog delivered on joining a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InitialMessages {
    /// Oldest-first page of recent messages.
    pub messages: Vec<EnrichedMessage>,
    /// Whether messages older than this page exist.
    pub has_more: bool,
    /// Total message count in the chat.
    pub total_messages: i64,
    /// Convenience: `messages.len()`.
    pub loaded_count: usize,
}

/// A pull-based backfill page of messages older than a boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePage {
    /// Oldest-first page.
    pub messages: Vec<EnrichedMessage>,
    /// Heuristic: true when the page came back full.
    pub has_more: bool,
}

/// Full conversation-list recomputation pushed to a list watcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatListPayload {
    pub chats: Vec<ChatSummary>,
}

/// Every event the stream transport can carry.
///
/// On the wire each event becomes an SSE frame: an `event:` line carrying
/// [`StreamEvent::name`] and a `data:` line carrying the JSON payload,
/// terminated by a blank line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected {
        connection_id: Uuid,
    },
    JoinedChat {
        chat_id: i64,
    },
    InitialMessages(InitialMessages),
    OlderMessages(MessagePage),
    NewMessage(EnrichedMessage),
    ReactionUpdate {
        message_id: i64,
        chat_id: i64,
        reactions: ReactionSummary,
    },
    ViewUpdate {
        message_id: i64,
        chat_id: i64,
        is_read: bool,
        viewed_by: Vec<Uuid>,
        view_count: usize,
    },
    MessageEdited {
        message_id: i64,
        chat_id: i64,
        text: String,
        updated_at: DateTime<Utc>,
    },
    MessageDeleted {
        message_id: i64,
        chat_id: i64,
    },
    ChatList(ChatListPayload),
    Heartbeat {
        time: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    /// The SSE event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Connected { .. } => "connected",
            StreamEvent::JoinedChat { .. } => "joined_chat",
            StreamEvent::InitialMessages(_) => "initial_messages",
            StreamEvent::OlderMessages(_) => "older_messages",
            StreamEvent::NewMessage(_) => "new_message",
            StreamEvent::ReactionUpdate { .. } => "reaction_update",
            StreamEvent::ViewUpdate { .. } => "view_update",
            StreamEvent::MessageEdited { .. } => "message_edited",
            StreamEvent::MessageDeleted { .. } => "message_deleted",
            StreamEvent::ChatList(_) => "chat_list",
            StreamEvent::Heartbeat { .. } => "heartbeat",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// The JSON payload for the `data:` line.
    #[must_use]
    pub fn payload(&self) -> Value {
        let serialized = match self {
            StreamEvent::Connected { connection_id } => {
                Ok(json!({ "connectionId": connection_id }))
            }
            StreamEvent::JoinedChat { chat_id } => Ok(json!({ "chatId": chat_id })),
            StreamEvent::InitialMessages(payload) => serde_json::to_value(payload),
            StreamEvent::OlderMessages(payload) => serde_json::to_value(payload),
            StreamEvent::NewMessage(payload) => serde_json::to_value(payload),
            StreamEvent::ReactionUpdate {
                message_id,
                chat_id,
                reactions,
            } => serde_json::to_value(reactions).map(|reactions| {
                json!({
                    "messageId": message_id,
                    "chatId": chat_id,
                    "reactions": reactions,
                })
            }),
            StreamEvent::ViewUpdate {
                message_id,
                chat_id,
                is_read,
                viewed_by,
                view_count,
            } => Ok(json!({
                "messageId": message_id,
                "chatId": chat_id,
                "isRead": is_read,
                "viewedBy": viewed_by,
                "viewCount": view_count,
            })),
            StreamEvent::MessageEdited {
                message_id,
                chat_id,
                text,
                updated_at,
            } => Ok(json!({
                "messageId": message_id,
                "chatId": chat_id,
                "text": text,
                "updatedAt": updated_at,
            })),
            StreamEvent::MessageDeleted {
                message_id,
                chat_id,
            } => Ok(json!({ "messageId": message_id, "chatId": chat_id })),
            StreamEvent::ChatList(payload) => serde_json::to_value(payload),
            StreamEvent::Heartbeat { time } => Ok(json!({ "time": time })),
            StreamEvent::Error { message } => Ok(json!({ "message": message })),
        };

        serialized.unwrap_or_else(|_| json!({ "error": "serialization_failed" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_contract() {
        let event = StreamEvent::MessageDeleted {
            message_id: 9,
            chat_id: 3,
        };
        assert_eq!(event.name(), "message_deleted");
        assert_eq!(event.payload(), json!({ "messageId": 9, "chatId": 3 }));
    }

    #[test]
    fn heartbeat_payload_carries_time() {
        let event = StreamEvent::Heartbeat { time: Utc::now() };
        assert_eq!(event.name(), "heartbeat");
        assert!(event.payload().get("time").is_some());
    }
}
