use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of an update-log entry.
///
/// Reaction entries are garbage-collected after a short retention window;
/// delete entries are cheap and retained for polling consumers to discover.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Delete,
    Reaction,
}

impl UpdateKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UpdateKind::Delete => "delete",
            UpdateKind::Reaction => "reaction",
        }
    }
}

impl TryFrom<&str> for UpdateKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "delete" => Ok(UpdateKind::Delete),
            "reaction" => Ok(UpdateKind::Reaction),
            other => Err(format!("unknown update kind: {other}")),
        }
    }
}

/// Ephemeral audit-trail row recording a delete or reaction change, written
/// by the write path and consumed by the update scanner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateLogEntry {
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: Uuid,
    pub kind: UpdateKind,
    pub created_at: DateTime<Utc>,
}

/// A chat member together with presence information.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct ChatParticipant {
    pub user_id: Uuid,
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Preview of the most recent message in a chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastMessage {
    pub id: i64,
    pub author_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// One entry in a user's ordered conversation list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub name: String,
    pub is_private: bool,
    pub last_message: Option<LastMessage>,

    /// Messages not authored by the user with no matching view row.
    pub unread_count: i64,
    pub participant_count: i64,
    pub pinned_count: i64,

    /// For private chats, whether the counterpart was seen recently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterpart_online: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_kind_round_trips_through_str() {
        assert_eq!(UpdateKind::try_from("delete"), Ok(UpdateKind::Delete));
        assert_eq!(UpdateKind::try_from("reaction"), Ok(UpdateKind::Reaction));
        assert_eq!(UpdateKind::Delete.as_str(), "delete");
        assert!(UpdateKind::try_from("edit").is_err());
    }
}
