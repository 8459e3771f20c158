use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A read-receipt row: one user has seen one message.
///
/// Insert-once per `(message_id, user_id)`; repeated "mark viewed" calls
/// never create duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct MessageView {
    pub message_id: i64,
    pub user_id: Uuid,
    pub viewed_at: DateTime<Utc>,
}

/// Read state of a message relative to one viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ViewSummary {
    /// For the author: has anyone else seen it. For everyone else: have *I*
    /// seen it.
    pub is_read: bool,

    /// Users other than the author who have viewed the message.
    pub viewed_by: Vec<Uuid>,

    /// Number of entries in `viewed_by`.
    pub view_count: usize,
}
