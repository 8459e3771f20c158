//! Outbound event envelope and transport-level delivery rules.
//!
//! Serialization to the wire (an `event:` line, a `data:` line, a blank
//! line) is handled by axum's SSE response; this module owns what goes into
//! those frames and how dead transports are detected. Writes never block: a
//! full or closed channel is a failed write, and a failed write means the
//! connection is reaped, not buffered.

use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use metrics::counter;
use serde_json::Value;
use shared::models::StreamEvent;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::hub::SharedHub;

/// One event ready for a connection's transport.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub event: &'static str,
    pub data: Value,
}

impl Envelope {
    #[must_use]
    pub fn from_event(event: &StreamEvent) -> Self {
        Self {
            event: event.name(),
            data: event.payload(),
        }
    }

    /// Convert into the axum SSE frame.
    #[must_use]
    pub fn into_sse_event(self) -> Event {
        Event::default().event(self.event).data(self.data.to_string())
    }
}

/// Which registry a heartbeat task keeps alive.
#[derive(Debug, Clone, Copy)]
pub enum HeartbeatTarget {
    Stream(Uuid),
    ChatList(Uuid),
}

/// Per-connection heartbeat loop.
///
/// A failed heartbeat write is the primary mechanism by which half-closed
/// connections are detected and reaped.
pub fn spawn_heartbeat(hub: SharedHub, target: HeartbeatTarget) -> JoinHandle<()> {
    tokio::spawn(async move {
        let cadence = hub.config().stream.heartbeat_secs.max(5);
        let mut interval = tokio::time::interval(Duration::from_secs(cadence));
        interval.tick().await;
        let shutdown = hub.shutdown_token();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let beat = StreamEvent::Heartbeat { time: Utc::now() };
            let alive = match target {
                HeartbeatTarget::Stream(id) => {
                    if hub.registry.send(id, &beat).await {
                        true
                    } else {
                        hub.disconnect(id).await;
                        false
                    }
                }
                HeartbeatTarget::ChatList(id) => {
                    if hub.chat_list.send(id, &beat).await {
                        true
                    } else {
                        hub.chat_list.close(id).await;
                        false
                    }
                }
            };

            if !alive {
                counter!("tidemark_connections_reaped_total", "cause" => "heartbeat")
                    .increment(1);
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use shared::config::Config;

    use super::*;
    use crate::repo::MockChatRepository;
    use crate::services::hub::StreamHub;

    #[test]
    fn envelope_carries_event_name_and_payload() {
        let event = StreamEvent::MessageDeleted {
            message_id: 4,
            chat_id: 2,
        };
        let envelope = Envelope::from_event(&event);
        assert_eq!(envelope.event, "message_deleted");
        assert_eq!(envelope.data, json!({ "messageId": 4, "chatId": 2 }));
    }

    #[tokio::test]
    async fn heartbeat_task_stops_when_the_hub_shuts_down() {
        let repo = MockChatRepository::new();
        let hub = Arc::new(StreamHub::new(Arc::new(repo), Config::default()));
        let (connection, _rx) = hub.connect(Uuid::new_v4()).await;

        let handle = spawn_heartbeat(hub.clone(), HeartbeatTarget::Stream(connection));
        hub.shutdown();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task exits on shutdown")
            .expect("task joins cleanly");
    }
}
