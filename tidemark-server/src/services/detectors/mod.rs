//! Periodic delta detectors.
//!
//! Each detector runs as its own independently scheduled task, so a slow
//! scan in one dimension never delays another. A database call that hangs
//! stalls only its own cycle. All loops stop when the hub's shutdown token
//! is cancelled.

pub mod cleanup;
pub mod new_message;
pub mod updates;

use tokio::task::JoinHandle;

use super::{chat_list, hub::SharedHub};

/// Spawn every periodic task: the three scanners plus the chat-list
/// projector.
pub fn spawn_all(hub: &SharedHub) -> Vec<JoinHandle<()>> {
    vec![
        new_message::spawn(hub.clone()),
        updates::spawn(hub.clone()),
        cleanup::spawn(hub.clone()),
        chat_list::spawn(hub.clone()),
    ]
}
