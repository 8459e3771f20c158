//! Domain models shared between the server core and its wire surface.

pub mod chat;
pub mod events;
pub mod message;
pub mod reaction;
pub mod view;

pub use chat::{ChatParticipant, ChatSummary, LastMessage, UpdateKind, UpdateLogEntry};
pub use events::{ChatListPayload, InitialMessages, MessagePage, StreamEvent};
pub use message::{EnrichedMessage, Message};
pub use reaction::{Reaction, ReactionGroup, ReactionSummary};
pub use view::{MessageView, ViewSummary};
