//! # matcha-shared
//!
//! Types shared between the Matcha chat server and its storage layer:
//! user and room identifiers, the message delivery-state model, and the
//! tagged wire events exchanged over the real-time channel.

pub mod events;
pub mod types;

pub use events::{ClientEvent, ServerEvent};
pub use types::{room_id, Message, MessageStatus, RoomId, UserId};
