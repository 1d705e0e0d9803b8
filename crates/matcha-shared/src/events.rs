//! Wire events for the real-time channel.
//!
//! Frames are JSON text of the form `{"event": <name>, "data": <payload>}`.
//! Event names are the wire contract shared with the browser client; serde
//! validates every payload at the boundary, so a malformed frame fails to
//! parse instead of reaching a handler.

use serde::{Deserialize, Serialize};

use crate::types::{Message, UserId};

/// Events a client may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Subscribe to the room shared with `target_user_id` and trigger the
    /// delivered-scan for pending messages.
    #[serde(rename_all = "camelCase")]
    JoinChat { target_user_id: UserId },

    /// Request a fresh snapshot of all online users.
    GetOnlineUsers,

    #[serde(rename_all = "camelCase")]
    Typing { target_user_id: UserId },

    #[serde(rename_all = "camelCase")]
    StopTyping { target_user_id: UserId },

    #[serde(rename_all = "camelCase")]
    SendMessage { target_user_id: UserId, text: String },

    /// Acknowledge everything the counterpart sent as seen.
    #[serde(rename_all = "camelCase")]
    MarkSeen { target_user_id: UserId },
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full snapshot of currently online users.
    OnlineUsersList(Vec<UserId>),

    /// Presence delta: a user gained their first live connection.
    UserOnline(UserId),

    /// Presence delta: a user lost their last live connection.
    UserOffline(UserId),

    /// Reply to `joinChat` reporting the counterpart's current presence.
    #[serde(rename_all = "camelCase")]
    TargetStatus { user_id: UserId, online: bool },

    /// A new message appended to the room's conversation.
    MessageReceived(Message),

    /// Pending messages addressed to `delivered_to` were marked delivered.
    #[serde(rename_all = "camelCase")]
    MessagesDelivered { delivered_to: UserId },

    /// Messages addressed to `seen_by` were marked seen.
    #[serde(rename_all = "camelCase")]
    MessagesSeen { seen_by: UserId },

    #[serde(rename_all = "camelCase")]
    Typing { user_id: UserId },

    #[serde(rename_all = "camelCase")]
    StopTyping { user_id: UserId },

    /// A `sendMessage` was refused. The reason is deliberately generic so
    /// the event cannot be used to probe the connection graph.
    SendRejected { reason: String },
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
