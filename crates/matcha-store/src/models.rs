//! Domain model structs persisted in the SQLite database.
//!
//! The message model itself lives in `matcha-shared` because it is also
//! the wire payload of the `messageReceived` event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use matcha_shared::{RoomId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user. Signup/login itself is handled by the REST identity
/// layer; the chat core only reads these rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    /// Optional URL of the avatar image.
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The subset of a user profile that may be shown to other users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A server-side session, keyed by an opaque random token carried in the
/// `token` cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// ---------------------------------------------------------------------------
// Connection edge
// ---------------------------------------------------------------------------

/// Status of a connection request between two users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeStatus {
    Interested,
    Ignored,
    Accepted,
    Rejected,
}

impl EdgeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interested => "interested",
            Self::Ignored => "ignored",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "interested" => Some(Self::Interested),
            "ignored" => Some(Self::Ignored),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// The social-graph relation gating message authorization. Only an
/// `accepted` edge between two users allows them to exchange messages.
/// The chat core queries this record but never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionEdge {
    pub id: Uuid,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub status: EdgeStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// The persisted container for all messages between exactly two users.
///
/// Participants are stored in canonical sorted order so lookup is
/// independent of argument order, and the row is additionally keyed by
/// the pair's room id. Created lazily on first send or history fetch,
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    pub room_id: RoomId,
    pub participant_a: UserId,
    pub participant_b: UserId,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Whether `user` is one of the two participants.
    pub fn has_participant(&self, user: UserId) -> bool {
        self.participant_a == user || self.participant_b == user
    }
}
