use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// User identity = UUID issued at signup by the identity layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the broadcast room shared by exactly one unordered pair
/// of users (BLAKE3 digest, 32 bytes).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RoomId(pub [u8; 32]);

impl RoomId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Derive the room identifier for a pair of users.
///
/// The pair is sorted before hashing so both sides compute the same room
/// regardless of argument order: `room_id(a, b) == room_id(b, a)`.
pub fn room_id(a: UserId, b: UserId) -> RoomId {
    let (lo, hi) = if a.0 <= b.0 { (a, b) } else { (b, a) };

    let mut hasher = blake3::Hasher::new();
    hasher.update(lo.0.to_string().as_bytes());
    hasher.update(b"_");
    hasher.update(hi.0.to_string().as_bytes());
    RoomId(*hasher.finalize().as_bytes())
}

/// Delivery state of a single message.
///
/// The lifecycle is monotone: `sent -> delivered -> seen`, with a direct
/// `sent -> seen` shortcut when the recipient is already focused. No
/// transition ever goes backward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "seen" => Some(Self::Seen),
            _ => None,
        }
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_advance_to(self, next: Self) -> bool {
        use MessageStatus::*;
        matches!((self, next), (Sent, Delivered) | (Sent, Seen) | (Delivered, Seen))
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single chat message between two connected users.
///
/// Field names follow the wire contract of the real-time channel
/// (`messageReceived` carries this struct verbatim).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub status: MessageStatus,
    /// Set iff `status == Seen`.
    pub seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_order_independent() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(room_id(a, b), room_id(b, a));
    }

    #[test]
    fn room_id_is_unique_per_pair() {
        let a = UserId::new();
        let b = UserId::new();
        let c = UserId::new();
        assert_ne!(room_id(a, b), room_id(a, c));
        assert_ne!(room_id(a, b), room_id(b, c));
    }

    #[test]
    fn room_id_is_deterministic() {
        let a = UserId::new();
        let b = UserId::new();
        assert_eq!(room_id(a, b).to_hex(), room_id(a, b).to_hex());
    }

    #[test]
    fn status_transitions_are_monotone() {
        use MessageStatus::*;
        assert!(Sent.can_advance_to(Delivered));
        assert!(Sent.can_advance_to(Seen));
        assert!(Delivered.can_advance_to(Seen));

        assert!(!Seen.can_advance_to(Delivered));
        assert!(!Seen.can_advance_to(Sent));
        assert!(!Delivered.can_advance_to(Sent));
        assert!(!Sent.can_advance_to(Sent));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Seen] {
            assert_eq!(MessageStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(MessageStatus::parse("read"), None);
    }
}
