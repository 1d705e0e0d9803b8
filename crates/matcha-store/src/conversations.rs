//! Conversation and message persistence.
//!
//! A conversation row exists per unordered participant pair, keyed by the
//! pair's room id so lookup is order-independent. Messages are appended
//! with a single `INSERT` and their delivery state advances through
//! status-guarded `UPDATE`s; both are atomic, so two handlers racing on
//! the same conversation cannot lose each other's writes the way a
//! load-modify-save of the whole message list could.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use matcha_shared::{room_id, Message, MessageStatus, RoomId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;

impl Database {
    /// Find the conversation for a participant pair, in either order.
    pub fn find_conversation(&self, a: UserId, b: UserId) -> Result<Option<Conversation>> {
        let rid = room_id(a, b);
        let result = self.conn().query_row(
            "SELECT id, room_id, participant_a, participant_b, created_at
             FROM conversations
             WHERE room_id = ?1",
            params![rid.to_hex()],
            row_to_conversation,
        );

        match result {
            Ok(conversation) => Ok(Some(conversation)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Create the conversation for a participant pair.
    ///
    /// Participants are stored in canonical sorted order.
    pub fn create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation> {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

        let conversation = Conversation {
            id: Uuid::new_v4(),
            room_id: room_id(a, b),
            participant_a: lo,
            participant_b: hi,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO conversations (id, room_id, participant_a, participant_b, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation.id.to_string(),
                conversation.room_id.to_hex(),
                conversation.participant_a.to_string(),
                conversation.participant_b.to_string(),
                conversation.created_at.to_rfc3339(),
            ],
        )?;

        Ok(conversation)
    }

    /// Load the conversation for a pair, creating it lazily on first use.
    pub fn find_or_create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation> {
        if let Some(existing) = self.find_conversation(a, b)? {
            return Ok(existing);
        }
        self.create_conversation(a, b)
    }

    /// Append a message to a conversation. One `INSERT`, no rewrite of
    /// the existing history.
    pub fn append_message(&self, conversation_id: Uuid, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, conversation_id, sender_id, receiver_id, text, status, seen_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                conversation_id.to_string(),
                message.sender_id.to_string(),
                message.receiver_id.to_string(),
                message.text,
                message.status.as_str(),
                message.seen_at.map(|t| t.to_rfc3339()),
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All messages of a conversation in append order.
    pub fn messages_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, sender_id, receiver_id, text, status, seen_at, created_at
             FROM messages
             WHERE conversation_id = ?1
             ORDER BY rowid ASC",
        )?;

        let rows = stmt.query_map(params![conversation_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Advance every `sent` message addressed to `receiver` in this
    /// conversation to `delivered`. Returns the number of rows changed;
    /// zero means the scan was a no-op and nothing should be broadcast.
    pub fn mark_delivered(&self, conversation_id: Uuid, receiver: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET status = 'delivered'
             WHERE conversation_id = ?1
               AND receiver_id = ?2
               AND status = 'sent'",
            params![conversation_id.to_string(), receiver.to_string()],
        )?;
        Ok(affected)
    }

    /// Advance every message from `sender` to `receiver` that is not yet
    /// `seen` to `seen`, stamping `seen_at`. Returns the number of rows
    /// changed. The status filter makes repeated calls no-ops and keeps
    /// `seen_at` frozen at the first acknowledgement.
    pub fn mark_seen(
        &self,
        conversation_id: Uuid,
        sender: UserId,
        receiver: UserId,
        seen_at: DateTime<Utc>,
    ) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages
             SET status = 'seen', seen_at = ?4
             WHERE conversation_id = ?1
               AND sender_id = ?2
               AND receiver_id = ?3
               AND status != 'seen'",
            params![
                conversation_id.to_string(),
                sender.to_string(),
                receiver.to_string(),
                seen_at.to_rfc3339(),
            ],
        )?;
        Ok(affected)
    }

}

/// Map a `rusqlite::Row` to a [`Conversation`].
fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let room_hex: String = row.get(1)?;
    let a_str: String = row.get(2)?;
    let b_str: String = row.get(3)?;
    let created_str: String = row.get(4)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let room_bytes = hex::decode(&room_hex).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let rid: [u8; 32] = room_bytes.as_slice().try_into().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("room id must be 32 bytes, got {}", room_bytes.len()).into(),
        )
    })?;

    let participant_a = UserId::parse(&a_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let participant_b = UserId::parse(&b_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Conversation {
        id,
        room_id: RoomId(rid),
        participant_a,
        participant_b,
        created_at,
    })
}

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let sender_str: String = row.get(1)?;
    let receiver_str: String = row.get(2)?;
    let text: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let seen_str: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let sender_id = UserId::parse(&sender_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let receiver_id = UserId::parse(&receiver_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = MessageStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message status: {status_str}").into(),
        )
    })?;

    let seen_at = seen_str
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })
        })
        .transpose()?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id,
        sender_id,
        receiver_id,
        text,
        status,
        seen_at,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{insert_user, open_test_db};

    fn new_message(sender: UserId, receiver: UserId, text: &str, status: MessageStatus) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            text: text.to_string(),
            status,
            seen_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn conversation_is_created_lazily_and_found_in_both_orders() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");

        assert!(db.find_conversation(a, b).unwrap().is_none());

        let created = db.find_or_create_conversation(a, b).unwrap();
        let found = db.find_conversation(b, a).unwrap().unwrap();
        assert_eq!(created.id, found.id);

        // second find_or_create reuses the row
        let again = db.find_or_create_conversation(b, a).unwrap();
        assert_eq!(created.id, again.id);
    }

    #[test]
    fn participants_are_stored_in_canonical_order() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");

        let conversation = db.find_or_create_conversation(b, a).unwrap();
        assert!(conversation.participant_a <= conversation.participant_b);
        assert!(conversation.has_participant(a));
        assert!(conversation.has_participant(b));
    }

    #[test]
    fn messages_come_back_in_append_order() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");
        let conversation = db.find_or_create_conversation(a, b).unwrap();

        for text in ["one", "two", "three"] {
            db.append_message(conversation.id, &new_message(a, b, text, MessageStatus::Sent))
                .unwrap();
        }

        let texts: Vec<_> = db
            .messages_for_conversation(conversation.id)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[test]
    fn duplicate_sends_are_duplicate_rows() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");
        let conversation = db.find_or_create_conversation(a, b).unwrap();

        db.append_message(conversation.id, &new_message(a, b, "hi", MessageStatus::Sent))
            .unwrap();
        db.append_message(conversation.id, &new_message(a, b, "hi", MessageStatus::Sent))
            .unwrap();

        assert_eq!(db.messages_for_conversation(conversation.id).unwrap().len(), 2);
    }

    #[test]
    fn mark_delivered_targets_only_pending_messages_for_the_viewer() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");
        let conversation = db.find_or_create_conversation(a, b).unwrap();

        // two pending for b, one already delivered, one addressed to a
        db.append_message(conversation.id, &new_message(a, b, "m1", MessageStatus::Sent))
            .unwrap();
        db.append_message(conversation.id, &new_message(a, b, "m2", MessageStatus::Sent))
            .unwrap();
        db.append_message(conversation.id, &new_message(a, b, "m3", MessageStatus::Delivered))
            .unwrap();
        db.append_message(conversation.id, &new_message(b, a, "m4", MessageStatus::Sent))
            .unwrap();

        assert_eq!(db.mark_delivered(conversation.id, b).unwrap(), 2);

        // idempotent: a second scan changes nothing
        assert_eq!(db.mark_delivered(conversation.id, b).unwrap(), 0);

        let messages = db.messages_for_conversation(conversation.id).unwrap();
        assert!(messages
            .iter()
            .filter(|m| m.receiver_id == b)
            .all(|m| m.status == MessageStatus::Delivered));
        assert_eq!(messages[3].status, MessageStatus::Sent);
    }

    #[test]
    fn mark_seen_is_idempotent_and_stamps_seen_at_once() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");
        let conversation = db.find_or_create_conversation(a, b).unwrap();

        db.append_message(conversation.id, &new_message(a, b, "m1", MessageStatus::Sent))
            .unwrap();
        db.append_message(conversation.id, &new_message(a, b, "m2", MessageStatus::Delivered))
            .unwrap();

        let first = Utc::now();
        assert_eq!(db.mark_seen(conversation.id, a, b, first).unwrap(), 2);

        let later = first + chrono::Duration::seconds(60);
        assert_eq!(db.mark_seen(conversation.id, a, b, later).unwrap(), 0);

        for message in db.messages_for_conversation(conversation.id).unwrap() {
            assert_eq!(message.status, MessageStatus::Seen);
            let seen_at = message.seen_at.expect("seen messages carry seen_at");
            assert_eq!(seen_at.timestamp(), first.timestamp());
        }
    }

    #[test]
    fn unseen_messages_have_no_seen_at() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");
        let conversation = db.find_or_create_conversation(a, b).unwrap();

        db.append_message(conversation.id, &new_message(a, b, "m1", MessageStatus::Delivered))
            .unwrap();

        let messages = db.messages_for_conversation(conversation.id).unwrap();
        assert_eq!(messages[0].seen_at, None);
    }

    #[test]
    fn malformed_room_id_is_an_error_not_zeroes() {
        let db = open_test_db();
        let a = insert_user(&db, "Ada");
        let b = insert_user(&db, "Brian");
        let conversation = db.find_or_create_conversation(a, b).unwrap();

        // corrupt the key to valid hex of the wrong length
        db.conn()
            .execute(
                "UPDATE conversations SET room_id = 'abcd' WHERE id = ?1",
                params![conversation.id.to_string()],
            )
            .unwrap();

        let result = db.conn().query_row(
            "SELECT id, room_id, participant_a, participant_b, created_at
             FROM conversations WHERE id = ?1",
            params![conversation.id.to_string()],
            row_to_conversation,
        );
        assert!(result.is_err());
    }
}
