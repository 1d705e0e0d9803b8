//! Message delivery engine.
//!
//! Governs the per-message lifecycle (`sent -> delivered -> seen`), the
//! connection-authorization gate on sends, and typing-indicator relay.
//! Every state change is persisted before anything is broadcast, so a
//! failed write never leaks a phantom event to the room.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use matcha_shared::{room_id, Message, MessageStatus, ServerEvent, UserId};
use matcha_store::{Database, StoreError};

use crate::presence::{ConnId, PresenceRegistry};
use crate::rooms::RoomRegistry;

/// Result of a `send` operation that completed without a store failure.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Message persisted and broadcast to the room.
    Sent(Message),
    /// Message refused; nothing was persisted or broadcast. The reason is
    /// generic on purpose -- it must not reveal whether the pair is
    /// connected.
    Rejected { reason: String },
}

#[derive(Clone)]
pub struct DeliveryEngine {
    store: Arc<Mutex<Database>>,
    presence: PresenceRegistry,
    rooms: RoomRegistry,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<Mutex<Database>>,
        presence: PresenceRegistry,
        rooms: RoomRegistry,
    ) -> Self {
        Self {
            store,
            presence,
            rooms,
        }
    }

    /// Send a message from `sender` to `receiver`.
    ///
    /// Preconditions checked here, in order: non-empty text, then an
    /// `accepted` connection edge looked up at call time (authorization is
    /// never cached). The message is appended with status `delivered` when
    /// the receiver is currently online, `sent` otherwise, and then echoed
    /// to the room as `messageReceived`.
    pub async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        text: &str,
    ) -> Result<SendOutcome, StoreError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(SendOutcome::Rejected {
                reason: "empty message".to_string(),
            });
        }

        let authorized = {
            let db = self.store.lock().await;
            db.find_accepted_edge(sender, receiver)?.is_some()
        };
        if !authorized {
            debug!(sender = %sender, "send refused: no accepted connection");
            return Ok(SendOutcome::Rejected {
                reason: "message could not be delivered".to_string(),
            });
        }

        let receiver_online = self.presence.is_online(receiver).await;
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            text: text.to_string(),
            status: if receiver_online {
                MessageStatus::Delivered
            } else {
                MessageStatus::Sent
            },
            seen_at: None,
            created_at: Utc::now(),
        };

        {
            let db = self.store.lock().await;
            let conversation = db.find_or_create_conversation(sender, receiver)?;
            db.append_message(conversation.id, &message)?;
        }

        self.rooms
            .broadcast(
                room_id(sender, receiver),
                &ServerEvent::MessageReceived(message.clone()),
            )
            .await;

        Ok(SendOutcome::Sent(message))
    }

    /// Run the delivered-scan for `viewer` joining the chat with
    /// `counterpart`: every message addressed to the viewer still in
    /// `sent` advances to `delivered`. Broadcasts `messagesDelivered`
    /// only when something actually changed, so repeated joins do not
    /// re-announce old state. Returns the number of messages advanced.
    pub async fn mark_delivered(
        &self,
        viewer: UserId,
        counterpart: UserId,
    ) -> Result<usize, StoreError> {
        let changed = {
            let db = self.store.lock().await;
            match db.find_conversation(viewer, counterpart)? {
                // no history yet is not an error
                None => return Ok(0),
                Some(conversation) => db.mark_delivered(conversation.id, viewer)?,
            }
        };

        if changed > 0 {
            self.rooms
                .broadcast(
                    room_id(viewer, counterpart),
                    &ServerEvent::MessagesDelivered {
                        delivered_to: viewer,
                    },
                )
                .await;
        }

        Ok(changed)
    }

    /// Mark everything `counterpart` sent to `viewer` as seen, stamping
    /// `seen_at`. Broadcasts `messagesSeen` only when something changed.
    /// Returns the number of messages advanced.
    pub async fn mark_seen(
        &self,
        viewer: UserId,
        counterpart: UserId,
    ) -> Result<usize, StoreError> {
        let changed = {
            let db = self.store.lock().await;
            match db.find_conversation(viewer, counterpart)? {
                None => return Ok(0),
                Some(conversation) => {
                    db.mark_seen(conversation.id, counterpart, viewer, Utc::now())?
                }
            }
        };

        if changed > 0 {
            self.rooms
                .broadcast(
                    room_id(viewer, counterpart),
                    &ServerEvent::MessagesSeen { seen_by: viewer },
                )
                .await;
        }

        Ok(changed)
    }

    /// Relay a typing indicator to the room, excluding the typist's own
    /// connection. Transient: nothing is persisted.
    pub async fn relay_typing(
        &self,
        from: UserId,
        to: UserId,
        typist_conn: ConnId,
        stopped: bool,
    ) {
        let event = if stopped {
            ServerEvent::StopTyping { user_id: from }
        } else {
            ServerEvent::Typing { user_id: from }
        };
        self.rooms
            .broadcast_except(room_id(from, to), typist_conn, &event)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ConnectionHandle;
    use chrono::Utc;
    use matcha_store::{ConnectionEdge, EdgeStatus, User};
    use tokio::sync::mpsc;

    struct Harness {
        engine: DeliveryEngine,
        store: Arc<Mutex<Database>>,
        presence: PresenceRegistry,
        rooms: RoomRegistry,
    }

    fn harness() -> Harness {
        let store = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let presence = PresenceRegistry::new();
        let rooms = RoomRegistry::new();
        let engine = DeliveryEngine::new(store.clone(), presence.clone(), rooms.clone());
        Harness {
            engine,
            store,
            presence,
            rooms,
        }
    }

    async fn seed_user(h: &Harness, name: &str) -> UserId {
        let user = User {
            id: UserId::new(),
            display_name: name.to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        };
        h.store.lock().await.create_user(&user).unwrap();
        user.id
    }

    async fn seed_edge(h: &Harness, from: UserId, to: UserId, status: EdgeStatus) {
        let edge = ConnectionEdge {
            id: Uuid::new_v4(),
            from_user_id: from,
            to_user_id: to,
            status,
            created_at: Utc::now(),
        };
        h.store.lock().await.upsert_edge(&edge).unwrap();
    }

    fn handle_for(user: UserId) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (ConnectionHandle::new(Uuid::new_v4(), user, tx), rx)
    }

    async fn stored_messages(h: &Harness, a: UserId, b: UserId) -> Vec<Message> {
        let db = h.store.lock().await;
        match db.find_conversation(a, b).unwrap() {
            Some(conversation) => db.messages_for_conversation(conversation.id).unwrap(),
            None => Vec::new(),
        }
    }

    // Scenario: receiver offline -> message lands as `sent`; when the
    // receiver later joins, the delivered-scan advances it and announces
    // `messagesDelivered` to the room.
    #[tokio::test]
    async fn offline_receiver_gets_sent_then_delivered_on_join() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;
        seed_edge(&h, a, b, EdgeStatus::Accepted).await;

        let outcome = h.engine.send(a, b, "hi").await.unwrap();
        match outcome {
            SendOutcome::Sent(ref message) => assert_eq!(message.status, MessageStatus::Sent),
            ref other => panic!("unexpected outcome: {other:?}"),
        }

        // B comes online and joins the chat
        let (hb, mut rxb) = handle_for(b);
        h.presence.add_connection(hb.clone()).await;
        h.rooms.join(room_id(a, b), hb).await;

        let changed = h.engine.mark_delivered(b, a).await.unwrap();
        assert_eq!(changed, 1);
        assert_eq!(
            rxb.try_recv().unwrap(),
            ServerEvent::MessagesDelivered { delivered_to: b }
        );

        let messages = stored_messages(&h, a, b).await;
        assert_eq!(messages[0].status, MessageStatus::Delivered);

        // second join: scan is a no-op, no duplicate broadcast
        assert_eq!(h.engine.mark_delivered(b, a).await.unwrap(), 0);
        assert!(rxb.try_recv().is_err());
    }

    // Scenario: receiver online and joined -> `send` yields `delivered`
    // immediately and `messageReceived` reaches both room members.
    #[tokio::test]
    async fn online_receiver_gets_delivered_immediately() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;
        seed_edge(&h, b, a, EdgeStatus::Accepted).await;

        let (ha, mut rxa) = handle_for(a);
        let (hb, mut rxb) = handle_for(b);
        h.presence.add_connection(ha.clone()).await;
        h.presence.add_connection(hb.clone()).await;
        h.rooms.join(room_id(a, b), ha).await;
        h.rooms.join(room_id(a, b), hb).await;

        let outcome = h.engine.send(a, b, "hello").await.unwrap();
        let message = match outcome {
            SendOutcome::Sent(message) => message,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(message.status, MessageStatus::Delivered);

        for rx in [&mut rxa, &mut rxb] {
            match rx.try_recv().unwrap() {
                ServerEvent::MessageReceived(received) => {
                    assert_eq!(received.id, message.id);
                    assert_eq!(received.text, "hello");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    // Scenario: the receiver acknowledges -> `seen` with a timestamp, and
    // `messagesSeen` fires once.
    #[tokio::test]
    async fn mark_seen_stamps_seen_at_and_is_idempotent() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;
        seed_edge(&h, a, b, EdgeStatus::Accepted).await;

        h.engine.send(a, b, "hi").await.unwrap();

        let (hb, mut rxb) = handle_for(b);
        h.rooms.join(room_id(a, b), hb).await;

        assert_eq!(h.engine.mark_seen(b, a).await.unwrap(), 1);
        assert_eq!(
            rxb.try_recv().unwrap(),
            ServerEvent::MessagesSeen { seen_by: b }
        );

        let messages = stored_messages(&h, a, b).await;
        assert_eq!(messages[0].status, MessageStatus::Seen);
        assert!(messages[0].seen_at.is_some());

        // idempotent: second ack changes nothing, announces nothing
        assert_eq!(h.engine.mark_seen(b, a).await.unwrap(), 0);
        assert!(rxb.try_recv().is_err());
    }

    // Scenario: no accepted edge -> nothing stored, nothing broadcast,
    // explicit rejection with a generic reason.
    #[tokio::test]
    async fn send_without_accepted_edge_is_rejected() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;
        seed_edge(&h, a, b, EdgeStatus::Interested).await;

        let (hb, mut rxb) = handle_for(b);
        h.rooms.join(room_id(a, b), hb).await;

        let outcome = h.engine.send(a, b, "hi").await.unwrap();
        match outcome {
            SendOutcome::Rejected { reason } => {
                // must not leak the connection state
                assert!(!reason.contains("connection"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert!(stored_messages(&h, a, b).await.is_empty());
        assert!(rxb.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_persisting() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;
        seed_edge(&h, a, b, EdgeStatus::Accepted).await;

        let outcome = h.engine.send(a, b, "   ").await.unwrap();
        assert!(matches!(outcome, SendOutcome::Rejected { .. }));
        assert!(stored_messages(&h, a, b).await.is_empty());
    }

    #[tokio::test]
    async fn typing_relay_skips_the_typist_and_persists_nothing() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;

        let (ha, mut rxa) = handle_for(a);
        let (hb, mut rxb) = handle_for(b);
        let typist_conn = ha.conn_id;
        h.rooms.join(room_id(a, b), ha).await;
        h.rooms.join(room_id(a, b), hb).await;

        h.engine.relay_typing(a, b, typist_conn, false).await;
        h.engine.relay_typing(a, b, typist_conn, true).await;

        assert_eq!(rxb.try_recv().unwrap(), ServerEvent::Typing { user_id: a });
        assert_eq!(
            rxb.try_recv().unwrap(),
            ServerEvent::StopTyping { user_id: a }
        );
        assert!(rxa.try_recv().is_err());
        assert!(stored_messages(&h, a, b).await.is_empty());
    }

    // Appends from interleaved senders keep engine processing order.
    #[tokio::test]
    async fn conversation_keeps_processing_order() {
        let h = harness();
        let a = seed_user(&h, "Ada").await;
        let b = seed_user(&h, "Brian").await;
        seed_edge(&h, a, b, EdgeStatus::Accepted).await;

        h.engine.send(a, b, "first").await.unwrap();
        h.engine.send(b, a, "second").await.unwrap();
        h.engine.send(a, b, "third").await.unwrap();

        let texts: Vec<_> = stored_messages(&h, a, b)
            .await
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, ["first", "second", "third"]);
    }
}
