//! Room registry: the broadcast groups backing each conversation.
//!
//! A room corresponds 1:1 with a conversation and is addressed by the
//! pair's [`RoomId`]. Rooms hold connection handles, not users -- two tabs
//! of the same user joined to the same chat are two members.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use matcha_shared::{RoomId, ServerEvent};

use crate::presence::{ConnId, ConnectionHandle};

struct Room {
    room_id: RoomId,
    members: HashMap<ConnId, ConnectionHandle>,
}

impl Room {
    fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            members: HashMap::new(),
        }
    }

    fn join(&mut self, handle: ConnectionHandle) {
        info!(
            room = %self.room_id,
            user = %handle.user_id,
            members = self.members.len() + 1,
            "connection joined room"
        );
        self.members.insert(handle.conn_id, handle);
    }

    fn leave(&mut self, conn_id: ConnId) -> bool {
        self.members.remove(&conn_id).is_some()
    }

    fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Shared map of all currently populated rooms. Empty rooms are removed;
/// joining a missing room creates it.
#[derive(Clone)]
pub struct RoomRegistry {
    rooms: Arc<RwLock<HashMap<RoomId, Room>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Subscribe a connection to a room (creates the room if missing).
    /// Joining twice just refreshes the handle.
    pub async fn join(&self, room_id: RoomId, handle: ConnectionHandle) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id)
            .or_insert_with(|| Room::new(room_id))
            .join(handle);
    }

    /// Remove a connection from one room. Auto-deletes the room if it
    /// becomes empty.
    pub async fn leave(&self, room_id: RoomId, conn_id: ConnId) {
        let mut rooms = self.rooms.write().await;
        let should_remove = if let Some(room) = rooms.get_mut(&room_id) {
            room.leave(conn_id);
            room.is_empty()
        } else {
            false
        };

        if should_remove {
            rooms.remove(&room_id);
            info!(room = %room_id, "removed empty room");
        }
    }

    /// Remove a connection from every room it joined (disconnect path).
    pub async fn leave_all(&self, conn_id: ConnId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, room| {
            room.leave(conn_id);
            !room.is_empty()
        });
    }

    /// Push an event to every member of a room.
    pub async fn broadcast(&self, room_id: RoomId, event: &ServerEvent) {
        let rooms = self.rooms.read().await;
        if let Some(room) = rooms.get(&room_id) {
            for handle in room.members.values() {
                handle.send(event.clone());
            }
        }
    }

    /// Push an event to every member of a room except `skip` (typing
    /// indicators go to the counterpart, not back to the typist).
    pub async fn broadcast_except(&self, room_id: RoomId, skip: ConnId, event: &ServerEvent) {
        let rooms = self.rooms.read().await;
        if let Some(room) = rooms.get(&room_id) {
            for handle in room.members.values() {
                if handle.conn_id != skip {
                    handle.send(event.clone());
                }
            }
        }
    }

    pub async fn member_count(&self, room_id: RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(&room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
