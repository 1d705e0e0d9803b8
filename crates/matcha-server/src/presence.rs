//! Presence registry: which users currently hold at least one live
//! real-time connection.
//!
//! One user may be connected from several tabs or devices at once, so the
//! registry maps a user id to the set of connection handles owned by that
//! user. The online/offline edge fires exactly once: on the first handle
//! added and on the last handle removed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use matcha_shared::{ServerEvent, UserId};

/// Identifier of a single live connection (one socket, one tab).
pub type ConnId = Uuid;

/// Cheap cloneable handle through which events are pushed to one
/// connection's outbound queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnId,
    pub user_id: UserId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(conn_id: ConnId, user_id: UserId, tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            conn_id,
            user_id,
            tx,
        }
    }

    /// Queue an event for this connection. A full queue means the client
    /// is not keeping up; the event is dropped rather than blocking the
    /// dispatcher.
    pub fn send(&self, event: ServerEvent) {
        if self.tx.try_send(event).is_err() {
            debug!(
                user = %self.user_id,
                conn = %self.conn_id,
                "dropping event for slow connection"
            );
        }
    }
}

/// Process-wide registry of live connections, injectable and owned by the
/// server state (single-instance deployment; a multi-instance setup would
/// need this externalized).
#[derive(Clone)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<HashMap<UserId, HashMap<ConnId, ConnectionHandle>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a connection. Returns `true` when this was the user's
    /// first live connection, i.e. the offline -> online transition.
    pub async fn add_connection(&self, handle: ConnectionHandle) -> bool {
        let mut users = self.inner.write().await;
        let connections = users.entry(handle.user_id).or_default();
        let went_online = connections.is_empty();
        connections.insert(handle.conn_id, handle);
        went_online
    }

    /// Deregister a connection. Returns `true` when this was the user's
    /// last live connection, i.e. the online -> offline transition. The
    /// empty entry is pruned.
    pub async fn remove_connection(&self, user_id: UserId, conn_id: ConnId) -> bool {
        let mut users = self.inner.write().await;
        let Some(connections) = users.get_mut(&user_id) else {
            return false;
        };

        connections.remove(&conn_id);
        if connections.is_empty() {
            users.remove(&user_id);
            true
        } else {
            false
        }
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    /// Snapshot of every user with at least one live connection.
    pub async fn online_users(&self) -> Vec<UserId> {
        self.inner.read().await.keys().copied().collect()
    }

    /// Push an event to every live connection.
    pub async fn broadcast(&self, event: &ServerEvent) {
        let users = self.inner.read().await;
        for connections in users.values() {
            for handle in connections.values() {
                handle.send(event.clone());
            }
        }
    }

    /// Push an event to every live connection except `skip`.
    pub async fn broadcast_except(&self, skip: ConnId, event: &ServerEvent) {
        let users = self.inner.read().await;
        for connections in users.values() {
            for handle in connections.values() {
                if handle.conn_id != skip {
                    handle.send(event.clone());
                }
            }
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
