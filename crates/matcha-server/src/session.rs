//! WebSocket session lifecycle.
//!
//! Per connection: authenticate the handshake, register presence, pump
//! outbound events through a per-connection queue, dispatch inbound
//! events until the socket closes, then tear everything down. A refused
//! credential never gets past the upgrade -- no handler is installed for
//! an unauthenticated socket.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use matcha_shared::{room_id, ClientEvent, ServerEvent, UserId};
use matcha_store::User;

use crate::api::AppState;
use crate::auth;
use crate::delivery::SendOutcome;
use crate::presence::ConnectionHandle;

/// Outbound events queued per connection before the socket applies
/// backpressure by dropping.
const OUTBOUND_QUEUE: usize = 64;

/// `GET /ws` -- authenticate the handshake and upgrade.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    match auth::authenticate(&headers, &state).await {
        Ok(user) => ws.on_upgrade(move |socket| handle_connection(socket, user, state)),
        Err(err) => {
            debug!("refusing websocket handshake: unauthenticated");
            err.into_response()
        }
    }
}

async fn handle_connection(socket: WebSocket, user: User, state: AppState) {
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE);
    let handle = ConnectionHandle::new(conn_id, user.id, tx);

    info!(user = %user.id, conn = %conn_id, "connection established");

    let went_online = state.presence.add_connection(handle.clone()).await;

    // Everyone gets a fresh snapshot; everyone else gets the delta.
    let snapshot = ServerEvent::OnlineUsersList(state.presence.online_users().await);
    state.presence.broadcast(&snapshot).await;
    if went_online {
        state
            .presence
            .broadcast_except(conn_id, &ServerEvent::UserOnline(user.id))
            .await;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Forward queued events into the socket until either side goes away.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if ws_tx.send(WsMessage::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to encode outbound event"),
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(user = %user.id, conn = %conn_id, error = %e, "socket error");
                break;
            }
        };

        match frame {
            WsMessage::Text(text) => match ClientEvent::from_json(text.as_str()) {
                Ok(event) => dispatch(&state, &handle, user.id, event).await,
                // a bad frame is logged and ignored, never fatal
                Err(e) => debug!(user = %user.id, error = %e, "ignoring malformed frame"),
            },
            WsMessage::Close(_) => break,
            // ping/pong are answered by axum; binary frames are not part
            // of the contract
            _ => {}
        }
    }

    // Teardown: leave every room, then drop presence (announcing offline
    // only if this was the last tab).
    state.rooms.leave_all(conn_id).await;
    let went_offline = state.presence.remove_connection(user.id, conn_id).await;
    if went_offline {
        state
            .presence
            .broadcast(&ServerEvent::UserOffline(user.id))
            .await;
    }
    writer.abort();

    info!(user = %user.id, conn = %conn_id, "connection closed");
}

/// Route one inbound event to the matching operation. Failures are
/// contained here: they are logged (and, for sends, surfaced to the
/// sender), never allowed to kill the connection or the dispatcher.
async fn dispatch(
    state: &AppState,
    handle: &ConnectionHandle,
    user_id: UserId,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinChat { target_user_id } => {
            let rid = room_id(user_id, target_user_id);
            state.rooms.join(rid, handle.clone()).await;

            handle.send(ServerEvent::TargetStatus {
                user_id: target_user_id,
                online: state.presence.is_online(target_user_id).await,
            });

            if let Err(e) = state.engine.mark_delivered(user_id, target_user_id).await {
                warn!(user = %user_id, error = %e, "delivered-scan failed");
            }
        }

        ClientEvent::GetOnlineUsers => {
            handle.send(ServerEvent::OnlineUsersList(
                state.presence.online_users().await,
            ));
        }

        ClientEvent::Typing { target_user_id } => {
            state
                .engine
                .relay_typing(user_id, target_user_id, handle.conn_id, false)
                .await;
        }

        ClientEvent::StopTyping { target_user_id } => {
            state
                .engine
                .relay_typing(user_id, target_user_id, handle.conn_id, true)
                .await;
        }

        ClientEvent::SendMessage {
            target_user_id,
            text,
        } => match state.engine.send(user_id, target_user_id, &text).await {
            Ok(SendOutcome::Sent(_)) => {}
            Ok(SendOutcome::Rejected { reason }) => {
                handle.send(ServerEvent::SendRejected { reason });
            }
            Err(e) => {
                warn!(user = %user_id, error = %e, "send failed to persist");
                handle.send(ServerEvent::SendRejected {
                    reason: "message could not be delivered".to_string(),
                });
            }
        },

        ClientEvent::MarkSeen { target_user_id } => {
            if let Err(e) = state.engine.mark_seen(user_id, target_user_id).await {
                warn!(user = %user_id, error = %e, "seen-scan failed");
            }
        }
    }
}
