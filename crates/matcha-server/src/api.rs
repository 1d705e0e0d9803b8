use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use matcha_shared::{Message, UserId};
use matcha_store::{Database, PublicProfile, StoreError};

use crate::auth;
use crate::config::ServerConfig;
use crate::delivery::DeliveryEngine;
use crate::error::ServerError;
use crate::presence::PresenceRegistry;
use crate::rooms::RoomRegistry;
use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Mutex<Database>>,
    pub presence: PresenceRegistry,
    pub rooms: RoomRegistry,
    pub engine: DeliveryEngine,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(store: Database, config: ServerConfig) -> Self {
        let store = Arc::new(Mutex::new(store));
        let presence = PresenceRegistry::new();
        let rooms = RoomRegistry::new();
        let engine = DeliveryEngine::new(store.clone(), presence.clone(), rooms.clone());

        Self {
            store,
            presence,
            rooms,
            engine,
            config: Arc::new(config),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    // Cookies ride along on both routes, so the origin must be explicit
    // rather than a wildcard.
    let cors = match state.config.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true),
        Err(_) => {
            tracing::warn!(
                origin = %state.config.cors_origin,
                "Invalid CORS_ORIGIN, cross-origin requests will be refused"
            );
            CorsLayer::new()
        }
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/chat/{target_user_id}", get(chat_history))
        .route("/ws", get(session::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Response of `GET /chat/{target_user_id}`: the counterpart's public
/// profile plus the full message history for the pair, oldest first.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatHistoryResponse {
    target: PublicProfile,
    messages: Vec<Message>,
}

/// Fetch the conversation with a target user, creating it lazily -- a
/// first visit to a chat screen returns an empty history, not an error.
async fn chat_history(
    State(state): State<AppState>,
    Path(target_user_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ChatHistoryResponse>, ServerError> {
    let viewer = auth::authenticate(&headers, &state).await?;
    let target = UserId(target_user_id);

    let db = state.store.lock().await;

    let profile = db.get_public_profile(target).map_err(|e| match e {
        StoreError::NotFound => ServerError::NotFound("user not found".to_string()),
        other => ServerError::Store(other),
    })?;

    let conversation = db.find_or_create_conversation(viewer.id, target)?;
    let messages = db.messages_for_conversation(conversation.id)?;

    Ok(Json(ChatHistoryResponse {
        target: profile,
        messages,
    }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
