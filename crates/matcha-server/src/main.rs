//! # matcha-server
//!
//! Real-time chat backend for the Matcha developer-matchmaking app.
//!
//! This binary provides:
//! - **WebSocket gateway** carrying the chat wire protocol: presence,
//!   typing indicators, message delivery and acknowledgement
//! - **Presence registry** tracking multi-tab/multi-device online state
//! - **Message delivery engine** driving the `sent -> delivered -> seen`
//!   lifecycle, gated on accepted connections between users
//! - **REST API** (axum) for health checks and chat history retrieval
//! - **SQLite persistence** for users, sessions, edges, and conversations

mod api;
mod auth;
mod config;
mod delivery;
mod error;
mod presence;
mod rooms;
mod session;

use chrono::Utc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matcha_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,matcha_server=debug")),
        )
        .init();

    info!("Starting Matcha chat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build shared state
    // -----------------------------------------------------------------------
    let store = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };

    let http_addr = config.http_addr;
    let state = AppState::new(store, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic session cleanup (every 10 minutes, drop expired tokens)
    let store = state.store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
        loop {
            interval.tick().await;
            let purged = store.lock().await.purge_expired_sessions(Utc::now());
            match purged {
                Ok(n) if n > 0 => info!(sessions = n, "purged expired sessions"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "session purge failed"),
            }
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    // tokio::select! ensures that if either the HTTP server or a shutdown
    // signal arrives, we exit cleanly.
    tokio::select! {
        result = api::serve(state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
