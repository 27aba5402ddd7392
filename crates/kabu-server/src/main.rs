//! # kabu-server
//!
//! Realtime relay for Kabu chat: a stateless WebSocket hub with one
//! broadcast room per chat channel.
//!
//! This binary provides:
//! - **Room-based fan-out**: `sendMessage` frames are re-emitted to the room
//!   as `newMessage` with a server-assigned id and timestamp
//! - **Typing indicators** relayed to everyone in the room except the sender
//! - **Presence tracking** for connections that announce `userConnected`
//! - **REST endpoints** (axum) for health checks and fan-out stats
//!
//! The relay holds no history and never touches durable state; the document
//! store is the single source of truth and clients reconcile the two paths
//! by message id.

mod api;
mod config;
mod rooms;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rooms::RoomRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,kabu_server=debug")),
        )
        .init();

    info!("Starting Kabu relay server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Build state and run until shutdown
    // -----------------------------------------------------------------------
    let state = AppState {
        rooms: RoomRegistry::new(),
        config: Arc::new(config.clone()),
    };

    tokio::select! {
        result = api::serve(state, config.http_addr) => {
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
