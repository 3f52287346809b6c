//! Chalkline WebSocket Relay Server
//!
//! Relays board events between the clients of a room and keeps the room's
//! presence roster.
//!
//! ## Protocol
//!
//! Messages are JSON tagged by `type`:
//! ```json
//! { "type": "join", "room": "whiteboard-main" }
//! { "type": "broadcast", "event": "stroke", "data": { "id": "..." } }
//! { "type": "track", "user_id": "alice", "metadata": { "name": "Alice", "tool": "pen" } }
//! ```
//! The server answers with `joined` (including the broadcasts since the last
//! `clear`), relays `broadcast` to everyone but the sender, and sends the full
//! `presence` roster to every member whenever it changes.

mod config;
mod connection;
mod room;

use config::ServerConfig;
use room::RelayState;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chalkline_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = config.addr;
    let app = connection::router(Arc::new(RelayState::new(config)));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    info!("Chalkline relay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server error: {}", e);
    }
}
