//! WebSocket Handler
//!
//! Handles WebSocket upgrade requests and hands the connection to a session.

use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::StreamExt;
use std::sync::Arc;

use super::hub::HubHandle;
use super::session::{self, SessionConfig};
use crate::api::AppState;

/// WebSocket upgrade handler
///
/// This is the entry point for WebSocket connections.
/// It upgrades the HTTP connection to WebSocket and starts message handling.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let hub = state.hub.clone();
    let config = Arc::clone(&state.session);

    ws.max_message_size(config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, hub, config))
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, hub: HubHandle, config: Arc<SessionConfig>) {
    let (sender, receiver) = socket.split();

    match session::open(&hub, &config, sender, receiver).await {
        Ok(id) => tracing::info!(session_id = %id, "Incoming client"),
        Err(e) => tracing::error!(error = %e, "Failed to register WebSocket connection"),
    }
}
