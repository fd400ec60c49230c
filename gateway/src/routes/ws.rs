//! Client WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the client WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for the conversation relay
///
/// # Example
///
/// ```json
/// // Server greets the client
/// {"type": "connected", "connection_id": "..."}
///
/// // Client starts a conversation
/// {"type": "create_conversation", "conversation_id": "c1", "input": {"lang": "en"}}
///
/// // Server confirms and streams transcripts
/// {"type": "conversation_created", "conversation_id": "c1"}
/// {"type": "transcript", "speaker": "human", "text": "hello"}
/// ```
///
/// The connection-limit middleware is applied in `main.rs` once state is
/// available.
pub fn create_ws_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
}
