//! Connection limit middleware for the client WebSocket endpoint
//!
//! Enforces the global WebSocket cap and the per-IP cap before the upgrade
//! happens. The slot taken here is released by the WebSocket handler when
//! the socket closes; requests that are not upgrades pass straight through.
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/ws", get(ws_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client address of an accepted upgrade, carried to the handler so it can
/// release the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

fn rejection(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Reject upgrades beyond the configured limits.
///
/// - 503 Service Unavailable when the global cap is reached
/// - 429 Too Many Requests when the caller's IP is at its cap
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let client_ip = addr.ip();
    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                active = state.ws_connection_count(),
                "Rejecting client connection: global limit reached"
            );
            rejection(
                StatusCode::SERVICE_UNAVAILABLE,
                "Relay at capacity. Please try again later.",
            )
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                active = state.ip_connection_count(&client_ip),
                "Rejecting client connection: per-IP limit reached"
            );
            rejection(
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
        }
    }
}
