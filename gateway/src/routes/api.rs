use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::api;
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST router
///
/// - `GET /health` - liveness probe
/// - `GET /clients` - active connection → conversation mapping
/// - `GET /sip` - SIP registration details for softphones
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/clients", get(api::list_clients))
        .route("/sip", get(api::sip_registration))
        .layer(TraceLayer::new_for_http())
}
