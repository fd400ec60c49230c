use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::app_error::{AppError, AppResult};
use crate::state::AppState;

/// SIP registration details for browser softphones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SipRegistration {
    /// Address of record, unique per request
    pub aor: String,
    /// WebSocket endpoint of the SIP server
    #[serde(rename = "sipServerEndpoint")]
    pub sip_server_endpoint: String,
}

/// Liveness probe.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Connection id → conversation id for every active conversation.
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.connected_clients())
}

pub async fn sip_registration(State(state): State<Arc<AppState>>) -> AppResult<Json<SipRegistration>> {
    let domain = state
        .config
        .platform_config()
        .sip_domain()
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Json(SipRegistration {
        aor: format!("sip:reg-{}@{}", Uuid::new_v4(), domain),
        sip_server_endpoint: format!("wss://{domain}/sip/connect"),
    }))
}
