//! External-service collaborator.
//!
//! The service turns user text into chatbot responses. It is called by the
//! relay when conversations are created, executed and closed, and once per
//! user utterance.
//!
//! # Implementations
//!
//! - [`HttpConversationService`] - REST client for a remote service
//! - [`EchoConversationService`] - built-in fallback that echoes user text

mod base;
mod echo;
mod http;

use std::sync::Arc;
use std::time::Duration;

pub use base::{ConversationService, ServiceError, ServiceResult};
pub use echo::EchoConversationService;
pub use self::http::HttpConversationService;

use crate::config::ServerConfig;

/// Build the service selected by configuration.
///
/// Uses the HTTP service when `EXTERNAL_SERVICE_URL` is set, the echo
/// service otherwise.
pub fn create_conversation_service(
    config: &ServerConfig,
) -> ServiceResult<Arc<dyn ConversationService>> {
    match &config.external_service_url {
        Some(url) => {
            let service = HttpConversationService::new(
                url,
                Duration::from_secs(config.external_service_timeout_seconds),
            )?;
            Ok(Arc::new(service))
        }
        None => {
            tracing::warn!(
                "EXTERNAL_SERVICE_URL not set, falling back to the built-in echo service"
            );
            Ok(Arc::new(EchoConversationService::new()))
        }
    }
}
