//! Conversational platform collaborator.
//!
//! [`ConversationPlatform`] is what the lifecycle controller drives;
//! [`PlatformHandler`] is what the platform calls back into. The only
//! production implementation is [`WsPlatformClient`].

mod base;
mod client;
mod config;
pub mod messages;

pub use base::{
    ConversationPlatform, ExecutionOutcome, PlatformConversation, PlatformError, PlatformHandler,
    PlatformResult,
};
pub use client::WsPlatformClient;
pub use config::{PlatformConfig, RELAY_PATH};

use std::sync::Arc;

use crate::config::ServerConfig;

/// Build the platform client described by the server configuration.
pub fn create_platform(
    config: &ServerConfig,
    handler: Arc<dyn PlatformHandler>,
) -> PlatformResult<Arc<dyn ConversationPlatform>> {
    let client = WsPlatformClient::new(config.platform_config(), handler)?;
    Ok(Arc::new(client))
}
