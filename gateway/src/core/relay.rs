//! Functions the platform invokes while a conversation runs.
//!
//! Every handler tolerates the conversation having been torn down already:
//! it returns an error value (or `None`) and never panics.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use crate::core::events::{ClientEvent, Speaker};
use crate::core::lifecycle;
use crate::core::platform::{
    ConversationPlatform, ExecutionOutcome, PlatformConversation, PlatformHandler, PlatformResult,
};
use crate::core::registry::{ClosedConversation, ConversationRegistry, PendingOutput};
use crate::core::service::ConversationService;
use crate::errors::relay_error::{RelayError, RelayResult};

/// Relay handlers shared by the platform client and the lifecycle controller.
#[derive(Clone)]
pub struct RelayHandlers {
    registry: Arc<ConversationRegistry>,
    service: Arc<dyn ConversationService>,
    response_timeout: Duration,
    platform: Arc<OnceLock<Weak<dyn ConversationPlatform>>>,
}

impl RelayHandlers {
    pub fn new(
        registry: Arc<ConversationRegistry>,
        service: Arc<dyn ConversationService>,
        response_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            service,
            response_timeout,
            platform: Arc::new(OnceLock::new()),
        }
    }

    /// Platform to withdraw conversations from when the relay gives up on
    /// them. Shared by every clone; only the first attachment sticks.
    pub fn attach_platform(&self, platform: &Arc<dyn ConversationPlatform>) {
        if self.platform.set(Arc::downgrade(platform)).is_err() {
            tracing::debug!("Platform already attached to relay handlers");
        }
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    pub fn service(&self) -> &Arc<dyn ConversationService> {
        &self.service
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Next chatbot response for the platform to speak.
    ///
    /// Waits up to the response timeout. A text response is mirrored to the
    /// client as an `ai` transcript; the end-of-stream marker yields `None`.
    pub async fn get_chatbot_input(&self, conversation_id: &str) -> RelayResult<Option<String>> {
        match self
            .registry
            .wait_output(conversation_id, self.response_timeout)
            .await?
        {
            PendingOutput::Text(text) => {
                if let Some(client) = self.registry.lookup_conversation(conversation_id) {
                    client
                        .emit(ClientEvent::Transcript {
                            speaker: Speaker::Ai,
                            text: text.clone(),
                        })
                        .await;
                }
                Ok(Some(text))
            }
            PendingOutput::EndOfStream => {
                tracing::debug!(conversation_id = %conversation_id, "Output stream ended");
                Ok(None)
            }
        }
    }

    /// Forward user speech to the service and queue its answer.
    ///
    /// The human transcript reaches the client before the answer can be
    /// dequeued. A service failure is reported to the client and ends the
    /// conversation.
    pub async fn send_user_input(&self, conversation_id: &str, user_input: &str) -> RelayResult<()> {
        let client = self
            .registry
            .lookup_conversation(conversation_id)
            .ok_or_else(|| RelayError::UnknownConversation(conversation_id.to_string()))?;

        let response = match self
            .service
            .process_user_message(conversation_id, user_input)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let e = RelayError::from(e);
                tracing::error!(
                    conversation_id = %conversation_id,
                    service = self.service.name(),
                    "Service failed mid-conversation: {}",
                    e
                );
                client.emit(ClientEvent::error(e.code(), e.to_string())).await;
                self.withdraw(conversation_id).await;
                return Err(e);
            }
        };

        client
            .emit(ClientEvent::Transcript {
                speaker: Speaker::Human,
                text: user_input.to_string(),
            })
            .await;

        self.registry
            .enqueue_output(conversation_id, PendingOutput::Text(response))
    }

    /// Tear a conversation down. Only the first call has any effect.
    pub async fn close_conversation(&self, conversation_id: &str) -> Option<ClosedConversation> {
        if !self.registry.begin_close(conversation_id) {
            tracing::debug!(conversation_id = %conversation_id, "Conversation already closed");
            return None;
        }

        if let Err(e) = self.service.close_conversation(conversation_id).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                service = self.service.name(),
                "Service failed to close conversation: {}",
                e
            );
        }

        let closed = self.registry.remove(conversation_id)?;
        tracing::info!(
            conversation_id = %closed.conversation_id,
            connection_id = %closed.connection_id,
            dropped_outputs = closed.pending.len(),
            lifetime_ms = u64::try_from(closed.lifetime.as_millis()).unwrap_or(u64::MAX),
            "Conversation closed"
        );
        Some(closed)
    }

    /// Close locally, then withdraw the conversation from the platform.
    pub async fn withdraw(&self, conversation_id: &str) -> Option<ClosedConversation> {
        let closed = self.close_conversation(conversation_id).await?;
        let Some(platform) = self.platform.get().and_then(Weak::upgrade) else {
            return Some(closed);
        };
        if let Err(e) = platform.cancel(conversation_id).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                "Failed to withdraw conversation from platform: {}",
                e
            );
        }
        Some(closed)
    }

    /// Tell the client how the platform ended its conversation, then close it.
    ///
    /// Success becomes `conversation_closed_by_system`; failure becomes an
    /// `error` event.
    pub async fn finish_conversation(
        &self,
        conversation_id: &str,
        outcome: PlatformResult<ExecutionOutcome>,
    ) -> Option<ClosedConversation> {
        let event = match outcome {
            Ok(outcome) => {
                tracing::info!(
                    conversation_id = %conversation_id,
                    result = %outcome.result,
                    "Conversation completed"
                );
                ClientEvent::ConversationClosedBySystem {
                    conversation_id: conversation_id.to_string(),
                }
            }
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, "Conversation failed: {}", e);
                let e = RelayError::from(e);
                ClientEvent::error(e.code(), e.to_string())
            }
        };
        if let Some(client) = self.registry.lookup_conversation(conversation_id) {
            client.emit(event).await;
        }
        self.close_conversation(conversation_id).await
    }
}

#[async_trait]
impl PlatformHandler for RelayHandlers {
    async fn get_chatbot_input(&self, conversation_id: &str) -> RelayResult<Option<String>> {
        let result = RelayHandlers::get_chatbot_input(self, conversation_id).await;
        if let Err(e) = &result {
            tracing::warn!(conversation_id = %conversation_id, "get_chatbot_input failed: {}", e);
        }
        result
    }

    async fn send_user_input(&self, conversation_id: &str, user_input: &str) -> RelayResult<()> {
        let result = RelayHandlers::send_user_input(self, conversation_id, user_input).await;
        if let Err(e) = &result {
            tracing::warn!(conversation_id = %conversation_id, "send_user_input failed: {}", e);
        }
        result
    }

    async fn close_conversation(&self, conversation_id: &str) -> Option<ClosedConversation> {
        tracing::info!(conversation_id = %conversation_id, "Platform closed conversation");
        RelayHandlers::close_conversation(self, conversation_id).await
    }

    async fn on_ready(
        &self,
        conversation_id: &str,
        conversation: Box<dyn PlatformConversation>,
        info: Value,
    ) {
        lifecycle::begin_execution(self.clone(), conversation_id, conversation, info);
    }

    async fn on_finished(&self, conversation_id: &str, outcome: PlatformResult<ExecutionOutcome>) {
        RelayHandlers::finish_conversation(self, conversation_id, outcome).await;
    }
}
