//! Base trait and error type for the external conversation service.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::registry::ConversationInput;

/// Errors returned by conversation service implementations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid service configuration (bad URL, client build failure)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The service could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The service answered with a non-success status
    #[error("Request failed with status {status}: {message}")]
    RequestFailed { status: u16, message: String },

    /// The service answered with a body we could not use
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The request did not complete in time
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The service does not know the conversation
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Collaborator that produces chatbot responses for a conversation.
#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Prepare the service before traffic is accepted.
    async fn start(&self) -> ServiceResult<()>;

    /// Begin application-level processing for a new conversation.
    async fn create_conversation(
        &self,
        input: &ConversationInput,
        conversation_id: &str,
    ) -> ServiceResult<()>;

    /// Produce the chatbot response to one user utterance.
    async fn process_user_message(&self, conversation_id: &str, text: &str)
    -> ServiceResult<String>;

    /// Signal that the conversation has been scheduled on the platform.
    async fn execute_conversation(&self, conversation_id: &str) -> ServiceResult<()>;

    /// Tear down any side state. Must tolerate unknown ids.
    async fn close_conversation(&self, conversation_id: &str) -> ServiceResult<()>;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}
