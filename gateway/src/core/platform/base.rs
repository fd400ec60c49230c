use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::registry::{ClosedConversation, ConversationInput};
use crate::errors::relay_error::RelayResult;

/// Errors raised by the conversational platform collaborator.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Invalid platform configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Connection to platform failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to platform")]
    NotConnected,

    #[error("Conversation {0} is already enqueued on the platform")]
    AlreadyEnqueued(String),

    #[error("Conversation {0} is not known to the platform")]
    UnknownConversation(String),

    #[error("Conversation execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Conversation execution was cancelled")]
    Cancelled,

    #[error("Platform protocol error: {0}")]
    Protocol(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

/// Final result reported by the platform when a conversation finishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    pub result: Value,
}

/// A conversation the platform reported as ready to run.
#[async_trait]
pub trait PlatformConversation: Send {
    fn conversation_id(&self) -> &str;

    /// Run the conversation to completion.
    ///
    /// Resolves when the platform reports the conversation completed or
    /// failed. Dropping the future abandons the wait without telling the
    /// platform; use [`ConversationPlatform::cancel`] for that.
    async fn execute(&mut self, input: ConversationInput) -> PlatformResult<ExecutionOutcome>;
}

/// Callbacks the platform invokes while conversations progress.
#[async_trait]
pub trait PlatformHandler: Send + Sync {
    /// Next chatbot response to speak, or `None` once the stream has ended.
    async fn get_chatbot_input(&self, conversation_id: &str) -> RelayResult<Option<String>>;

    /// Transcribed user speech.
    async fn send_user_input(&self, conversation_id: &str, user_input: &str) -> RelayResult<()>;

    /// The platform ended the conversation.
    async fn close_conversation(&self, conversation_id: &str) -> Option<ClosedConversation>;

    /// A previously enqueued conversation has been assigned capacity.
    async fn on_ready(
        &self,
        conversation_id: &str,
        conversation: Box<dyn PlatformConversation>,
        info: Value,
    );

    /// A conversation ended without an execution waiting on it.
    ///
    /// Raised when the platform reports an outcome before execution started,
    /// or when the connection drops while the conversation is still queued.
    async fn on_finished(&self, conversation_id: &str, outcome: PlatformResult<ExecutionOutcome>);
}

/// Client side of the conversational platform.
#[async_trait]
pub trait ConversationPlatform: Send + Sync {
    /// Connect and announce the local concurrency.
    async fn start(&self) -> PlatformResult<()>;

    /// Ask the platform to schedule a conversation.
    ///
    /// Returns once the request is accepted locally; if all concurrency
    /// slots are taken the request waits inside the client.
    async fn enqueue(&self, conversation_id: &str) -> PlatformResult<()>;

    /// Withdraw a conversation, whether still queued or already running.
    /// Unknown ids are ignored.
    async fn cancel(&self, conversation_id: &str) -> PlatformResult<()>;

    /// Disconnect and fail every conversation still in flight.
    async fn shutdown(&self);

    fn concurrency(&self) -> usize;
}
