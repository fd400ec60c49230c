//! Errors raised by the conversation registry, relay handlers and lifecycle
//! controller.
//!
//! None of these are fatal: callers log them and keep serving every other
//! conversation.

use thiserror::Error;

use crate::core::platform::PlatformError;
use crate::core::service::ServiceError;

/// Recoverable relay failures.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The conversation id is not (or no longer) registered
    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    /// The connection id owns no active conversation
    #[error("No active conversation for connection: {0}")]
    UnknownConnection(String),

    /// Output was requested before any was queued
    #[error("No pending output for conversation: {0}")]
    QueueEmpty(String),

    /// No output arrived within the configured response timeout
    #[error("Timed out after {waited_ms}ms waiting for output of conversation {conversation_id}")]
    ResponseTimeout {
        conversation_id: String,
        waited_ms: u64,
    },

    /// The conversation id is already in use by an active conversation
    #[error("Conversation already exists: {0}")]
    ConversationExists(String),

    /// The platform reported readiness twice for the same conversation
    #[error("Conversation already executing: {0}")]
    AlreadyExecuting(String),

    /// The connection already owns an active conversation
    #[error("Connection {connection_id} already owns conversation {conversation_id}")]
    ConnectionBusy {
        connection_id: String,
        conversation_id: String,
    },

    /// The conversation platform rejected or failed an operation
    #[error(transparent)]
    Platform(#[from] PlatformError),

    /// The external service rejected or failed an operation
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl RelayError {
    /// Short machine-readable code sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::UnknownConversation(_) => "unknown_conversation",
            RelayError::UnknownConnection(_) => "no_active_conversation",
            RelayError::QueueEmpty(_) => "queue_empty",
            RelayError::ResponseTimeout { .. } => "response_timeout",
            RelayError::ConversationExists(_) => "conversation_exists",
            RelayError::AlreadyExecuting(_) => "already_executing",
            RelayError::ConnectionBusy { .. } => "connection_busy",
            RelayError::Platform(_) => "platform_error",
            RelayError::Service(_) => "service_error",
        }
    }
}

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;
