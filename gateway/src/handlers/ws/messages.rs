//! Client WebSocket message types

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::registry::ConversationInput;

/// Maximum allowed size for a conversation id (256 bytes)
pub const MAX_CONVERSATION_ID_SIZE: usize = 256;

/// Maximum allowed size for a debug message (16 KB)
pub const MAX_DEBUG_MESSAGE_SIZE: usize = 16 * 1024;

/// Maximum allowed size for serialized conversation input (64 KB)
pub const MAX_INPUT_SIZE: usize = 64 * 1024;

fn empty_input() -> Value {
    Value::Object(Map::new())
}

/// Incoming WebSocket messages from a browser client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// Start a conversation owned by this connection
    CreateConversation {
        conversation_id: String,
        #[serde(default = "empty_input")]
        input: Value,
        /// Echo of the id from `connected`; the transport id always wins
        #[serde(default)]
        connection_id: Option<String>,
    },

    /// Stop the conversation immediately
    InterruptConversation,

    /// End the conversation
    CloseConversation,

    /// Free-form diagnostics, logged server side
    Debug { message: String },
}

/// Error type for message validation failures
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyConversationId,
    ConversationIdTooLong { size: usize, max: usize },
    InputNotObject,
    InputTooLarge { size: usize, max: usize },
    DebugMessageTooLarge { size: usize, max: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyConversationId => write!(f, "conversation_id must not be empty"),
            Self::ConversationIdTooLong { size, max } => {
                write!(f, "conversation_id too long: {size} bytes (max: {max} bytes)")
            }
            Self::InputNotObject => write!(f, "input must be a JSON object"),
            Self::InputTooLarge { size, max } => {
                write!(f, "input too large: {size} bytes (max: {max} bytes)")
            }
            Self::DebugMessageTooLarge { size, max } => {
                write!(f, "Debug message too large: {size} bytes (max: {max} bytes)")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl IncomingMessage {
    /// Validates field sizes before anything reaches the registry.
    pub fn validate_size(&self) -> Result<(), ValidationError> {
        match self {
            IncomingMessage::CreateConversation {
                conversation_id,
                input,
                ..
            } => {
                if conversation_id.is_empty() {
                    return Err(ValidationError::EmptyConversationId);
                }
                if conversation_id.len() > MAX_CONVERSATION_ID_SIZE {
                    return Err(ValidationError::ConversationIdTooLong {
                        size: conversation_id.len(),
                        max: MAX_CONVERSATION_ID_SIZE,
                    });
                }
                if !input.is_object() {
                    return Err(ValidationError::InputNotObject);
                }
                let size = input.to_string().len();
                if size > MAX_INPUT_SIZE {
                    return Err(ValidationError::InputTooLarge {
                        size,
                        max: MAX_INPUT_SIZE,
                    });
                }
            }
            IncomingMessage::Debug { message } => {
                if message.len() > MAX_DEBUG_MESSAGE_SIZE {
                    return Err(ValidationError::DebugMessageTooLarge {
                        size: message.len(),
                        max: MAX_DEBUG_MESSAGE_SIZE,
                    });
                }
            }
            IncomingMessage::InterruptConversation | IncomingMessage::CloseConversation => {}
        }
        Ok(())
    }
}

/// Take the key-value map out of a validated `input` value.
pub fn into_conversation_input(input: Value) -> ConversationInput {
    match input {
        Value::Object(map) => map,
        _ => ConversationInput::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_conversation_deserialization() {
        let json = r#"{"type":"create_conversation","conversation_id":"c1","input":{"lang":"en"}}"#;
        let msg: IncomingMessage = serde_json::from_str(json).expect("Should deserialize");
        assert_eq!(
            msg,
            IncomingMessage::CreateConversation {
                conversation_id: "c1".to_string(),
                input: json!({"lang": "en"}),
                connection_id: None,
            }
        );
        assert!(msg.validate_size().is_ok());
    }

    #[test]
    fn test_missing_input_defaults_to_empty_object() {
        let json = r#"{"type":"create_conversation","conversation_id":"c1","connection_id":"s1"}"#;
        let msg: IncomingMessage = serde_json::from_str(json).expect("Should deserialize");
        match msg {
            IncomingMessage::CreateConversation {
                input,
                connection_id,
                ..
            } => {
                assert_eq!(input, json!({}));
                assert_eq!(connection_id.as_deref(), Some("s1"));
            }
            other => panic!("Expected CreateConversation, got {other:?}"),
        }
    }

    #[test]
    fn test_unit_messages() {
        let msg: IncomingMessage =
            serde_json::from_str(r#"{"type":"interrupt_conversation"}"#).unwrap();
        assert_eq!(msg, IncomingMessage::InterruptConversation);
        let msg: IncomingMessage = serde_json::from_str(r#"{"type":"close_conversation"}"#).unwrap();
        assert_eq!(msg, IncomingMessage::CloseConversation);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<IncomingMessage>(r#"{"type":"speak"}"#).is_err());
    }

    #[test]
    fn test_validation_conversation_id() {
        let msg = IncomingMessage::CreateConversation {
            conversation_id: String::new(),
            input: json!({}),
            connection_id: None,
        };
        assert_eq!(msg.validate_size(), Err(ValidationError::EmptyConversationId));

        let msg = IncomingMessage::CreateConversation {
            conversation_id: "c".repeat(MAX_CONVERSATION_ID_SIZE + 1),
            input: json!({}),
            connection_id: None,
        };
        assert!(matches!(
            msg.validate_size(),
            Err(ValidationError::ConversationIdTooLong { .. })
        ));
    }

    #[test]
    fn test_validation_input() {
        let msg = IncomingMessage::CreateConversation {
            conversation_id: "c1".to_string(),
            input: json!(["not", "an", "object"]),
            connection_id: None,
        };
        assert_eq!(msg.validate_size(), Err(ValidationError::InputNotObject));

        let msg = IncomingMessage::CreateConversation {
            conversation_id: "c1".to_string(),
            input: json!({ "blob": "a".repeat(MAX_INPUT_SIZE) }),
            connection_id: None,
        };
        assert!(matches!(
            msg.validate_size(),
            Err(ValidationError::InputTooLarge { .. })
        ));
    }

    #[test]
    fn test_validation_debug_message() {
        let msg = IncomingMessage::Debug {
            message: "a".repeat(MAX_DEBUG_MESSAGE_SIZE + 1),
        };
        let err = msg.validate_size().unwrap_err();
        assert!(err.to_string().starts_with("Debug message too large"));
    }
}
