//! Frames exchanged with the platform relay endpoint.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Channel the platform runs conversations on.
pub const EXECUTION_CHANNEL: &str = "audio";

/// Frames sent to the platform.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        concurrency: usize,
    },
    Enqueue {
        conversation_id: String,
    },
    Execute {
        conversation_id: String,
        channel: String,
        input: Value,
    },
    Cancel {
        conversation_id: String,
    },
    ExternalResult {
        call_id: String,
        result: Value,
    },
    ExternalError {
        call_id: String,
        message: String,
    },
}

/// Frames received from the platform.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Ready {
        conversation_id: String,
        #[serde(default)]
        info: Value,
    },
    ExternalCall {
        call_id: String,
        conversation_id: String,
        name: String,
        #[serde(default)]
        args: Value,
    },
    Completed {
        conversation_id: String,
        #[serde(default)]
        result: Value,
    },
    Failed {
        conversation_id: String,
        reason: String,
    },
    Transcription {
        conversation_id: String,
        speaker: String,
        text: String,
    },
    Error {
        message: String,
    },
}

/// Functions the platform may invoke on the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ExternalFunction {
    GetChatbotInput,
    SendUserInput { user_input: String },
    CloseConversation,
}

impl ExternalFunction {
    pub fn parse(name: &str, args: &Value) -> Result<Self, String> {
        match name {
            "get_chatbot_input" => Ok(Self::GetChatbotInput),
            "send_user_input" => args
                .get("user_input")
                .and_then(Value::as_str)
                .map(|text| Self::SendUserInput {
                    user_input: text.to_string(),
                })
                .ok_or_else(|| "send_user_input requires a string 'user_input'".to_string()),
            "close_conversation" => Ok(Self::CloseConversation),
            other => Err(format!("Unknown external function '{other}'")),
        }
    }
}
