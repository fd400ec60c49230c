//! Events the relay pushes to browser clients, and the handle used to route
//! them to a specific connection.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// Chatbot output spoken by the platform
    Ai,
    /// User speech recognised by the platform
    Human,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Ai => write!(f, "ai"),
            Speaker::Human => write!(f, "human"),
        }
    }
}

/// Outgoing WebSocket messages to a client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Sent once after the upgrade with the transport-assigned connection id
    #[serde(rename = "connected")]
    Connected { connection_id: String },

    /// Conversation registered and enqueued on the platform
    #[serde(rename = "conversation_created")]
    ConversationCreated { conversation_id: String },

    /// One transcript line
    #[serde(rename = "transcript")]
    Transcript { speaker: Speaker, text: String },

    /// The platform finished the conversation on its own
    #[serde(rename = "conversation_closed_by_system")]
    ConversationClosedBySystem { conversation_id: String },

    /// Error message
    #[serde(rename = "error")]
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
    },
}

impl ClientEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ClientEvent::Error {
            code: Some(code.to_string()),
            message: message.into(),
        }
    }
}

/// Items consumed by a connection's sender task
#[derive(Debug)]
pub enum MessageRoute {
    /// JSON text message
    Outgoing(ClientEvent),
    /// Close connection
    Close,
}

/// Cloneable handle to one client connection.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    connection_id: Arc<str>,
    tx: mpsc::Sender<MessageRoute>,
}

impl ClientHandle {
    pub fn new(connection_id: impl Into<Arc<str>>, tx: mpsc::Sender<MessageRoute>) -> Self {
        Self {
            connection_id: connection_id.into(),
            tx,
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue an event for delivery. Returns false when the connection is gone.
    pub async fn emit(&self, event: ClientEvent) -> bool {
        match self.tx.send(MessageRoute::Outgoing(event)).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!(
                    connection_id = %self.connection_id,
                    "Dropping event for closed connection"
                );
                false
            }
        }
    }

    /// Ask the sender task to close the socket.
    pub async fn close(&self) {
        let _ = self.tx.send(MessageRoute::Close).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
