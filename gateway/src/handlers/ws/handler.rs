//! Client WebSocket handler
//!
//! Each upgraded socket gets a transport-assigned connection id, a sender
//! task fed through an mpsc channel, and a receive loop that turns client
//! messages into lifecycle calls.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::events::{ClientEvent, ClientHandle, MessageRoute};
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::messages::{IncomingMessage, into_conversation_input};

/// Outgoing events buffered per connection
const CHANNEL_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Client WebSocket handler
///
/// Upgrades the HTTP connection to the conversation relay protocol.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    info!(ip = ?client_ip.map(|ClientIp(ip)| ip), "Client WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_client_socket(socket, state, client_ip))
}

async fn handle_client_socket(socket: WebSocket, state: Arc<AppState>, client_ip: Option<ClientIp>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection_id = %connection_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);

    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                MessageRoute::Outgoing(event) => match serde_json::to_string(&event) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing event: {}", e);
                        continue;
                    }
                },
                MessageRoute::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                debug!("Failed to send WebSocket message: {}", e);
                break;
            }
        }
    });

    let client = ClientHandle::new(connection_id.as_str(), message_tx);
    client
        .emit(ClientEvent::Connected {
            connection_id: connection_id.clone(),
        })
        .await;

    while let Some(msg_result) = receiver.next().await {
        match msg_result {
            Ok(msg) => {
                if !process_client_message(msg, &client, &state).await {
                    break;
                }
            }
            Err(e) => {
                warn!(connection_id = %connection_id, "Client WebSocket error: {}", e);
                break;
            }
        }
    }

    if let Some(closed) = state.lifecycle.disconnect(&connection_id).await {
        debug!(
            connection_id = %connection_id,
            conversation_id = %closed.conversation_id,
            "Conversation closed on disconnect"
        );
    }
    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }

    client.close().await;
    if let Err(e) = sender_task.await {
        debug!("Sender task ended abnormally: {}", e);
    }

    info!(connection_id = %connection_id, "Client disconnected");
}

/// Process one frame. Returns false when the connection should end.
async fn process_client_message(msg: Message, client: &ClientHandle, state: &Arc<AppState>) -> bool {
    match msg {
        Message::Text(text) => {
            let incoming: IncomingMessage = match serde_json::from_str(&text) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(connection_id = %client.connection_id(), "Failed to parse client message: {}", e);
                    client
                        .emit(ClientEvent::error(
                            "parse_error",
                            format!("Invalid message format: {e}"),
                        ))
                        .await;
                    return true;
                }
            };

            if let Err(e) = incoming.validate_size() {
                warn!(connection_id = %client.connection_id(), "Message validation failed: {}", e);
                client
                    .emit(ClientEvent::error("validation_error", e.to_string()))
                    .await;
                return true;
            }

            handle_incoming(incoming, client, state).await;
            true
        }
        Message::Binary(data) => {
            debug!(
                connection_id = %client.connection_id(),
                "Ignoring binary frame: {} bytes",
                data.len()
            );
            client
                .emit(ClientEvent::error(
                    "unsupported_frame",
                    "Binary frames are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(connection_id = %client.connection_id(), "Client close received");
            false
        }
    }
}

async fn handle_incoming(msg: IncomingMessage, client: &ClientHandle, state: &Arc<AppState>) {
    let connection_id = client.connection_id();
    let result = match msg {
        IncomingMessage::CreateConversation {
            conversation_id,
            input,
            connection_id: claimed,
        } => {
            if let Some(claimed) = claimed.filter(|claimed| claimed != connection_id) {
                warn!(
                    connection_id = %connection_id,
                    claimed = %claimed,
                    "Ignoring client-supplied connection id"
                );
            }
            state
                .lifecycle
                .create_conversation(&conversation_id, into_conversation_input(input), client)
                .await
        }
        IncomingMessage::InterruptConversation => {
            state.lifecycle.interrupt(connection_id).await.map(|_| ())
        }
        IncomingMessage::CloseConversation => {
            state.lifecycle.close(connection_id).await.map(|_| ())
        }
        IncomingMessage::Debug { message } => {
            state.lifecycle.debug(connection_id, &message);
            Ok(())
        }
    };

    if let Err(e) = result {
        warn!(connection_id = %connection_id, "Client request failed: {}", e);
        client.emit(ClientEvent::error(e.code(), e.to_string())).await;
    }
}
