//! WebSocket client for the conversational platform.
//!
//! One long-lived connection carries every conversation. Outgoing frames go
//! through an mpsc channel drained by the connection task; incoming frames
//! are dispatched to the [`PlatformHandler`] on their own tasks so a slow
//! `get_chatbot_input` never stalls the read loop.
//!
//! The client owns the concurrency bound: a conversation holds one semaphore
//! permit from the moment its `enqueue` frame is sent until the platform
//! reports it completed or failed, or it is cancelled.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{
    Message, client::IntoClientRequest, http::HeaderValue, http::header::AUTHORIZATION,
};
use tokio_util::sync::CancellationToken;

use super::base::{
    ConversationPlatform, ExecutionOutcome, PlatformConversation, PlatformError, PlatformHandler,
    PlatformResult,
};
use super::config::PlatformConfig;
use super::messages::{ClientFrame, EXECUTION_CHANNEL, ExternalFunction, ServerFrame};
use crate::core::registry::ConversationInput;

/// Channel capacity for outgoing platform frames.
const WS_CHANNEL_CAPACITY: usize = 256;

type Completion = oneshot::Sender<PlatformResult<ExecutionOutcome>>;

struct ConversationSlot {
    /// Cancelled when the conversation is withdrawn before a permit frees up
    queued: CancellationToken,
    /// Held while the platform knows about the conversation
    permit: Option<OwnedSemaphorePermit>,
    completion: Option<Completion>,
}

impl ConversationSlot {
    fn new(queued: CancellationToken) -> Self {
        Self {
            queued,
            permit: None,
            completion: None,
        }
    }
}

type SlotMap = Arc<DashMap<String, ConversationSlot>>;
type Outbound = Arc<RwLock<Option<mpsc::Sender<ClientFrame>>>>;

/// Platform client speaking JSON frames over a single WebSocket.
pub struct WsPlatformClient {
    config: PlatformConfig,
    handler: Arc<dyn PlatformHandler>,
    slots: Arc<Semaphore>,
    conversations: SlotMap,
    outbound: Outbound,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl WsPlatformClient {
    pub fn new(config: PlatformConfig, handler: Arc<dyn PlatformHandler>) -> PlatformResult<Self> {
        if config.concurrency == 0 {
            return Err(PlatformError::InvalidConfiguration(
                "concurrency must be at least 1".to_string(),
            ));
        }
        config.endpoint_url()?;

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.concurrency)),
            config,
            handler,
            conversations: Arc::new(DashMap::new()),
            outbound: Arc::new(RwLock::new(None)),
            connection_handle: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.outbound.read().is_some()
    }

    /// Conversations enqueued or running.
    pub fn in_flight(&self) -> usize {
        self.conversations.len()
    }

    fn sender(&self) -> PlatformResult<mpsc::Sender<ClientFrame>> {
        self.outbound.read().clone().ok_or(PlatformError::NotConnected)
    }

    fn handle_server_frame(
        frame: ServerFrame,
        handler: &Arc<dyn PlatformHandler>,
        conversations: &SlotMap,
        tx: &mpsc::Sender<ClientFrame>,
    ) {
        match frame {
            ServerFrame::Ready {
                conversation_id,
                info,
            } => {
                if !conversations.contains_key(&conversation_id) {
                    tracing::debug!(
                        conversation_id = %conversation_id,
                        "Ignoring readiness of withdrawn conversation"
                    );
                    return;
                }
                let conversation = WsConversation {
                    conversation_id: conversation_id.clone(),
                    outbound: tx.clone(),
                    conversations: conversations.clone(),
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler
                        .on_ready(&conversation_id, Box::new(conversation), info)
                        .await;
                });
            }
            ServerFrame::ExternalCall {
                call_id,
                conversation_id,
                name,
                args,
            } => {
                let handler = handler.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = match dispatch_external_call(
                        handler.as_ref(),
                        &conversation_id,
                        &name,
                        &args,
                    )
                    .await
                    {
                        Ok(result) => ClientFrame::ExternalResult { call_id, result },
                        Err(message) => {
                            tracing::debug!(
                                conversation_id = %conversation_id,
                                function = %name,
                                "External call failed: {}",
                                message
                            );
                            ClientFrame::ExternalError { call_id, message }
                        }
                    };
                    if tx.send(reply).await.is_err() {
                        tracing::warn!("Platform connection gone before external call reply");
                    }
                });
            }
            ServerFrame::Completed {
                conversation_id,
                result,
            } => finish(
                handler,
                conversations,
                &conversation_id,
                Ok(ExecutionOutcome { result }),
            ),
            ServerFrame::Failed {
                conversation_id,
                reason,
            } => finish(
                handler,
                conversations,
                &conversation_id,
                Err(PlatformError::ExecutionFailed(reason)),
            ),
            ServerFrame::Transcription {
                conversation_id,
                speaker,
                text,
            } => {
                tracing::debug!(
                    conversation_id = %conversation_id,
                    speaker = %speaker,
                    "Platform transcription: {}",
                    text
                );
            }
            ServerFrame::Error { message } => {
                tracing::warn!("Platform reported error: {}", message);
            }
        }
    }
}

/// Resolve a conversation's execution and release its slot.
fn finish(
    handler: &Arc<dyn PlatformHandler>,
    conversations: &SlotMap,
    conversation_id: &str,
    outcome: PlatformResult<ExecutionOutcome>,
) {
    let Some((_, mut slot)) = conversations.remove(conversation_id) else {
        tracing::debug!(conversation_id = %conversation_id, "Outcome for unknown conversation");
        return;
    };
    match slot.completion.take() {
        Some(completion) => {
            let _ = completion.send(outcome);
        }
        None => {
            tracing::warn!(
                conversation_id = %conversation_id,
                "Conversation finished before execution started"
            );
            notify_finished(handler, conversation_id.to_string(), outcome);
        }
    }
}

/// Fail every conversation the client still tracks.
///
/// Executing conversations learn through their completion; the rest are
/// reported to the handler.
fn fail_all(handler: &Arc<dyn PlatformHandler>, conversations: &SlotMap, reason: &str) {
    let mut orphaned = Vec::new();
    conversations.retain(|conversation_id, slot| {
        slot.queued.cancel();
        let error = PlatformError::ConnectionFailed(reason.to_string());
        match slot.completion.take() {
            Some(completion) => {
                let _ = completion.send(Err(error));
            }
            None => orphaned.push(conversation_id.clone()),
        }
        false
    });

    for conversation_id in orphaned {
        tracing::warn!(conversation_id = %conversation_id, "Dropping queued conversation: {}", reason);
        notify_finished(
            handler,
            conversation_id,
            Err(PlatformError::ConnectionFailed(reason.to_string())),
        );
    }
}

fn notify_finished(
    handler: &Arc<dyn PlatformHandler>,
    conversation_id: String,
    outcome: PlatformResult<ExecutionOutcome>,
) {
    let handler = handler.clone();
    tokio::spawn(async move {
        handler.on_finished(&conversation_id, outcome).await;
    });
}

async fn dispatch_external_call(
    handler: &dyn PlatformHandler,
    conversation_id: &str,
    name: &str,
    args: &Value,
) -> Result<Value, String> {
    match ExternalFunction::parse(name, args)? {
        ExternalFunction::GetChatbotInput => handler
            .get_chatbot_input(conversation_id)
            .await
            .map(|text| text.map(Value::String).unwrap_or(Value::Null))
            .map_err(|e| e.to_string()),
        ExternalFunction::SendUserInput { user_input } => handler
            .send_user_input(conversation_id, &user_input)
            .await
            .map(|_| Value::Null)
            .map_err(|e| e.to_string()),
        ExternalFunction::CloseConversation => {
            handler.close_conversation(conversation_id).await;
            Ok(Value::Null)
        }
    }
}

#[async_trait]
impl ConversationPlatform for WsPlatformClient {
    async fn start(&self) -> PlatformResult<()> {
        if self.is_connected() {
            return Ok(());
        }

        let url = self.config.endpoint_url()?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| PlatformError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| PlatformError::InvalidConfiguration(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| PlatformError::ConnectionFailed(e.to_string()))?;

        tracing::info!(
            url = %url,
            concurrency = self.config.concurrency,
            "Connected to conversation platform"
        );

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (tx, mut rx) = mpsc::channel::<ClientFrame>(WS_CHANNEL_CAPACITY);
        tx.send(ClientFrame::Hello {
            concurrency: self.config.concurrency,
        })
        .await
        .map_err(|_| PlatformError::NotConnected)?;
        *self.outbound.write() = Some(tx.clone());

        let handler = self.handler.clone();
        let conversations = self.conversations.clone();
        let outbound = self.outbound.clone();
        let shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        let _ = ws_sink.send(Message::Close(None)).await;
                        break;
                    }

                    Some(frame) = rx.recv() => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!("Failed to serialize platform frame: {}", e);
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            tracing::error!("Failed to send platform frame: {}", e);
                            break;
                        }
                    }

                    msg = ws_stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerFrame>(&text) {
                                    Ok(frame) => Self::handle_server_frame(
                                        frame,
                                        &handler,
                                        &conversations,
                                        &tx,
                                    ),
                                    Err(e) => {
                                        tracing::warn!("Failed to parse platform frame: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    tracing::error!("Failed to send pong: {}", e);
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("Platform closed the connection");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("Platform WebSocket error: {}", e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }

            outbound.write().take();
            fail_all(&handler, &conversations, "platform connection closed");
        });

        *self.connection_handle.lock() = Some(handle);
        Ok(())
    }

    async fn enqueue(&self, conversation_id: &str) -> PlatformResult<()> {
        let outbound = self.sender()?;
        let queued = CancellationToken::new();

        match self.conversations.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => {
                return Err(PlatformError::AlreadyEnqueued(conversation_id.to_string()));
            }
            Entry::Vacant(entry) => {
                entry.insert(ConversationSlot::new(queued.clone()));
            }
        }

        if self.slots.available_permits() == 0 {
            tracing::info!(
                conversation_id = %conversation_id,
                waiting = self.conversations.len(),
                "All platform slots busy, conversation queued locally"
            );
        }

        let slots = self.slots.clone();
        let conversations = self.conversations.clone();
        let handler = self.handler.clone();
        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            let permit = tokio::select! {
                permit = slots.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = queued.cancelled() => return,
            };
            let Ok(reservation) = outbound.reserve().await else {
                if conversations.remove(&conversation_id).is_some() {
                    tracing::warn!(conversation_id = %conversation_id, "Platform connection gone before enqueue");
                    notify_finished(
                        &handler,
                        conversation_id,
                        Err(PlatformError::NotConnected),
                    );
                }
                return;
            };

            // Slot update and frame hand-off happen together so a concurrent
            // cancel either sees no permit or follows the enqueue frame.
            match conversations.get_mut(&conversation_id) {
                Some(mut slot) => {
                    slot.permit = Some(permit);
                    reservation.send(ClientFrame::Enqueue {
                        conversation_id: conversation_id.clone(),
                    });
                }
                None => tracing::debug!(
                    conversation_id = %conversation_id,
                    "Conversation withdrawn while waiting for a slot"
                ),
            }
        });

        Ok(())
    }

    async fn cancel(&self, conversation_id: &str) -> PlatformResult<()> {
        let Some((_, slot)) = self.conversations.remove(conversation_id) else {
            return Ok(());
        };
        slot.queued.cancel();
        if slot.permit.is_none() {
            return Ok(());
        }

        let outbound = self.sender()?;
        outbound
            .send(ClientFrame::Cancel {
                conversation_id: conversation_id.to_string(),
            })
            .await
            .map_err(|_| PlatformError::NotConnected)
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.connection_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.outbound.write().take();
        fail_all(&self.handler, &self.conversations, "platform client shut down");
        tracing::info!("Platform client stopped");
    }

    fn concurrency(&self) -> usize {
        self.config.concurrency
    }
}

/// Handle on a ready conversation, backed by the shared connection.
struct WsConversation {
    conversation_id: String,
    outbound: mpsc::Sender<ClientFrame>,
    conversations: SlotMap,
}

#[async_trait]
impl PlatformConversation for WsConversation {
    fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    async fn execute(&mut self, input: ConversationInput) -> PlatformResult<ExecutionOutcome> {
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut slot = self
                .conversations
                .get_mut(&self.conversation_id)
                .ok_or_else(|| PlatformError::UnknownConversation(self.conversation_id.clone()))?;
            slot.completion = Some(done_tx);
        }

        self.outbound
            .send(ClientFrame::Execute {
                conversation_id: self.conversation_id.clone(),
                channel: EXECUTION_CHANNEL.to_string(),
                input: Value::Object(input),
            })
            .await
            .map_err(|_| PlatformError::NotConnected)?;

        done_rx.await.map_err(|_| PlatformError::Cancelled)?
    }
}
