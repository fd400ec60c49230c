//! In-memory conversation registry.
//!
//! Tracks which connection owns which conversation, the input each
//! conversation was created with, and the queue of chatbot output waiting to
//! be pulled by the platform.
//!
//! All maps live behind one mutex and every operation is a short critical
//! section without `.await`, so two event callbacks can never interleave
//! partial updates of the same conversation.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::events::ClientHandle;
use crate::errors::relay_error::{RelayError, RelayResult};

/// Key-value input supplied by the client when creating a conversation.
pub type ConversationInput = Map<String, Value>;

/// One item of a conversation's pending-output queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingOutput {
    /// Chatbot response waiting to be spoken
    Text(String),
    /// Nothing more will be delivered for this conversation
    EndOfStream,
}

/// Lifecycle state of a registered conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// Registered and enqueued on the platform
    Created,
    /// The platform reported readiness and execution started
    Executing,
    /// Teardown in progress; removed from the registry shortly
    Closed,
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationState::Created => write!(f, "created"),
            ConversationState::Executing => write!(f, "executing"),
            ConversationState::Closed => write!(f, "closed"),
        }
    }
}

/// What was left of a conversation when it was removed.
#[derive(Debug)]
pub struct ClosedConversation {
    pub conversation_id: String,
    pub connection_id: String,
    /// Output that was still queued and is now dropped
    pub pending: Vec<PendingOutput>,
    pub lifetime: Duration,
}

struct ConversationEntry {
    connection_id: String,
    client: ClientHandle,
    input: ConversationInput,
    queue: VecDeque<PendingOutput>,
    state: ConversationState,
    notify: Arc<Notify>,
    execution: Option<CancellationToken>,
    created_at: Instant,
}

#[derive(Default)]
struct RegistryMaps {
    conversations: HashMap<String, ConversationEntry>,
    connections: HashMap<String, String>,
}

/// Process-wide registry of active conversations.
#[derive(Default)]
pub struct ConversationRegistry {
    maps: Mutex<RegistryMaps>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new conversation owned by `client`.
    ///
    /// Fails if the conversation id is already active or the connection
    /// already owns a conversation; existing entries are never overwritten.
    pub fn register(
        &self,
        conversation_id: &str,
        input: ConversationInput,
        client: ClientHandle,
    ) -> RelayResult<()> {
        let connection_id = client.connection_id().to_string();
        let mut maps = self.maps.lock();

        if maps.conversations.contains_key(conversation_id) {
            return Err(RelayError::ConversationExists(conversation_id.to_string()));
        }
        if let Some(existing) = maps.connections.get(&connection_id) {
            return Err(RelayError::ConnectionBusy {
                connection_id,
                conversation_id: existing.clone(),
            });
        }

        maps.connections
            .insert(connection_id.clone(), conversation_id.to_string());
        maps.conversations.insert(
            conversation_id.to_string(),
            ConversationEntry {
                connection_id,
                client,
                input,
                queue: VecDeque::new(),
                state: ConversationState::Created,
                notify: Arc::new(Notify::new()),
                execution: None,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Client handle of the connection that owns a conversation.
    pub fn lookup_conversation(&self, conversation_id: &str) -> Option<ClientHandle> {
        self.maps
            .lock()
            .conversations
            .get(conversation_id)
            .map(|entry| entry.client.clone())
    }

    /// Conversation owned by a connection.
    pub fn lookup_connection(&self, connection_id: &str) -> Option<String> {
        self.maps.lock().connections.get(connection_id).cloned()
    }

    pub fn input(&self, conversation_id: &str) -> Option<ConversationInput> {
        self.maps
            .lock()
            .conversations
            .get(conversation_id)
            .map(|entry| entry.input.clone())
    }

    pub fn state(&self, conversation_id: &str) -> Option<ConversationState> {
        self.maps
            .lock()
            .conversations
            .get(conversation_id)
            .map(|entry| entry.state)
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.maps.lock().conversations.contains_key(conversation_id)
    }

    pub fn len(&self) -> usize {
        self.maps.lock().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append output for a conversation and wake its poller.
    pub fn enqueue_output(&self, conversation_id: &str, payload: PendingOutput) -> RelayResult<()> {
        let mut maps = self.maps.lock();
        let entry = maps
            .conversations
            .get_mut(conversation_id)
            .filter(|entry| entry.state != ConversationState::Closed)
            .ok_or_else(|| RelayError::UnknownConversation(conversation_id.to_string()))?;

        entry.queue.push_back(payload);
        entry.notify.notify_one();
        Ok(())
    }

    /// Pop the oldest pending output without waiting.
    pub fn dequeue_output(&self, conversation_id: &str) -> RelayResult<PendingOutput> {
        let mut maps = self.maps.lock();
        let entry = maps
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| RelayError::UnknownConversation(conversation_id.to_string()))?;

        entry
            .queue
            .pop_front()
            .ok_or_else(|| RelayError::QueueEmpty(conversation_id.to_string()))
    }

    /// Pop the oldest pending output, waiting up to `timeout` for one to be
    /// appended.
    ///
    /// Returns `UnknownConversation` if the conversation is removed (or is
    /// closing with nothing left to deliver) while waiting.
    pub async fn wait_output(
        &self,
        conversation_id: &str,
        timeout: Duration,
    ) -> RelayResult<PendingOutput> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notify = {
                let mut maps = self.maps.lock();
                let entry = maps
                    .conversations
                    .get_mut(conversation_id)
                    .ok_or_else(|| RelayError::UnknownConversation(conversation_id.to_string()))?;

                if let Some(item) = entry.queue.pop_front() {
                    return Ok(item);
                }
                if entry.state == ConversationState::Closed {
                    return Err(RelayError::UnknownConversation(conversation_id.to_string()));
                }
                entry.notify.clone()
            };

            // notify_one leaves a permit behind, so an append that lands
            // between the check above and this wait is not missed.
            if tokio::time::timeout_at(deadline, notify.notified())
                .await
                .is_err()
            {
                return Err(RelayError::ResponseTimeout {
                    conversation_id: conversation_id.to_string(),
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
    }

    /// Drop everything still queued and leave a single end-of-stream marker.
    pub fn end_output_stream(&self, conversation_id: &str) -> RelayResult<usize> {
        let mut maps = self.maps.lock();
        let entry = maps
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| RelayError::UnknownConversation(conversation_id.to_string()))?;

        let discarded = entry.queue.len();
        entry.queue.clear();
        entry.queue.push_back(PendingOutput::EndOfStream);
        entry.notify.notify_one();
        Ok(discarded)
    }

    /// Move a created conversation to executing, remembering the token that
    /// cancels its execution task. Returns the stored input.
    pub fn start_execution(
        &self,
        conversation_id: &str,
        execution: CancellationToken,
    ) -> RelayResult<ConversationInput> {
        let mut maps = self.maps.lock();
        let entry = maps
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| RelayError::UnknownConversation(conversation_id.to_string()))?;

        match entry.state {
            ConversationState::Created => {
                entry.state = ConversationState::Executing;
                entry.execution = Some(execution);
                Ok(entry.input.clone())
            }
            ConversationState::Executing => {
                Err(RelayError::AlreadyExecuting(conversation_id.to_string()))
            }
            ConversationState::Closed => {
                Err(RelayError::UnknownConversation(conversation_id.to_string()))
            }
        }
    }

    /// Claim the teardown of a conversation.
    ///
    /// Only the first caller gets `true`; the execution task (if any) is
    /// cancelled and pollers are woken.
    pub fn begin_close(&self, conversation_id: &str) -> bool {
        let mut maps = self.maps.lock();
        let Some(entry) = maps.conversations.get_mut(conversation_id) else {
            return false;
        };
        if entry.state == ConversationState::Closed {
            return false;
        }

        entry.state = ConversationState::Closed;
        if let Some(execution) = entry.execution.take() {
            execution.cancel();
        }
        entry.notify.notify_waiters();
        true
    }

    /// Delete every map entry of a conversation. Idempotent.
    pub fn remove(&self, conversation_id: &str) -> Option<ClosedConversation> {
        let mut maps = self.maps.lock();
        let entry = maps.conversations.remove(conversation_id)?;

        if maps
            .connections
            .get(&entry.connection_id)
            .is_some_and(|owned| owned == conversation_id)
        {
            maps.connections.remove(&entry.connection_id);
        }
        if let Some(execution) = &entry.execution {
            execution.cancel();
        }
        entry.notify.notify_waiters();
        entry.notify.notify_one();

        Some(ClosedConversation {
            conversation_id: conversation_id.to_string(),
            connection_id: entry.connection_id,
            pending: entry.queue.into_iter().collect(),
            lifetime: entry.created_at.elapsed(),
        })
    }

    /// Current connection id → conversation id mapping.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.maps
            .lock()
            .connections
            .iter()
            .map(|(connection, conversation)| (connection.clone(), conversation.clone()))
            .collect()
    }
}
