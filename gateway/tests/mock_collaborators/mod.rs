//! In-process stand-ins for the conversational platform and the external
//! conversation service.
//!
//! `MockPlatform` records every enqueue and cancel, and lets a test decide
//! when a conversation becomes ready and how its execution ends.
//! `MockService` answers every utterance with `you said: <text>` unless told
//! to fail.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use chat_voice_relay::{
    AppState, ClientEvent, ClientHandle, ConversationInput, ConversationPlatform,
    ConversationService, ExecutionOutcome, MessageRoute, PlatformConversation, PlatformError,
    PlatformHandler, PlatformResult, ServerConfig, ServiceError, ServiceResult,
};

/// Configuration that never needs the network.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        platform_server: "app.us.example.com".to_string(),
        platform_api_key: "test-key".to_string(),
        platform_concurrency: 2,
        external_service_url: None,
        external_service_timeout_seconds: 10,
        response_timeout_ms: 300,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 60,
        rate_limit_burst_size: 10,
        max_websocket_connections: None,
        max_connections_per_ip: 100,
    }
}

#[derive(Default)]
pub struct MockService {
    calls: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    broken: Mutex<HashSet<String>>,
}

impl MockService {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    /// Every later message for this conversation fails.
    pub fn fail_messages_for(&self, conversation_id: &str) {
        self.broken.lock().insert(conversation_id.to_string());
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ConversationService for MockService {
    async fn start(&self) -> ServiceResult<()> {
        Ok(())
    }

    async fn create_conversation(
        &self,
        _input: &ConversationInput,
        conversation_id: &str,
    ) -> ServiceResult<()> {
        self.record(format!("create:{conversation_id}"));
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(ServiceError::ConnectionFailed("service offline".to_string()));
        }
        Ok(())
    }

    async fn process_user_message(&self, conversation_id: &str, text: &str) -> ServiceResult<String> {
        self.record(format!("message:{conversation_id}"));
        if self.broken.lock().contains(conversation_id) {
            return Err(ServiceError::ConnectionFailed("service offline".to_string()));
        }
        Ok(format!("you said: {text}"))
    }

    async fn execute_conversation(&self, conversation_id: &str) -> ServiceResult<()> {
        self.record(format!("execute:{conversation_id}"));
        Ok(())
    }

    async fn close_conversation(&self, conversation_id: &str) -> ServiceResult<()> {
        self.record(format!("close:{conversation_id}"));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

type Finisher = oneshot::Sender<PlatformResult<ExecutionOutcome>>;

pub struct MockPlatform {
    handler: Arc<dyn PlatformHandler>,
    enqueued: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    finishers: Mutex<HashMap<String, Finisher>>,
    inputs: Arc<Mutex<HashMap<String, ConversationInput>>>,
}

impl MockPlatform {
    pub fn new(handler: Arc<dyn PlatformHandler>) -> Self {
        Self {
            handler,
            enqueued: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            finishers: Mutex::new(HashMap::new()),
            inputs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn handler(&self) -> &Arc<dyn PlatformHandler> {
        &self.handler
    }

    pub fn enqueued(&self) -> Vec<String> {
        self.enqueued.lock().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    /// Input the conversation was executed with, once execution started.
    pub fn executed_input(&self, conversation_id: &str) -> Option<ConversationInput> {
        self.inputs.lock().get(conversation_id).cloned()
    }

    /// Report a conversation ready, as the platform does once it has capacity.
    pub async fn ready(&self, conversation_id: &str) {
        let (tx, rx) = oneshot::channel();
        self.finishers.lock().insert(conversation_id.to_string(), tx);
        let conversation = MockConversation {
            conversation_id: conversation_id.to_string(),
            outcome: Some(rx),
            inputs: self.inputs.clone(),
        };
        self.handler
            .on_ready(conversation_id, Box::new(conversation), json!({"channel": "audio"}))
            .await;
    }

    pub fn complete(&self, conversation_id: &str) -> bool {
        self.finish(
            conversation_id,
            Ok(ExecutionOutcome {
                result: json!({"status": "done"}),
            }),
        )
    }

    pub fn fail(&self, conversation_id: &str, reason: &str) -> bool {
        self.finish(
            conversation_id,
            Err(PlatformError::ExecutionFailed(reason.to_string())),
        )
    }

    /// Drop the platform connection the way the real client does: running
    /// executions fail, conversations still queued are reported to the
    /// handler.
    pub async fn lose_connection(&self) {
        let running: HashMap<String, Finisher> = self.finishers.lock().drain().collect();
        let cancelled = self.cancelled();
        let queued: Vec<String> = self
            .enqueued()
            .into_iter()
            .filter(|id| !running.contains_key(id) && !cancelled.contains(id))
            .collect();

        for (_, tx) in running {
            let _ = tx.send(Err(PlatformError::ConnectionFailed(
                "platform connection closed".to_string(),
            )));
        }
        for conversation_id in queued {
            self.handler
                .on_finished(
                    &conversation_id,
                    Err(PlatformError::ConnectionFailed(
                        "platform connection closed".to_string(),
                    )),
                )
                .await;
        }
    }

    fn finish(&self, conversation_id: &str, outcome: PlatformResult<ExecutionOutcome>) -> bool {
        match self.finishers.lock().remove(conversation_id) {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl ConversationPlatform for MockPlatform {
    async fn start(&self) -> PlatformResult<()> {
        Ok(())
    }

    async fn enqueue(&self, conversation_id: &str) -> PlatformResult<()> {
        self.enqueued.lock().push(conversation_id.to_string());
        Ok(())
    }

    async fn cancel(&self, conversation_id: &str) -> PlatformResult<()> {
        self.cancelled.lock().push(conversation_id.to_string());
        self.finishers.lock().remove(conversation_id);
        Ok(())
    }

    async fn shutdown(&self) {}

    fn concurrency(&self) -> usize {
        2
    }
}

struct MockConversation {
    conversation_id: String,
    outcome: Option<oneshot::Receiver<PlatformResult<ExecutionOutcome>>>,
    inputs: Arc<Mutex<HashMap<String, ConversationInput>>>,
}

#[async_trait]
impl PlatformConversation for MockConversation {
    fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    async fn execute(&mut self, input: ConversationInput) -> PlatformResult<ExecutionOutcome> {
        self.inputs
            .lock()
            .insert(self.conversation_id.clone(), input);
        let Some(outcome) = self.outcome.take() else {
            return Err(PlatformError::Protocol("executed twice".to_string()));
        };
        outcome.await.unwrap_or(Err(PlatformError::Cancelled))
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub platform: Arc<MockPlatform>,
    pub service: Arc<MockService>,
}

pub fn harness(config: ServerConfig) -> Harness {
    let service = Arc::new(MockService::default());
    let mut platform_slot = None;
    let state = AppState::with_collaborators(config, service.clone(), |handler| {
        let platform = Arc::new(MockPlatform::new(handler));
        platform_slot = Some(platform.clone());
        platform as Arc<dyn ConversationPlatform>
    });
    let platform = platform_slot.expect("platform constructed");
    Harness {
        state,
        platform,
        service,
    }
}

/// A client connection without a socket; events land on the receiver.
pub fn client(connection_id: &str) -> (ClientHandle, mpsc::Receiver<MessageRoute>) {
    let (tx, rx) = mpsc::channel(32);
    (ClientHandle::new(connection_id, tx), rx)
}

pub async fn next_event(rx: &mut mpsc::Receiver<MessageRoute>) -> ClientEvent {
    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
        Ok(Some(MessageRoute::Outgoing(event))) => event,
        Ok(Some(MessageRoute::Close)) => panic!("connection closed instead of event"),
        Ok(None) => panic!("client channel closed"),
        Err(_) => panic!("timed out waiting for client event"),
    }
}

/// Poll until `check` holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

pub fn input(value: Value) -> ConversationInput {
    match value {
        Value::Object(map) => map,
        other => panic!("input must be an object, got {other}"),
    }
}
