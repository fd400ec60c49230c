//! Connection lifecycle controller.
//!
//! Reacts to client connection events and platform readiness, and drives the
//! per-conversation state machine:
//!
//! ```text
//! absent --create--> created --ready--> executing --+
//!                       |                           |
//!                       +---- interrupt / close / disconnect / completion ---> closed (removed)
//! ```

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::core::events::{ClientEvent, ClientHandle};
use crate::core::platform::{ConversationPlatform, PlatformConversation};
use crate::core::registry::{ClosedConversation, ConversationInput};
use crate::core::relay::RelayHandlers;
use crate::errors::relay_error::{RelayError, RelayResult};

/// Drives registry mutation and collaborator calls for connection events.
#[derive(Clone)]
pub struct ConversationLifecycle {
    handlers: RelayHandlers,
    platform: Arc<dyn ConversationPlatform>,
}

impl ConversationLifecycle {
    pub fn new(handlers: RelayHandlers, platform: Arc<dyn ConversationPlatform>) -> Self {
        handlers.attach_platform(&platform);
        Self { handlers, platform }
    }

    pub fn handlers(&self) -> &RelayHandlers {
        &self.handlers
    }

    /// Register a conversation for `client` and schedule it on the platform.
    ///
    /// On success the client receives `conversation_created`. If a
    /// collaborator fails after registration the conversation is closed
    /// again and the error is returned for the caller to report.
    pub async fn create_conversation(
        &self,
        conversation_id: &str,
        input: ConversationInput,
        client: &ClientHandle,
    ) -> RelayResult<()> {
        self.handlers
            .registry()
            .register(conversation_id, input.clone(), client.clone())?;

        tracing::info!(
            conversation_id = %conversation_id,
            connection_id = %client.connection_id(),
            "Conversation registered"
        );

        if let Err(e) = self.schedule(conversation_id, &input).await {
            tracing::error!(
                conversation_id = %conversation_id,
                "Failed to start conversation: {}",
                e
            );
            self.close_conversation(conversation_id).await;
            return Err(e);
        }

        client
            .emit(ClientEvent::ConversationCreated {
                conversation_id: conversation_id.to_string(),
            })
            .await;
        Ok(())
    }

    async fn schedule(&self, conversation_id: &str, input: &ConversationInput) -> RelayResult<()> {
        let service = self.handlers.service();
        service.create_conversation(input, conversation_id).await?;
        self.platform.enqueue(conversation_id).await?;
        service.execute_conversation(conversation_id).await?;
        Ok(())
    }

    /// Client asked to stop its conversation immediately.
    pub async fn interrupt(&self, connection_id: &str) -> RelayResult<ClosedConversation> {
        let conversation_id = self.owned_conversation(connection_id)?;
        tracing::info!(
            conversation_id = %conversation_id,
            connection_id = %connection_id,
            "Conversation interrupted by client"
        );
        self.close_conversation(&conversation_id)
            .await
            .ok_or(RelayError::UnknownConversation(conversation_id))
    }

    /// Client asked to end its conversation.
    pub async fn close(&self, connection_id: &str) -> RelayResult<ClosedConversation> {
        let conversation_id = self.owned_conversation(connection_id)?;
        tracing::info!(
            conversation_id = %conversation_id,
            connection_id = %connection_id,
            "Conversation closed by client"
        );
        self.close_conversation(&conversation_id)
            .await
            .ok_or(RelayError::UnknownConversation(conversation_id))
    }

    /// The client's socket went away.
    ///
    /// Pending output is replaced by the end-of-stream marker before the
    /// conversation is closed, so a platform poll in flight ends cleanly.
    pub async fn disconnect(&self, connection_id: &str) -> Option<ClosedConversation> {
        let conversation_id = self.handlers.registry().lookup_connection(connection_id)?;

        match self.handlers.registry().end_output_stream(&conversation_id) {
            Ok(discarded) => tracing::info!(
                conversation_id = %conversation_id,
                connection_id = %connection_id,
                discarded,
                "Client disconnected, ending output stream"
            ),
            Err(e) => tracing::debug!(conversation_id = %conversation_id, "{}", e),
        }

        self.close_conversation(&conversation_id).await
    }

    /// Free-form diagnostics from the client. No state change.
    pub fn debug(&self, connection_id: &str, message: &str) {
        let conversation_id = self.handlers.registry().lookup_connection(connection_id);
        tracing::info!(
            connection_id = %connection_id,
            conversation_id = conversation_id.as_deref().unwrap_or("-"),
            "Client debug: {}",
            message
        );
    }

    fn owned_conversation(&self, connection_id: &str) -> RelayResult<String> {
        self.handlers
            .registry()
            .lookup_connection(connection_id)
            .ok_or_else(|| RelayError::UnknownConnection(connection_id.to_string()))
    }

    async fn close_conversation(&self, conversation_id: &str) -> Option<ClosedConversation> {
        self.handlers.withdraw(conversation_id).await
    }
}

/// Start executing a conversation the platform reported ready.
///
/// The stored input is merged with the conversation id and handed to the
/// platform on a dedicated task. When execution ends the client is told
/// (`conversation_closed_by_system`, or `error` if it failed) and the
/// conversation is closed. Closing first cancels the task.
pub fn begin_execution(
    handlers: RelayHandlers,
    conversation_id: &str,
    mut conversation: Box<dyn PlatformConversation>,
    info: Value,
) {
    let token = CancellationToken::new();
    let mut input = match handlers
        .registry()
        .start_execution(conversation_id, token.clone())
    {
        Ok(input) => input,
        Err(e) => {
            tracing::warn!(conversation_id = %conversation_id, "Ignoring readiness: {}", e);
            return;
        }
    };
    input.insert(
        "conversation_id".to_string(),
        Value::String(conversation_id.to_string()),
    );

    tracing::info!(conversation_id = %conversation_id, info = %info, "Conversation ready, executing");

    let conversation_id = conversation_id.to_string();
    tokio::spawn(async move {
        tokio::select! {
            outcome = conversation.execute(input) => {
                handlers.finish_conversation(&conversation_id, outcome).await;
            }
            _ = token.cancelled() => {
                tracing::debug!(conversation_id = %conversation_id, "Execution task cancelled");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::MessageRoute;
    use crate::core::platform::{ExecutionOutcome, PlatformError, PlatformResult};
    use crate::core::registry::{ConversationRegistry, ConversationState, PendingOutput};
    use crate::core::service::EchoConversationService;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    #[derive(Default)]
    struct StubPlatform {
        enqueued: Mutex<Vec<String>>,
        cancelled: Mutex<Vec<String>>,
        fail_enqueue: bool,
    }

    #[async_trait]
    impl ConversationPlatform for StubPlatform {
        async fn start(&self) -> PlatformResult<()> {
            Ok(())
        }

        async fn enqueue(&self, conversation_id: &str) -> PlatformResult<()> {
            if self.fail_enqueue {
                return Err(PlatformError::NotConnected);
            }
            self.enqueued.lock().push(conversation_id.to_string());
            Ok(())
        }

        async fn cancel(&self, conversation_id: &str) -> PlatformResult<()> {
            self.cancelled.lock().push(conversation_id.to_string());
            Ok(())
        }

        async fn shutdown(&self) {}

        fn concurrency(&self) -> usize {
            1
        }
    }

    /// Conversation whose execution ends when the test says so.
    struct ControlledConversation {
        id: String,
        seen_input: Option<oneshot::Sender<ConversationInput>>,
        finish: Option<oneshot::Receiver<PlatformResult<ExecutionOutcome>>>,
    }

    #[async_trait]
    impl PlatformConversation for ControlledConversation {
        fn conversation_id(&self) -> &str {
            &self.id
        }

        async fn execute(&mut self, input: ConversationInput) -> PlatformResult<ExecutionOutcome> {
            if let Some(seen) = self.seen_input.take() {
                let _ = seen.send(input);
            }
            match self.finish.take() {
                Some(finish) => finish.await.unwrap_or(Err(PlatformError::Cancelled)),
                None => Err(PlatformError::Cancelled),
            }
        }
    }

    fn lifecycle(platform: Arc<StubPlatform>) -> ConversationLifecycle {
        let handlers = RelayHandlers::new(
            Arc::new(ConversationRegistry::new()),
            Arc::new(EchoConversationService::new()),
            Duration::from_millis(500),
        );
        ConversationLifecycle::new(handlers, platform)
    }

    fn client(id: &str) -> (ClientHandle, mpsc::Receiver<MessageRoute>) {
        let (tx, rx) = mpsc::channel(16);
        (ClientHandle::new(id, tx), rx)
    }

    fn input() -> ConversationInput {
        json!({"lang": "en"}).as_object().cloned().unwrap()
    }

    async fn next_event(rx: &mut mpsc::Receiver<MessageRoute>) -> ClientEvent {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(MessageRoute::Outgoing(event))) => event,
            other => panic!("Expected an outgoing event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_create_registers_and_enqueues() {
        let platform = Arc::new(StubPlatform::default());
        let lifecycle = lifecycle(platform.clone());
        let (s1, mut rx) = client("s1");

        lifecycle.create_conversation("c1", input(), &s1).await.unwrap();

        let registry = lifecycle.handlers().registry();
        assert_eq!(registry.lookup_connection("s1").as_deref(), Some("c1"));
        assert_eq!(
            registry.lookup_conversation("c1").unwrap().connection_id(),
            "s1"
        );
        assert_eq!(registry.input("c1"), Some(input()));
        assert_eq!(*platform.enqueued.lock(), vec!["c1".to_string()]);
        assert_eq!(
            next_event(&mut rx).await,
            ClientEvent::ConversationCreated {
                conversation_id: "c1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_conversation_rejected() {
        let lifecycle = lifecycle(Arc::new(StubPlatform::default()));
        let (s1, _rx1) = client("s1");
        let (s2, _rx2) = client("s2");

        lifecycle.create_conversation("c1", input(), &s1).await.unwrap();
        let err = lifecycle
            .create_conversation("c1", input(), &s2)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::ConversationExists(_)));
        assert_eq!(
            lifecycle
                .handlers()
                .registry()
                .lookup_conversation("c1")
                .unwrap()
                .connection_id(),
            "s1"
        );
    }

    #[tokio::test]
    async fn test_platform_failure_rolls_back() {
        let platform = Arc::new(StubPlatform {
            fail_enqueue: true,
            ..Default::default()
        });
        let lifecycle = lifecycle(platform.clone());
        let (s1, _rx) = client("s1");

        let err = lifecycle
            .create_conversation("c1", input(), &s1)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "platform_error");
        assert!(lifecycle.handlers().registry().is_empty());
        assert_eq!(*platform.cancelled.lock(), vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_ends_stream_then_removes() {
        let lifecycle = lifecycle(Arc::new(StubPlatform::default()));
        let (s1, _rx) = client("s1");
        lifecycle.create_conversation("c1", input(), &s1).await.unwrap();

        let registry = lifecycle.handlers().registry();
        registry
            .enqueue_output("c1", PendingOutput::Text("one".to_string()))
            .unwrap();
        registry
            .enqueue_output("c1", PendingOutput::Text("two".to_string()))
            .unwrap();

        let closed = lifecycle.disconnect("s1").await.unwrap();
        assert_eq!(closed.pending, vec![PendingOutput::EndOfStream]);
        assert!(registry.lookup_conversation("c1").is_none());
        assert!(registry.lookup_connection("s1").is_none());
        assert!(lifecycle.disconnect("s1").await.is_none());
    }

    #[tokio::test]
    async fn test_interrupt_without_conversation() {
        let lifecycle = lifecycle(Arc::new(StubPlatform::default()));
        let err = lifecycle.interrupt("nobody").await.unwrap_err();
        assert_eq!(err.code(), "no_active_conversation");
    }

    #[tokio::test]
    async fn test_ready_merges_input_and_completion_notifies_client() {
        let lifecycle = lifecycle(Arc::new(StubPlatform::default()));
        let (s1, mut rx) = client("s1");
        lifecycle.create_conversation("c1", input(), &s1).await.unwrap();
        next_event(&mut rx).await;

        let (seen_tx, seen_rx) = oneshot::channel();
        let (finish_tx, finish_rx) = oneshot::channel();
        begin_execution(
            lifecycle.handlers().clone(),
            "c1",
            Box::new(ControlledConversation {
                id: "c1".to_string(),
                seen_input: Some(seen_tx),
                finish: Some(finish_rx),
            }),
            Value::Null,
        );

        let merged = seen_rx.await.unwrap();
        assert_eq!(merged.get("lang"), Some(&json!("en")));
        assert_eq!(merged.get("conversation_id"), Some(&json!("c1")));
        assert_eq!(
            lifecycle.handlers().registry().state("c1"),
            Some(ConversationState::Executing)
        );

        finish_tx
            .send(Ok(ExecutionOutcome {
                result: json!({"status": "done"}),
            }))
            .unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            ClientEvent::ConversationClosedBySystem {
                conversation_id: "c1".to_string()
            }
        );

        tokio::time::timeout(Duration::from_secs(1), async {
            while lifecycle.handlers().registry().contains("c1") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_close_cancels_execution_task() {
        let platform = Arc::new(StubPlatform::default());
        let lifecycle = lifecycle(platform.clone());
        let (s1, mut rx) = client("s1");
        lifecycle.create_conversation("c1", input(), &s1).await.unwrap();
        next_event(&mut rx).await;

        let (finish_tx, finish_rx) = oneshot::channel();
        begin_execution(
            lifecycle.handlers().clone(),
            "c1",
            Box::new(ControlledConversation {
                id: "c1".to_string(),
                seen_input: None,
                finish: Some(finish_rx),
            }),
            Value::Null,
        );

        lifecycle.close("s1").await.unwrap();
        assert_eq!(*platform.cancelled.lock(), vec!["c1".to_string()]);

        // The cancelled task must not report completion to the client.
        let _ = finish_tx.send(Ok(ExecutionOutcome::default()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ready_for_unknown_conversation_is_ignored() {
        let lifecycle = lifecycle(Arc::new(StubPlatform::default()));
        begin_execution(
            lifecycle.handlers().clone(),
            "ghost",
            Box::new(ControlledConversation {
                id: "ghost".to_string(),
                seen_input: None,
                finish: None,
            }),
            Value::Null,
        );
        assert!(lifecycle.handlers().registry().is_empty());
    }
}
