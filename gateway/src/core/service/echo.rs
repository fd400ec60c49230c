//! Built-in service that answers by echoing the user.

use async_trait::async_trait;
use dashmap::DashMap;

use super::base::{ConversationService, ServiceError, ServiceResult};
use crate::core::registry::ConversationInput;

/// Echo service used when no external service is configured.
///
/// Keeps a turn counter per conversation so unknown conversations are
/// reported instead of silently answered.
#[derive(Debug, Default)]
pub struct EchoConversationService {
    turns: DashMap<String, u64>,
}

impl EchoConversationService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of user turns seen for a conversation.
    pub fn turns(&self, conversation_id: &str) -> Option<u64> {
        self.turns.get(conversation_id).map(|turns| *turns)
    }
}

#[async_trait]
impl ConversationService for EchoConversationService {
    async fn start(&self) -> ServiceResult<()> {
        Ok(())
    }

    async fn create_conversation(
        &self,
        _input: &ConversationInput,
        conversation_id: &str,
    ) -> ServiceResult<()> {
        self.turns.insert(conversation_id.to_string(), 0);
        Ok(())
    }

    async fn process_user_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> ServiceResult<String> {
        let mut turns = self
            .turns
            .get_mut(conversation_id)
            .ok_or_else(|| ServiceError::UnknownConversation(conversation_id.to_string()))?;
        *turns += 1;

        let text = text.trim();
        if text.is_empty() {
            Ok("Sorry, I didn't catch that.".to_string())
        } else {
            Ok(format!("You said: {text}"))
        }
    }

    async fn execute_conversation(&self, conversation_id: &str) -> ServiceResult<()> {
        if self.turns.contains_key(conversation_id) {
            Ok(())
        } else {
            Err(ServiceError::UnknownConversation(conversation_id.to_string()))
        }
    }

    async fn close_conversation(&self, conversation_id: &str) -> ServiceResult<()> {
        self.turns.remove(conversation_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
