//! REST client for a remote conversation service.
//!
//! # Endpoints
//!
//! - `GET {base}/health`
//! - `POST {base}/conversations` with `{"conversation_id", "input"}`
//! - `POST {base}/conversations/{id}/messages` with `{"text"}` → `{"response"}`
//! - `POST {base}/conversations/{id}/execute`
//! - `DELETE {base}/conversations/{id}` (404 counts as already closed)

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::base::{ConversationService, ServiceError, ServiceResult};
use crate::core::registry::ConversationInput;

#[derive(Serialize)]
struct CreateConversationRequest<'a> {
    conversation_id: &'a str,
    input: &'a ConversationInput,
}

#[derive(Serialize)]
struct UserMessageRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct UserMessageResponse {
    response: String,
}

/// Conversation service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConversationService {
    client: Client,
    base_url: Url,
}

impl HttpConversationService {
    pub fn new(base_url: &str, timeout: Duration) -> ServiceResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ServiceError::InvalidConfiguration(format!("Invalid service URL '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ServiceError::InvalidConfiguration(format!(
                "Service URL '{base_url}' cannot carry a path"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InvalidConfiguration(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check_status(response: Response) -> ServiceResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ServiceError::RequestFailed {
            status: status.as_u16(),
            message,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(e.to_string())
    } else if e.is_decode() {
        ServiceError::InvalidResponse(e.to_string())
    } else {
        ServiceError::ConnectionFailed(e.to_string())
    }
}

#[async_trait]
impl ConversationService for HttpConversationService {
    async fn start(&self) -> ServiceResult<()> {
        let response = self
            .client
            .get(self.endpoint(&["health"]))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check_status(response).await?;
        tracing::info!(url = %self.base_url, "External conversation service reachable");
        Ok(())
    }

    async fn create_conversation(
        &self,
        input: &ConversationInput,
        conversation_id: &str,
    ) -> ServiceResult<()> {
        let response = self
            .client
            .post(self.endpoint(&["conversations"]))
            .json(&CreateConversationRequest {
                conversation_id,
                input,
            })
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn process_user_message(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> ServiceResult<String> {
        let response = self
            .client
            .post(self.endpoint(&["conversations", conversation_id, "messages"]))
            .json(&UserMessageRequest { text })
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ServiceError::UnknownConversation(conversation_id.to_string()));
        }
        let body: UserMessageResponse = Self::check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;
        Ok(body.response)
    }

    async fn execute_conversation(&self, conversation_id: &str) -> ServiceResult<()> {
        let response = self
            .client
            .post(self.endpoint(&["conversations", conversation_id, "execute"]))
            .send()
            .await
            .map_err(map_reqwest_error)?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn close_conversation(&self, conversation_id: &str) -> ServiceResult<()> {
        let response = self
            .client
            .delete(self.endpoint(&["conversations", conversation_id]))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(conversation_id = %conversation_id, "Service already forgot conversation");
            return Ok(());
        }
        Self::check_status(response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
