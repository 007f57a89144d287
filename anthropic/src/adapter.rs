//! The `LlmPort` implementation.

use crate::wire::{ErrorEnvelope, MessagesRequest, MessagesResponse, WireMessage};
use async_trait::async_trait;
use cartpilot_core::error::LlmError;
use cartpilot_core::port::{
    ChatMessage, Completion, CompletionOptions, EphemeralStore, LlmPort, TokenUsage,
};
use reqwest::StatusCode;
use std::sync::Arc;
use tokio::sync::Mutex;

const DEFAULT_API_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Anthropic Messages API adapter.
pub struct AnthropicAdapter {
    http: reqwest::Client,
    api_url: String,
    store: Arc<dyn EphemeralStore>,
    last_error: Mutex<Option<LlmError>>,
    key_mutation: Mutex<()>,
}

impl AnthropicAdapter {
    /// Build an adapter reading its key from the given ephemeral store.
    #[must_use]
    pub fn new(store: Arc<dyn EphemeralStore>) -> Self {
        Self::with_api_url(store, DEFAULT_API_URL)
    }

    /// Build an adapter against a specific endpoint (tests point this at a
    /// mock server).
    #[must_use]
    pub fn with_api_url(store: Arc<dyn EphemeralStore>, api_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into(),
            store,
            last_error: Mutex::new(None),
            key_mutation: Mutex::new(()),
        }
    }

    async fn record_error(&self, error: &LlmError) {
        *self.last_error.lock().await = Some(error.clone());
    }

    async fn perform(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        let Some(api_key) = self.store.api_key().await else {
            return Err(LlmError::ApiKeyMissing);
        };

        let request = MessagesRequest {
            model: opts.model.clone(),
            max_tokens: opts.max_tokens,
            messages: messages.iter().map(WireMessage::from).collect(),
            system: opts.system_prompt.clone(),
            temperature: opts.temperature,
            stop_sequences: opts.stop_sequences.clone(),
        };

        let response = self
            .http
            .post(format!("{}/v1/messages", self.api_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let body: MessagesResponse = response
                    .json()
                    .await
                    .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
                Ok(Completion {
                    content: body.text(),
                    usage: TokenUsage {
                        input_tokens: body.usage.input_tokens,
                        output_tokens: body.usage.output_tokens,
                    },
                    model: body.model,
                    stop_reason: body.stop_reason,
                })
            },
            StatusCode::UNAUTHORIZED => {
                // The key is dead; clear it so availability flips off.
                self.store.clear_api_key().await;
                tracing::warn!("API key rejected; cleared from the session store");
                Err(LlmError::ApiKeyInvalid)
            },
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                Err(LlmError::RateLimited {
                    retry_after_secs: Some(retry_after),
                })
            },
            status if status.is_server_error() => Err(LlmError::ServerError {
                status: status.as_u16(),
            }),
            _ => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<ErrorEnvelope>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                if message.to_lowercase().contains("too long")
                    || message.to_lowercase().contains("context")
                {
                    Err(LlmError::ContextTooLong)
                } else {
                    Err(LlmError::InvalidResponse(format!(
                        "status {status}: {message}"
                    )))
                }
            },
        }
    }
}

#[async_trait]
impl LlmPort for AnthropicAdapter {
    async fn is_available(&self) -> bool {
        self.store.api_key().await.is_some()
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        opts: &CompletionOptions,
    ) -> Result<Completion, LlmError> {
        match self.perform(messages, opts).await {
            Ok(completion) => Ok(completion),
            Err(error) => {
                self.record_error(&error).await;
                Err(error)
            },
        }
    }

    async fn set_api_key(&self, key: String) {
        // At most one outstanding key mutation at a time.
        let _gate = self.key_mutation.lock().await;
        self.store.set_api_key(key).await;
    }

    async fn clear_api_key(&self) {
        let _gate = self.key_mutation.lock().await;
        self.store.clear_api_key().await;
    }

    async fn last_error(&self) -> Option<LlmError> {
        self.last_error.lock().await.clone()
    }
}
