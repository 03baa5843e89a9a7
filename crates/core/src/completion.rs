//! Streamed chat completions from an OpenAI-compatible provider.

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderKind};
use crate::provider::{authorize, ensure_success, streaming_client, transport_error};
use crate::traits::{ByteStream, CompletionProvider};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// A single user message, sampled deterministically and streamed.
    pub fn streamed(model: &str, prompt: &str, max_tokens: u32) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens,
            temperature: 0.0,
            stream: true,
        }
    }
}

pub struct OpenAiCompletion {
    client: Client,
    config: ProviderConfig,
    model: String,
    max_output_tokens: u32,
}

impl OpenAiCompletion {
    pub fn new(
        config: ProviderConfig,
        model: impl Into<String>,
        max_output_tokens: u32,
    ) -> Result<Self, ProviderError> {
        let client = streaming_client(&config)
            .map_err(|error| transport_error(ProviderKind::Completion, &config, error))?;
        Ok(Self {
            client,
            config,
            model: model.into(),
            max_output_tokens,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletion {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_chat(&self, prompt: &str) -> Result<ByteStream, ProviderError> {
        let body = ChatCompletionRequest::streamed(&self.model, prompt, self.max_output_tokens);
        let request = authorize(
            self.client
                .post(self.config.endpoint("chat/completions"))
                .json(&body),
            &self.config,
        );

        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ProviderError::Timeout {
                provider: ProviderKind::Completion,
                secs: self.config.timeout_secs,
            })?
            .map_err(|error| transport_error(ProviderKind::Completion, &self.config, error))?;
        let response = ensure_success(ProviderKind::Completion, response).await?;
        debug!(model = %self.model, "completion stream opened");

        let stream = response.bytes_stream().map(|chunk| {
            chunk.map_err(|source| ProviderError::Transport {
                provider: ProviderKind::Completion,
                source,
            })
        });
        Ok(Box::pin(stream))
    }
}
