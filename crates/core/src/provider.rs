//! Shared plumbing for calls to OpenAI-compatible model providers.

use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderKind};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

/// Builds a client whose requests give up after `timeout_secs`.
pub fn timed_client(config: &ProviderConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
}

/// Builds a client that bounds connecting but not the lifetime of a streamed body.
pub fn streaming_client(config: &ProviderConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(Duration::from_secs(config.timeout_secs.max(1)))
        .build()
}

pub(crate) fn authorize(request: RequestBuilder, config: &ProviderConfig) -> RequestBuilder {
    match config.api_key.as_deref() {
        Some(key) if !key.trim().is_empty() => request.bearer_auth(key.trim()),
        _ => request,
    }
}

pub(crate) fn transport_error(
    provider: ProviderKind,
    config: &ProviderConfig,
    error: reqwest::Error,
) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            provider,
            secs: config.timeout_secs,
        }
    } else {
        ProviderError::Transport {
            provider,
            source: error,
        }
    }
}

/// Turns a non-2xx response into [`ProviderError::Status`], keeping the body for the log.
pub(crate) async fn ensure_success(
    provider: ProviderKind,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        provider,
        status: status.as_u16(),
        body: truncate(&body, 512),
    })
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &text[..index]),
        None => text.to_string(),
    }
}
