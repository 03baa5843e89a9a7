use crate::chunking::normalize_question;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, ProviderKind};
use crate::provider::{authorize, ensure_success, timed_client, transport_error};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const OPENAI_EMBEDDING_DIMENSIONS: usize = 1_536;
pub const NGRAM_EMBEDDING_DIMENSIONS: usize = 128;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embeds `text` after replacing newlines with spaces.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Calls `POST {base_url}/embeddings` once per text. No retries.
pub struct OpenAiEmbedder {
    client: Client,
    config: ProviderConfig,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: ProviderConfig, model: impl Into<String>) -> Result<Self, ProviderError> {
        let client = timed_client(&config)
            .map_err(|error| transport_error(ProviderKind::Embedding, &config, error))?;
        Ok(Self {
            client,
            config,
            model: model.into(),
            dimensions: OPENAI_EMBEDDING_DIMENSIONS,
        })
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let input = normalize_question(text);
        let request = self
            .client
            .post(self.config.endpoint("embeddings"))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: &input,
            });

        let response = authorize(request, &self.config)
            .send()
            .await
            .map_err(|error| transport_error(ProviderKind::Embedding, &self.config, error))?;
        let response = ensure_success(ProviderKind::Embedding, response).await?;

        let body = response
            .bytes()
            .await
            .map_err(|error| transport_error(ProviderKind::Embedding, &self.config, error))?;
        let embedding = parse_embedding(&body)?;
        debug!(model = %self.model, dims = embedding.len(), "embedding received");
        Ok(embedding)
    }
}

fn parse_embedding(body: &[u8]) -> Result<Vec<f32>, ProviderError> {
    let parsed: EmbeddingResponse =
        serde_json::from_slice(body).map_err(|error| ProviderError::Malformed {
            provider: ProviderKind::Embedding,
            details: error.to_string(),
        })?;

    match <[EmbeddingDatum; 1]>::try_from(parsed.data) {
        Ok([datum]) if !datum.embedding.is_empty() => Ok(datum.embedding),
        Ok(_) => Err(ProviderError::Malformed {
            provider: ProviderKind::Embedding,
            details: "embedding vector is empty".to_string(),
        }),
        Err(data) => Err(ProviderError::Malformed {
            provider: ProviderKind::Embedding,
            details: format!("expected exactly one embedding, got {}", data.len()),
        }),
    }
}

/// Deterministic hashed character-trigram embedder for offline runs.
#[derive(Debug, Clone, Copy)]
pub struct NgramEmbedder {
    pub dimensions: usize,
}

impl Default for NgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: NGRAM_EMBEDDING_DIMENSIONS,
        }
    }
}

impl NgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = normalize_question(text).to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for NgramEmbedder {
    fn model(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        Ok(self.embed_text(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[test]
    fn ngram_embedder_is_deterministic() {
        let embedder = NgramEmbedder::default();
        let first = embedder.embed_text("Hydraulic pressure and flow");
        let second = embedder.embed_text("Hydraulic pressure and flow");
        assert_eq!(first, second);
    }

    #[test]
    fn ngram_embedder_outputs_expected_length() {
        let embedder = NgramEmbedder { dimensions: 32 };
        assert_eq!(embedder.embed_text("abc").len(), 32);
        assert!(embedder.embed_text("").iter().all(|value| *value == 0.0));
    }

    #[test]
    fn response_needs_exactly_one_vector() {
        let one = br#"{"data":[{"embedding":[0.1,0.2]}]}"#;
        assert_eq!(parse_embedding(one).expect("one vector"), vec![0.1, 0.2]);

        let two = br#"{"data":[{"embedding":[0.1]},{"embedding":[0.2]}]}"#;
        assert!(matches!(parse_embedding(two), Err(ProviderError::Malformed { .. })));

        let missing = br#"{"data":[{"vector":[0.1]}]}"#;
        assert!(matches!(parse_embedding(missing), Err(ProviderError::Malformed { .. })));

        let empty = br#"{"data":[{"embedding":[]}]}"#;
        assert!(matches!(parse_embedding(empty), Err(ProviderError::Malformed { .. })));
    }

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn spawn_provider(status: StatusCode, reply: Value) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/v1/embeddings",
                post(
                    move |State(seen): State<Seen>, Json(body): Json<Value>| async move {
                        seen.lock().expect("lock").push(body);
                        (status, Json(reply))
                    },
                ),
            )
            .with_state(seen.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{addr}/v1"), seen)
    }

    #[tokio::test]
    async fn remote_embedder_sends_model_and_normalized_input() {
        let (base_url, seen) =
            spawn_provider(StatusCode::OK, json!({"data": [{"embedding": [0.5, 0.25]}]})).await;
        let config = ProviderConfig {
            base_url,
            api_key: Some("sk-test".to_string()),
            timeout_secs: 5,
        };
        let embedder = OpenAiEmbedder::new(config, "text-embedding-ada-002").expect("client");

        let vector = embedder.embed("first line\nsecond line").await.expect("embeds");
        assert_eq!(vector, vec![0.5, 0.25]);

        let requests = seen.lock().expect("lock");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["model"], "text-embedding-ada-002");
        assert_eq!(requests[0]["input"], "first line second line");
    }

    #[tokio::test]
    async fn remote_embedder_surfaces_non_success_status() {
        let (base_url, _seen) = spawn_provider(
            StatusCode::TOO_MANY_REQUESTS,
            json!({"error": {"message": "slow down"}}),
        )
        .await;
        let config = ProviderConfig {
            base_url,
            api_key: None,
            timeout_secs: 5,
        };
        let embedder = OpenAiEmbedder::new(config, "m").expect("client");

        let error = embedder.embed("q").await.expect_err("429 fails");
        match error {
            ProviderError::Status { provider, status, body } => {
                assert_eq!(provider, ProviderKind::Embedding);
                assert_eq!(status, 429);
                assert!(body.contains("slow down"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    async fn spawn_stalled_provider(delay: Duration) -> String {
        let app = Router::new().route(
            "/v1/embeddings",
            post(move || async move {
                tokio::time::sleep(delay).await;
                Json(json!({"data": [{"embedding": [0.5]}]}))
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/v1")
    }

    #[tokio::test]
    async fn stalled_provider_times_out() {
        let base_url = spawn_stalled_provider(Duration::from_secs(3)).await;
        let config = ProviderConfig {
            base_url,
            api_key: None,
            timeout_secs: 1,
        };
        let embedder = OpenAiEmbedder::new(config, "m").expect("client");

        let error = embedder.embed("q").await.expect_err("slow reply fails");
        assert!(error.is_timeout());
        assert!(matches!(
            error,
            ProviderError::Timeout {
                provider: ProviderKind::Embedding,
                secs: 1,
            }
        ));
    }
}
