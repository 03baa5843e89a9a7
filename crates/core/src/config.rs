use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_PROVIDER_URL: &str = "https://api.openai.com/v1";

/// How the chunk store ranks candidates against a query vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SimilarityMetric {
    #[default]
    Cosine,
    InnerProduct,
}

impl SimilarityMetric {
    pub fn score(self, left: &[f32], right: &[f32]) -> f32 {
        if left.len() != right.len() || left.is_empty() {
            return 0.0;
        }

        let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
        match self {
            SimilarityMetric::InnerProduct => dot,
            SimilarityMetric::Cosine => {
                let left_norm = left.iter().map(|v| v * v).sum::<f32>().sqrt();
                let right_norm = right.iter().map(|v| v * v).sum::<f32>().sqrt();
                if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
                    0.0
                } else {
                    dot / (left_norm * right_norm)
                }
            }
        }
    }

    pub fn qdrant_distance(self) -> &'static str {
        match self {
            SimilarityMetric::Cosine => "Cosine",
            SimilarityMetric::InnerProduct => "Dot",
        }
    }
}

impl fmt::Display for SimilarityMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMetric::Cosine => f.write_str("cosine"),
            SimilarityMetric::InnerProduct => f.write_str("inner-product"),
        }
    }
}

impl FromStr for SimilarityMetric {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(SimilarityMetric::Cosine),
            "inner-product" | "dot" => Ok(SimilarityMetric::InnerProduct),
            other => Err(ConfigError::Invalid(format!(
                "unknown similarity metric `{other}`"
            ))),
        }
    }
}

/// Pipeline knobs shared by ingestion, retrieval and completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub embedding_model: String,
    pub completion_model: String,
    /// Retrieved chunks stop being appended once their running token total
    /// would reach this value.
    pub max_context_tokens: usize,
    /// Pages per upload batch.
    pub batch_size: usize,
    pub max_output_tokens: u32,
    /// Candidate count requested from the chunk store per question.
    pub top_k: usize,
    pub similarity: SimilarityMetric,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            max_context_tokens: 3_000,
            batch_size: 10,
            max_output_tokens: 150,
            top_k: 10,
            similarity: SimilarityMetric::Cosine,
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::Invalid("embedding model is empty".to_string()));
        }
        if self.completion_model.trim().is_empty() {
            return Err(ConfigError::Invalid("completion model is empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch size must be at least 1".to_string()));
        }
        if self.max_context_tokens == 0 {
            return Err(ConfigError::Invalid(
                "context token budget must be at least 1".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Where the OpenAI-compatible embedding and completion APIs live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROVIDER_URL.to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
