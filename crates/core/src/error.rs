use std::fmt;
use thiserror::Error;

/// Which remote model service a [`ProviderError`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Embedding,
    Completion,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Embedding => f.write_str("embedding"),
            ProviderKind::Completion => f.write_str("completion"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("pdf could not be decoded: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf download failed: {0}")]
    Download(#[from] reqwest::Error),

    #[error("pdf download from {url} returned {status}")]
    DownloadStatus { url: String, status: u16 },

    #[error("no pdf source selected")]
    Absent,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} provider transport error: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} provider returned {status}: {body}")]
    Status {
        provider: ProviderKind,
        status: u16,
        body: String,
    },

    #[error("{provider} provider sent a malformed response: {details}")]
    Malformed {
        provider: ProviderKind,
        details: String,
    },

    #[error("{provider} provider timed out after {secs}s")]
    Timeout { provider: ProviderKind, secs: u64 },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderKind {
        match self {
            ProviderError::Transport { provider, .. }
            | ProviderError::Status { provider, .. }
            | ProviderError::Malformed { provider, .. }
            | ProviderError::Timeout { provider, .. } => *provider,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProviderError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store request rejected: {0}")]
    Request(String),
}

/// Failure of a single ingestion batch.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("batch contains no pages")]
    EmptyBatch,

    #[error("batch mixes documents {first} and {other}")]
    MixedDocuments { first: String, other: String },

    #[error("embedding page {page} failed: {source}")]
    Embedding {
        page: u32,
        #[source]
        source: ProviderError,
    },

    #[error("persisting page {page} failed: {source}")]
    Persist {
        page: u32,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct BatchFailure {
    pub batch: usize,
    pub first_page: u32,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{} of {total} batches failed", .failed.len())]
    BatchesFailed {
        failed: Vec<BatchFailure>,
        completed: usize,
        total: usize,
    },

    #[error("ingestion endpoint transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ingestion endpoint returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("document has no pages")]
    NoPages,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("embedding the question failed: {0}")]
    Embedding(#[from] ProviderError),

    #[error("similarity query failed: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("completion request failed: {0}")]
    Completion(#[source] ProviderError),
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("malformed stream message {message:?}: {details}")]
    Parse { message: String, details: String },

    #[error("stream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("stream endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("an answer is still streaming")]
    AnswerInFlight,

    #[error("no answer is streaming")]
    NoAnswerInFlight,

    #[error("question is empty")]
    EmptyQuestion,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
