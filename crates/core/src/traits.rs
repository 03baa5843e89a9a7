use crate::config::SimilarityMetric;
use crate::error::{ProviderError, StoreError, UploadError};
use crate::models::{Chunk, Document, PageUpload, ScoredChunk, UploadResponse};
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Raw provider bytes relayed to a chat client.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Creates the document if it does not exist. An existing document is
    /// returned unchanged, whatever `name` is passed.
    async fn upsert_document(&self, id: &str, name: &str) -> Result<Document, StoreError>;

    async fn document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Writes a chunk keyed by `(document_id, page)`; a later write replaces an earlier one.
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError>;

    /// Top `limit` chunks by descending similarity, restricted to `document_id` when given.
    async fn match_chunks(
        &self,
        query_vector: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    fn metric(&self) -> SimilarityMetric;
}

/// Delivers one batch of pages to the ingestion service.
#[async_trait]
pub trait IngestTransport: Send + Sync {
    async fn upload(&self, pages: &[PageUpload]) -> Result<UploadResponse, UploadError>;
}

/// A chat-completion backend that streams its answer.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn model(&self) -> &str;

    /// Starts a streamed completion. Errors here happen before any byte is relayed.
    async fn stream_chat(&self, prompt: &str) -> Result<ByteStream, ProviderError>;
}
