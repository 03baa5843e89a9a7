use crate::chunking::normalize_content;
use crate::embeddings::Embedder;
use crate::error::{IngestError, UploadError};
use crate::models::{Chunk, PageText, PageUpload, UploadRequest, UploadResponse};
use crate::tokens::TokenCounter;
use crate::traits::{ChunkStore, IngestTransport};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns uploaded pages into stored, embedded chunks.
pub struct IngestionService {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    tokens: Arc<dyn TokenCounter>,
}

impl IngestionService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ChunkStore>,
        tokens: Arc<dyn TokenCounter>,
    ) -> Self {
        Self {
            embedder,
            store,
            tokens,
        }
    }

    /// Embeds and stores `pages` one after another, stopping at the first failure.
    ///
    /// Pages written before a failure stay written.
    pub async fn ingest_batch(
        &self,
        doc_id: &str,
        doc_name: &str,
        pages: &[PageText],
    ) -> Result<UploadResponse, IngestError> {
        if pages.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let document = self.store.upsert_document(doc_id, doc_name).await?;
        info!(
            doc_id,
            pages = pages.len(),
            tokenizer = self.tokens.name(),
            "ingesting batch"
        );

        for page in pages {
            let content = normalize_content(&page.text);
            let token_count = self.tokens.count_tokens(&content);

            let embedding = self.embedder.embed(&content).await.map_err(|source| {
                warn!(
                    doc_id,
                    page = page.number,
                    provider = %source.provider(),
                    timed_out = source.is_timeout(),
                    "embedding failed; stopping batch"
                );
                IngestError::Embedding {
                    page: page.number,
                    source,
                }
            })?;

            let chunk = Chunk {
                document_id: document.id.clone(),
                page: page.number,
                content,
                token_count,
                embedding,
            };
            self.store
                .upsert_chunk(&chunk)
                .await
                .map_err(|source| IngestError::Persist {
                    page: page.number,
                    source,
                })?;
            debug!(doc_id, page = page.number, token_count, "chunk stored");
        }

        Ok(UploadResponse::success(doc_id, doc_name))
    }

    /// Ingests an endpoint payload. Every page must name the same document.
    pub async fn ingest_upload(&self, request: &UploadRequest) -> Result<UploadResponse, IngestError> {
        let (doc_id, doc_name) = batch_identity(&request.pages)?;
        let pages = request
            .pages
            .iter()
            .map(|page| PageText {
                number: page.page,
                text: page.content.clone(),
            })
            .collect::<Vec<_>>();

        self.ingest_batch(&doc_id, &doc_name, &pages).await
    }
}

fn batch_identity(pages: &[PageUpload]) -> Result<(String, String), IngestError> {
    let first = pages.first().ok_or(IngestError::EmptyBatch)?;
    if let Some(other) = pages.iter().find(|page| page.doc_id != first.doc_id) {
        return Err(IngestError::MixedDocuments {
            first: first.doc_id.clone(),
            other: other.doc_id.clone(),
        });
    }
    Ok((first.doc_id.clone(), first.doc_name.clone()))
}

/// In-process transport: batches go straight to the service.
#[async_trait]
impl IngestTransport for IngestionService {
    async fn upload(&self, pages: &[PageUpload]) -> Result<UploadResponse, UploadError> {
        let request = UploadRequest {
            pages: pages.to_vec(),
        };
        Ok(self.ingest_upload(&request).await?)
    }
}
