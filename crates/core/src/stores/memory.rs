//! Process-local [`ChunkStore`] with brute-force similarity search.

use crate::config::SimilarityMetric;
use crate::error::StoreError;
use crate::models::{Chunk, Document, ScoredChunk};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

pub struct InMemoryChunkStore {
    metric: SimilarityMetric,
    documents: RwLock<HashMap<String, Document>>,
    chunks: RwLock<BTreeMap<(String, u32), Chunk>>,
}

impl InMemoryChunkStore {
    pub fn new(metric: SimilarityMetric) -> Self {
        Self {
            metric,
            documents: RwLock::new(HashMap::new()),
            chunks: RwLock::new(BTreeMap::new()),
        }
    }

    /// Chunks of one document in page order.
    pub async fn chunks_for(&self, document_id: &str) -> Vec<Chunk> {
        self.chunks
            .read()
            .await
            .values()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryChunkStore {
    fn default() -> Self {
        Self::new(SimilarityMetric::default())
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn upsert_document(&self, id: &str, name: &str) -> Result<Document, StoreError> {
        let mut documents = self.documents.write().await;
        let document = documents.entry(id.to_string()).or_insert_with(|| Document {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        });
        Ok(document.clone())
    }

    async fn document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        if !self.documents.read().await.contains_key(&chunk.document_id) {
            return Err(StoreError::Request(format!(
                "document {} does not exist",
                chunk.document_id
            )));
        }

        self.chunks
            .write()
            .await
            .insert((chunk.document_id.clone(), chunk.page), chunk.clone());
        Ok(())
    }

    async fn match_chunks(
        &self,
        query_vector: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let chunks = self.chunks.read().await;
        let mut scored = chunks
            .values()
            .filter(|chunk| document_id.map_or(true, |id| chunk.document_id == id))
            .map(|chunk| ScoredChunk {
                id: chunk.id(),
                page: chunk.page,
                content: chunk.content.clone(),
                token_count: chunk.token_count,
                document_id: chunk.document_id.clone(),
                similarity: self.metric.score(query_vector, &chunk.embedding),
            })
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| right.similarity.total_cmp(&left.similarity));
        scored.truncate(limit);
        Ok(scored)
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }
}
