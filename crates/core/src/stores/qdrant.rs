use crate::config::SimilarityMetric;
use crate::error::StoreError;
use crate::models::{chunk_id, Chunk, Document, ScoredChunk};
use crate::traits::ChunkStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

/// Chunk store over the Qdrant REST API.
///
/// Chunks live in `collection`; documents live in the vectorless companion
/// collection `{collection}_documents`.
pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
    metric: SimilarityMetric,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
        metric: SimilarityMetric,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
            metric,
        }
    }

    fn documents_collection(&self) -> String {
        format!("{}_documents", self.collection)
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.endpoint, collection)
    }

    pub async fn ensure_collections(&self) -> Result<(), StoreError> {
        self.ensure_collection(
            &self.collection,
            json!({
                "vectors": {
                    "size": self.vector_size,
                    "distance": self.metric.qdrant_distance(),
                }
            }),
        )
        .await?;
        self.ensure_collection(&self.documents_collection(), json!({ "vectors": {} }))
            .await
    }

    async fn ensure_collection(&self, collection: &str, body: Value) -> Result<(), StoreError> {
        let url = self.collection_url(collection);
        let existing = self.client.get(&url).send().await?;
        if existing.status().is_success() {
            debug!(collection, "qdrant collection exists");
            return Ok(());
        }

        let response = self.client.put(&url).json(&body).send().await?;
        check_status(response.status())?;
        info!(collection, "created qdrant collection");
        Ok(())
    }

    async fn fetch_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let response = self
            .client
            .get(format!(
                "{}/points/{}",
                self.collection_url(&self.documents_collection()),
                point_id(id)
            ))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(response.status())?;

        let parsed: Value = response.json().await?;
        if parsed.pointer("/result").map_or(true, Value::is_null) {
            return Ok(None);
        }
        Ok(Some(document_from_payload(id, &parsed)))
    }
}

fn point_id(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

fn check_status(status: StatusCode) -> Result<(), StoreError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(StoreError::BackendResponse {
            backend: "qdrant".to_string(),
            details: status.to_string(),
        })
    }
}

fn document_from_payload(id: &str, parsed: &Value) -> Document {
    let name = parsed
        .pointer("/result/payload/name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let created_at = parsed
        .pointer("/result/payload/created_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|stamp| stamp.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Document {
        id: id.to_string(),
        name,
        created_at,
    }
}

/// Hits whose payload lacks a document id, a valid page or content are
/// logged and dropped.
fn hits_from_response(parsed: &Value) -> Vec<ScoredChunk> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    hits.iter()
        .filter_map(|hit| {
            let scored = scored_chunk(hit);
            if scored.is_none() {
                let point = hit.pointer("/id").unwrap_or(&Value::Null);
                warn!(%point, "skipping malformed search hit");
            }
            scored
        })
        .collect()
}

fn scored_chunk(hit: &Value) -> Option<ScoredChunk> {
    let document_id = hit
        .pointer("/payload/document_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())?;
    let page = hit
        .pointer("/payload/page")
        .and_then(Value::as_u64)
        .and_then(|page| u32::try_from(page).ok())?;
    let content = hit.pointer("/payload/content").and_then(Value::as_str)?;
    let token_count = hit
        .pointer("/payload/token_count")
        .and_then(Value::as_u64)
        .and_then(|count| usize::try_from(count).ok())?;
    let similarity = hit.pointer("/score").and_then(Value::as_f64)?;

    Some(ScoredChunk {
        id: chunk_id(document_id, page),
        document_id: document_id.to_string(),
        page,
        content: content.to_string(),
        token_count,
        similarity: similarity as f32,
    })
}

#[async_trait]
impl ChunkStore for QdrantStore {
    async fn upsert_document(&self, id: &str, name: &str) -> Result<Document, StoreError> {
        if let Some(existing) = self.fetch_document(id).await? {
            return Ok(existing);
        }

        let document = Document {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let response = self
            .client
            .put(format!(
                "{}/points?wait=true",
                self.collection_url(&self.documents_collection())
            ))
            .json(&json!({
                "points": [{
                    "id": point_id(id),
                    "vector": {},
                    "payload": {
                        "document_id": document.id,
                        "name": document.name,
                        "created_at": document.created_at.to_rfc3339(),
                    },
                }]
            }))
            .send()
            .await?;
        check_status(response.status())?;

        Ok(document)
    }

    async fn document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        self.fetch_document(id).await
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        if chunk.embedding.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "embedding dimension {} != {}",
                chunk.embedding.len(),
                self.vector_size
            )));
        }

        let response = self
            .client
            .put(format!("{}/points?wait=true", self.collection_url(&self.collection)))
            .json(&json!({
                "points": [{
                    "id": point_id(&chunk.id()),
                    "vector": chunk.embedding,
                    "payload": {
                        "document_id": chunk.document_id,
                        "page": chunk.page,
                        "content": chunk.content,
                        "token_count": chunk.token_count,
                    },
                }]
            }))
            .send()
            .await?;
        check_status(response.status())
    }

    async fn match_chunks(
        &self,
        query_vector: &[f32],
        document_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query_vector.len() != self.vector_size {
            return Err(StoreError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }

        let mut body = json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(id) = document_id {
            body["filter"] = json!({
                "must": [{ "key": "document_id", "match": { "value": id } }]
            });
        }

        let response = self
            .client
            .post(format!(
                "{}/points/search",
                self.collection_url(&self.collection)
            ))
            .json(&body)
            .send()
            .await?;
        check_status(response.status())?;

        let parsed: Value = response.json().await?;
        Ok(hits_from_response(&parsed))
    }

    fn metric(&self) -> SimilarityMetric {
        self.metric
    }
}
