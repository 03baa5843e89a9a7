use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One page of a document with its embedding attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub page: u32,
    pub content: String,
    pub token_count: usize,
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn id(&self) -> String {
        chunk_id(&self.document_id, self.page)
    }
}

pub fn chunk_id(document_id: &str, page: u32) -> String {
    format!("{document_id}#{page}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

/// Wire shape of one page posted to the ingestion endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageUpload {
    pub doc_id: String,
    pub doc_name: String,
    pub page: u32,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub pages: Vec<PageUpload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub status: String,
    pub doc_id: String,
    pub doc_name: String,
}

impl UploadResponse {
    pub fn success(doc_id: impl Into<String>, doc_name: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            doc_id: doc_id.into(),
            doc_name: doc_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A chunk returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub id: String,
    pub page: u32,
    pub content: String,
    pub token_count: usize,
    pub document_id: String,
    pub similarity: f32,
}

/// Chunk excerpts selected for one question, already joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalContext {
    pub text: String,
    pub used_chunks: Vec<ScoredChunk>,
    pub token_count: usize,
}

impl RetrievalContext {
    pub fn is_empty(&self) -> bool {
        self.used_chunks.is_empty()
    }
}

/// Where the bytes of a PDF come from.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum PdfSource {
    Remote(Url),
    Local(Vec<u8>),
    #[default]
    Absent,
}

impl PdfSource {
    pub fn is_absent(&self) -> bool {
        matches!(self, PdfSource::Absent)
    }
}

impl fmt::Debug for PdfSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfSource::Remote(url) => f.debug_tuple("Remote").field(&url.as_str()).finish(),
            PdfSource::Local(bytes) => write!(f, "Local({} bytes)", bytes.len()),
            PdfSource::Absent => f.write_str("Absent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_upload_uses_camel_case_wire_names() {
        let page = PageUpload {
            doc_id: "d1".to_string(),
            doc_name: "Manual.pdf".to_string(),
            page: 3,
            content: "text".to_string(),
        };

        let value = serde_json::to_value(&page).expect("page serializes");
        assert_eq!(value["docId"], "d1");
        assert_eq!(value["docName"], "Manual.pdf");
        assert_eq!(value["page"], 3);
    }

    #[test]
    fn local_source_debug_hides_bytes() {
        let source = PdfSource::Local(vec![0u8; 2048]);
        assert_eq!(format!("{source:?}"), "Local(2048 bytes)");
        assert!(PdfSource::default().is_absent());
    }
}
