//! Client side of ingestion: batch pages and upload every batch at once.

use crate::chunking::{plan_batches, PageBatch};
use crate::error::{BatchFailure, UploadError};
use crate::models::{ErrorResponse, PageText, PageUpload, UploadResponse};
use crate::traits::IngestTransport;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use tracing::{info, warn};

pub const UPLOAD_PAGES_PATH: &str = "/api/upload-pages";

/// Batches finished so far out of the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    pub fn is_done(&self) -> bool {
        self.completed == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub doc_id: String,
    pub doc_name: String,
    pub pages: usize,
    pub batches: usize,
}

pub struct UploadBatcher {
    transport: Arc<dyn IngestTransport>,
    batch_size: usize,
}

impl UploadBatcher {
    pub fn new(transport: Arc<dyn IngestTransport>, batch_size: usize) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
        }
    }

    /// Uploads all batches concurrently and waits for every one of them.
    ///
    /// `on_progress` fires once with zero completed and again after each batch
    /// finishes, successfully or not. Any failed batch fails the upload; batches
    /// that succeeded stay ingested.
    pub async fn upload_document<I, F>(
        &self,
        doc_id: &str,
        doc_name: &str,
        pages: I,
        mut on_progress: F,
    ) -> Result<UploadSummary, UploadError>
    where
        I: IntoIterator<Item = PageText>,
        F: FnMut(Progress),
    {
        let batches = plan_batches(doc_id, doc_name, pages, self.batch_size);
        if batches.is_empty() {
            return Err(UploadError::NoPages);
        }

        let total = batches.len();
        let page_count = batches.iter().map(|batch| batch.pages.len()).sum();
        let mut progress = Progress { completed: 0, total };
        on_progress(progress);
        info!(doc_id, pages = page_count, batches = total, "uploading document");

        let mut in_flight = batches
            .into_iter()
            .map(|batch| {
                let transport = Arc::clone(&self.transport);
                async move {
                    let result = transport.upload(&batch.pages).await;
                    (batch, result)
                }
            })
            .collect::<FuturesUnordered<_>>();

        let mut failed = Vec::new();
        while let Some((batch, result)) = in_flight.next().await {
            if let Err(error) = result {
                warn!(doc_id, batch = batch.index, %error, "batch upload failed");
                failed.push(failure(&batch, &error));
            }
            progress.completed += 1;
            on_progress(progress);
        }

        if !failed.is_empty() {
            failed.sort_by_key(|failure| failure.batch);
            return Err(UploadError::BatchesFailed {
                completed: total - failed.len(),
                failed,
                total,
            });
        }

        Ok(UploadSummary {
            doc_id: doc_id.to_string(),
            doc_name: doc_name.to_string(),
            pages: page_count,
            batches: total,
        })
    }
}

fn failure(batch: &PageBatch, error: &UploadError) -> BatchFailure {
    BatchFailure {
        batch: batch.index,
        first_page: batch.first_page(),
        reason: error.to_string(),
    }
}

/// Posts batches as JSON to a running server's ingestion endpoint.
pub struct HttpIngestClient {
    client: Client,
    url: String,
}

impl HttpIngestClient {
    pub fn new(client: Client, server: &str) -> Self {
        Self {
            client,
            url: format!("{}{}", server.trim_end_matches('/'), UPLOAD_PAGES_PATH),
        }
    }
}

#[async_trait]
impl IngestTransport for HttpIngestClient {
    async fn upload(&self, pages: &[PageUpload]) -> Result<UploadResponse, UploadError> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "pages": pages }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|parsed| parsed.error)
                .unwrap_or(body);
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<UploadResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Completes batches in reverse order and fails those whose first page is listed.
    #[derive(Default)]
    struct ScriptedTransport {
        received: Mutex<Vec<Vec<u32>>>,
        fail_first_pages: Vec<u32>,
    }

    #[async_trait]
    impl IngestTransport for ScriptedTransport {
        async fn upload(&self, pages: &[PageUpload]) -> Result<UploadResponse, UploadError> {
            let numbers: Vec<u32> = pages.iter().map(|page| page.page).collect();
            self.received.lock().expect("lock").push(numbers.clone());

            let delay = 200u64.saturating_sub(u64::from(numbers[0]) * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            if self.fail_first_pages.contains(&numbers[0]) {
                return Err(UploadError::Rejected {
                    status: 500,
                    message: "embedding provider down".to_string(),
                });
            }
            Ok(UploadResponse::success(&pages[0].doc_id, &pages[0].doc_name))
        }
    }

    fn pages(count: u32) -> Vec<PageText> {
        (1..=count)
            .map(|number| PageText {
                number,
                text: format!("page {number}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn all_batches_are_sent_and_progress_is_monotonic() {
        let transport = Arc::new(ScriptedTransport::default());
        let batcher = UploadBatcher::new(transport.clone(), 10);

        let mut seen = Vec::new();
        let summary = batcher
            .upload_document("d1", "Doc", pages(25), |progress| seen.push(progress))
            .await
            .expect("upload succeeds");

        assert_eq!(summary.batches, 3);
        assert_eq!(summary.pages, 25);

        let completed: Vec<usize> = seen.iter().map(|progress| progress.completed).collect();
        assert_eq!(completed, vec![0, 1, 2, 3]);
        assert!(seen.iter().all(|progress| progress.total == 3));
        assert!(seen.last().is_some_and(Progress::is_done));

        let mut received = transport.received.lock().expect("lock").clone();
        received.sort();
        assert_eq!(received.len(), 3);
        assert_eq!(received[2], (21..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn batches_are_issued_concurrently() {
        let transport = Arc::new(ScriptedTransport::default());
        let batcher = UploadBatcher::new(transport, 1);

        let started = tokio::time::Instant::now();
        batcher
            .upload_document("d1", "Doc", pages(8), |_| {})
            .await
            .expect("upload succeeds");

        assert!(started.elapsed() < Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn one_failed_batch_fails_the_upload_after_siblings_finish() {
        let transport = Arc::new(ScriptedTransport {
            fail_first_pages: vec![11],
            ..ScriptedTransport::default()
        });
        let batcher = UploadBatcher::new(transport.clone(), 10);

        let mut last = Progress::default();
        let error = batcher
            .upload_document("d1", "Doc", pages(30), |progress| last = progress)
            .await
            .expect_err("batch 1 fails");

        match error {
            UploadError::BatchesFailed {
                failed,
                completed,
                total,
            } => {
                assert_eq!(total, 3);
                assert_eq!(completed, 2);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].batch, 1);
                assert_eq!(failed[0].first_page, 11);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(last.is_done());
        assert_eq!(transport.received.lock().expect("lock").len(), 3);
    }

    #[tokio::test]
    async fn document_without_pages_is_rejected() {
        let batcher = UploadBatcher::new(Arc::new(ScriptedTransport::default()), 10);
        let result = batcher.upload_document("d1", "Doc", Vec::new(), |_| {}).await;
        assert!(matches!(result, Err(UploadError::NoPages)));
    }

    #[test]
    fn progress_fraction() {
        let progress = Progress {
            completed: 1,
            total: 4,
        };
        assert_eq!(progress.fraction(), 0.25);
        assert_eq!(Progress::default().fraction(), 1.0);
    }
}
