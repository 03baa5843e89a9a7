use crate::error::{ChatError, ProviderError};
use crate::retrieval::{build_prompt, ContextAssembler};
use crate::traits::{ByteStream, CompletionProvider};
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, info, warn};

/// Answers one question about one document as a relayed provider stream.
pub struct AnswerService {
    assembler: ContextAssembler,
    completion: Arc<dyn CompletionProvider>,
}

impl AnswerService {
    pub fn new(assembler: ContextAssembler, completion: Arc<dyn CompletionProvider>) -> Self {
        Self {
            assembler,
            completion,
        }
    }

    /// Retrieval and the provider request both finish before this returns, so
    /// an error here means no byte of the answer was produced.
    pub async fn stream_answer(
        &self,
        question: &str,
        doc_id: &str,
        doc_name: &str,
    ) -> Result<RelayStream, ChatError> {
        let context = self.assembler.build_context(question, Some(doc_id)).await?;
        let prompt = build_prompt(doc_name, &context, question);
        info!(
            doc_id,
            chunks = context.used_chunks.len(),
            context_tokens = context.token_count,
            model = self.completion.model(),
            "requesting completion"
        );

        let inner = self
            .completion
            .stream_chat(&prompt)
            .await
            .map_err(|error| {
                warn!(
                    doc_id,
                    provider = %error.provider(),
                    timed_out = error.is_timeout(),
                    "completion request failed"
                );
                ChatError::Completion(error)
            })?;
        Ok(RelayStream::new(inner, doc_id))
    }
}

/// Provider bytes on their way to a client. Dropping it before the provider
/// finishes closes the provider connection.
pub struct RelayStream {
    inner: ByteStream,
    doc_id: String,
    bytes: usize,
    finished: bool,
}

impl RelayStream {
    pub fn new(inner: ByteStream, doc_id: &str) -> Self {
        Self {
            inner,
            doc_id: doc_id.to_string(),
            bytes: 0,
            finished: false,
        }
    }
}

impl Stream for RelayStream {
    type Item = Result<Bytes, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => self.bytes += chunk.len(),
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => self.finished = true,
            Poll::Pending => {}
        }
        polled
    }
}

impl Drop for RelayStream {
    fn drop(&mut self) {
        if self.finished {
            debug!(doc_id = %self.doc_id, bytes = self.bytes, "answer stream finished");
        } else {
            info!(
                doc_id = %self.doc_id,
                bytes = self.bytes,
                "client went away mid-answer, closing provider stream"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embeddings::NgramEmbedder;
    use crate::error::{ProviderKind, RetrievalError};
    use crate::models::Chunk;
    use crate::stores::InMemoryChunkStore;
    use crate::traits::ChunkStore;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    /// Replays fixed chunks, or fails if `reject` is set.
    #[derive(Default)]
    pub(crate) struct CannedCompletion {
        pub(crate) chunks: Vec<&'static str>,
        pub(crate) reject: bool,
        pub(crate) prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionProvider for CannedCompletion {
        fn model(&self) -> &str {
            "canned"
        }

        async fn stream_chat(&self, prompt: &str) -> Result<ByteStream, ProviderError> {
            self.prompts.lock().expect("lock").push(prompt.to_string());
            if self.reject {
                return Err(ProviderError::Status {
                    provider: ProviderKind::Completion,
                    status: 401,
                    body: "invalid api key".to_string(),
                });
            }
            let items = self
                .chunks
                .iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect::<Vec<_>>();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    async fn seeded_store(embedder: &NgramEmbedder) -> Arc<InMemoryChunkStore> {
        let store = Arc::new(InMemoryChunkStore::default());
        store.upsert_document("d1", "Manual.pdf").await.expect("document");
        let content = "The relief valve opens at 210 bar.";
        store
            .upsert_chunk(&Chunk {
                document_id: "d1".to_string(),
                page: 4,
                content: content.to_string(),
                token_count: 9,
                embedding: embedder.embed_text(content),
            })
            .await
            .expect("chunk");
        store
    }

    #[tokio::test]
    async fn prompt_carries_context_and_stream_is_relayed() {
        let embedder = NgramEmbedder::default();
        let store = seeded_store(&embedder).await;
        let completion = Arc::new(CannedCompletion {
            chunks: vec!["data: one\n\n", "data: [DONE]\n\n"],
            ..CannedCompletion::default()
        });
        let service = AnswerService::new(
            ContextAssembler::new(Arc::new(embedder), store, 3000, 10),
            completion.clone(),
        );

        let stream = service
            .stream_answer("When does the relief valve open?", "d1", "Manual.pdf")
            .await
            .expect("stream opens");
        let relayed: Vec<Bytes> = stream.map(|chunk| chunk.expect("chunk")).collect().await;
        assert_eq!(relayed.concat(), b"data: one\n\ndata: [DONE]\n\n".to_vec());

        let prompts = completion.prompts.lock().expect("lock");
        assert!(prompts[0].contains("The relief valve opens at 210 bar.\n---\n"));
        assert!(prompts[0].contains("document name is Manual.pdf"));
        assert!(prompts[0].contains("Question: When does the relief valve open?"));
    }

    #[tokio::test]
    async fn unknown_document_still_gets_an_answer_without_context() {
        let embedder = NgramEmbedder::default();
        let store = seeded_store(&embedder).await;
        let completion = Arc::new(CannedCompletion {
            chunks: vec!["data: [DONE]\n\n"],
            ..CannedCompletion::default()
        });
        let service = AnswerService::new(
            ContextAssembler::new(Arc::new(embedder), store, 3000, 10),
            completion.clone(),
        );

        service
            .stream_answer("anything?", "other-doc", "Other.pdf")
            .await
            .expect("stream opens");
        let prompts = completion.prompts.lock().expect("lock");
        assert!(prompts[0].contains("Context sections: \n"));
    }

    #[tokio::test]
    async fn errors_surface_before_any_stream_exists() {
        let embedder = NgramEmbedder::default();
        let store: Arc<dyn ChunkStore> = seeded_store(&embedder).await;
        let service = AnswerService::new(
            ContextAssembler::new(Arc::new(embedder), store, 3000, 10),
            Arc::new(CannedCompletion {
                reject: true,
                ..CannedCompletion::default()
            }),
        );

        let rejected = service.stream_answer("question", "d1", "Manual.pdf").await;
        assert!(matches!(rejected, Err(ChatError::Completion(_))));

        let blank = service.stream_answer("   ", "d1", "Manual.pdf").await;
        assert!(matches!(
            blank,
            Err(ChatError::Retrieval(RetrievalError::EmptyQuestion))
        ));
    }
}
