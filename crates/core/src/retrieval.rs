use crate::chunking::normalize_question;
use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::models::{RetrievalContext, ScoredChunk};
use crate::traits::ChunkStore;
use std::sync::Arc;
use tracing::debug;

pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Embeds a question, finds the closest chunks and joins them under a token budget.
pub struct ContextAssembler {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn ChunkStore>,
    max_context_tokens: usize,
    top_k: usize,
}

impl ContextAssembler {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn ChunkStore>,
        max_context_tokens: usize,
        top_k: usize,
    ) -> Self {
        Self {
            embedder,
            store,
            max_context_tokens,
            top_k,
        }
    }

    /// Retrieval is restricted to `doc_id` when one is given.
    pub async fn build_context(
        &self,
        question: &str,
        doc_id: Option<&str>,
    ) -> Result<RetrievalContext, RetrievalError> {
        let question = normalize_question(question);
        if question.trim().is_empty() {
            return Err(RetrievalError::EmptyQuestion);
        }

        let query_vector = self.embedder.embed(&question).await?;
        let candidates = self
            .store
            .match_chunks(&query_vector, doc_id, self.top_k)
            .await?;

        let context = assemble_context(candidates, self.max_context_tokens);
        debug!(
            doc_id = doc_id.unwrap_or("*"),
            metric = %self.store.metric(),
            used = context.used_chunks.len(),
            tokens = context.token_count,
            "context assembled"
        );
        Ok(context)
    }
}

/// Appends chunks in the given order until the running token total would
/// reach `budget`; the chunk that would reach it and everything after it are dropped.
pub fn assemble_context(chunks: Vec<ScoredChunk>, budget: usize) -> RetrievalContext {
    let mut context = RetrievalContext::default();

    for chunk in chunks {
        let running = context.token_count + chunk.token_count;
        if running >= budget {
            break;
        }

        context.text.push_str(chunk.content.trim());
        context.text.push_str(CONTEXT_SEPARATOR);
        context.token_count = running;
        context.used_chunks.push(chunk);
    }

    context
}

pub fn build_prompt(document_name: &str, context: &RetrievalContext, question: &str) -> String {
    format!(
        "\nYou are a very helpful ai assistant. Given some sections (listed below)\n\
         of a document and a question you will give an answer based on the given sections.\n\
         If the sections do not contain the answer, say that you don't know.\n\
         Sometimes the name of the document is also - document name is {document_name}.\n\
         \n\
         Context sections: {}\n\
         \n\
         Question: {}\n",
        context.text,
        normalize_question(question)
    )
}
