pub mod chat;
pub mod chunking;
pub mod completion;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod provider;
pub mod recent;
pub mod retrieval;
pub mod session;
pub mod sse;
pub mod stores;
pub mod tokens;
pub mod traits;
pub mod upload;

pub use chat::{AnswerService, RelayStream};
pub use chunking::{normalize_content, normalize_question, plan_batches, PageBatch};
pub use completion::{ChatCompletionRequest, OpenAiCompletion};
pub use config::{ChatConfig, ProviderConfig, SimilarityMetric};
pub use embeddings::{Embedder, NgramEmbedder, OpenAiEmbedder};
pub use error::{
    ChatError, ConfigError, ExtractError, IngestError, PersistError, ProviderError, ProviderKind,
    RetrievalError, SessionError, StoreError, StreamError, UploadError,
};
pub use extractor::{load_path, load_source, PageTexts, PdfDocument};
pub use ingest::IngestionService;
pub use models::{
    Document, ErrorResponse, PageText, PageUpload, PdfSource, RetrievalContext, ScoredChunk,
    UploadRequest, UploadResponse,
};
pub use recent::{JsonFilePersistence, RecentFile, RecentFiles, RecentFilesPersistence};
pub use retrieval::{assemble_context, build_prompt, ContextAssembler};
pub use session::{ChatSession, Turn};
pub use sse::{chat_stream_url, consume_stream, AnswerEvent, AnswerStream, StreamEnd};
pub use stores::{InMemoryChunkStore, QdrantStore};
pub use tokens::{TiktokenCounter, TokenCounter};
pub use traits::{ChunkStore, CompletionProvider, IngestTransport};
pub use upload::{HttpIngestClient, Progress, UploadBatcher, UploadSummary};
