mod server;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docchat_core::config::{DEFAULT_COMPLETION_MODEL, DEFAULT_EMBEDDING_MODEL, DEFAULT_PROVIDER_URL};
use docchat_core::embeddings::OPENAI_EMBEDDING_DIMENSIONS;
use docchat_core::recent::DEFAULT_RECENT_CAPACITY;
use docchat_core::{
    chat_stream_url, consume_stream, load_source, AnswerService, ChatConfig, ChatSession,
    ChunkStore, ContextAssembler, Embedder, HttpIngestClient, InMemoryChunkStore,
    IngestionService, JsonFilePersistence, NgramEmbedder, OpenAiCompletion, OpenAiEmbedder,
    PdfSource, ProviderConfig, QdrantStore, RecentFile, RecentFiles, SimilarityMetric, StreamEnd,
    TiktokenCounter, UploadBatcher,
};
use server::{run_server, AppState};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "docchat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_PROVIDER_URL)]
    provider_url: String,

    /// API key sent as a bearer token
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Seconds before an embedding call or completion request gives up
    #[arg(long, env = "DOCCHAT_TIMEOUT_SECS", default_value = "30")]
    timeout_secs: u64,

    /// Embedding model identifier
    #[arg(long, env = "DOCCHAT_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Vector length produced by the embedding model
    #[arg(long, env = "DOCCHAT_EMBEDDING_DIMENSIONS", default_value_t = OPENAI_EMBEDDING_DIMENSIONS)]
    embedding_dimensions: usize,

    /// Use the offline trigram embedder instead of the provider
    #[arg(long, env = "DOCCHAT_LOCAL_EMBEDDINGS", default_value_t = false)]
    local_embeddings: bool,

    /// Completion model identifier
    #[arg(long, env = "DOCCHAT_COMPLETION_MODEL", default_value = DEFAULT_COMPLETION_MODEL)]
    completion_model: String,

    /// Token budget for retrieved context
    #[arg(long, env = "DOCCHAT_MAX_CONTEXT_TOKENS", default_value = "3000")]
    max_context_tokens: usize,

    /// Cap on generated answer tokens
    #[arg(long, env = "DOCCHAT_MAX_OUTPUT_TOKENS", default_value = "150")]
    max_output_tokens: u32,

    /// Pages per upload batch
    #[arg(long, env = "DOCCHAT_BATCH_SIZE", default_value = "10")]
    batch_size: usize,

    /// Chunks requested from the store per question
    #[arg(long, env = "DOCCHAT_TOP_K", default_value = "10")]
    top_k: usize,

    /// cosine or inner-product
    #[arg(long, env = "DOCCHAT_SIMILARITY", default_value = "cosine")]
    similarity: SimilarityMetric,

    /// Qdrant base URL; chunks are kept in memory when unset
    #[arg(long, env = "DOCCHAT_QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection for chunks
    #[arg(long, env = "DOCCHAT_QDRANT_COLLECTION", default_value = "docchat_chunks")]
    qdrant_collection: String,

    /// Directory holding the recent documents list
    #[arg(long, env = "DOCCHAT_STATE_DIR", default_value = ".docchat")]
    state_dir: PathBuf,
}

#[derive(Subcommand)]
enum Command {
    /// Run the ingestion and chat endpoints.
    Serve {
        #[arg(long, env = "DOCCHAT_BIND", default_value = "127.0.0.1:3000")]
        bind: String,
    },
    /// Extract a PDF and upload its pages to a running server.
    Ingest {
        /// Local PDF path.
        #[arg(long, conflicts_with = "url", required_unless_present = "url")]
        file: Option<PathBuf>,
        /// Remote PDF URL.
        #[arg(long)]
        url: Option<Url>,
        #[arg(long, env = "DOCCHAT_SERVER", default_value = "http://127.0.0.1:3000")]
        server: String,
        /// Display name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        /// Document id; a random one is generated when omitted.
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Ask a question about an ingested document and stream the answer.
    Ask {
        #[arg(long, env = "DOCCHAT_SERVER", default_value = "http://127.0.0.1:3000")]
        server: String,
        /// Document id.
        #[arg(long)]
        doc: String,
        #[arg(long)]
        question: String,
    },
    /// List recently ingested documents.
    Recent,
}

impl Cli {
    fn chat_config(&self) -> ChatConfig {
        ChatConfig {
            embedding_model: self.embedding_model.clone(),
            completion_model: self.completion_model.clone(),
            max_context_tokens: self.max_context_tokens,
            batch_size: self.batch_size,
            max_output_tokens: self.max_output_tokens,
            top_k: self.top_k,
            similarity: self.similarity,
        }
    }

    fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            base_url: self.provider_url.clone(),
            api_key: self.api_key.clone(),
            timeout_secs: self.timeout_secs,
        }
    }

    fn recent_files(&self) -> RecentFiles<JsonFilePersistence> {
        let persistence = JsonFilePersistence::new(self.state_dir.join("recent.json"));
        RecentFiles::load(persistence, DEFAULT_RECENT_CAPACITY)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = cli.chat_config();
    config.validate()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docchat boot"
    );

    match &cli.command {
        Command::Serve { bind } => serve(&cli, &config, bind).await,
        Command::Ingest {
            file,
            url,
            server,
            name,
            doc_id,
        } => {
            let source = match (file, url) {
                (Some(path), _) => PdfSource::Local(
                    tokio::fs::read(path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?,
                ),
                (None, Some(url)) => PdfSource::Remote(url.clone()),
                (None, None) => PdfSource::Absent,
            };
            let doc_name = name
                .clone()
                .or_else(|| {
                    file.as_ref()
                        .and_then(|path| path.file_name())
                        .map(|file_name| file_name.to_string_lossy().into_owned())
                })
                .or_else(|| url.as_ref().and_then(remote_file_name))
                .unwrap_or_else(|| "document.pdf".to_string());
            let doc_id = doc_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            ingest(&cli, &config, server, source, &doc_id, &doc_name).await
        }
        Command::Ask {
            server,
            doc,
            question,
        } => ask(server, doc, question).await,
        Command::Recent => {
            let recent = cli.recent_files();
            if recent.is_empty() {
                println!("no recent documents");
            }
            for file in recent.list() {
                println!("{}  {}", file.doc_id, file.doc_name);
            }
            Ok(())
        }
    }
}

async fn serve(cli: &Cli, config: &ChatConfig, bind: &str) -> anyhow::Result<()> {
    let provider = cli.provider_config();
    if provider.api_key.is_none() {
        warn!("no API key configured; provider calls will be unauthenticated");
    }

    let embedder: Arc<dyn Embedder> = if cli.local_embeddings {
        Arc::new(NgramEmbedder::default())
    } else {
        Arc::new(
            OpenAiEmbedder::new(provider.clone(), config.embedding_model.clone())?
                .with_dimensions(cli.embedding_dimensions),
        )
    };

    let store: Arc<dyn ChunkStore> = match &cli.qdrant_url {
        Some(url) => {
            let qdrant = QdrantStore::new(
                url,
                &cli.qdrant_collection,
                embedder.dimensions(),
                config.similarity,
            );
            qdrant.ensure_collections().await?;
            Arc::new(qdrant)
        }
        None => Arc::new(InMemoryChunkStore::new(config.similarity)),
    };

    let tokens = Arc::new(TiktokenCounter::cl100k().map_err(anyhow::Error::msg)?);
    let completion = Arc::new(OpenAiCompletion::new(
        provider,
        config.completion_model.clone(),
        config.max_output_tokens,
    )?);

    let state = AppState {
        ingestion: Arc::new(IngestionService::new(
            embedder.clone(),
            store.clone(),
            tokens,
        )),
        chat: Arc::new(AnswerService::new(
            ContextAssembler::new(
                embedder,
                store.clone(),
                config.max_context_tokens,
                config.top_k,
            ),
            completion,
        )),
        store,
    };

    run_server(bind, state).await
}

async fn ingest(
    cli: &Cli,
    config: &ChatConfig,
    server: &str,
    source: PdfSource,
    doc_id: &str,
    doc_name: &str,
) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let document = load_source(&client, &source).await?;
    info!(doc_id, doc_name, pages = document.page_count(), "pdf decoded");

    let transport = HttpIngestClient::new(client, server);
    let batcher = UploadBatcher::new(Arc::new(transport), config.batch_size);
    let summary = batcher
        .upload_document(doc_id, doc_name, document.pages(), |progress| {
            eprint!(
                "\ruploading {}/{} batches ({:.0}%)",
                progress.completed,
                progress.total,
                progress.fraction() * 100.0
            );
            if progress.is_done() {
                eprintln!();
            }
        })
        .await?;

    let mut recent = cli.recent_files();
    if let Err(error) = recent.add(RecentFile {
        doc_id: doc_id.to_string(),
        doc_name: doc_name.to_string(),
        source,
    }) {
        warn!(%error, "could not save recent documents");
    }

    println!(
        "{} pages of {} ingested as {} at {}",
        summary.pages,
        summary.doc_name,
        summary.doc_id,
        Utc::now().to_rfc3339()
    );
    Ok(())
}

async fn ask(server: &str, doc_id: &str, question: &str) -> anyhow::Result<()> {
    let mut session = ChatSession::new(doc_id);
    let question = session.ask(question)?;

    let url = chat_stream_url(server, &question, session.doc_id())?;
    let mut stream = consume_stream(&reqwest::Client::new(), url).await?;

    let mut stdout = std::io::stdout();
    let end = tokio::select! {
        end = session.stream_into(&mut stream, |delta| {
            print!("{delta}");
            let _ = stdout.flush();
        }) => end?,
        _ = tokio::signal::ctrl_c() => {
            stream.cancel();
            session.finish(StreamEnd::Cancelled)?;
            StreamEnd::Cancelled
        }
    };
    println!();

    match end {
        StreamEnd::Completed => Ok(()),
        StreamEnd::Disconnected => {
            warn!(doc_id, "answer ended before the server finished it");
            anyhow::bail!("connection closed before the answer completed")
        }
        StreamEnd::Cancelled => {
            eprintln!("cancelled");
            Ok(())
        }
    }
}

fn remote_file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}
