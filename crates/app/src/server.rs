//! HTTP surface: the page ingestion endpoint and the streamed chat endpoint.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/upload-pages` | Ingest one batch of pages |
//! | `GET`  | `/api/chat-stream?q=..&doc=..` | Stream an answer about one document as SSE |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Errors are JSON bodies of the form `{ "error": "..." }`.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use docchat_core::error::{ChatError, IngestError, RetrievalError};
use docchat_core::models::{ErrorResponse, UploadRequest};
use docchat_core::upload::UPLOAD_PAGES_PATH;
use docchat_core::sse::CHAT_STREAM_PATH;
use docchat_core::{AnswerService, ChunkStore, IngestionService};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed. Please use POST.";

#[derive(Clone)]
pub struct AppState {
    pub ingestion: Arc<IngestionService>,
    pub chat: Arc<AnswerService>,
    pub store: Arc<dyn ChunkStore>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            UPLOAD_PAGES_PATH,
            post(handle_upload_pages).fallback(handle_method_not_allowed),
        )
        .route(CHAT_STREAM_PATH, get(handle_chat_stream))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serves until the process receives Ctrl-C.
pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "docchat server listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "could not listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IngestError> for AppError {
    fn from(error: IngestError) -> Self {
        match error {
            IngestError::EmptyBatch | IngestError::MixedDocuments { .. } => {
                AppError::bad_request(error.to_string())
            }
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<ChatError> for AppError {
    fn from(error: ChatError) -> Self {
        AppError::bad_request(error.to_string())
    }
}

// ============ POST /api/upload-pages ============

async fn handle_upload_pages(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "upload body rejected");
            return AppError::bad_request(rejection.body_text()).into_response();
        }
    };

    match state.ingestion.ingest_upload(&request).await {
        Ok(response) => Json(response).into_response(),
        Err(error) => {
            warn!(%error, pages = request.pages.len(), "ingestion batch failed");
            AppError::from(error).into_response()
        }
    }
}

async fn handle_method_not_allowed() -> AppError {
    AppError {
        status: StatusCode::METHOD_NOT_ALLOWED,
        message: METHOD_NOT_ALLOWED_MESSAGE.to_string(),
    }
}

// ============ GET /api/chat-stream ============

#[derive(Debug, Deserialize)]
struct ChatParams {
    q: Option<String>,
    doc: Option<String>,
}

async fn handle_chat_stream(
    State(state): State<AppState>,
    Query(params): Query<ChatParams>,
) -> Result<Response, AppError> {
    let question = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::bad_request(RetrievalError::EmptyQuestion.to_string()))?;
    let doc_id = params
        .doc
        .filter(|doc| !doc.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("doc parameter is required"))?;

    let doc_name = match state.store.document(&doc_id).await {
        Ok(Some(document)) => document.name,
        Ok(None) => doc_id.clone(),
        Err(error) => return Err(AppError::bad_request(error.to_string())),
    };

    let relay = state
        .chat
        .stream_answer(&question, &doc_id, &doc_name)
        .await
        .map_err(|error| {
            warn!(%error, doc_id = %doc_id, "chat request failed before streaming");
            AppError::from(error)
        })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream;charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(relay),
    )
        .into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
