//! REST API server for the regulatory copilot
//!
//! Provides HTTP endpoints for:
//! - Plain and retrieval-augmented chat (streamed as text paragraphs)
//! - Regulatory-enhanced chat with role-conditioned prompting
//! - Document upload into the global knowledge base
//! - Knowledge base, session, and health inspection

use crate::config::CopilotConfig;
use crate::error::{CopilotError, LlmError, Result};
use crate::ingest;
use crate::kb::GlobalKb;
use crate::llm::{OpenAiClient, TokenStream};
use crate::rag::RagPipeline;
use crate::regulatory::{RegulatoryEnhancer, RegulatoryFilters, UserRole};
use crate::session::{SessionRegistry, SessionSummary};
use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Maximum accepted upload size (regulatory PDFs and annex workbooks)
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The process-wide knowledge base
    pub kb: GlobalKb,
    /// Per-client session registry
    pub sessions: SessionRegistry,
    /// Service configuration
    pub config: Arc<CopilotConfig>,
}

impl AppState {
    /// Build the state and seed the knowledge base from the configured
    /// snapshot (if any). Vectors are bound lazily on the first keyed query.
    pub async fn new(config: CopilotConfig) -> Result<Self> {
        let kb = GlobalKb::new();

        match &config.ingest.snapshot_path {
            Some(path) => kb.seed_from_file(std::path::Path::new(path)).await,
            None => kb.seed_empty().await,
        }

        Ok(Self {
            kb,
            sessions: SessionRegistry::new(),
            config: Arc::new(config),
        })
    }

    /// Resolve the API key, create clients, and make sure the index is
    /// bound to that key's embedding backend.
    async fn pipeline(&self, request_key: Option<&str>) -> Result<RagPipeline> {
        let api_key =
            CopilotConfig::resolve_api_key(request_key).ok_or(LlmError::MissingApiKey)?;
        let client = Arc::new(OpenAiClient::new(self.config.llm.clone(), api_key.clone())?);
        self.kb.bind(&api_key, client.as_ref()).await?;

        Ok(RagPipeline::new(
            self.kb.clone(),
            client.clone(),
            client,
            self.config.retrieval.clone(),
        ))
    }

    /// Clients without any retrieval need (plain chat) skip the bind step
    fn chat_pipeline(&self, request_key: Option<&str>) -> Result<RagPipeline> {
        let api_key =
            CopilotConfig::resolve_api_key(request_key).ok_or(LlmError::MissingApiKey)?;
        let client = Arc::new(OpenAiClient::new(self.config.llm.clone(), api_key)?);
        Ok(RagPipeline::new(
            self.kb.clone(),
            client.clone(),
            client,
            self.config.retrieval.clone(),
        ))
    }
}

/// Request for plain chat
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    /// The user's message
    pub user_message: String,
    /// Optional model override
    #[serde(default)]
    pub model: Option<String>,
    /// API key for the model services
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Request for retrieval-augmented chat
#[derive(Debug, Deserialize, ToSchema)]
pub struct RagChatRequest {
    pub user_message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
}

/// Request for regulatory-enhanced chat
#[derive(Debug, Deserialize, ToSchema)]
pub struct RegulatoryRagChatRequest {
    pub user_message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_use_rag")]
    pub use_rag: bool,
    #[serde(default)]
    pub doc_types: Option<Vec<String>>,
    #[serde(default)]
    pub priority_sources: Option<Vec<String>>,
}

fn default_use_rag() -> bool {
    true
}

/// Response for a successful upload
#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub session_id: String,
    pub document_count: usize,
    pub filename: String,
    pub doc_type: String,
    pub regulatory_type: Option<String>,
    pub chunks_created: usize,
}

/// Response for deletions
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// Response for document deletion
#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteDocumentResponse {
    pub success: bool,
    pub message: String,
    pub remaining_user_documents: usize,
    pub total_documents: usize,
}

/// Sessions listing
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionsResponse {
    pub total_sessions: usize,
    #[schema(value_type = Vec<Object>)]
    pub sessions: Vec<SessionSummary>,
}

/// Error body for non-streaming endpoints
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub category: String,
}

/// Query parameters for document deletion
#[derive(Debug, Deserialize)]
pub struct DeleteDocumentQuery {
    #[serde(default)]
    #[allow(dead_code)]
    pub api_key: Option<String>,
}

impl IntoResponse for CopilotError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.category(), self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
            category: self.category().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        chat_handler,
        rag_chat_handler,
        regulatory_rag_chat_handler,
        upload_document_handler
    ),
    components(schemas(
        ChatRequest,
        RagChatRequest,
        RegulatoryRagChatRequest,
        UploadResponse,
        DeleteResponse,
        DeleteDocumentResponse,
        SessionsResponse,
        ErrorResponse
    )),
    tags(
        (name = "chat", description = "Streaming chat endpoints"),
        (name = "documents", description = "Knowledge base document management")
    )
)]
struct ApiDoc;

/// Build the service router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_handler))
        // Chat endpoints
        .route("/api/chat", post(chat_handler))
        .route("/api/rag-chat", post(rag_chat_handler))
        .route("/api/regulatory-rag-chat", post(regulatory_rag_chat_handler))
        // Document management
        .route("/api/upload-document", post(upload_document_handler))
        .route("/api/document/{filename}", delete(delete_document_handler))
        // Knowledge base inspection
        .route("/api/global-knowledge-base", get(global_kb_handler))
        // Session management
        .route("/api/sessions", get(list_sessions_handler))
        .route(
            "/api/session/{id}",
            get(get_session_handler).delete(delete_session_handler),
        )
        // OpenAPI spec endpoint
        .route("/api-docs/openapi.json", get(openapi_spec_handler))
        .with_state(state)
        // Add middleware
        .layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// OpenAPI specification endpoint
async fn openapi_spec_handler() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Wrap a paragraph stream as a `text/plain` streaming body. Errors become a
/// terminal human-readable paragraph, keeping the streaming contract.
fn stream_response(stream: TokenStream) -> Response {
    let body_stream = stream.scan(false, |errored, item| {
        if *errored {
            return futures::future::ready(None);
        }
        let bytes = match item {
            Ok(paragraph) => Bytes::from(paragraph),
            Err(e) => {
                *errored = true;
                error!("Stream aborted: {}", e);
                Bytes::from(format!(
                    "I encountered an error while processing your request: {}\n\n",
                    e
                ))
            }
        };
        futures::future::ready(Some(Ok::<Bytes, Infallible>(bytes)))
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Plain chat, no retrieval
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Streamed response paragraphs", body = String, content_type = "text/plain"),
        (status = 400, description = "Missing API key", body = ErrorResponse)
    )
)]
async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response> {
    let pipeline = state.chat_pipeline(request.api_key.as_deref())?;
    let stream = pipeline
        .chat_only(&request.user_message, request.model.as_deref())
        .await?;
    Ok(stream_response(stream))
}

/// Retrieval-augmented chat against the global knowledge base
#[utoipa::path(
    post,
    path = "/api/rag-chat",
    tag = "chat",
    request_body = RagChatRequest,
    responses(
        (status = 200, description = "Streamed response paragraphs", body = String, content_type = "text/plain"),
        (status = 503, description = "Knowledge base not ready", body = ErrorResponse)
    )
)]
async fn rag_chat_handler(
    State(state): State<AppState>,
    Json(request): Json<RagChatRequest>,
) -> Result<Response> {
    state
        .sessions
        .get_or_create(request.session_id.as_deref(), request.api_key.as_deref())
        .await;

    if !request.use_rag {
        let pipeline = state.chat_pipeline(request.api_key.as_deref())?;
        let stream = pipeline
            .chat_only(&request.user_message, request.model.as_deref())
            .await?;
        return Ok(stream_response(stream));
    }

    let pipeline = state.pipeline(request.api_key.as_deref()).await?;
    let stream = pipeline
        .run(&request.user_message, None, request.model.as_deref())
        .await?;
    Ok(stream_response(stream))
}

/// Regulatory-enhanced chat with role-conditioned prompting
#[utoipa::path(
    post,
    path = "/api/regulatory-rag-chat",
    tag = "chat",
    request_body = RegulatoryRagChatRequest,
    responses(
        (status = 200, description = "Streamed response paragraphs", body = String, content_type = "text/plain")
    )
)]
async fn regulatory_rag_chat_handler(
    State(state): State<AppState>,
    Json(request): Json<RegulatoryRagChatRequest>,
) -> Result<Response> {
    state
        .sessions
        .get_or_create(request.session_id.as_deref(), request.api_key.as_deref())
        .await;

    if !request.use_rag {
        let pipeline = state.chat_pipeline(request.api_key.as_deref())?;
        let stream = pipeline
            .chat_only(&request.user_message, request.model.as_deref())
            .await?;
        return Ok(stream_response(stream));
    }

    let pipeline = state.pipeline(request.api_key.as_deref()).await?;
    let enhancer = RegulatoryEnhancer::new(pipeline);

    let role = UserRole::parse(request.user_role.as_deref());
    let filters = RegulatoryFilters {
        doc_types: request.doc_types.unwrap_or_default(),
        priority_sources: request.priority_sources.unwrap_or_default(),
    };

    let enhanced = enhancer
        .run(
            &request.user_message,
            role,
            None,
            &filters,
            request.model.as_deref(),
        )
        .await?;

    let mut response = stream_response(enhanced.stream);
    if enhanced.fallback {
        response
            .headers_mut()
            .insert("x-regulatory-fallback", header::HeaderValue::from_static("true"));
    }
    Ok(response)
}

/// Upload a document into the global knowledge base
#[utoipa::path(
    post,
    path = "/api/upload-document",
    tag = "documents",
    responses(
        (status = 200, description = "Document parsed and indexed", body = UploadResponse),
        (status = 400, description = "Unsupported file type or parse failure", body = ErrorResponse)
    )
)]
async fn upload_document_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response> {
    let mut file_bytes: Option<Bytes> = None;
    let mut filename: Option<String> = None;
    let mut mime_type: Option<String> = None;
    let mut session_id: Option<String> = None;
    let mut api_key: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CopilotError::Network(format!("Invalid multipart payload: {}", e)))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("file") => {
                filename = field.file_name().map(|s| s.to_string());
                mime_type = field.content_type().map(|s| s.to_string());
                file_bytes = Some(field.bytes().await.map_err(|e| {
                    CopilotError::Network(format!("Failed to read upload: {}", e))
                })?);
            }
            Some("session_id") => {
                session_id = field.text().await.ok().filter(|s| !s.is_empty());
            }
            Some("api_key") => {
                api_key = field.text().await.ok().filter(|s| !s.is_empty());
            }
            _ => {}
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| {
        CopilotError::Ingest(crate::error::IngestError::ParseError {
            filename: "<missing>".to_string(),
            reason: "multipart field 'file' is required".to_string(),
        })
    })?;
    let filename = filename
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| "upload.txt".to_string());

    if !ingest::is_supported(&filename, mime_type.as_deref()) {
        return Err(crate::error::IngestError::UnsupportedFileType(format!(
            "{} (supported: {})",
            filename,
            ingest::supported_extensions().join(", ")
        ))
        .into());
    }

    // Parse from a scratch file; optionally keep the raw upload in the cache
    // directory, otherwise remove it once chunks exist.
    let scratch_dir = state
        .config
        .ingest
        .upload_cache_dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().display().to_string());
    tokio::fs::create_dir_all(&scratch_dir).await?;
    let scratch_path =
        std::path::PathBuf::from(&scratch_dir).join(format!("{}_{}", Uuid::new_v4(), filename));
    tokio::fs::write(&scratch_path, &file_bytes).await?;

    let ingest_config = state.config.ingest.clone();
    let parse_path = scratch_path.clone();
    let parse_filename = filename.clone();
    let parse_mime = mime_type.clone();
    let parsed = tokio::task::spawn_blocking(move || {
        ingest::process_document(
            &parse_path,
            &parse_filename,
            parse_mime.as_deref(),
            &ingest_config,
        )
    })
    .await
    .map_err(|e| CopilotError::Network(format!("Parser task failed: {}", e)))?;

    if state.config.ingest.upload_cache_dir.is_none() {
        let _ = tokio::fs::remove_file(&scratch_path).await;
    }
    let parsed = parsed?;

    if parsed.chunks.is_empty() {
        return Err(crate::error::IngestError::EmptyDocument(filename).into());
    }

    let doc_type = parsed.doc_type.as_str().to_string();
    let regulatory_type = parsed.regulatory_type.map(|r| r.as_str().to_string());

    // Embedding happens inside add_document, before the writer lock
    let pipeline = state.pipeline(api_key.as_deref()).await?;
    let chunks_created = state
        .kb
        .add_document(parsed, pipeline.embedder())
        .await?;

    let session_id = state
        .sessions
        .get_or_create(session_id.as_deref(), api_key.as_deref())
        .await;
    state.sessions.record_upload(&session_id, &filename).await;

    let document_count = state
        .sessions
        .get(&session_id)
        .await
        .map(|s| s.documents.len())
        .unwrap_or(0);

    info!("Upload complete: {} ({} chunks)", filename, chunks_created);

    Ok(Json(UploadResponse {
        success: true,
        message: format!("Successfully uploaded and processed {}", filename),
        session_id,
        document_count,
        filename,
        doc_type,
        regulatory_type,
        chunks_created,
    })
    .into_response())
}

/// Delete a user-uploaded document from the global knowledge base
async fn delete_document_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(_query): Query<DeleteDocumentQuery>,
) -> Result<Json<DeleteDocumentResponse>> {
    let (removed, remaining, total) = state.kb.remove_document(&filename).await?;

    Ok(Json(DeleteDocumentResponse {
        success: true,
        message: format!("Document {} deleted ({} chunks removed)", filename, removed),
        remaining_user_documents: remaining,
        total_documents: total,
    }))
}

/// Global knowledge base information
async fn global_kb_handler(State(state): State<AppState>) -> Response {
    let info = state.kb.info().await;
    Json(info).into_response()
}

/// List all active sessions
async fn list_sessions_handler(State(state): State<AppState>) -> Json<SessionsResponse> {
    let sessions = state.sessions.list().await;
    Json(SessionsResponse {
        total_sessions: sessions.len(),
        sessions,
    })
}

/// Session details
async fn get_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response> {
    match state.sessions.get(&id).await {
        Some(session) => Ok(Json(session).into_response()),
        None => Err(CopilotError::UnknownSession(id)),
    }
}

/// Delete a session
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    if state.sessions.delete(&id).await {
        Ok(Json(DeleteResponse {
            success: true,
            message: "Session deleted successfully".to_string(),
        }))
    } else {
        Err(CopilotError::UnknownSession(id))
    }
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> Response {
    let info = state.kb.info().await;
    Json(serde_json::json!({
        "status": "ok",
        "global_kb": info,
    }))
    .into_response()
}

/// Bind and serve
pub async fn start_server(state: AppState, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    info!("Starting API server on {}", addr);

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CopilotError::Network(format!("Failed to bind to {}: {}", addr, e)))?;

    info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| CopilotError::Network(format!("Server error: {}", e)))?;

    Ok(())
}
