//! HTTP API exposing the QSR knowledge assistant.
//!
//! # Endpoints
//!
//! | Method   | Path                 | Description |
//! |----------|----------------------|-------------|
//! | `POST`   | `/upload`            | Submit a document for ingestion |
//! | `GET`    | `/progress/:id`      | Poll an ingestion's [`ProgressRecord`] |
//! | `GET`    | `/documents`         | List indexed documents, newest first |
//! | `GET`    | `/document/:id`      | Document detail with a text preview |
//! | `DELETE` | `/document/:id`      | Remove a document and its derived state |
//! | `POST`   | `/query`             | Ask a question, get a composed answer |
//! | `GET`    | `/citation/:id`      | Fetch a visual citation's rendered bytes |
//! | `GET`    | `/blobs/*path`       | Fetch the raw bytes behind a document's blob path |
//! | `GET`    | `/health`            | Health check |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not-found", "message": "..." } }
//! ```
//!
//! `code` is [`crate::error::ErrorKind::as_str`]; the HTTP status follows the
//! error taxonomy.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted, since this API is
//! consumed directly from browser-based kitchen tablets.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::citation::{self, VisualCitationStore};
use crate::config::Config;
use crate::degradation::DegradationState;
use crate::embedding::EmbeddingProvider;
use crate::error::{CoreError, ErrorKind};
use crate::models::{EntityType, Priority, ProgressRecord};
use crate::orchestrator::{Orchestrator, SubmitResult};
use crate::render::PageRenderer;
use crate::retrieval::{self, RetrievalResponse};
use crate::storage::{BlobStore, ChunkIndex, GraphStore};

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    graph: Arc<dyn GraphStore>,
    chunks: Arc<dyn ChunkIndex>,
    blobs: Arc<dyn BlobStore>,
    citations: Arc<VisualCitationStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    renderer: Arc<dyn PageRenderer>,
    orchestrator: Arc<Orchestrator>,
    degradation: Arc<DegradationState>,
}

/// Starts the HTTP server. Binds to `config.server.bind` and serves until
/// the process is terminated.
#[allow(clippy::too_many_arguments)]
pub async fn run_server(
    config: Arc<Config>,
    graph: Arc<dyn GraphStore>,
    chunks: Arc<dyn ChunkIndex>,
    blobs: Arc<dyn BlobStore>,
    citations: Arc<VisualCitationStore>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    renderer: Arc<dyn PageRenderer>,
    orchestrator: Arc<Orchestrator>,
    degradation: Arc<DegradationState>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    let state = AppState {
        config,
        graph,
        chunks,
        blobs,
        citations,
        embedding_provider,
        renderer,
        orchestrator,
        degradation,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/upload", post(handle_upload))
        .route("/progress/{process_id}", get(handle_progress))
        .route("/documents", get(handle_list_documents))
        .route("/document/{id}", get(handle_get_document).delete(handle_delete_document))
        .route("/query", post(handle_query))
        .route("/citation/{citation_id}", get(handle_citation))
        .route("/blobs/{*path}", get(handle_blob))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = %bind_addr, "qsr server listening");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoreError> for AppError {
    fn from(e: CoreError) -> Self {
        let status = match e.kind() {
            ErrorKind::ValidationRejected | ErrorKind::ContentMalformed | ErrorKind::SecurityViolation => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::ConflictingWrite => StatusCode::CONFLICT,
            ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ErrorKind::InternalInvariant => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: e.kind().as_str().to_string(),
            message: e.sanitized_message(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: ErrorKind::ValidationRejected.as_str().to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: ErrorKind::NotFound.as_str().to_string(),
        message: message.into(),
    }
}

// ============ POST /upload ============

async fn handle_upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<SubmitResult>, AppError> {
    let mut filename = None;
    let mut bytes = None;
    let mut priority = Priority::Normal;

    while let Some(field) = multipart.next_field().await.map_err(|e| bad_request(e.to_string()))? {
        let is_priority_field = field.name() == Some("priority");
        if field.file_name().is_some() {
            filename = field.file_name().map(str::to_string);
            bytes = Some(field.bytes().await.map_err(|e| bad_request(e.to_string()))?.to_vec());
        } else if is_priority_field {
            let text = field.text().await.map_err(|e| bad_request(e.to_string()))?;
            priority = parse_priority(&text)?;
        }
    }

    let filename = filename.ok_or_else(|| bad_request("multipart request must include a file field"))?;
    let bytes = bytes.ok_or_else(|| bad_request("multipart request must include file bytes"))?;

    let result = state.orchestrator.submit_with_priority(bytes, filename, priority).await?;
    Ok(Json(result))
}

fn parse_priority(s: &str) -> Result<Priority, AppError> {
    match s {
        "low" => Ok(Priority::Low),
        "normal" => Ok(Priority::Normal),
        "high" => Ok(Priority::High),
        "critical" => Ok(Priority::Critical),
        other => Err(bad_request(format!("unknown priority '{other}'"))),
    }
}

// ============ GET /progress/:process_id ============

async fn handle_progress(State(state): State<AppState>, Path(process_id): Path<String>) -> Result<Json<ProgressRecord>, AppError> {
    let record = state.orchestrator.status(&process_id).await?;
    Ok(Json(record))
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentListItem {
    id: String,
    filename: String,
    upload_ts: chrono::DateTime<chrono::Utc>,
    size: u64,
    pages: Option<u32>,
    url: String,
    file_type: String,
}

async fn handle_list_documents(State(state): State<AppState>) -> Result<Json<Vec<DocumentListItem>>, AppError> {
    let documents = state.graph.list_documents().await?;
    let items = documents
        .into_iter()
        .map(|d| DocumentListItem {
            id: d.document_id,
            filename: d.filename,
            upload_ts: d.uploaded_at,
            size: d.size_bytes,
            pages: d.page_count,
            url: format!("/blobs/{}", d.blob_path),
            file_type: d.file_type.as_str().to_string(),
        })
        .collect();
    Ok(Json(items))
}

// ============ GET /document/:id ============

#[derive(Serialize)]
struct DocumentDetail {
    id: String,
    filename: String,
    upload_ts: chrono::DateTime<chrono::Utc>,
    size: u64,
    pages: Option<u32>,
    url: String,
    file_type: String,
    qsr_category: String,
    document_type: String,
    text_preview: String,
}

async fn handle_get_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DocumentDetail>, AppError> {
    let document = state
        .graph
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found(format!("no document {id}")))?;

    let mut text_preview: String = document.executive_summary.chars().take(200).collect();
    if document.executive_summary.chars().count() > 200 {
        text_preview.push('\u{2026}');
    }

    Ok(Json(DocumentDetail {
        id: document.document_id,
        filename: document.filename,
        upload_ts: document.uploaded_at,
        size: document.size_bytes,
        pages: document.page_count,
        url: format!("/blobs/{}", document.blob_path),
        file_type: document.file_type.as_str().to_string(),
        qsr_category: format!("{:?}", document.qsr_category),
        document_type: format!("{:?}", document.document_type),
        text_preview,
    }))
}

// ============ DELETE /document/:id ============

#[derive(Serialize)]
struct DeleteResponse {
    ok: bool,
    message: String,
}

async fn handle_delete_document(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<DeleteResponse>, AppError> {
    state.orchestrator.delete(&id).await?;
    Ok(Json(DeleteResponse {
        ok: true,
        message: format!("document {id} deleted"),
    }))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    text: String,
    #[serde(default)]
    max_results: Option<usize>,
    #[serde(default)]
    speech: bool,
}

async fn handle_query(State(state): State<AppState>, Json(req): Json<QueryRequest>) -> Result<Json<RetrievalResponse>, AppError> {
    let mode = state.degradation.mode();
    let limit = req.max_results.unwrap_or(state.config.retrieval.final_limit).max(1);
    let class = retrieval::classify_query(&req.text);
    let terms = retrieval::extract_key_terms(&req.text);

    let max_entity_results = retrieval::effective_max_entity_results(&state.config, mode);
    let hierarchy_depth = retrieval::effective_hierarchy_depth(&state.config, mode);
    let candidate_k_vector = retrieval::effective_candidate_k(&state.config, mode);

    let mut scored_entities = retrieval::retrieve_entities(state.graph.as_ref(), &terms, max_entity_results).await?;

    if let Some((top_entity, _)) = scored_entities.first().cloned() {
        let ancestors = retrieval::hierarchical_ancestors(state.graph.as_ref(), &top_entity, hierarchy_depth).await?;
        for name in ancestors {
            if let Some(ancestor) = state.graph.find_entity(&name, EntityType::Equipment).await? {
                let already_present = scored_entities
                    .iter()
                    .any(|(e, _)| e.canonical_name == ancestor.canonical_name && e.entity_type == ancestor.entity_type);
                if !already_present {
                    scored_entities.push((ancestor, 0.3));
                }
            }
        }
    }

    let keyword_query = if terms.is_empty() { req.text.clone() } else { terms.join(" ") };
    let keyword_chunks = state.chunks.keyword_search(&keyword_query, candidate_k_vector).await?;
    let vector_chunks = if candidate_k_vector == 0 {
        Vec::new()
    } else {
        retrieval::vector_retrieve(state.chunks.as_ref(), state.embedding_provider.as_ref(), &state.config, &req.text).await?
    };
    let merged_chunks = retrieval::merge_entity_and_vector_chunks(keyword_chunks, vector_chunks, state.config.retrieval.hybrid_alpha, limit);

    let document_ids: BTreeSet<String> = merged_chunks.iter().map(|c| c.document_id.clone()).collect();
    let mut citations = Vec::new();
    for document_id in &document_ids {
        citations.extend(state.citations.list_for_document(document_id).await?);
    }

    let degraded_documents = retrieval::collect_degraded_documents(state.graph.as_ref(), &scored_entities, &merged_chunks).await?;
    let mut response = retrieval::compose_response(&req.text, &scored_entities, &merged_chunks, &citations, class, &degraded_documents);
    if req.speech {
        let shaped = retrieval::shape_for_speech(&response.steps.join("\n"));
        response.steps = vec![shaped];
    }

    Ok(Json(response))
}

// ============ GET /citation/:citation_id ============

async fn handle_citation(State(state): State<AppState>, Path(citation_id): Path<String>) -> Result<Response, AppError> {
    let citation = state
        .citations
        .get(&citation_id)
        .await?
        .ok_or_else(|| not_found(format!("no citation {citation_id}")))?;

    let document = state
        .graph
        .get_document(&citation.document_id)
        .await?
        .ok_or_else(|| not_found(format!("no document {}", citation.document_id)))?;
    let document_bytes = state.blobs.get(&document.blob_path).await?;

    let bytes = citation::render_citation(state.renderer.as_ref(), &document_bytes, &citation)?;

    Ok(([(header::CONTENT_TYPE, "image/png")], bytes).into_response())
}

// ============ GET /blobs/*path ============

async fn handle_blob(State(state): State<AppState>, Path(path): Path<String>) -> Result<Response, AppError> {
    let bytes = state.blobs.get(&path).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    degradation_mode: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        degradation_mode: state.degradation.mode().as_str().to_string(),
    })
}
