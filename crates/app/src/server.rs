use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use doc_compare_core::{ComparisonService, FileType, PipelineError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const UPLOAD_FIELD: &str = "file";

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    service: Arc<ComparisonService>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(service: Arc<ComparisonService>) -> Self {
        Self {
            service,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub doc_id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct CompareParams {
    pub doc1_id: String,
    pub doc2_id: String,
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompareResponse {
    pub comparison: String,
    pub doc1_chunks: Vec<String>,
    pub doc2_chunks: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    PayloadTooLarge { limit: usize },
}

impl From<PipelineError> for ApiError {
    fn from(error: PipelineError) -> Self {
        Self::Pipeline(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Pipeline(
                PipelineError::UnsupportedFormat(_) | PipelineError::InvalidArgument(_),
            ) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(PipelineError::UnknownDocument(_)) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::Pipeline(error) => error.to_string(),
            ApiError::PayloadTooLarge { limit } => {
                format!("upload exceeds the {limit} byte limit")
            }
        }
    }

    /// Body-limit failures surface as multipart errors; keep them apart from bad requests.
    fn from_multipart(error: MultipartError, limit: usize) -> Self {
        if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge { limit }
        } else {
            PipelineError::InvalidArgument(format!("malformed upload: {}", error.body_text()))
                .into()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = self.detail();
        if status.is_server_error() {
            error!(error = %detail, "request failed");
        } else {
            warn!(error = %detail, "request rejected");
        }
        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload))
        .route("/compare", post(compare))
        .layer(body_limit)
        .layer(cors)
        .with_state(state)
}

pub async fn serve(
    service: Arc<ComparisonService>,
    bind: SocketAddr,
    max_upload_bytes: usize,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %listener.local_addr()?, max_upload_bytes, "http server listening");

    let state = AppState::new(service).with_max_upload_bytes(max_upload_bytes);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        error!(error = %error, "failed to listen for shutdown signal");
    }
    info!("shutting down");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let limit = state.max_upload_bytes;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| ApiError::from_multipart(error, limit))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().to_string();
        let declared_type = declared_type(&file_name)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|error| ApiError::from_multipart(error, limit))?;

        let receipt = state.service.ingest(&bytes, &declared_type).await?;
        return Ok(Json(UploadResponse {
            doc_id: receipt.document_id,
            message: format!(
                "Document processed successfully ({} chunks)",
                receipt.chunk_count
            ),
        }));
    }

    Err(PipelineError::InvalidArgument(format!(
        "multipart field `{UPLOAD_FIELD}` is required"
    ))
    .into())
}

/// The extension is checked against the supported list by the service; unknown ones
/// are passed through so the caller gets `UnsupportedFormat` rather than a parse error.
fn declared_type(file_name: &str) -> Result<String, PipelineError> {
    match FileType::from_path(Path::new(file_name)) {
        Ok(file_type) => Ok(file_type.to_string()),
        Err(_) => Path::new(file_name)
            .extension()
            .and_then(|extension| extension.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!("{file_name} has no file extension"))
            }),
    }
}

async fn compare(
    State(state): State<AppState>,
    Query(params): Query<CompareParams>,
) -> Result<Json<CompareResponse>, ApiError> {
    let result = state
        .service
        .compare(&params.doc1_id, &params.doc2_id, params.query.as_deref())
        .await?;

    Ok(Json(CompareResponse {
        comparison: result.narrative,
        doc1_chunks: result.document1.chunks,
        doc2_chunks: result.document2.chunks,
    }))
}
