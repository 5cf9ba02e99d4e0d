use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding backend {backend} returned {status}: {details}")]
    Backend {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("embedding call exceeded {0:?}")]
    Timeout(Duration),

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("expected {expected} embeddings, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding dimension {actual} != {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index request rejected: {0}")]
    Request(String),

    #[error("store not available yet: {0}")]
    NotReady(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chat backend {backend} returned {status}: {details}")]
    Backend {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("language model call exceeded {0:?}")]
    Timeout(Duration),

    #[error("language model returned no completion")]
    EmptyResponse,
}

/// Caller-facing failures of the ingest and compare operations.
///
/// Each variant is local to one request; none of them leaves shared state
/// in a condition that affects later requests.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(#[from] EmbeddingError),

    #[error("vector index failure: {0}")]
    IndexFailure(#[from] IndexError),

    #[error("generation failed: {0}")]
    GenerationFailure(#[from] GenerationError),

    #[error("no indexed chunks for document {0}")]
    UnknownDocument(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
