use crate::error::{EmbeddingError, PipelineError};
use crate::provider::{error_detail, http_client, ApiTarget};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;
pub const DEFAULT_OPENAI_DIMENSIONS: usize = 1536;
const DEFAULT_BATCH_SIZE: usize = 64;

/// Produces fixed-dimension vectors for text. Every call may be a slow network round trip.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// One vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            actual => Err(EmbeddingError::CountMismatch {
                expected: 1,
                actual,
            }),
        }
    }
}

/// Hashed character tri-gram embedder. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "ngram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions.max(1)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI or Azure OpenAI `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    target: ApiTarget,
    url: Url,
    dimensions: usize,
    request_dimensions: Option<usize>,
    batch_size: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(target: ApiTarget, timeout: Duration) -> Result<Self, PipelineError> {
        let url = target.endpoint("embeddings")?;
        Ok(Self {
            client: http_client(timeout)?,
            target,
            url,
            dimensions: DEFAULT_OPENAI_DIMENSIONS,
            request_dimensions: None,
            batch_size: DEFAULT_BATCH_SIZE,
            timeout,
        })
    }

    /// Requests vectors truncated to `dimensions` (text-embedding-3 models).
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.request_dimensions = Some(dimensions);
        self
    }

    /// Declares the model's native size without sending `dimensions` in the request.
    pub fn with_native_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self.request_dimensions = None;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        debug!(
            backend = self.target.backend(),
            model = self.target.model(),
            batch_size = texts.len(),
            "embedding batch"
        );

        let body = EmbeddingRequest {
            model: self.target.model(),
            input: texts,
            dimensions: self.request_dimensions,
        };

        let response = self
            .target
            .authorize(self.client.post(self.url.clone()))
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                error!(backend = self.target.backend(), error = %error, "embedding request failed");
                if error.is_timeout() {
                    EmbeddingError::Timeout(self.timeout)
                } else {
                    EmbeddingError::Http(error)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = error_detail(response.text().await.unwrap_or_default());
            error!(backend = self.target.backend(), %status, "embedding backend error");
            return Err(EmbeddingError::Backend {
                backend: self.target.backend().to_string(),
                status: status.as_u16(),
                details,
            });
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::MalformedResponse(error.to_string()))?;

        order_embeddings(parsed.data, texts.len(), self.dimensions)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        self.target.backend()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            vectors.extend(self.embed_request(batch).await?);
        }
        Ok(vectors)
    }
}

/// Restores input order from the response `index` field and checks sizes.
fn order_embeddings(
    mut data: Vec<EmbeddingData>,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: data.len(),
        });
    }

    data.sort_by_key(|item| item.index);
    data.into_iter()
        .map(|item| {
            if item.embedding.len() == dimensions {
                Ok(item.embedding)
            } else {
                Err(EmbeddingError::DimensionMismatch {
                    expected: dimensions,
                    actual: item.embedding.len(),
                })
            }
        })
        .collect()
}
