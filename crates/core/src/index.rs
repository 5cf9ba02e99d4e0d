use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, PipelineError};
use crate::models::{ChunkMetadata, DocumentFilter, SearchHit, StoredChunk};
use crate::traits::VectorIndex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Text-level view of the vector store: embeds on the way in and on the way out.
pub struct DocumentIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorIndex>,
    call_timeout: Duration,
}

impl DocumentIndex {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorIndex>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            call_timeout,
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn store(&self) -> &dyn VectorIndex {
        self.store.as_ref()
    }

    /// Embeds every text, then writes a single batch. Nothing is written unless
    /// every text received a vector of the embedder's dimension.
    pub async fn insert(
        &self,
        texts: &[String],
        metadatas: &[ChunkMetadata],
    ) -> Result<usize, PipelineError> {
        if texts.len() != metadatas.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "{} texts but {} metadata entries",
                texts.len(),
                metadatas.len()
            )));
        }
        if texts.is_empty() {
            return Ok(0);
        }
        if let Some(position) = texts.iter().position(|text| text.trim().is_empty()) {
            return Err(PipelineError::InvalidArgument(format!(
                "chunk {position} is empty"
            )));
        }

        let embeddings = timeout(self.call_timeout, self.embedder.embed_batch(texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.call_timeout))??;

        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            }
            .into());
        }
        let expected = self.embedder.dimensions();
        if let Some(vector) = embeddings.iter().find(|vector| vector.len() != expected) {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            }
            .into());
        }

        let points: Vec<StoredChunk> = texts
            .iter()
            .zip(metadatas)
            .zip(embeddings)
            .map(|((text, metadata), embedding)| StoredChunk {
                point_id: metadata.point_id(),
                text: text.clone(),
                embedding,
                metadata: metadata.clone(),
            })
            .collect();

        self.store.upsert(&points).await?;
        debug!(
            backend = self.store.backend(),
            embedder = self.embedder.name(),
            points = points.len(),
            "inserted chunks"
        );
        Ok(points.len())
    }

    pub async fn search(
        &self,
        query: &str,
        filter: &DocumentFilter,
        k: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        if filter.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = timeout(self.call_timeout, self.embedder.embed(query))
            .await
            .map_err(|_| EmbeddingError::Timeout(self.call_timeout))??;

        Ok(self.store.search(&query_vector, filter, k).await?)
    }

    pub async fn contains_document(&self, document_id: &str) -> Result<bool, PipelineError> {
        let count = self
            .store
            .count(&DocumentFilter::any_of([document_id]))
            .await?;
        Ok(count > 0)
    }
}
