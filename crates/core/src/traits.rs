use crate::error::IndexError;
use crate::models::{DocumentFilter, SearchHit, StoredChunk};
use async_trait::async_trait;

/// Storage backend for embedded chunks.
///
/// Implementations must be safe under concurrent writers: two `upsert` calls
/// for different documents never interleave their points.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &str;

    /// Writes the whole batch or nothing. Points with an existing id are replaced.
    async fn upsert(&self, points: &[StoredChunk]) -> Result<(), IndexError>;

    /// At most `k` hits whose metadata satisfies `filter`, by descending similarity.
    async fn search(
        &self,
        query_vector: &[f32],
        filter: &DocumentFilter,
        k: usize,
    ) -> Result<Vec<SearchHit>, IndexError>;

    async fn count(&self, filter: &DocumentFilter) -> Result<usize, IndexError>;
}
