use crate::error::PipelineError;
use crate::index::DocumentIndex;
use crate::models::{
    DocumentExcerpts, DocumentFilter, RetrievalStrategy, RetrievedChunks, SearchHit,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Fetches the chunks most similar to a query, scoped to exactly two documents.
pub struct Retriever {
    index: Arc<DocumentIndex>,
    strategy: RetrievalStrategy,
}

impl Retriever {
    pub fn new(index: Arc<DocumentIndex>, strategy: RetrievalStrategy) -> Self {
        Self { index, strategy }
    }

    pub fn strategy(&self) -> RetrievalStrategy {
        self.strategy
    }

    /// With [`RetrievalStrategy::Global`] the `k` budget is shared, so one
    /// document may take every slot and the other come back empty.
    pub async fn retrieve(
        &self,
        query: &str,
        document_ids: [&str; 2],
        k: usize,
    ) -> Result<RetrievedChunks, PipelineError> {
        let [first, second] = document_ids;
        if first == second {
            return Err(PipelineError::InvalidArgument(format!(
                "documents to compare must differ, got {first} twice"
            )));
        }

        let hits = match self.strategy {
            RetrievalStrategy::Global => {
                self.index
                    .search(query, &DocumentFilter::any_of([first, second]), k)
                    .await?
            }
            RetrievalStrategy::PerDocument => {
                let mut hits = self
                    .index
                    .search(query, &DocumentFilter::any_of([first]), k)
                    .await?;
                hits.extend(
                    self.index
                        .search(query, &DocumentFilter::any_of([second]), k)
                        .await?,
                );
                hits
            }
        };

        let retrieved = partition_hits(hits, first, second);
        debug!(
            strategy = ?self.strategy,
            k,
            document1_chunks = retrieved.document1.chunks.len(),
            document2_chunks = retrieved.document2.chunks.len(),
            "retrieved chunks"
        );
        Ok(retrieved)
    }
}

/// Splits hits by `document_id`, keeping the similarity order within each side.
pub fn partition_hits(hits: Vec<SearchHit>, first: &str, second: &str) -> RetrievedChunks {
    let mut document1 = DocumentExcerpts::empty(first);
    let mut document2 = DocumentExcerpts::empty(second);

    for hit in hits {
        if hit.metadata.document_id == first {
            document1.chunks.push(hit.text);
        } else if hit.metadata.document_id == second {
            document2.chunks.push(hit.text);
        } else {
            warn!(
                document_id = %hit.metadata.document_id,
                "ignoring hit outside requested documents"
            );
        }
    }

    RetrievedChunks {
        document1,
        document2,
    }
}
