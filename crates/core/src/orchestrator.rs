use crate::chunking::TextSplitter;
use crate::comparator::{effective_query, Comparator};
use crate::embeddings::Embedder;
use crate::error::PipelineError;
use crate::extractor::{ensure_supported, StandardExtractor, TextExtractor};
use crate::index::DocumentIndex;
use crate::ingest::prepare_document;
use crate::llm::ChatModel;
use crate::models::{ComparisonResult, IngestReceipt, PipelineOptions};
use crate::retriever::Retriever;
use crate::traits::VectorIndex;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide pipeline context: built once at startup and shared by every request.
pub struct ComparisonService {
    options: PipelineOptions,
    extractor: Arc<dyn TextExtractor>,
    splitter: TextSplitter,
    index: Arc<DocumentIndex>,
    retriever: Retriever,
    comparator: Comparator,
}

impl ComparisonService {
    pub fn new(
        options: PipelineOptions,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorIndex>,
        model: Arc<dyn ChatModel>,
    ) -> Result<Self, PipelineError> {
        options.validate()?;

        let splitter = TextSplitter::from_options(&options)?;
        let index = Arc::new(DocumentIndex::new(embedder, store, options.request_timeout));
        let retriever = Retriever::new(index.clone(), options.retrieval_strategy);
        let comparator = Comparator::new(model, options.request_timeout);

        Ok(Self {
            options,
            extractor: Arc::new(StandardExtractor),
            splitter,
            index,
            retriever,
            comparator,
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn index(&self) -> &DocumentIndex {
        &self.index
    }

    /// extract → normalize → chunk → embed → store.
    /// The document is queryable once this returns.
    pub async fn ingest(
        &self,
        bytes: &[u8],
        declared_type: &str,
    ) -> Result<IngestReceipt, PipelineError> {
        let file_type = ensure_supported(declared_type, &self.options.supported_types)?;
        let prepared = prepare_document(bytes, file_type, self.extractor.as_ref(), &self.splitter)?;

        if prepared.chunks.is_empty() {
            warn!(document_id = %prepared.document_id, "document produced no text to index");
        }

        let chunk_count = self
            .index
            .insert(&prepared.chunks, &prepared.metadatas())
            .await?;

        info!(
            document_id = %prepared.document_id,
            file_type = %file_type,
            chunk_count,
            bytes = bytes.len(),
            "document ingested"
        );

        Ok(IngestReceipt {
            document_id: prepared.document_id,
            file_type,
            chunk_count,
        })
    }

    pub async fn compare(
        &self,
        document1_id: &str,
        document2_id: &str,
        query: Option<&str>,
    ) -> Result<ComparisonResult, PipelineError> {
        let document1_id = document1_id.trim();
        let document2_id = document2_id.trim();
        if document1_id.is_empty() || document2_id.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "both document ids are required".to_string(),
            ));
        }
        if document1_id == document2_id {
            return Err(PipelineError::InvalidArgument(format!(
                "cannot compare document {document1_id} with itself"
            )));
        }

        for document_id in [document1_id, document2_id] {
            if !self.index.contains_document(document_id).await? {
                return Err(PipelineError::UnknownDocument(document_id.to_string()));
            }
        }

        let query_text = effective_query(query);
        let retrieved = self
            .retriever
            .retrieve(query_text, [document1_id, document2_id], self.options.top_k)
            .await?;

        let result = self.comparator.compare(retrieved, Some(query_text)).await?;
        info!(
            document1_id,
            document2_id,
            document1_chunks = result.document1.chunks.len(),
            document2_chunks = result.document2.chunks.len(),
            "comparison complete"
        );
        Ok(result)
    }
}
