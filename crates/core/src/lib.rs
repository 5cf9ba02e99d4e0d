pub mod chunking;
pub mod comparator;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod retriever;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_text, normalize_whitespace, TextSplitter};
pub use comparator::{build_prompt, effective_query, Comparator, DEFAULT_COMPARISON_QUERY};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OpenAiEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
    DEFAULT_OPENAI_DIMENSIONS,
};
pub use error::{EmbeddingError, GenerationError, IndexError, PipelineError};
pub use extractor::{ensure_supported, extract_text, StandardExtractor, TextExtractor};
pub use index::DocumentIndex;
pub use ingest::{identify, prepare_document, PreparedDocument};
pub use llm::{ChatModel, OpenAiChatModel};
pub use models::{
    ChunkMetadata, ComparisonResult, DocumentExcerpts, DocumentFilter, FileType, IngestReceipt,
    PipelineOptions, RetrievalStrategy, RetrievedChunks, SearchHit, StoredChunk,
};
pub use orchestrator::ComparisonService;
pub use provider::{ApiTarget, AZURE_CHAT_API_VERSION, AZURE_EMBEDDINGS_API_VERSION};
pub use retriever::{partition_hits, Retriever};
pub use stores::{LocalVectorStore, QdrantStore};
pub use traits::VectorIndex;
