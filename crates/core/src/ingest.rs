use crate::chunking::{normalize_text, TextSplitter};
use crate::error::PipelineError;
use crate::extractor::TextExtractor;
use crate::models::{ChunkMetadata, FileType};
use sha2::{Digest, Sha256};

/// Content-addressed document id: hex SHA-256 of the raw bytes.
///
/// Borrowing the bytes leaves them intact for extraction afterwards.
pub fn identify(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A document that went through extract → normalize → chunk and is ready to be indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDocument {
    pub document_id: String,
    pub file_type: FileType,
    pub chunks: Vec<String>,
}

impl PreparedDocument {
    pub fn metadatas(&self) -> Vec<ChunkMetadata> {
        (0..self.chunks.len() as u64)
            .map(|index| ChunkMetadata::new(self.document_id.clone(), index))
            .collect()
    }
}

pub fn prepare_document(
    bytes: &[u8],
    file_type: FileType,
    extractor: &dyn TextExtractor,
    splitter: &TextSplitter,
) -> Result<PreparedDocument, PipelineError> {
    let document_id = identify(bytes);
    let text = extractor.extract(bytes, file_type)?;
    let normalized = normalize_text(&text);
    let chunks = splitter.split(&normalized);

    Ok(PreparedDocument {
        document_id,
        file_type,
        chunks,
    })
}
