use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Txt,
    Pdf,
    Docx,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Txt, FileType::Pdf, FileType::Docx];

    pub fn extension(self) -> &'static str {
        match self {
            FileType::Txt => "txt",
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
        }
    }

    /// Resolves the declared type from a file name's extension.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!(
                    "no file extension on {}",
                    path.display()
                ))
            })?;
        extension.parse()
    }
}

impl FromStr for FileType {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lowered = value.trim().trim_start_matches('.').to_ascii_lowercase();
        FileType::ALL
            .into_iter()
            .find(|file_type| file_type.extension() == lowered)
            .ok_or_else(|| PipelineError::UnsupportedFormat(value.trim().to_string()))
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Metadata owned by every stored chunk. Used for filtering only, never for ranking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChunkMetadata {
    pub document_id: String,
    pub chunk_index: u64,
}

impl ChunkMetadata {
    pub fn new(document_id: impl Into<String>, chunk_index: u64) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_index,
        }
    }

    /// Stable point id, so re-ingesting the same document overwrites its points.
    /// Version 8 (custom): the bytes are a SHA-256 prefix, not random.
    pub fn point_id(&self) -> Uuid {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.document_id.as_bytes());
        hasher.update(self.chunk_index.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::new_v8(bytes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredChunk {
    pub point_id: Uuid,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// Exact-match predicate over `document_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DocumentFilter {
    document_ids: BTreeSet<String>,
}

impl DocumentFilter {
    pub fn any_of<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            document_ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        self.document_ids.contains(&metadata.document_id)
    }

    pub fn document_ids(&self) -> impl Iterator<Item = &str> {
        self.document_ids.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty()
    }
}

/// How the top-k budget is spent across the two compared documents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalStrategy {
    /// One search over both documents; one side may receive no chunks at all.
    #[default]
    Global,
    /// One search per document, each with the full k.
    PerDocument,
}

impl FromStr for RetrievalStrategy {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(RetrievalStrategy::Global),
            "per-document" | "per_document" => Ok(RetrievalStrategy::PerDocument),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown retrieval strategy: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentExcerpts {
    pub document_id: String,
    pub chunks: Vec<String>,
}

impl DocumentExcerpts {
    pub fn empty(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            chunks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievedChunks {
    pub document1: DocumentExcerpts,
    pub document2: DocumentExcerpts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComparisonResult {
    pub narrative: String,
    pub document1: DocumentExcerpts,
    pub document2: DocumentExcerpts,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReceipt {
    pub document_id: String,
    pub file_type: FileType,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub supported_types: Vec<FileType>,
    pub retrieval_strategy: RetrievalStrategy,
    /// Upper bound for every embedding and language-model call.
    pub request_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1_000,
            chunk_overlap: 200,
            top_k: 5,
            supported_types: FileType::ALL.to_vec(),
            retrieval_strategy: RetrievalStrategy::Global,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(PipelineError::InvalidConfig(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if self.supported_types.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one supported file type is required".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "request_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_type_parsing_is_case_insensitive() {
        assert_eq!("PDF".parse::<FileType>().ok(), Some(FileType::Pdf));
        assert_eq!(".docx".parse::<FileType>().ok(), Some(FileType::Docx));
        assert!(matches!(
            "exe".parse::<FileType>(),
            Err(PipelineError::UnsupportedFormat(value)) if value == "exe"
        ));
    }

    #[test]
    fn file_type_from_path_uses_extension() {
        assert_eq!(
            FileType::from_path(Path::new("/tmp/notes.TXT")).ok(),
            Some(FileType::Txt)
        );
        assert!(FileType::from_path(Path::new("/tmp/README")).is_err());
    }

    #[test]
    fn point_ids_are_stable_per_document_and_index() {
        let first = ChunkMetadata::new("doc-a", 0);
        assert_eq!(first.point_id(), ChunkMetadata::new("doc-a", 0).point_id());
        assert_ne!(first.point_id(), ChunkMetadata::new("doc-a", 1).point_id());
        assert_ne!(first.point_id(), ChunkMetadata::new("doc-b", 0).point_id());
        assert_eq!(first.point_id().get_version_num(), 8);
    }

    #[test]
    fn filter_matches_only_listed_documents() {
        let filter = DocumentFilter::any_of(["a", "b"]);
        assert!(filter.matches(&ChunkMetadata::new("a", 3)));
        assert!(filter.matches(&ChunkMetadata::new("b", 0)));
        assert!(!filter.matches(&ChunkMetadata::new("c", 0)));
    }

    #[test]
    fn options_reject_overlap_not_below_size() {
        let options = PipelineOptions {
            chunk_size: 100,
            chunk_overlap: 100,
            ..PipelineOptions::default()
        };
        assert!(matches!(options.validate(), Err(PipelineError::InvalidConfig(_))));
        assert!(PipelineOptions::default().validate().is_ok());
    }

    #[test]
    fn strategy_parses_both_spellings() {
        assert_eq!(
            "per-document".parse::<RetrievalStrategy>().ok(),
            Some(RetrievalStrategy::PerDocument)
        );
        assert_eq!(
            "Global".parse::<RetrievalStrategy>().ok(),
            Some(RetrievalStrategy::Global)
        );
    }
}
