use async_trait::async_trait;
use doc_compare_core::{
    identify, normalize_text, CharacterNgramEmbedder, ChatModel, ComparisonService, DocumentFilter,
    Embedder, EmbeddingError, GenerationError, LocalVectorStore, PipelineError, PipelineOptions,
    TextSplitter, VectorIndex, DEFAULT_COMPARISON_QUERY,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct CountingEmbedder {
    inner: CharacterNgramEmbedder,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_batch(texts).await
    }
}

/// Answers with the prompt it was given so tests can inspect what the model saw.
#[derive(Default)]
struct EchoModel {
    prompts: Mutex<Vec<String>>,
}

impl EchoModel {
    fn last_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .ok()
            .and_then(|prompts| prompts.last().cloned())
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        Ok(prompt.to_string())
    }
}

struct Fixture {
    service: ComparisonService,
    embedder: Arc<CountingEmbedder>,
    store: Arc<LocalVectorStore>,
    model: Arc<EchoModel>,
}

fn fixture(options: PipelineOptions) -> Result<Fixture, PipelineError> {
    let embedder = Arc::new(CountingEmbedder::default());
    let store = Arc::new(LocalVectorStore::in_memory());
    let model = Arc::new(EchoModel::default());
    let service = ComparisonService::new(options, embedder.clone(), store.clone(), model.clone())?;
    Ok(Fixture {
        service,
        embedder,
        store,
        model,
    })
}

#[test]
fn identity_is_deterministic() {
    let bytes = b"The same bytes twice";
    assert_eq!(identify(bytes), identify(bytes));
}

#[test]
fn normalization_accepts_any_input() {
    assert_eq!(normalize_text(""), "");
    assert_eq!(normalize_text("  tabs\t\tand\n\nnewlines!  "), "tabs and newlines!");
    assert_eq!(normalize_text("a@b#c \u{1F600}"), "abc ");
}

#[tokio::test]
async fn reingesting_identical_bytes_is_idempotent() -> Result<(), PipelineError> {
    let fixture = fixture(PipelineOptions::default())?;
    let bytes = b"Apples are red fruits.";

    let first = fixture.service.ingest(bytes, "txt").await?;
    let second = fixture.service.ingest(bytes, "txt").await?;

    assert_eq!(first.document_id, second.document_id);
    assert_eq!(fixture.store.len().await, first.chunk_count);
    Ok(())
}

#[tokio::test]
async fn small_chunks_are_bounded_and_overlap() -> Result<(), PipelineError> {
    let options = PipelineOptions {
        chunk_size: 20,
        chunk_overlap: 5,
        ..PipelineOptions::default()
    };
    let fixture = fixture(options)?;
    let text = "The cat sat on the mat. The dog ran in the park.";

    let receipt = fixture.service.ingest(text.as_bytes(), "txt").await?;
    let chunks = TextSplitter::new(20, 5)?.split(&normalize_text(text));

    assert!(chunks.len() >= 2);
    assert_eq!(receipt.chunk_count, chunks.len());
    assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 20));
    assert!(chunks[0].ends_with("the"));
    assert!(chunks[1].starts_with("the"));

    let stored = fixture
        .store
        .count(&DocumentFilter::any_of([receipt.document_id.as_str()]))
        .await?;
    assert_eq!(stored, chunks.len());
    Ok(())
}

#[tokio::test]
async fn two_documents_are_compared_on_a_query() -> Result<(), PipelineError> {
    let fixture = fixture(PipelineOptions::default())?;
    let apples = fixture.service.ingest(b"Apples are red fruits.", "txt").await?;
    let bananas = fixture
        .service
        .ingest(b"Bananas are yellow fruits.", "txt")
        .await?;

    let result = fixture
        .service
        .compare(&apples.document_id, &bananas.document_id, Some("color"))
        .await?;

    assert_eq!(result.document1.chunks, vec!["Apples are red fruits."]);
    assert_eq!(result.document2.chunks, vec!["Bananas are yellow fruits."]);
    assert!(result.narrative.contains("red"));
    assert!(result.narrative.contains("yellow"));
    Ok(())
}

#[tokio::test]
async fn unsupported_type_never_reaches_the_embedder() -> Result<(), PipelineError> {
    let fixture = fixture(PipelineOptions::default())?;

    let result = fixture.service.ingest(b"MZ\x90\x00", "exe").await;

    assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
    assert_eq!(fixture.embedder.calls.load(Ordering::SeqCst), 0);
    assert!(fixture.store.is_empty().await);
    Ok(())
}

#[tokio::test]
async fn missing_query_uses_default_text_in_prompt() -> Result<(), PipelineError> {
    let fixture = fixture(PipelineOptions::default())?;
    let first = fixture.service.ingest(b"Apples are red fruits.", "txt").await?;
    let second = fixture
        .service
        .ingest(b"Bananas are yellow fruits.", "txt")
        .await?;

    fixture
        .service
        .compare(&first.document_id, &second.document_id, None)
        .await?;

    let prompt = fixture.model.last_prompt().unwrap_or_default();
    assert!(prompt.contains(DEFAULT_COMPARISON_QUERY));
    Ok(())
}

#[tokio::test]
async fn search_filter_excludes_other_documents() -> Result<(), PipelineError> {
    let fixture = fixture(PipelineOptions::default())?;
    let a = fixture.service.ingest(b"Apples are red fruits.", "txt").await?;
    let b = fixture
        .service
        .ingest(b"Bananas are yellow fruits.", "txt")
        .await?;
    let c = fixture
        .service
        .ingest(b"Apples are red fruits, and cherries are red too.", "txt")
        .await?;

    let hits = fixture
        .service
        .index()
        .search(
            "red apples",
            &DocumentFilter::any_of([a.document_id.as_str(), b.document_id.as_str()]),
            10,
        )
        .await?;

    assert_eq!(hits.len(), 2);
    assert!(hits
        .iter()
        .all(|hit| hit.metadata.document_id != c.document_id));
    Ok(())
}
