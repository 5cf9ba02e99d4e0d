use crate::error::{GenerationError, PipelineError};
use crate::llm::ChatModel;
use crate::models::{ComparisonResult, RetrievedChunks};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

pub const DEFAULT_COMPARISON_QUERY: &str =
    "Compare the main ideas, similarities, and differences between the documents.";

/// Absent or blank queries fall back to [`DEFAULT_COMPARISON_QUERY`].
pub fn effective_query(query: Option<&str>) -> &str {
    match query.map(str::trim) {
        Some(query) if !query.is_empty() => query,
        _ => DEFAULT_COMPARISON_QUERY,
    }
}

/// Builds the grounding prompt. Chunk texts are joined with a single newline.
pub fn build_prompt(
    document1_chunks: &[String],
    document2_chunks: &[String],
    query: &str,
) -> String {
    let document1_content = document1_chunks.join("\n");
    let document2_content = document2_chunks.join("\n");

    format!(
        "Compare the following excerpts from two documents:\n\
         \n\
         Document 1:\n\
         {document1_content}\n\
         \n\
         Document 2:\n\
         {document2_content}\n\
         \n\
         Focus: {query}\n\
         \n\
         Please provide a detailed comparison focusing on:\n\
         1. Key similarities\n\
         2. Major differences\n\
         3. Unique points in each document\n\
         4. Overall relationship between the content\n\
         \n\
         Comparison:"
    )
}

/// Turns retrieved excerpts into a narrative with exactly one model call.
pub struct Comparator {
    model: Arc<dyn ChatModel>,
    call_timeout: Duration,
}

impl Comparator {
    pub fn new(model: Arc<dyn ChatModel>, call_timeout: Duration) -> Self {
        Self {
            model,
            call_timeout,
        }
    }

    pub async fn compare(
        &self,
        retrieved: RetrievedChunks,
        query: Option<&str>,
    ) -> Result<ComparisonResult, PipelineError> {
        let query = effective_query(query);
        let prompt = build_prompt(
            &retrieved.document1.chunks,
            &retrieved.document2.chunks,
            query,
        );

        debug!(
            model = self.model.name(),
            prompt_chars = prompt.chars().count(),
            "requesting comparison"
        );

        let narrative = match timeout(self.call_timeout, self.model.complete(&prompt)).await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    model = self.model.name(),
                    timeout = ?self.call_timeout,
                    "comparison timed out"
                );
                return Err(GenerationError::Timeout(self.call_timeout).into());
            }
        };

        Ok(ComparisonResult {
            narrative,
            document1: retrieved.document1,
            document2: retrieved.document2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentExcerpts;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(prompt.to_string());
            }
            Ok("narrative".to_string())
        }
    }

    struct SilentModel;

    #[async_trait]
    impl ChatModel for SilentModel {
        fn name(&self) -> &str {
            "silent"
        }

        async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn retrieved() -> RetrievedChunks {
        RetrievedChunks {
            document1: DocumentExcerpts {
                document_id: "a".to_string(),
                chunks: vec!["first".to_string(), "second".to_string()],
            },
            document2: DocumentExcerpts {
                document_id: "b".to_string(),
                chunks: vec!["other".to_string()],
            },
        }
    }

    #[test]
    fn blank_query_uses_default() {
        assert_eq!(effective_query(None), DEFAULT_COMPARISON_QUERY);
        assert_eq!(effective_query(Some("   ")), DEFAULT_COMPARISON_QUERY);
        assert_eq!(effective_query(Some(" color ")), "color");
    }

    #[test]
    fn prompt_joins_chunks_with_newlines() {
        let prompt = build_prompt(
            &["first".to_string(), "second".to_string()],
            &[],
            "color",
        );
        assert!(prompt.contains("Document 1:\nfirst\nsecond\n"));
        assert!(prompt.contains("Document 2:\n\n"));
        assert!(prompt.contains("Focus: color"));
        assert!(prompt.contains("4. Overall relationship between the content"));
        assert!(prompt.ends_with("Comparison:"));
    }

    #[tokio::test]
    async fn compare_sends_one_prompt_and_keeps_excerpts() -> Result<(), PipelineError> {
        let model = Arc::new(RecordingModel::default());
        let comparator = Comparator::new(model.clone(), Duration::from_secs(5));

        let result = comparator.compare(retrieved(), None).await?;
        assert_eq!(result.narrative, "narrative");
        assert_eq!(result.document1.chunks, vec!["first", "second"]);
        assert_eq!(result.document2.document_id, "b");

        let prompts = model.prompts.lock().map(|prompts| prompts.clone()).unwrap_or_default();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains(DEFAULT_COMPARISON_QUERY));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_is_reported_as_generation_timeout() {
        let comparator = Comparator::new(Arc::new(SilentModel), Duration::from_secs(1));
        let result = comparator.compare(retrieved(), Some("color")).await;
        assert!(matches!(
            result,
            Err(PipelineError::GenerationFailure(GenerationError::Timeout(_)))
        ));
    }
}
