use crate::error::IndexError;
use crate::models::{ChunkMetadata, DocumentFilter, SearchHit, StoredChunk};
use crate::traits::VectorIndex;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "qdrant";

pub struct QdrantStore {
    endpoint: String,
    collection: String,
    client: Client,
    vector_size: usize,
}

impl QdrantStore {
    pub fn new(
        endpoint: impl Into<String>,
        collection: impl Into<String>,
        vector_size: usize,
    ) -> Result<Self, IndexError> {
        let endpoint = endpoint.into();
        Url::parse(&endpoint)?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            collection: collection.into(),
            client: Client::new(),
            vector_size,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{suffix}", self.endpoint, self.collection)
    }

    /// Creates the collection (cosine distance) and the `document_id` payload index
    /// when missing; fails when an existing collection has a different vector size.
    pub async fn ensure_collection(&self) -> Result<(), IndexError> {
        let response = self.client.get(self.collection_url("")).send().await?;

        if response.status() == StatusCode::OK {
            let info: Value = response.json().await?;
            let existing = info
                .pointer("/result/config/params/vectors/size")
                .and_then(Value::as_u64);
            return match existing {
                Some(size) if size as usize != self.vector_size => Err(IndexError::Request(
                    format!(
                        "collection {} has vector size {size}, embedder produces {}",
                        self.collection, self.vector_size
                    ),
                )),
                _ => Ok(()),
            };
        }

        if response.status() != StatusCode::NOT_FOUND {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url(""))
            .json(&json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let response = self
            .client
            .put(self.collection_url("/index?wait=true"))
            .json(&json!({ "field_name": "document_id", "field_schema": "keyword" }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        debug!(collection = %self.collection, size = self.vector_size, "created qdrant collection");
        Ok(())
    }
}

fn backend_error(status: StatusCode) -> IndexError {
    IndexError::BackendResponse {
        backend: BACKEND.to_string(),
        details: status.to_string(),
    }
}

fn filter_json(filter: &DocumentFilter) -> Value {
    json!({
        "must": [{
            "key": "document_id",
            "match": { "any": filter.document_ids().collect::<Vec<_>>() }
        }]
    })
}

fn parse_hits(parsed: &Value, filter: &DocumentFilter) -> Vec<SearchHit> {
    let hits = parsed
        .pointer("/result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut result = Vec::new();
    for hit in hits {
        let document_id = hit
            .pointer("/payload/document_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let chunk_index = hit
            .pointer("/payload/chunk_index")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let score = hit.pointer("/score").and_then(Value::as_f64).unwrap_or(0.0);
        let text = hit
            .pointer("/payload/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let metadata = ChunkMetadata::new(document_id, chunk_index);
        if !filter.matches(&metadata) {
            warn!(document_id = %metadata.document_id, "dropping qdrant hit outside filter");
            continue;
        }

        result.push(SearchHit {
            text,
            metadata,
            score,
        });
    }

    result
}

#[async_trait]
impl VectorIndex for QdrantStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn upsert(&self, points: &[StoredChunk]) -> Result<(), IndexError> {
        let points = points
            .iter()
            .map(|point| {
                if point.embedding.len() != self.vector_size {
                    return Err(IndexError::Request(format!(
                        "embedding dimension {} != {}",
                        point.embedding.len(),
                        self.vector_size
                    )));
                }

                Ok(json!({
                    "id": point.point_id.to_string(),
                    "vector": point.embedding,
                    "payload": {
                        "document_id": point.metadata.document_id,
                        "chunk_index": point.metadata.chunk_index,
                        "text": point.text,
                    },
                }))
            })
            .collect::<Result<Vec<_>, IndexError>>()?;

        if points.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&json!({ "points": points }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        Ok(())
    }

    async fn search(
        &self,
        query_vector: &[f32],
        filter: &DocumentFilter,
        k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query_vector.len() != self.vector_size {
            return Err(IndexError::Request(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.vector_size
            )));
        }
        if filter.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&json!({
                "vector": query_vector,
                "limit": k,
                "with_payload": true,
                "filter": filter_json(filter),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(parse_hits(&parsed, filter))
    }

    async fn count(&self, filter: &DocumentFilter) -> Result<usize, IndexError> {
        if filter.is_empty() {
            return Ok(0);
        }

        let response = self
            .client
            .post(self.collection_url("/points/count"))
            .json(&json!({ "filter": filter_json(filter), "exact": true }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(backend_error(response.status()));
        }

        let parsed: Value = response.json().await?;
        parsed
            .pointer("/result/count")
            .and_then(Value::as_u64)
            .map(|count| count as usize)
            .ok_or_else(|| IndexError::BackendResponse {
                backend: BACKEND.to_string(),
                details: "count response without result.count".to_string(),
            })
    }
}
