mod server;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use doc_compare_core::provider::OPENAI_BASE_URL;
use doc_compare_core::{
    ApiTarget, CharacterNgramEmbedder, ChatModel, ComparisonService, Embedder, FileType,
    GenerationError, LocalVectorStore, OpenAiChatModel, OpenAiEmbedder, PipelineOptions,
    QdrantStore, RetrievalStrategy, VectorIndex, AZURE_CHAT_API_VERSION,
    AZURE_EMBEDDINGS_API_VERSION,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "doc-compare",
    version,
    about = "Compare two documents with retrieval-augmented generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Vector store backend
    #[arg(
        long,
        env = "DOC_COMPARE_STORE",
        value_enum,
        default_value_t = StoreKind::Local,
        global = true
    )]
    store: StoreKind,

    /// Snapshot file of the local vector store
    #[arg(long, env = "DOC_COMPARE_INDEX_PATH", default_value = "data/index.json", global = true)]
    index_path: PathBuf,

    /// Qdrant base URL
    #[arg(long, env = "QDRANT_URL", default_value = "http://localhost:6333", global = true)]
    qdrant_url: String,

    /// Qdrant collection
    #[arg(long, env = "QDRANT_COLLECTION", default_value = "document_chunks", global = true)]
    qdrant_collection: String,

    /// Embedding provider
    #[arg(
        long,
        env = "DOC_COMPARE_EMBEDDER",
        value_enum,
        default_value_t = ProviderKind::Ngram,
        global = true
    )]
    embedder: ProviderKind,

    /// Embedding model (OpenAI)
    #[arg(
        long,
        env = "OPENAI_EMBEDDING_MODEL",
        default_value = "text-embedding-3-small",
        global = true
    )]
    embedding_model: String,

    /// Requested embedding dimensions; the provider default is used when unset
    #[arg(long, env = "DOC_COMPARE_EMBEDDING_DIMENSIONS", global = true)]
    embedding_dimensions: Option<usize>,

    /// Chat provider
    #[arg(
        long,
        env = "DOC_COMPARE_CHAT_PROVIDER",
        value_enum,
        default_value_t = ChatProvider::Openai,
        global = true
    )]
    chat_provider: ChatProvider,

    /// Chat model (OpenAI)
    #[arg(long, env = "OPENAI_CHAT_MODEL", default_value = "gpt-4o-mini", global = true)]
    chat_model: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = OPENAI_BASE_URL, global = true)]
    openai_base_url: String,

    #[arg(long, env = "AZURE_OPENAI_ENDPOINT", global = true)]
    azure_endpoint: Option<String>,

    /// Separate Azure resource for embeddings; falls back to --azure-endpoint
    #[arg(long, env = "AZURE_OPENAI_ENDPOINT_EMBEDDINGS", global = true)]
    azure_embeddings_endpoint: Option<String>,

    #[arg(long, env = "AZURE_OPENAI_API_KEY", hide_env_values = true, global = true)]
    azure_api_key: Option<String>,

    #[arg(long, env = "AZURE_DEPLOYMENT_NAME", global = true)]
    azure_chat_deployment: Option<String>,

    #[arg(long, env = "AZURE_EMBEDDINGS_DEPLOYMENT_NAME", global = true)]
    azure_embeddings_deployment: Option<String>,

    #[arg(
        long,
        env = "AZURE_CHAT_API_VERSION",
        default_value = AZURE_CHAT_API_VERSION,
        global = true
    )]
    azure_chat_api_version: String,

    #[arg(
        long,
        env = "AZURE_EMBEDDINGS_API_VERSION",
        default_value = AZURE_EMBEDDINGS_API_VERSION,
        global = true
    )]
    azure_embeddings_api_version: String,

    /// Maximum chunk length in characters
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1000, global = true)]
    chunk_size: usize,

    /// Characters shared between adjacent chunks
    #[arg(long, env = "CHUNK_OVERLAP", default_value_t = 200, global = true)]
    chunk_overlap: usize,

    /// Chunks retrieved per comparison
    #[arg(long, env = "TOP_K", default_value_t = 5, global = true)]
    top_k: usize,

    /// `global` shares top-k across both documents, `per-document` gives each its own
    #[arg(long, env = "DOC_COMPARE_RETRIEVAL", default_value = "global", global = true)]
    retrieval: RetrievalStrategy,

    /// Timeout in seconds for every embedding and chat call
    #[arg(long, env = "DOC_COMPARE_TIMEOUT_SECS", default_value_t = 60, global = true)]
    timeout_secs: u64,

    /// Accepted file types
    #[arg(
        long,
        env = "SUPPORTED_FILES",
        value_delimiter = ',',
        default_value = "txt,pdf,docx",
        global = true
    )]
    supported_types: Vec<FileType>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest one document and print its id.
    Ingest {
        #[arg(long)]
        file: PathBuf,
        /// Declared type; taken from the file extension when omitted.
        #[arg(long)]
        file_type: Option<String>,
    },
    /// Compare two ingested documents.
    Compare {
        #[arg(long)]
        doc1: String,
        #[arg(long)]
        doc2: String,
        /// Focus of the comparison.
        #[arg(long)]
        query: Option<String>,
        /// Print the full result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Serve the upload and compare endpoints over HTTP.
    Serve {
        #[arg(long, env = "DOC_COMPARE_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
        /// Largest accepted upload request body, in bytes
        #[arg(
            long,
            env = "DOC_COMPARE_MAX_UPLOAD_BYTES",
            default_value_t = server::DEFAULT_MAX_UPLOAD_BYTES
        )]
        max_upload_bytes: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    Local,
    Qdrant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ProviderKind {
    Ngram,
    Openai,
    Azure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ChatProvider {
    Openai,
    Azure,
}

impl Cli {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            supported_types: self.supported_types.clone(),
            retrieval_strategy: self.retrieval,
            request_timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn azure_api_key(&self) -> anyhow::Result<&str> {
        self.azure_api_key
            .as_deref()
            .context("AZURE_OPENAI_API_KEY is required for the azure provider")
    }

    fn openai_api_key(&self) -> anyhow::Result<&str> {
        self.openai_api_key
            .as_deref()
            .context("OPENAI_API_KEY is required for the openai provider")
    }

    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        let target = match self.embedder {
            ProviderKind::Ngram => {
                let embedder = match self.embedding_dimensions {
                    Some(dimensions) => CharacterNgramEmbedder { dimensions },
                    None => CharacterNgramEmbedder::default(),
                };
                return Ok(Arc::new(embedder));
            }
            ProviderKind::Openai => {
                ApiTarget::openai(self.openai_api_key()?, &self.embedding_model)
                    .with_base_url(&self.openai_base_url)
            }
            ProviderKind::Azure => {
                let endpoint = self
                    .azure_embeddings_endpoint
                    .as_deref()
                    .or(self.azure_endpoint.as_deref())
                    .context(
                        "AZURE_OPENAI_ENDPOINT_EMBEDDINGS or AZURE_OPENAI_ENDPOINT is required",
                    )?;
                let deployment = self
                    .azure_embeddings_deployment
                    .as_deref()
                    .context("AZURE_EMBEDDINGS_DEPLOYMENT_NAME is required")?;
                ApiTarget::azure(
                    endpoint,
                    self.azure_api_key()?,
                    deployment,
                    &self.azure_embeddings_api_version,
                )
            }
        };

        let mut embedder = OpenAiEmbedder::new(target, self.timeout())?;
        if let Some(dimensions) = self.embedding_dimensions {
            embedder = embedder.with_dimensions(dimensions);
        }
        Ok(Arc::new(embedder))
    }

    fn chat_target(&self) -> anyhow::Result<ApiTarget> {
        match self.chat_provider {
            ChatProvider::Openai => Ok(ApiTarget::openai(self.openai_api_key()?, &self.chat_model)
                .with_base_url(&self.openai_base_url)),
            ChatProvider::Azure => {
                let endpoint = self
                    .azure_endpoint
                    .as_deref()
                    .context("AZURE_OPENAI_ENDPOINT is required")?;
                let deployment = self
                    .azure_chat_deployment
                    .as_deref()
                    .context("AZURE_DEPLOYMENT_NAME is required")?;
                Ok(ApiTarget::azure(
                    endpoint,
                    self.azure_api_key()?,
                    deployment,
                    &self.azure_chat_api_version,
                ))
            }
        }
    }

    /// Ingestion never calls the chat model, so a missing chat configuration only
    /// fails once a comparison is requested.
    fn chat_model(&self, required: bool) -> anyhow::Result<Arc<dyn ChatModel>> {
        match self.chat_target() {
            Ok(target) => Ok(Arc::new(OpenAiChatModel::new(target, self.timeout())?)),
            Err(error) if !required => {
                warn!(error = %error, "chat model not configured");
                Ok(Arc::new(UnconfiguredChatModel {
                    reason: error.to_string(),
                }))
            }
            Err(error) => Err(error),
        }
    }

    async fn vector_store(&self, dimensions: usize) -> anyhow::Result<Arc<dyn VectorIndex>> {
        match self.store {
            StoreKind::Local => {
                let store = LocalVectorStore::open(&self.index_path)
                    .await
                    .with_context(|| format!("opening {}", self.index_path.display()))?;
                if let Some(stored) = store.dimensions().await? {
                    if stored != dimensions {
                        return Err(anyhow!(
                            "{} holds {stored}-d vectors but the embedder produces {dimensions}-d",
                            self.index_path.display()
                        ));
                    }
                }
                Ok(Arc::new(store))
            }
            StoreKind::Qdrant => {
                let store =
                    QdrantStore::new(&self.qdrant_url, &self.qdrant_collection, dimensions)?;
                store.ensure_collection().await.with_context(|| {
                    format!("preparing qdrant collection {}", self.qdrant_collection)
                })?;
                Ok(Arc::new(store))
            }
        }
    }

    async fn service(&self, chat_required: bool) -> anyhow::Result<ComparisonService> {
        let embedder = self.embedder()?;
        let store = self.vector_store(embedder.dimensions()).await?;
        let model = self.chat_model(chat_required)?;

        info!(
            store = store.backend(),
            embedder = embedder.name(),
            dimensions = embedder.dimensions(),
            chat = model.name(),
            "pipeline ready"
        );

        Ok(ComparisonService::new(
            self.pipeline_options(),
            embedder,
            store,
            model,
        )?)
    }
}

struct UnconfiguredChatModel {
    reason: String,
}

#[async_trait]
impl ChatModel for UnconfiguredChatModel {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn complete(&self, _prompt: &str) -> Result<String, GenerationError> {
        Err(GenerationError::Backend {
            backend: "unconfigured".to_string(),
            status: 0,
            details: self.reason.clone(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-compare boot"
    );

    match &cli.command {
        Command::Ingest { file, file_type } => {
            let declared = match file_type {
                Some(file_type) => file_type.clone(),
                None => file
                    .extension()
                    .and_then(|extension| extension.to_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        anyhow!("{} has no extension; pass --file-type", file.display())
                    })?,
            };
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;

            let service = cli.service(false).await?;
            let receipt = service.ingest(&bytes, &declared).await?;

            info!(path = %file.display(), chunks = receipt.chunk_count, "ingest finished");
            println!("{}", receipt.document_id);
        }
        Command::Compare {
            doc1,
            doc2,
            query,
            json,
        } => {
            let service = cli.service(true).await?;
            let result = service.compare(doc1, doc2, query.as_deref()).await?;

            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.narrative);
                println!();
                let documents = [
                    ("document 1", &result.document1),
                    ("document 2", &result.document2),
                ];
                for (label, excerpts) in documents {
                    println!(
                        "{label} ({}): {} chunk(s)",
                        excerpts.document_id,
                        excerpts.chunks.len()
                    );
                    for chunk in &excerpts.chunks {
                        println!("  - {chunk}");
                    }
                }
            }
        }
        Command::Serve {
            bind,
            max_upload_bytes,
        } => {
            let service = Arc::new(cli.service(true).await?);
            server::serve(service, *bind, *max_upload_bytes).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{CommandFactory, FromArgMatches};
    use doc_compare_core::{ChunkMetadata, StoredChunk};

    /// Parses as if no configuration variables were set in the environment.
    fn parse_without_env(args: &[&str]) -> Result<Cli, clap::Error> {
        let matches = Cli::command()
            .mut_args(|arg| arg.env(None::<&'static str>))
            .mut_subcommands(|sub| sub.mut_args(|arg| arg.env(None::<&'static str>)))
            .try_get_matches_from(args)?;
        Cli::from_arg_matches(&matches)
    }

    #[test]
    fn defaults_match_pipeline_defaults() -> Result<(), clap::Error> {
        let cli = parse_without_env(&["doc-compare", "compare", "--doc1", "a", "--doc2", "b"])?;
        assert_eq!(cli.pipeline_options(), PipelineOptions::default());
        assert_eq!(cli.store, StoreKind::Local);
        assert_eq!(cli.embedder, ProviderKind::Ngram);
        Ok(())
    }

    #[test]
    fn global_flags_parse_after_subcommand() -> Result<(), clap::Error> {
        let cli = parse_without_env(&[
            "doc-compare",
            "ingest",
            "--file",
            "notes.txt",
            "--retrieval",
            "per-document",
            "--supported-types",
            "txt,pdf",
        ])?;
        assert_eq!(cli.retrieval, RetrievalStrategy::PerDocument);
        assert_eq!(cli.supported_types, vec![FileType::Txt, FileType::Pdf]);
        Ok(())
    }

    #[test]
    fn upload_limit_defaults_and_overrides() -> Result<(), clap::Error> {
        let cli = parse_without_env(&["doc-compare", "serve"])?;
        assert!(matches!(
            cli.command,
            Command::Serve { max_upload_bytes, .. }
                if max_upload_bytes == server::DEFAULT_MAX_UPLOAD_BYTES
        ));

        let cli = parse_without_env(&["doc-compare", "serve", "--max-upload-bytes", "4096"])?;
        assert!(matches!(
            cli.command,
            Command::Serve {
                max_upload_bytes: 4096,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn missing_key_is_reported_only_when_chat_is_required() -> Result<(), clap::Error> {
        let cli = parse_without_env(&["doc-compare", "serve"])?;
        assert!(cli.openai_api_key.is_none());
        assert!(cli.chat_model(true).is_err());
        assert!(cli.chat_model(false).is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn snapshot_of_another_dimension_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let index_path = dir.path().join("index.json");
        let metadata = ChunkMetadata::new("doc", 0);
        let chunk = StoredChunk {
            point_id: metadata.point_id(),
            text: "three dimensions".to_string(),
            embedding: vec![1.0, 0.0, 0.0],
            metadata,
        };
        LocalVectorStore::open(&index_path)
            .await?
            .upsert(&[chunk])
            .await?;

        let path = index_path.to_string_lossy().to_string();
        let args = ["doc-compare", "serve", "--index-path", path.as_str()];
        let cli = parse_without_env(&args)?;

        let error = match cli.vector_store(8).await {
            Ok(_) => return Err("a 3-d snapshot was opened for an 8-d embedder".into()),
            Err(error) => error,
        };
        assert!(error.to_string().contains("3-d"));
        assert!(cli.vector_store(3).await.is_ok());
        Ok(())
    }
}
