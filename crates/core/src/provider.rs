//! Endpoint description for OpenAI-compatible services.
//!
//! Two addressing styles are supported: plain OpenAI (`{base}/v1/{operation}`,
//! bearer token, model named in the body) and Azure OpenAI
//! (`{endpoint}/openai/deployments/{deployment}/{operation}?api-version=..`,
//! `api-key` header).

use crate::error::PipelineError;
use reqwest::{Client, RequestBuilder};
use std::time::Duration;
use url::Url;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const AZURE_CHAT_API_VERSION: &str = "2024-02-15-preview";
pub const AZURE_EMBEDDINGS_API_VERSION: &str = "2024-05-01-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiTarget {
    OpenAi {
        base_url: String,
        api_key: String,
        model: String,
    },
    Azure {
        endpoint: String,
        api_key: String,
        deployment: String,
        api_version: String,
    },
}

impl ApiTarget {
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        ApiTarget::OpenAi {
            base_url: OPENAI_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        ApiTarget::Azure {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            deployment: deployment.into(),
            api_version: api_version.into(),
        }
    }

    /// Overrides the OpenAI base URL (proxies, local OpenAI-compatible servers).
    pub fn with_base_url(self, url: impl Into<String>) -> Self {
        match self {
            ApiTarget::OpenAi { api_key, model, .. } => ApiTarget::OpenAi {
                base_url: url.into(),
                api_key,
                model,
            },
            azure => azure,
        }
    }

    /// Model name for OpenAI, deployment name for Azure.
    pub fn model(&self) -> &str {
        match self {
            ApiTarget::OpenAi { model, .. } => model,
            ApiTarget::Azure { deployment, .. } => deployment,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            ApiTarget::OpenAi { .. } => "openai",
            ApiTarget::Azure { .. } => "azure-openai",
        }
    }

    pub fn endpoint(&self, operation: &str) -> Result<Url, PipelineError> {
        let parsed = match self {
            ApiTarget::OpenAi { base_url, .. } => Url::parse(&format!(
                "{}/v1/{operation}",
                base_url.trim_end_matches('/')
            )),
            ApiTarget::Azure {
                endpoint,
                deployment,
                api_version,
                ..
            } => Url::parse_with_params(
                &format!(
                    "{}/openai/deployments/{deployment}/{operation}",
                    endpoint.trim_end_matches('/')
                ),
                &[("api-version", api_version.as_str())],
            ),
        };

        parsed.map_err(|error| {
            PipelineError::InvalidConfig(format!("{} endpoint: {error}", self.backend()))
        })
    }

    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            ApiTarget::OpenAi { api_key, .. } => request.bearer_auth(api_key),
            ApiTarget::Azure { api_key, .. } => request.header("api-key", api_key),
        }
    }
}

pub fn http_client(timeout: Duration) -> Result<Client, PipelineError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| PipelineError::InvalidConfig(format!("http client: {error}")))
}

/// Pulls `error.message` out of an OpenAI-style error body, falling back to the raw body.
pub(crate) fn error_detail(body: String) -> String {
    serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or(body)
}
