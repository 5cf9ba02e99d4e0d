use crate::error::{GenerationError, PipelineError};
use crate::provider::{error_detail, http_client, ApiTarget};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Single-shot text completion. No streaming, no retries.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat model behind an OpenAI or Azure OpenAI `/chat/completions` endpoint.
pub struct OpenAiChatModel {
    client: Client,
    target: ApiTarget,
    url: Url,
    temperature: Option<f32>,
    timeout: Duration,
}

impl OpenAiChatModel {
    pub fn new(target: ApiTarget, timeout: Duration) -> Result<Self, PipelineError> {
        let url = target.endpoint("chat/completions")?;
        Ok(Self {
            client: http_client(timeout)?,
            target,
            url,
            temperature: None,
            timeout,
        })
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        self.target.backend()
    }

    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        debug!(
            backend = self.target.backend(),
            model = self.target.model(),
            prompt_chars = prompt.len(),
            "chat completion"
        );

        let body = ChatRequest {
            model: self.target.model(),
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };

        let response = self
            .target
            .authorize(self.client.post(self.url.clone()))
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                error!(backend = self.target.backend(), error = %error, "chat request failed");
                if error.is_timeout() {
                    GenerationError::Timeout(self.timeout)
                } else {
                    GenerationError::Http(error)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let details = error_detail(response.text().await.unwrap_or_default());
            error!(backend = self.target.backend(), %status, "chat backend error");
            return Err(GenerationError::Backend {
                backend: self.target.backend().to_string(),
                status: status.as_u16(),
                details,
            });
        }

        let parsed: ChatResponse = response.json().await?;
        first_completion(parsed)
    }
}

fn first_completion(response: ChatResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(GenerationError::EmptyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::AZURE_CHAT_API_VERSION;

    #[test]
    fn completion_text_is_taken_from_first_choice() -> Result<(), Box<dyn std::error::Error>> {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[
                {"index":0,"message":{"role":"assistant","content":"Both are fruits."}}
            ]}"#,
        )?;
        assert_eq!(first_completion(parsed)?, "Both are fruits.");
        Ok(())
    }

    #[test]
    fn empty_choices_are_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#)?;
        assert!(matches!(
            first_completion(parsed),
            Err(GenerationError::EmptyResponse)
        ));

        let blank: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"  "}}]}"#)?;
        assert!(matches!(
            first_completion(blank),
            Err(GenerationError::EmptyResponse)
        ));
        Ok(())
    }

    #[test]
    fn request_body_carries_single_user_message() -> Result<(), serde_json::Error> {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: [ChatMessage {
                role: "user",
                content: "hello",
            }],
            temperature: None,
        };
        let value = serde_json::to_value(&body)?;
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"], "hello");
        assert!(value.get("temperature").is_none());
        Ok(())
    }

    #[test]
    fn azure_model_targets_deployment() -> Result<(), PipelineError> {
        let model = OpenAiChatModel::new(
            ApiTarget::azure(
                "https://example.openai.azure.com",
                "key",
                "gpt4",
                AZURE_CHAT_API_VERSION,
            ),
            Duration::from_secs(5),
        )?;
        assert_eq!(
            model.url.as_str(),
            concat!(
                "https://example.openai.azure.com/openai/deployments/gpt4/chat/completions",
                "?api-version=2024-02-15-preview"
            )
        );
        Ok(())
    }
}
