//! Azure OpenAI chat completion tool

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

use super::credentials::{TokenProvider, COGNITIVE_SERVICES_SCOPE};
use crate::error::AuditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Per-request generation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ModelOptions {
    pub const fn new(temperature: f32, max_output_tokens: u32) -> Self {
        Self {
            temperature,
            max_output_tokens,
        }
    }
}

/// Single request/response text generation
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: ModelOptions,
    ) -> Result<String, AuditError>;
}

/// How requests to the deployment are authenticated
pub enum OpenAiAuth {
    ApiKey(String),
    EntraId(Arc<dyn TokenProvider>),
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Azure OpenAI deployment client
pub struct AzureOpenAiClient {
    endpoint: String,
    deployment: String,
    api_version: String,
    auth: OpenAiAuth,
    http_client: Client,
}

impl AzureOpenAiClient {
    pub fn new(
        endpoint: impl Into<String>,
        deployment: impl Into<String>,
        api_version: impl Into<String>,
        auth: OpenAiAuth,
        timeout: std::time::Duration,
    ) -> Result<Self, AuditError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuditError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            deployment: deployment.into(),
            api_version: api_version.into(),
            auth,
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint,
            urlencoding::encode(&self.deployment),
            urlencoding::encode(&self.api_version)
        )
    }
}

#[async_trait]
impl ChatModel for AzureOpenAiClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: ModelOptions,
    ) -> Result<String, AuditError> {
        let request = CompletionRequest {
            messages,
            temperature: options.temperature,
            max_tokens: options.max_output_tokens,
        };

        let builder = self.http_client.post(self.completions_url()).json(&request);
        let builder = match &self.auth {
            OpenAiAuth::ApiKey(key) => builder.header("api-key", key),
            OpenAiAuth::EntraId(tokens) => {
                let token = tokens.token(COGNITIVE_SERVICES_SCOPE).await?;
                builder.bearer_auth(token.token)
            }
        };

        debug!(
            deployment = %self.deployment,
            messages = messages.len(),
            temperature = options.temperature,
            "Requesting chat completion"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| AuditError::Model(format!("Azure OpenAI unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, deployment = %self.deployment, "OpenAI API error");
            return Err(AuditError::Model(format!(
                "Azure OpenAI returned {}: {}",
                status, body
            )));
        }

        let body: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AuditError::Model(format!("Failed to parse completion: {}", e)))?;

        Ok(first_choice_text(body))
    }
}

fn first_choice_text(body: CompletionResponse) -> String {
    body.choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let request = CompletionRequest {
            messages: &messages,
            temperature: 0.5,
            max_tokens: 2000,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], json!("system"));
        assert_eq!(value["messages"][1]["content"], json!("hi"));
        assert_eq!(value["max_tokens"], json!(2000));
    }

    #[test]
    fn test_first_choice_text() {
        let body: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "ALIGNED"}}]
        }))
        .unwrap();
        assert_eq!(first_choice_text(body), "ALIGNED");
    }

    #[test]
    fn test_null_content_becomes_empty() {
        let body: CompletionResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert_eq!(first_choice_text(body), "");

        let empty: CompletionResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert_eq!(first_choice_text(empty), "");
    }

    #[test]
    fn test_completions_url() {
        let client = AzureOpenAiClient::new(
            "https://contoso.openai.azure.com/",
            "gpt-4o",
            "2024-02-15-preview",
            OpenAiAuth::ApiKey("k".into()),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(
            client.completions_url(),
            "https://contoso.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-15-preview"
        );
    }
}
