//! OpenRouter client (OpenAI-compatible Chat Completions API).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{AgentRole, GenerationRequest, GenerationService, GenerationServiceFactory};
use crate::config::{GenerationSection, RolesSection};
use crate::errors::GenerationError;

/// Longest error body kept in a `GenerationError::Http`.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client; one instance per credential.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    api_key: String,
    roles: RolesSection,
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("roles", &self.roles)
            .finish_non_exhaustive()
    }
}

impl OpenRouterClient {
    pub fn new(config: &GenerationSection, api_key: impl Into<String>) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(GenerationError::Client)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: api_key.into(),
            roles: config.roles.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn build_request<'a>(&'a self, role: AgentRole, request: &GenerationRequest) -> ChatCompletionRequest<'a> {
        let binding = self.roles.binding(role);
        ChatCompletionRequest {
            model: &binding.model,
            temperature: binding.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: role.persona().to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!(
                        "{}\n\nExpected output: {}",
                        request.prompt.trim(),
                        request.expected_output
                    ),
                },
            ],
        }
    }
}

#[async_trait]
impl GenerationService for OpenRouterClient {
    async fn generate(
        &self,
        role: AgentRole,
        request: GenerationRequest,
    ) -> Result<String, GenerationError> {
        let body = self.build_request(role, &request);
        tracing::debug!(role = %role, model = body.model, "Sending completion request");

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|source| GenerationError::Transport {
                role: role.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(GenerationError::Http {
                role: role.to_string(),
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let parsed: ChatCompletionResponse =
            response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    role: role.to_string(),
                    reason: e.to_string(),
                })?;

        extract_content(role, parsed)
    }
}

fn extract_content(role: AgentRole, response: ChatCompletionResponse) -> Result<String, GenerationError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| GenerationError::InvalidResponse {
            role: role.to_string(),
            reason: "response contained no message content".to_string(),
        })
}

/// Creates an `OpenRouterClient` per submission credential, falling back to
/// the configured key.
#[derive(Debug, Clone)]
pub struct OpenRouterFactory {
    config: GenerationSection,
}

impl OpenRouterFactory {
    pub fn new(config: GenerationSection) -> Self {
        Self { config }
    }
}

impl GenerationServiceFactory for OpenRouterFactory {
    fn for_credential(
        &self,
        credential: Option<&str>,
    ) -> Result<Arc<dyn GenerationService>, GenerationError> {
        let key = credential
            .filter(|k| !k.trim().is_empty())
            .or(self.config.api_key.as_deref())
            .ok_or(GenerationError::MissingCredential)?;
        Ok(Arc::new(OpenRouterClient::new(&self.config, key)?))
    }
}
