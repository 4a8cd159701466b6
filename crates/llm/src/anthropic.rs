//! Anthropic Messages API provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{LlmError, LlmResult};

use super::provider::{AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions, TokenUsage};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";
const KEY_ENV: &str = "ANTHROPIC_API_KEY";

const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Scoring calls can be slow on large batches.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Short names accepted in config, with the model they resolve to.
const ALIASES: &[(&str, &str)] = &[
    ("opus", "claude-opus-4-5-20251101"),
    ("sonnet", "claude-sonnet-4-5-20250929"),
    ("haiku", "claude-haiku-4-5-20251001"),
];

const MODELS: &[&str] = &[
    "claude-opus-4-5-20251101",
    "claude-sonnet-4-5-20250929",
    "claude-haiku-4-5-20251001",
    "claude-opus-4-1-20250805",
    "claude-sonnet-4-20250514",
    "claude-3-5-haiku-20241022",
];

fn resolve_model(model: &str) -> &str {
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == model)
        .map_or(model, |&(_, id)| id)
}

/// Request and response bodies as the API spells them.
mod wire {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize)]
    pub struct Message<'a> {
        pub role: &'static str,
        pub content: &'a str,
    }

    #[derive(Debug, Serialize)]
    pub struct Request<'a> {
        pub model: &'a str,
        pub messages: Vec<Message<'a>>,
        pub max_tokens: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub system: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub temperature: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub stop_sequences: Option<&'a [String]>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Block {
        #[serde(rename = "type")]
        pub kind: String,
        #[serde(default)]
        pub text: String,
    }

    #[derive(Debug, Default, Deserialize)]
    pub struct Usage {
        #[serde(default)]
        pub input_tokens: u32,
        #[serde(default)]
        pub output_tokens: u32,
    }

    #[derive(Debug, Deserialize)]
    pub struct Response {
        pub content: Vec<Block>,
        pub model: String,
        #[serde(default)]
        pub usage: Usage,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        pub error: ErrorDetail,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorDetail {
        #[serde(rename = "type")]
        pub kind: String,
        pub message: String,
    }
}

/// Pull system prompts out of the turn list; the API takes them separately.
fn split_system(messages: &[AIMessage]) -> (Option<String>, Vec<wire::Message<'_>>) {
    let mut system: Vec<&str> = Vec::new();
    let mut turns = Vec::with_capacity(messages.len());

    for message in messages {
        let role = match message.role {
            AIRole::System => {
                system.push(&message.content);
                continue;
            }
            AIRole::User => "user",
            AIRole::Assistant => "assistant",
        };
        turns.push(wire::Message {
            role,
            content: &message.content,
        });
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, turns)
}

fn api_error(status: StatusCode, body: String) -> LlmError {
    let message = match serde_json::from_str::<wire::ErrorBody>(&body) {
        Ok(parsed) => format!("{} - {}", parsed.error.kind, parsed.error.message),
        Err(_) => body,
    };
    LlmError::Api {
        status: status.as_u16(),
        message,
    }
}

fn http_client(timeout: Duration) -> LlmResult<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// Claude via the Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> LlmResult<Self> {
        let api_key = api_key.into();
        Ok(Self {
            client: http_client(DEFAULT_TIMEOUT)?,
            api_key: (!api_key.is_empty()).then_some(api_key),
            endpoint: API_URL.to_string(),
        })
    }

    /// Point at a proxy or test server.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> LlmResult<Self> {
        self.client = http_client(timeout)?;
        Ok(self)
    }
}

#[async_trait]
impl AIProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    fn api_key_env_var(&self) -> &'static str {
        KEY_ENV
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn supported_models(&self) -> Vec<&str> {
        MODELS
            .iter()
            .copied()
            .chain(ALIASES.iter().map(|(alias, _)| *alias))
            .collect()
    }

    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> LlmResult<AIResponse> {
        let Some(api_key) = &self.api_key else {
            return Err(LlmError::NotConfigured {
                provider: PROVIDER,
                env_var: KEY_ENV,
            });
        };

        let (system, turns) = split_system(messages);
        let request = wire::Request {
            model: resolve_model(model),
            messages: turns,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system,
            temperature: options.temperature,
            stop_sequences: options.stop_sequences.as_deref(),
        };
        tracing::debug!(model = request.model, turns = request.messages.len(), "Calling Anthropic");

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(api_error(status, body));
        }

        let parsed: wire::Response =
            serde_json::from_str(&body).map_err(|e| LlmError::ResponseParse {
                reason: format!("unexpected Anthropic response body: {e}"),
            })?;
        let text: String = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect();
        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse { provider: PROVIDER });
        }

        let usage = TokenUsage {
            input_tokens: parsed.usage.input_tokens,
            output_tokens: parsed.usage.output_tokens,
            total_tokens: parsed.usage.input_tokens + parsed.usage.output_tokens,
        };
        tracing::debug!(
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "Anthropic call complete"
        );

        Ok(AIResponse {
            text,
            usage,
            model: parsed.model,
            provider: PROVIDER.to_string(),
        })
    }
}

pub fn default_model() -> &'static str {
    DEFAULT_MODEL
}
