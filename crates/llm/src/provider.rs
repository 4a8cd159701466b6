//! Provider trait, message types and response parsing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{LlmError, LlmResult};

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AIRole {
    System,
    User,
    /// Model output, or a prefill when last in the list.
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIMessage {
    pub role: AIRole,
    pub content: String,
}

impl AIMessage {
    pub fn new(role: AIRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Token usage information from an AI response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

/// One completed generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIResponse {
    pub text: String,
    pub usage: TokenUsage,
    /// Model as reported by the API, which may differ from the alias requested.
    pub model: String,
    pub provider: String,
}

/// Sampling knobs. `None` leaves the provider default.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    /// Ask for machine-readable output.
    pub json_mode: bool,
}

/// A chat-completion backend.
#[async_trait]
pub trait AIProvider: Send + Sync {
    /// Registry key, e.g. `anthropic`.
    fn name(&self) -> &'static str;

    fn api_key_env_var(&self) -> &'static str;

    fn is_configured(&self) -> bool;

    /// Model ids and aliases this provider accepts.
    fn supported_models(&self) -> Vec<&str>;

    fn supports_model(&self, model: &str) -> bool {
        self.supported_models().contains(&model)
    }

    /// Run one completion.
    ///
    /// A trailing assistant message is treated as a prefill: the returned
    /// text is the continuation only, without the prefill itself.
    async fn generate_text(
        &self,
        model: &str,
        messages: &[AIMessage],
        options: &GenerateOptions,
    ) -> LlmResult<AIResponse>;
}

/// Locate the JSON payload inside free-form model output.
///
/// Handles fenced code blocks (with or without a `json` tag) and prose
/// around a bare array or object. Falls back to the trimmed input.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(start) = text.find("```") {
        let after_fence = &text[start + 3..];
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim();
        }
    }

    let open = text.find(['[', '{']);
    let close = text.rfind([']', '}']);
    match (open, close) {
        (Some(open), Some(close)) if close > open => &text[open..=close],
        _ => text,
    }
}

/// Deserialize the JSON payload of a response.
pub fn parse_ai_response<T: for<'de> Deserialize<'de>>(response: &AIResponse) -> LlmResult<T> {
    let json_text = extract_json(&response.text);

    serde_json::from_str(json_text).map_err(|e| LlmError::ResponseParse {
        reason: format!(
            "{e}. Response: {}",
            response.text.chars().take(500).collect::<String>()
        ),
    })
}

/// Assembles a conversation in order.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    messages: Vec<AIMessage>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn system(self, content: impl Into<String>) -> Self {
        self.push(AIRole::System, content)
    }

    #[must_use]
    pub fn user(self, content: impl Into<String>) -> Self {
        self.push(AIRole::User, content)
    }

    /// Prefill when it is the last message.
    #[must_use]
    pub fn assistant(self, content: impl Into<String>) -> Self {
        self.push(AIRole::Assistant, content)
    }

    fn push(mut self, role: AIRole, content: impl Into<String>) -> Self {
        self.messages.push(AIMessage::new(role, content));
        self
    }

    pub fn build(self) -> Vec<AIMessage> {
        self.messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(text: &str) -> AIResponse {
        AIResponse {
            text: text.to_string(),
            usage: TokenUsage::default(),
            model: "test".to_string(),
            provider: "test".to_string(),
        }
    }

    #[test]
    fn test_extract_json_plain_array() {
        assert_eq!(extract_json("  [1, 2]\n"), "[1, 2]");
    }

    #[test]
    fn test_extract_json_fenced() {
        let text = "Here you go:\n```json\n[{\"a\": 1}]\n```\nDone.";
        assert_eq!(extract_json(text), "[{\"a\": 1}]");

        let untagged = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(untagged), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_with_prose() {
        let text = "Sure! [{\"a\": 1}] Hope that helps.";
        assert_eq!(extract_json(text), "[{\"a\": 1}]");
    }

    #[test]
    fn test_parse_ai_response() {
        #[derive(Debug, Deserialize)]
        struct Item {
            a: u32,
        }

        let items: Vec<Item> = parse_ai_response(&response("```json\n[{\"a\": 7}]\n```")).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].a, 7);

        let err = parse_ai_response::<Vec<Item>>(&response("not json")).unwrap_err();
        assert!(matches!(err, LlmError::ResponseParse { .. }));
    }

    #[test]
    fn test_message_builder() {
        let messages = MessageBuilder::new()
            .system("sys")
            .user("hi")
            .assistant("[")
            .build();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].role, AIRole::Assistant);
    }
}
