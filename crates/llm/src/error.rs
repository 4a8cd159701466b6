//! Error types for LLM providers.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type LlmResult<T> = Result<T, LlmError>;

/// Errors that can occur when talking to an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Provider has no API key.
    #[error("{provider} is not configured: set {env_var}")]
    NotConfigured {
        provider: &'static str,
        env_var: &'static str,
    },

    /// HTTP transport failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with an error payload or non-success status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The API answered but with nothing usable.
    #[error("Empty response from {provider}")]
    EmptyResponse { provider: &'static str },

    /// Model output could not be parsed into the expected shape.
    #[error("Failed to parse AI response: {reason}")]
    ResponseParse { reason: String },

    /// No registered provider serves the requested model.
    #[error("No provider configured for model: {0}")]
    UnknownModel(String),
}
