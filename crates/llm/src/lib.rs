//! LLM integration for relevance scoring.
//!
//! This crate provides:
//! - AI provider abstraction (Anthropic today, others behind the same trait)
//! - Message and generation option types
//! - Tolerant JSON extraction from model output
//! - Provider registry for model-based lookup

pub mod anthropic;
pub mod error;
pub mod provider;
pub mod registry;

// Re-exports
pub use anthropic::AnthropicProvider;
pub use error::{LlmError, LlmResult};
pub use provider::{
    extract_json, parse_ai_response, AIMessage, AIProvider, AIResponse, AIRole, GenerateOptions,
    MessageBuilder, TokenUsage,
};
pub use registry::ProviderRegistry;
