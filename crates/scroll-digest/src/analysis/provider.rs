//! Relevance scoring backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use handlebars::{RenderError, TemplateError};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use llm::{
    parse_ai_response, AIProvider, AIResponse, AnthropicProvider, GenerateOptions, LlmError,
    MessageBuilder, ProviderRegistry,
};

use crate::config::{AnalysisConfig, Interests};
use crate::feed::ExtractedItem;
use crate::storage::{save_json, CheckpointStore, Step};

use super::prompts::{PromptManager, SYSTEM_PROMPT};
use super::types::{AnalysisResult, MAX_TOPICS};

/// Opening the assistant turn with this forces a JSON array reply.
const PREFILL: &str = "[";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("failed to render prompt: {0}")]
    Prompt(#[from] RenderError),

    #[error("provider returned a result for unknown post {0}")]
    UnknownItem(String),

    #[error("provider returned no result for posts {missing:?} (batch of {expected})")]
    Incomplete {
        expected: usize,
        missing: Vec<String>,
    },

    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

/// Scores one batch of posts against the reader's interests.
///
/// Implementations return exactly one result per input post, in input order.
#[async_trait]
pub trait ScoringProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(
        &self,
        items: &[ExtractedItem],
        interests: &Interests,
    ) -> Result<Vec<AnalysisResult>, ProviderError>;
}

/// One element of the model's JSON reply.
#[derive(Debug, Deserialize)]
struct RawScore {
    #[serde(alias = "id", alias = "item_id", deserialize_with = "id_as_string")]
    post_id: String,
    #[serde(default)]
    relevance_score: f64,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    needs_context: bool,
}

/// Models sometimes emit numeric IDs unquoted.
fn id_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected post id, got {other}"
        ))),
    }
}

/// Match model output to the batch.
///
/// Results for posts outside the batch are rejected and every post must be
/// covered. Scores are clamped to 0.0-1.0 and topics capped.
fn reconcile(
    batch: &[ExtractedItem],
    raw: Vec<RawScore>,
    analyzed_at: DateTime<Utc>,
) -> Result<Vec<AnalysisResult>, ProviderError> {
    let mut by_id: HashMap<String, RawScore> = HashMap::with_capacity(raw.len());
    for score in raw {
        if !batch.iter().any(|item| item.id == score.post_id) {
            return Err(ProviderError::UnknownItem(score.post_id));
        }
        by_id.entry(score.post_id.clone()).or_insert(score);
    }

    let mut results = Vec::with_capacity(batch.len());
    let mut missing = Vec::new();
    for item in batch {
        match by_id.remove(&item.id) {
            Some(score) => results.push(AnalysisResult {
                item_id: item.id.clone(),
                relevance_score: clamp_score(score.relevance_score),
                topics: score
                    .topics
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .take(MAX_TOPICS)
                    .collect(),
                summary: score.summary.trim().to_string(),
                needs_context: score.needs_context,
                analyzed_at,
            }),
            None => missing.push(item.id.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(ProviderError::Incomplete {
            expected: batch.len(),
            missing,
        });
    }
    Ok(results)
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Scores posts with a chat model.
pub struct LlmScoringProvider {
    provider: Arc<dyn AIProvider>,
    model: String,
    prompts: PromptManager,
    exchanges: Option<Arc<dyn CheckpointStore>>,
}

impl LlmScoringProvider {
    pub fn new(provider: Arc<dyn AIProvider>, model: impl Into<String>) -> Result<Self, TemplateError> {
        Ok(Self {
            provider,
            model: model.into(),
            prompts: PromptManager::new()?,
            exchanges: None,
        })
    }

    /// Record every prompt and reply under the `llm` checkpoint step.
    #[must_use]
    pub fn with_exchange_log(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.exchanges = Some(store);
        self
    }

    fn record_exchange(&self, prompt: &str, response: &AIResponse) {
        let Some(store) = &self.exchanges else {
            return;
        };
        let exchange = serde_json::json!({
            "provider": response.provider,
            "model": response.model,
            "system": SYSTEM_PROMPT,
            "prompt": prompt,
            "response": response.text,
            "usage": response.usage,
        });
        if let Err(e) = save_json(store.as_ref(), Step::LlmExchanges, &exchange) {
            tracing::warn!(error = %e, "Failed to record LLM exchange");
        }
    }
}

#[async_trait]
impl ScoringProvider for LlmScoringProvider {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn analyze(
        &self,
        items: &[ExtractedItem],
        interests: &Interests,
    ) -> Result<Vec<AnalysisResult>, ProviderError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = self.prompts.score_batch(items, interests)?;
        let messages = MessageBuilder::new()
            .system(SYSTEM_PROMPT)
            .user(prompt.clone())
            .assistant(PREFILL)
            .build();
        let options = GenerateOptions {
            temperature: Some(0.2),
            max_tokens: Some(4096),
            json_mode: true,
            ..Default::default()
        };

        let mut response = self
            .provider
            .generate_text(&self.model, &messages, &options)
            .await?;
        if !response.text.trim_start().starts_with(PREFILL) {
            response.text = format!("{PREFILL}{}", response.text);
        }
        self.record_exchange(&prompt, &response);

        let raw: Vec<RawScore> = parse_ai_response(&response)?;
        tracing::debug!(
            batch = items.len(),
            returned = raw.len(),
            output_tokens = response.usage.output_tokens,
            "Scored batch"
        );
        reconcile(items, raw, Utc::now())
    }
}

/// Stands in when no provider could be configured.
///
/// Lets commands that never score (login, scrape, digest) run without an
/// API key; scoring fails with the configuration error.
pub struct UnavailableScorer {
    reason: String,
}

impl UnavailableScorer {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl ScoringProvider for UnavailableScorer {
    fn name(&self) -> &str {
        "unavailable"
    }

    async fn analyze(
        &self,
        _items: &[ExtractedItem],
        _interests: &Interests,
    ) -> Result<Vec<AnalysisResult>, ProviderError> {
        Err(ProviderError::NotConfigured(self.reason.clone()))
    }
}

/// Build the scorer described by `config`.
pub fn scorer_from_config(
    config: &AnalysisConfig,
    exchanges: Option<Arc<dyn CheckpointStore>>,
) -> Result<Arc<dyn ScoringProvider>, ProviderError> {
    let registry = ProviderRegistry::new();
    if let Some(key) = &config.api_key {
        let anthropic = AnthropicProvider::new(key.clone())?
            .with_timeout(Duration::from_secs(config.request_timeout_secs))?;
        registry.register(Arc::new(anthropic));
    }

    let provider = match registry.get(&config.provider) {
        Some(provider) => provider,
        None => registry.for_model(&config.model).map_err(|_| {
            ProviderError::NotConfigured(format!(
                "{} (set analysis.api_key or ANTHROPIC_API_KEY)",
                config.provider
            ))
        })?,
    };
    if !provider.supports_model(&config.model) {
        tracing::warn!(model = %config.model, provider = provider.name(), "Model not in known list, using anyway");
    }

    let mut scorer = LlmScoringProvider::new(provider, config.model.clone())
        .map_err(|e| ProviderError::NotConfigured(format!("prompt templates: {e}")))?;
    if let Some(store) = exchanges {
        scorer = scorer.with_exchange_log(store);
    }
    Ok(Arc::new(scorer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Author, Engagement};
    use llm::{AIMessage, LlmResult, TokenUsage};
    use std::sync::Mutex;

    fn item(id: &str) -> ExtractedItem {
        ExtractedItem {
            id: id.to_string(),
            author: Author::new("a", "A"),
            content: format!("post {id}"),
            media_urls: Vec::new(),
            posted_at: None,
            engagement: Engagement::default(),
            is_repost: false,
            is_quote: false,
            is_reply: false,
            url: format!("https://x.com/a/status/{id}"),
            extracted_at: Utc::now(),
        }
    }

    fn raw(id: &str, score: f64) -> RawScore {
        RawScore {
            post_id: id.to_string(),
            relevance_score: score,
            topics: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            summary: " s ".to_string(),
            needs_context: false,
        }
    }

    #[test]
    fn test_reconcile_orders_clamps_and_caps() {
        let batch = vec![item("1"), item("2")];
        let results = reconcile(&batch, vec![raw("2", 1.7), raw("1", -0.2)], Utc::now()).unwrap();

        assert_eq!(results[0].item_id, "1");
        assert!((results[0].relevance_score - 0.0).abs() < f64::EPSILON);
        assert_eq!(results[1].item_id, "2");
        assert!((results[1].relevance_score - 1.0).abs() < f64::EPSILON);
        assert_eq!(results[1].topics.len(), MAX_TOPICS);
        assert_eq!(results[1].summary, "s");
    }

    #[test]
    fn test_reconcile_rejects_unknown_and_missing() {
        let batch = vec![item("1"), item("2")];
        assert!(matches!(
            reconcile(&batch, vec![raw("1", 0.5), raw("9", 0.5)], Utc::now()),
            Err(ProviderError::UnknownItem(id)) if id == "9"
        ));
        assert!(matches!(
            reconcile(&batch, vec![raw("1", 0.5)], Utc::now()),
            Err(ProviderError::Incomplete { expected: 2, missing }) if missing == vec!["2".to_string()]
        ));
    }

    struct ScriptedModel {
        reply: String,
        seen: Mutex<Vec<AIMessage>>,
    }

    #[async_trait]
    impl AIProvider for ScriptedModel {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn api_key_env_var(&self) -> &'static str {
            "NONE"
        }
        fn is_configured(&self) -> bool {
            true
        }
        fn supported_models(&self) -> Vec<&str> {
            vec!["test"]
        }
        async fn generate_text(
            &self,
            model: &str,
            messages: &[AIMessage],
            _options: &GenerateOptions,
        ) -> LlmResult<AIResponse> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(AIResponse {
                text: self.reply.clone(),
                usage: TokenUsage::default(),
                model: model.to_string(),
                provider: "scripted".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_llm_scorer_reattaches_prefill() {
        let model = Arc::new(ScriptedModel {
            reply: r#"{"post_id": 1, "relevance_score": 0.8, "topics": ["rust"], "summary": "ok", "needs_context": true}]"#
                .to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let scorer = LlmScoringProvider::new(model.clone(), "test").unwrap();

        let results = scorer
            .analyze(&[item("1")], &Interests::default())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(results[0].needs_context);
        assert_eq!(results[0].topics, vec!["rust"]);

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.last().unwrap().content, PREFILL);
    }

    #[test]
    fn test_scorer_requires_key() {
        let config = AnalysisConfig::default();
        assert!(matches!(
            scorer_from_config(&config, None),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
