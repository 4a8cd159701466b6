//! AI-powered relevance analysis.
//!
//! Scores batches of posts against the reader's interests.

mod batch;
mod prompts;
mod provider;
mod types;

pub use batch::{AnalysisError, BatchAnalyzer};
pub use prompts::PromptManager;
pub use provider::{
    scorer_from_config, LlmScoringProvider, ProviderError, ScoringProvider, UnavailableScorer,
};
pub use types::{AnalysisResult, ScoredItem, MAX_TOPICS};
