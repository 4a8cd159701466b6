use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feed::ExtractedItem;

/// Topics kept per post.
pub const MAX_TOPICS: usize = 3;

/// Relevance verdict for one post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub item_id: String,
    /// 0.0 (irrelevant) to 1.0 (must read).
    pub relevance_score: f64,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub summary: String,
    /// Whether replies would help a reader understand the post.
    #[serde(default)]
    pub needs_context: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Scores at or above the threshold count as relevant.
    pub fn is_relevant(&self, threshold: f64) -> bool {
        self.relevance_score >= threshold
    }
}

/// A post that passed the relevance filter, with any fetched replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: ExtractedItem,
    pub analysis: AnalysisResult,
    #[serde(default)]
    pub context: Vec<ExtractedItem>,
}

impl ScoredItem {
    pub fn new(item: ExtractedItem, analysis: AnalysisResult) -> Self {
        Self {
            item,
            analysis,
            context: Vec::new(),
        }
    }
}
