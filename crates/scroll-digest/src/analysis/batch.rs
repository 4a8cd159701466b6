//! Concurrent batch scoring.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Interests;
use crate::feed::ExtractedItem;

use super::provider::{ProviderError, ScoringProvider};
use super::types::AnalysisResult;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("batch {index} failed: {source}")]
    Batch {
        index: usize,
        #[source]
        source: ProviderError,
    },

    #[error("scoring task aborted: {0}")]
    Join(String),

    #[error("analysis cancelled")]
    Cancelled,
}

/// Splits posts into batches and scores them in parallel.
///
/// Output order always equals input order regardless of which batch
/// finishes first. Any failed batch fails the whole call and the remaining
/// batches are aborted.
pub struct BatchAnalyzer {
    provider: Arc<dyn ScoringProvider>,
    batch_size: usize,
    request_timeout: Duration,
}

impl BatchAnalyzer {
    pub fn new(provider: Arc<dyn ScoringProvider>, batch_size: usize, request_timeout: Duration) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            request_timeout,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn analyze_posts(
        &self,
        items: &[ExtractedItem],
        interests: &Interests,
        cancel: &CancellationToken,
    ) -> Result<Vec<AnalysisResult>, AnalysisError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let batch_count = items.len().div_ceil(self.batch_size);
        tracing::info!(
            posts = items.len(),
            batches = batch_count,
            provider = self.provider.name(),
            "Scoring posts"
        );

        let interests = Arc::new(interests.clone());
        let mut tasks = JoinSet::new();
        for (index, batch) in items.chunks(self.batch_size).enumerate() {
            let batch = batch.to_vec();
            let provider = Arc::clone(&self.provider);
            let interests = Arc::clone(&interests);
            let timeout = self.request_timeout;

            tasks.spawn(async move {
                let outcome = tokio::time::timeout(timeout, provider.analyze(&batch, &interests))
                    .await
                    .unwrap_or(Err(ProviderError::Timeout(timeout)));
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<Vec<AnalysisResult>>> =
            std::iter::repeat_with(|| None).take(batch_count).collect();

        loop {
            let joined = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(AnalysisError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok((index, Ok(results))) => {
                    tracing::debug!(batch = index, results = results.len(), "Batch scored");
                    slots[index] = Some(results);
                }
                Ok((index, Err(source))) => {
                    tasks.abort_all();
                    tracing::warn!(batch = index, error = %source, "Batch failed, aborting analysis");
                    return Err(AnalysisError::Batch { index, source });
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(AnalysisError::Join(e.to_string()));
                }
            }
        }

        let results: Vec<AnalysisResult> = slots.into_iter().flatten().flatten().collect();
        tracing::info!(results = results.len(), "Scoring complete");
        Ok(results)
    }
}
