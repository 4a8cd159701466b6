//! Digest pipeline - orchestrates the scrape-analyze-filter-context-digest flow.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::analysis::{
    scorer_from_config, AnalysisError, AnalysisResult, BatchAnalyzer, ProviderError, ScoredItem,
    ScoringProvider, UnavailableScorer,
};
use crate::auth::{
    AuthError, Credential, CredentialBundle, InteractiveAuthenticator, LoginConfig, SessionError,
    SessionStore,
};
use crate::browser::BrowserLauncher;
use crate::config::{AppConfig, ConfigError};
use crate::digest::{latest_digest, DigestBuilder, DigestError};
use crate::feed::{ExtractedItem, ExtractionConfig, ExtractionEngine, ExtractionError};
use crate::storage::{load_latest_json, save_json, CheckpointStore, Step, StorageError};

/// Cookies for this domain are handed to the extraction browser.
pub const SESSION_DOMAIN: &str = "x.com";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("not authenticated - run `scroll-digest login` first")]
    NotAuthenticated,

    #[error("login failed: {0}")]
    Auth(#[from] AuthError),

    #[error("scrape failed: {0}")]
    Scrape(#[source] ExtractionError),

    #[error("analysis failed: {0}")]
    Analyze(#[from] AnalysisError),

    #[error("context fetch failed: {0}")]
    Context(#[source] ExtractionError),

    #[error("digest failed: {0}")]
    Digest(#[from] DigestError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("provider setup failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("checkpoint error: {0}")]
    Storage(#[from] StorageError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    fn scrape(e: ExtractionError) -> Self {
        match e {
            ExtractionError::Cancelled => Self::Cancelled,
            ExtractionError::SessionRejected { .. } => Self::NotAuthenticated,
            other => Self::Scrape(other),
        }
    }

    fn analyze(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Cancelled => Self::Cancelled,
            other => Self::Analyze(other),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Auth(AuthError::Cancelled)
        )
    }
}

/// Everything derived from one configuration snapshot.
pub struct Components {
    pub config: AppConfig,
    pub engine: ExtractionEngine,
    pub analyzer: BatchAnalyzer,
    pub digests: DigestBuilder,
    pub digest_dir: PathBuf,
}

impl Components {
    pub fn build(
        config: AppConfig,
        launcher: Arc<dyn BrowserLauncher>,
        scorer: Arc<dyn ScoringProvider>,
        digest_dir: PathBuf,
    ) -> Result<Self, PipelineError> {
        let engine = ExtractionEngine::new(launcher, ExtractionConfig::from_scraping(&config.scraping));
        let analyzer = BatchAnalyzer::new(
            scorer,
            config.analysis.batch_size,
            Duration::from_secs(config.analysis.request_timeout_secs),
        );
        let digests = DigestBuilder::new(config.digest.max_posts)?;
        Ok(Self {
            config,
            engine,
            analyzer,
            digests,
            digest_dir,
        })
    }
}

/// Why a run ended before producing a digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    DigestWritten,
    NoItems,
    NoRelevantItems,
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub scraped: usize,
    pub analyzed: usize,
    pub relevant: usize,
    pub with_context: usize,
    pub digest: Option<PathBuf>,
    pub outcome: RunOutcome,
}

impl RunSummary {
    fn stopped(outcome: RunOutcome, scraped: usize, analyzed: usize) -> Self {
        Self {
            scraped,
            analyzed,
            relevant: 0,
            with_context: 0,
            digest: None,
            outcome,
        }
    }
}

/// Keep items whose analysis meets `threshold`, in item order.
///
/// Items without an analysis are dropped.
pub fn filter_relevant(
    items: &[ExtractedItem],
    analyses: &[AnalysisResult],
    threshold: f64,
) -> Vec<ScoredItem> {
    let by_id: HashMap<&str, &AnalysisResult> = analyses
        .iter()
        .map(|analysis| (analysis.item_id.as_str(), analysis))
        .collect();

    items
        .iter()
        .filter_map(|item| {
            let analysis = by_id.get(item.id.as_str())?;
            analysis
                .is_relevant(threshold)
                .then(|| ScoredItem::new(item.clone(), (*analysis).clone()))
        })
        .collect()
}

/// Pipeline orchestrator.
///
/// Each stage reads the current component snapshot once, so a config
/// reload mid-run only affects later stages.
pub struct Pipeline {
    store: Arc<SessionStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    launcher: Arc<dyn BrowserLauncher>,
    login: LoginConfig,
    components: RwLock<Arc<Components>>,
}

impl Pipeline {
    pub fn new(
        store: Arc<SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        launcher: Arc<dyn BrowserLauncher>,
        components: Components,
    ) -> Self {
        Self {
            store,
            checkpoints,
            launcher,
            login: LoginConfig::default(),
            components: RwLock::new(Arc::new(components)),
        }
    }

    #[must_use]
    pub fn with_login_config(mut self, login: LoginConfig) -> Self {
        self.login = login;
        self
    }

    /// Build a pipeline from a config file with the default scorer.
    pub fn from_config_file(
        path: &Path,
        store: Arc<SessionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Result<Self, PipelineError> {
        let config = AppConfig::load_or_init(path)?;
        let components = Self::components_for(config, &checkpoints, &launcher)?;
        Ok(Self::new(store, checkpoints, launcher, components))
    }

    fn components_for(
        config: AppConfig,
        checkpoints: &Arc<dyn CheckpointStore>,
        launcher: &Arc<dyn BrowserLauncher>,
    ) -> Result<Components, PipelineError> {
        let scorer = match scorer_from_config(&config.analysis, Some(Arc::clone(checkpoints))) {
            Ok(scorer) => scorer,
            Err(e) => {
                tracing::warn!(error = %e, "Scoring unavailable");
                Arc::new(UnavailableScorer::new(e.to_string()))
            }
        };
        let digest_dir = config.digest_dir()?;
        Components::build(config, Arc::clone(launcher), scorer, digest_dir)
    }

    pub fn snapshot(&self) -> Arc<Components> {
        let guard = self.components.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub fn replace_components(&self, components: Components) {
        let mut guard = self.components.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(components);
    }

    /// Re-read the config file and swap in fresh components.
    ///
    /// On any error the previous snapshot stays in place.
    pub fn reload_config(&self, path: &Path) -> Result<(), PipelineError> {
        let config = AppConfig::load(path)?;
        let components = Self::components_for(config, &self.checkpoints, &self.launcher)?;
        self.replace_components(components);
        tracing::info!(path = %path.display(), "Configuration reloaded");
        Ok(())
    }

    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.is_valid()
    }

    pub fn session(&self) -> Result<CredentialBundle, SessionError> {
        self.store.load()
    }

    pub async fn login(&self, cancel: &CancellationToken) -> Result<CredentialBundle, PipelineError> {
        let authenticator = InteractiveAuthenticator::new(
            Arc::clone(&self.launcher),
            Arc::clone(&self.store),
            self.login.clone(),
        );
        Ok(authenticator.login(cancel).await?)
    }

    pub fn logout(&self) -> Result<(), PipelineError> {
        let authenticator = InteractiveAuthenticator::new(
            Arc::clone(&self.launcher),
            Arc::clone(&self.store),
            self.login.clone(),
        );
        Ok(authenticator.logout()?)
    }

    /// Scoped cookies for the extraction browser.
    ///
    /// An expired or unreadable bundle is deleted so the next check sees
    /// a clean "not logged in" state.
    fn credentials(&self) -> Result<Vec<Credential>, PipelineError> {
        let bundle = match self.store.load() {
            Ok(bundle) => bundle,
            Err(SessionError::NotFound(_)) => return Err(PipelineError::NotAuthenticated),
            Err(SessionError::Corrupt { .. }) => {
                tracing::warn!(path = %self.store.path().display(), "Discarding unreadable session");
                self.discard_session();
                return Err(PipelineError::NotAuthenticated);
            }
            Err(e) => return Err(e.into()),
        };
        if !bundle.is_valid() {
            tracing::warn!(expires_at = ?bundle.expires_at, "Session expired, discarding it");
            self.discard_session();
            return Err(PipelineError::NotAuthenticated);
        }
        Ok(bundle.scoped(SESSION_DOMAIN))
    }

    fn discard_session(&self) {
        match self.store.clear() {
            Ok(()) | Err(SessionError::NotFound(_)) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to delete session"),
        }
    }

    fn checkpoint<T: serde::Serialize + ?Sized>(&self, step: Step, data: &T) {
        if let Err(e) = save_json(self.checkpoints.as_ref(), step, data) {
            tracing::warn!(step = %step, error = %e, "Failed to save checkpoint");
        }
    }

    /// Stage 1: collect posts from the feed.
    pub async fn scrape(&self, cancel: &CancellationToken) -> Result<Vec<ExtractedItem>, PipelineError> {
        let credentials = self.credentials()?;
        let components = self.snapshot();

        let items = components
            .engine
            .extract_feed(
                &credentials,
                components.config.scraping.posts_per_scrape,
                cancel,
            )
            .await
            .map_err(PipelineError::scrape)?;

        self.checkpoint(Step::Posts, &items);
        Ok(items)
    }

    /// Stage 2: score posts.
    pub async fn analyze(
        &self,
        items: &[ExtractedItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<AnalysisResult>, PipelineError> {
        if items.is_empty() {
            tracing::info!("No posts to analyze");
            return Ok(Vec::new());
        }
        let components = self.snapshot();

        let analyses = components
            .analyzer
            .analyze_posts(items, &components.config.interests, cancel)
            .await
            .map_err(PipelineError::analyze)?;

        self.checkpoint(Step::Analyses, &analyses);
        Ok(analyses)
    }

    /// Stage 3: keep posts at or above the relevance threshold.
    pub fn filter(&self, items: &[ExtractedItem], analyses: &[AnalysisResult]) -> Vec<ScoredItem> {
        let threshold = self.snapshot().config.analysis.relevance_threshold;
        let relevant = filter_relevant(items, analyses, threshold);
        tracing::info!(
            total = items.len(),
            relevant = relevant.len(),
            threshold,
            "Filtered by relevance"
        );
        self.checkpoint(Step::Filtered, &relevant);
        relevant
    }

    /// Stage 4: fetch replies for posts flagged as needing context.
    ///
    /// Returns a new list; failures for individual posts are logged and
    /// leave that post without context.
    pub async fn fetch_context(
        &self,
        relevant: &[ScoredItem],
        cancel: &CancellationToken,
    ) -> Result<Vec<ScoredItem>, PipelineError> {
        let components = self.snapshot();
        let mut enriched = relevant.to_vec();
        let wanted = enriched.iter().filter(|s| s.analysis.needs_context).count();
        if !components.config.digest.include_context || wanted == 0 {
            self.checkpoint(Step::Context, &enriched);
            return Ok(enriched);
        }

        let credentials = self.credentials()?;
        let replies = components.config.digest.context_replies;
        tracing::info!(posts = wanted, replies, "Fetching thread context");

        for scored in enriched.iter_mut().filter(|s| s.analysis.needs_context) {
            match components
                .engine
                .extract_thread(&credentials, &scored.item.url, replies, cancel)
                .await
            {
                Ok(context) => scored.context = context,
                Err(ExtractionError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    tracing::warn!(id = %scored.item.id, error = %e, "Failed to fetch context");
                }
            }
        }

        self.checkpoint(Step::Context, &enriched);
        Ok(enriched)
    }

    /// Digest input from checkpoints: the context output when it is newer
    /// than the latest filter output, otherwise the filter output itself.
    pub fn digest_input(&self) -> Result<Vec<ScoredItem>, PipelineError> {
        let filtered = self.checkpoints.latest(Step::Filtered)?;
        let step = match self.checkpoints.latest(Step::Context) {
            Ok(context) if context.file_name() > filtered.file_name() => Step::Context,
            Ok(_) | Err(StorageError::NotFound(_)) => Step::Filtered,
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(step = %step, "Loading digest input");
        Ok(load_latest_json(self.checkpoints.as_ref(), step)?)
    }

    /// Stage 5: render and write the digest. `None` when nothing is relevant.
    pub fn build_digest(
        &self,
        relevant: &[ScoredItem],
        total_scraped: usize,
    ) -> Result<Option<PathBuf>, PipelineError> {
        if relevant.is_empty() {
            tracing::info!("Nothing relevant, skipping digest");
            return Ok(None);
        }
        let components = self.snapshot();
        let now = Utc::now();

        let markdown = components.digests.render(relevant, total_scraped, now)?;
        let path = components.digests.write(&components.digest_dir, &markdown, now)?;
        if let Err(e) = self.checkpoints.save_text(Step::Digests, &markdown, "md") {
            tracing::warn!(error = %e, "Failed to save digest checkpoint");
        }
        Ok(Some(path))
    }

    /// Run every stage in order.
    pub async fn generate_digest(&self, cancel: &CancellationToken) -> Result<RunSummary, PipelineError> {
        self.credentials()?;
        tracing::info!("Starting digest run");

        let items = self.scrape(cancel).await?;
        if items.is_empty() {
            tracing::info!("No posts scraped");
            return Ok(RunSummary::stopped(RunOutcome::NoItems, 0, 0));
        }

        let analyses = self.analyze(&items, cancel).await?;
        let relevant = self.filter(&items, &analyses);
        if relevant.is_empty() {
            tracing::info!("No relevant posts");
            return Ok(RunSummary::stopped(
                RunOutcome::NoRelevantItems,
                items.len(),
                analyses.len(),
            ));
        }

        let relevant = self.fetch_context(&relevant, cancel).await?;
        let with_context = relevant.iter().filter(|s| !s.context.is_empty()).count();
        let digest = self.build_digest(&relevant, items.len())?;

        let summary = RunSummary {
            scraped: items.len(),
            analyzed: analyses.len(),
            relevant: relevant.len(),
            with_context,
            digest,
            outcome: RunOutcome::DigestWritten,
        };
        tracing::info!(
            scraped = summary.scraped,
            analyzed = summary.analyzed,
            relevant = summary.relevant,
            with_context = summary.with_context,
            "Digest run complete"
        );
        Ok(summary)
    }

    /// Newest digest in the configured output directory.
    pub fn latest_digest(&self) -> Result<PathBuf, PipelineError> {
        Ok(latest_digest(&self.snapshot().digest_dir)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{Author, Engagement};

    fn item(id: &str) -> ExtractedItem {
        ExtractedItem {
            id: id.to_string(),
            author: Author::new("a", "A"),
            content: String::new(),
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

    fn analysis(id: &str, score: f64) -> AnalysisResult {
        AnalysisResult {
            item_id: id.to_string(),
            relevance_score: score,
            topics: Vec::new(),
            summary: String::new(),
            needs_context: false,
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn test_filter_threshold_is_inclusive() {
        let items = vec![item("1"), item("2"), item("3"), item("4")];
        let analyses = vec![
            analysis("1", 0.4),
            analysis("2", 0.6),
            analysis("3", 0.6),
            analysis("4", 0.9),
        ];

        let relevant = filter_relevant(&items, &analyses, 0.6);
        let ids: Vec<_> = relevant.iter().map(|s| s.item.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "3", "4"]);
    }

    #[test]
    fn test_filter_drops_unanalyzed() {
        let items = vec![item("1"), item("2")];
        let relevant = filter_relevant(&items, &[analysis("2", 1.0)], 0.5);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].item.id, "2");
    }
}
