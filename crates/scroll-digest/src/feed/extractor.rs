//! Scroll-and-collect extraction from the rendered feed.

use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::auth::Credential;
use crate::browser::{BrowserError, BrowserLauncher, BrowserSession, LaunchOptions};
use crate::config::ScrapingConfig;

use super::parser::{self, RawItem, View};
use super::scripts;
use super::types::ExtractedItem;

/// Home timeline.
pub const FEED_URL: &str = "https://x.com/home";

/// One rendered post.
pub const ITEM_SELECTOR: &str = r#"article[data-testid="tweet"]"#;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("page did not load at {url}: {source}")]
    Navigation {
        url: String,
        #[source]
        source: BrowserError,
    },

    #[error("session rejected: redirected to {url}")]
    SessionRejected { url: String },

    #[error("content script failed: {0}")]
    Script(#[source] BrowserError),

    #[error("content script returned unexpected data: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("extraction did not finish within {0:?}")]
    Timeout(Duration),

    #[error("extraction cancelled")]
    Cancelled,

    #[error("invalid post url: {0}")]
    InvalidUrl(String),
}

/// Delays between scroll steps and "Show more" clicks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollPacing {
    pub base_delay: Duration,
    /// Added once per completed attempt.
    pub per_attempt: Duration,
    /// Upper bound of the random extra delay.
    pub max_jitter: Duration,
    pub click_pause: Duration,
    pub click_jitter: Duration,
}

impl ScrollPacing {
    pub const FEED: Self = Self {
        base_delay: Duration::from_millis(500),
        per_attempt: Duration::from_millis(100),
        max_jitter: Duration::from_millis(200),
        click_pause: Duration::from_millis(250),
        click_jitter: Duration::from_millis(250),
    };

    pub const THREAD: Self = Self {
        base_delay: Duration::from_millis(800),
        per_attempt: Duration::from_millis(150),
        max_jitter: Duration::from_millis(200),
        click_pause: Duration::from_millis(250),
        click_jitter: Duration::from_millis(250),
    };

    /// No waiting at all.
    pub const IMMEDIATE: Self = Self {
        base_delay: Duration::ZERO,
        per_attempt: Duration::ZERO,
        max_jitter: Duration::ZERO,
        click_pause: Duration::ZERO,
        click_jitter: Duration::ZERO,
    };

    /// Delay after scroll number `attempt` (zero based).
    pub fn scroll_delay(&self, attempt: usize) -> Duration {
        self.base_delay + self.per_attempt * attempt as u32 + jitter(self.max_jitter)
    }

    pub fn click_delay(&self) -> Duration {
        self.click_pause + jitter(self.click_jitter)
    }
}

fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Scroll attempts allowed for a feed run: one per five posts wanted.
pub fn feed_attempts(target: usize) -> usize {
    target.div_ceil(5).max(1)
}

/// Scroll attempts allowed for a thread run.
pub fn thread_attempts(target: usize) -> usize {
    target / 3 + 5
}

#[derive(Debug, Clone)]
pub struct ExtractionConfig {
    pub feed_url: String,
    pub launch: LaunchOptions,
    pub feed_timeout: Duration,
    pub thread_timeout: Duration,
    /// How long to wait for the first post to render.
    pub load_timeout: Duration,
    /// Pause after a thread page loads before reading it.
    pub thread_settle: Duration,
    pub feed_pacing: ScrollPacing,
    pub thread_pacing: ScrollPacing,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self::from_scraping(&ScrapingConfig::default())
    }
}

impl ExtractionConfig {
    pub fn from_scraping(scraping: &ScrapingConfig) -> Self {
        Self {
            feed_url: FEED_URL.to_string(),
            launch: LaunchOptions::stealth(scraping.headless),
            feed_timeout: Duration::from_secs(scraping.feed_timeout_secs),
            thread_timeout: Duration::from_secs(scraping.thread_timeout_secs),
            load_timeout: Duration::from_secs(30),
            thread_settle: Duration::from_secs(2),
            feed_pacing: ScrollPacing::FEED,
            thread_pacing: ScrollPacing::THREAD,
        }
    }
}

/// Ordered, de-duplicated, bounded collection of items.
#[derive(Debug)]
pub struct ItemAccumulator {
    items: Vec<ExtractedItem>,
    seen: HashSet<String>,
    target: usize,
}

impl ItemAccumulator {
    pub fn new(target: usize) -> Self {
        Self {
            items: Vec::with_capacity(target),
            seen: HashSet::with_capacity(target),
            target,
        }
    }

    /// Add unseen candidates in order until full. Returns how many were new.
    pub fn absorb(&mut self, candidates: Vec<ExtractedItem>) -> usize {
        let before = self.items.len();
        for item in candidates {
            if self.is_full() {
                break;
            }
            if self.seen.insert(item.id.clone()) {
                self.items.push(item);
            }
        }
        self.items.len() - before
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.target
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_items(self) -> Vec<ExtractedItem> {
        self.items
    }
}

#[derive(Debug, Clone, Copy)]
struct CollectPlan<'a> {
    view: View,
    target: usize,
    max_attempts: usize,
    pacing: ScrollPacing,
    /// Post id never collected (the thread root).
    skip_id: Option<&'a str>,
}

/// Drives a browser through the feed or a thread and collects posts.
///
/// Each call launches its own browser and closes it before returning.
pub struct ExtractionEngine {
    launcher: Arc<dyn BrowserLauncher>,
    config: ExtractionConfig,
}

impl ExtractionEngine {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, config: ExtractionConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Collect up to `target` posts from the home feed.
    pub async fn extract_feed(
        &self,
        credentials: &[Credential],
        target: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedItem>, ExtractionError> {
        if target == 0 {
            return Ok(Vec::new());
        }
        tracing::info!(target, "Extracting feed");

        let plan = CollectPlan {
            view: View::Feed,
            target,
            max_attempts: feed_attempts(target),
            pacing: self.config.feed_pacing,
            skip_id: None,
        };
        let items = self
            .run(
                credentials,
                &self.config.feed_url,
                plan,
                self.config.feed_timeout,
                cancel,
            )
            .await?;

        tracing::info!(count = items.len(), target, "Feed extraction complete");
        Ok(items)
    }

    /// Collect up to `target` replies from a post's thread page.
    ///
    /// The root post itself is never returned.
    pub async fn extract_thread(
        &self,
        credentials: &[Credential],
        item_url: &str,
        target: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedItem>, ExtractionError> {
        if url::Url::parse(item_url).is_err() {
            return Err(ExtractionError::InvalidUrl(item_url.to_string()));
        }
        let root_id = parser::extract_item_id(item_url)
            .ok_or_else(|| ExtractionError::InvalidUrl(item_url.to_string()))?;
        if target == 0 {
            return Ok(Vec::new());
        }
        tracing::debug!(url = item_url, target, "Extracting thread");

        let plan = CollectPlan {
            view: View::Thread,
            target,
            max_attempts: thread_attempts(target),
            pacing: self.config.thread_pacing,
            skip_id: Some(root_id.as_str()),
        };
        self.run(
            credentials,
            item_url,
            plan,
            self.config.thread_timeout,
            cancel,
        )
        .await
    }

    async fn run(
        &self,
        credentials: &[Credential],
        url: &str,
        plan: CollectPlan<'_>,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtractedItem>, ExtractionError> {
        let mut session = self.launcher.launch(&self.config.launch).await?;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(ExtractionError::Cancelled),
            result = tokio::time::timeout(
                deadline,
                self.load_and_collect(session.as_mut(), credentials, url, plan),
            ) => result.unwrap_or(Err(ExtractionError::Timeout(deadline))),
        };

        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close extraction browser");
        }
        outcome
    }

    async fn load_and_collect(
        &self,
        session: &mut dyn BrowserSession,
        credentials: &[Credential],
        url: &str,
        plan: CollectPlan<'_>,
    ) -> Result<Vec<ExtractedItem>, ExtractionError> {
        session.set_cookies(credentials).await?;
        session
            .navigate(url)
            .await
            .map_err(|source| ExtractionError::Navigation {
                url: url.to_string(),
                source,
            })?;

        if let Err(source) = session
            .wait_for_selector(ITEM_SELECTOR, self.config.load_timeout)
            .await
        {
            let landed = session.current_url().await.ok().flatten().unwrap_or_default();
            if landed.contains("/login") || landed.contains("/flow") {
                return Err(ExtractionError::SessionRejected { url: landed });
            }
            return Err(ExtractionError::Navigation {
                url: url.to_string(),
                source,
            });
        }

        if plan.view == View::Thread && !self.config.thread_settle.is_zero() {
            tokio::time::sleep(self.config.thread_settle).await;
        }

        scroll_collect(session, plan).await
    }
}

async fn scroll_collect(
    session: &mut dyn BrowserSession,
    plan: CollectPlan<'_>,
) -> Result<Vec<ExtractedItem>, ExtractionError> {
    let mut accumulator = ItemAccumulator::new(plan.target);

    for attempt in 0..plan.max_attempts {
        expand_truncated(session, &plan.pacing).await;

        let mut visible = read_visible(session, plan.view).await?;
        if let Some(skip_id) = plan.skip_id {
            visible.retain(|item| item.id != skip_id);
        }
        let fresh = accumulator.absorb(visible);
        tracing::debug!(
            attempt,
            fresh,
            collected = accumulator.len(),
            target = plan.target,
            "Scroll step"
        );

        if accumulator.is_full() {
            break;
        }

        session
            .evaluate(&scripts::scroll_page())
            .await
            .map_err(ExtractionError::Script)?;
        tokio::time::sleep(plan.pacing.scroll_delay(attempt)).await;
    }

    if !accumulator.is_full() {
        tracing::debug!(
            collected = accumulator.len(),
            target = plan.target,
            "Attempt ceiling reached before target"
        );
    }
    Ok(accumulator.into_items())
}

async fn read_visible(
    session: &mut dyn BrowserSession,
    view: View,
) -> Result<Vec<ExtractedItem>, ExtractionError> {
    let value = session
        .evaluate(&scripts::extract_items())
        .await
        .map_err(ExtractionError::Script)?;
    let raw: Vec<RawItem> = serde_json::from_value(value).map_err(ExtractionError::Decode)?;
    Ok(parser::normalize(raw, Utc::now(), view))
}

/// Click every "Show more" link. Failures only cost content completeness.
async fn expand_truncated(session: &mut dyn BrowserSession, pacing: &ScrollPacing) {
    let count = match session.evaluate(&scripts::count_truncated()).await {
        Ok(value) => value.as_u64().unwrap_or(0),
        Err(e) => {
            tracing::warn!(error = %e, "Could not count truncated posts");
            return;
        }
    };

    for _ in 0..count {
        match session.evaluate(&scripts::expand_next_truncated()).await {
            Ok(value) if value.as_bool() == Some(true) => {}
            Ok(_) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to expand truncated post");
                break;
            }
        }
        tokio::time::sleep(pacing.click_delay()).await;
    }
}
