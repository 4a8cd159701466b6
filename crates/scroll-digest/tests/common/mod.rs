//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use scroll_digest::analysis::{AnalysisResult, ProviderError, ScoringProvider};
use scroll_digest::auth::{Credential, SessionStore, AUTH_TOKEN, CSRF_TOKEN};
use scroll_digest::browser::{BrowserError, BrowserLauncher, BrowserSession, LaunchOptions};
use scroll_digest::config::{AppConfig, Interests};
use scroll_digest::feed::scripts::{
    EXPAND_TRUNCATED_MARKER, EXTRACT_ITEMS_MARKER, SCROLL_PAGE_MARKER,
};
use scroll_digest::feed::{ExtractedItem, ExtractionConfig, ExtractionEngine, ScrollPacing};
use scroll_digest::pipeline::{Components, Pipeline};
use scroll_digest::storage::{CheckpointStore, FileCheckpointStore};

pub const FEED: &str = "https://x.com/home";

// =============================================================================
// Fake browser
// =============================================================================

/// What every session launched by a `FakeLauncher` will see.
#[derive(Default)]
pub struct PageScript {
    /// Successive extraction results per URL. The last page repeats.
    pub pages: HashMap<String, Vec<Value>>,
    /// URLs where no post ever renders.
    pub blank: HashSet<String>,
    /// Reported by `current_url` when set, regardless of navigation.
    pub landing: Option<String>,
    /// `current_url` polls before the browser reports the home page.
    /// `None` keeps it on the login page forever.
    pub login_after: Option<usize>,
    pub cookies: Vec<Credential>,
    /// Extraction reads at or past this index fail.
    pub fail_reads_from: Option<usize>,
    /// Collapsed "Show more" posts on each new session's page.
    pub truncated: usize,
    /// Clicking "Show more" fails.
    pub expand_fails: bool,
}

/// Counters observed by tests.
#[derive(Default)]
pub struct BrowserLog {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
    pub cookies_set: Mutex<Vec<Credential>>,
    pub expansions: AtomicUsize,
}

impl BrowserLog {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn expansions(&self) -> usize {
        self.expansions.load(Ordering::SeqCst)
    }
}

pub struct FakeLauncher {
    script: Arc<PageScript>,
    pub log: Arc<BrowserLog>,
}

impl FakeLauncher {
    pub fn new(script: PageScript) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(script),
            log: Arc::new(BrowserLog::default()),
        })
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            script: Arc::clone(&self.script),
            log: Arc::clone(&self.log),
            url: None,
            reads: 0,
            polls: 0,
            truncated: self.script.truncated,
            closed: false,
        }))
    }
}

struct FakeSession {
    script: Arc<PageScript>,
    log: Arc<BrowserLog>,
    url: Option<String>,
    reads: usize,
    polls: usize,
    truncated: usize,
    closed: bool,
}

impl FakeSession {
    fn next_page(&mut self) -> Result<Value, BrowserError> {
        if self.script.fail_reads_from.is_some_and(|from| self.reads >= from) {
            return Err(BrowserError::Script("page crashed".to_string()));
        }
        let pages = self
            .url
            .as_ref()
            .and_then(|url| self.script.pages.get(url));
        let page = match pages {
            Some(pages) if !pages.is_empty() => pages[self.reads.min(pages.len() - 1)].clone(),
            _ => json!([]),
        };
        self.reads += 1;
        Ok(page)
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        self.log.navigations.lock().unwrap().push(url.to_string());
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let blank = self
            .url
            .as_ref()
            .is_some_and(|url| self.script.blank.contains(url));
        if blank || self.script.landing.is_some() {
            return Err(BrowserError::Timeout {
                what: selector.to_string(),
                after: timeout,
            });
        }
        Ok(())
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, BrowserError> {
        if script.contains(EXTRACT_ITEMS_MARKER) {
            self.next_page()
        } else if script.contains(EXPAND_TRUNCATED_MARKER) {
            if script.ends_with("(\"count\")") {
                Ok(json!(self.truncated))
            } else if self.script.expand_fails {
                Err(BrowserError::Script("click intercepted".to_string()))
            } else if self.truncated > 0 {
                self.truncated -= 1;
                self.log.expansions.fetch_add(1, Ordering::SeqCst);
                Ok(json!(true))
            } else {
                Ok(json!(false))
            }
        } else if script.contains(SCROLL_PAGE_MARKER) {
            Ok(json!(1080))
        } else {
            Ok(Value::Null)
        }
    }

    async fn set_cookies(&mut self, cookies: &[Credential]) -> Result<(), BrowserError> {
        self.log
            .cookies_set
            .lock()
            .unwrap()
            .extend(cookies.iter().cloned());
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<Credential>, BrowserError> {
        Ok(self.script.cookies.clone())
    }

    async fn current_url(&mut self) -> Result<Option<String>, BrowserError> {
        if let Some(landing) = &self.script.landing {
            return Ok(Some(landing.clone()));
        }
        self.polls += 1;
        match self.script.login_after {
            Some(after) if self.polls > after => Ok(Some(FEED.to_string())),
            Some(_) | None => Ok(self.url.clone()),
        }
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        if !self.closed {
            self.closed = true;
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// A record as the extraction script returns it.
pub fn raw_post(id: &str, handle: &str, text: &str) -> Value {
    json!({
        "id": id,
        "authorHandle": handle,
        "authorName": handle.to_uppercase(),
        "content": text,
        "mediaUrls": [],
        "timestamp": "2026-10-01T12:00:00.000Z",
        "likes": "1.2K",
        "retweets": "34",
        "replies": "5",
        "quotes": "0",
        "isRetweet": false,
        "isQuoteTweet": false,
        "isReply": false,
        "originalUrl": post_url(handle, id),
    })
}

pub fn post_url(handle: &str, id: &str) -> String {
    format!("https://x.com/{handle}/status/{id}")
}

pub fn page(posts: &[(&str, &str)]) -> Value {
    Value::Array(
        posts
            .iter()
            .map(|(id, handle)| raw_post(id, handle, &format!("post {id} by {handle}")))
            .collect(),
    )
}

// =============================================================================
// Fake scorer
// =============================================================================

/// Scores post `n` as `n / 10`, capped at 1.0.
#[derive(Default)]
pub struct FakeScorer {
    /// Posts flagged as needing context.
    pub needs_context: HashSet<String>,
    /// Any batch containing this post fails.
    pub fail_on: Option<String>,
    /// Per-call delay is `delay * (10 - first id)`, so later batches finish first.
    pub stagger: Duration,
    /// Fixed delay added to every call.
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub batches: Mutex<Vec<Vec<String>>>,
}

impl FakeScorer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn id_number(item: &ExtractedItem) -> u64 {
    item.id.parse().unwrap_or(0)
}

#[async_trait]
impl ScoringProvider for FakeScorer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(
        &self,
        items: &[ExtractedItem],
        _interests: &Interests,
    ) -> Result<Vec<AnalysisResult>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.batches
            .lock()
            .unwrap()
            .push(items.iter().map(|item| item.id.clone()).collect());

        let first = items.first().map_or(0, id_number);
        let wait = self.delay + self.stagger * 10u64.saturating_sub(first) as u32;
        tokio::time::sleep(wait).await;

        if let Some(fail_on) = &self.fail_on {
            if items.iter().any(|item| &item.id == fail_on) {
                return Err(ProviderError::Incomplete {
                    expected: items.len(),
                    missing: vec![fail_on.clone()],
                });
            }
        }

        Ok(items
            .iter()
            .map(|item| AnalysisResult {
                item_id: item.id.clone(),
                relevance_score: (id_number(item) as f64 / 10.0).min(1.0),
                topics: vec!["rust".to_string()],
                summary: format!("summary of {}", item.id),
                needs_context: self.needs_context.contains(&item.id),
                analyzed_at: Utc::now(),
            })
            .collect())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn items(ids: std::ops::RangeInclusive<u64>) -> Vec<ExtractedItem> {
    ids.map(|id| ExtractedItem {
        id: id.to_string(),
        author: scroll_digest::feed::Author::new("dev", "Dev"),
        content: format!("post {id}"),
        media_urls: Vec::new(),
        posted_at: None,
        engagement: scroll_digest::feed::Engagement::default(),
        is_repost: false,
        is_quote: false,
        is_reply: false,
        url: post_url("dev", &id.to_string()),
        extracted_at: Utc::now(),
    })
    .collect()
}

pub fn session_cookies() -> Vec<Credential> {
    let expires = Utc::now() + ChronoDuration::days(30);
    vec![
        Credential::new(AUTH_TOKEN, "token-value", ".x.com").expiring(expires),
        Credential::new(CSRF_TOKEN, "csrf-value", ".x.com").expiring(expires),
        Credential::new("guest_id", "g", ".twitter.com"),
    ]
}

/// Extraction settings with no pacing delays and short deadlines.
pub fn fast_extraction() -> ExtractionConfig {
    ExtractionConfig {
        feed_timeout: Duration::from_secs(5),
        thread_timeout: Duration::from_secs(5),
        load_timeout: Duration::from_millis(50),
        thread_settle: Duration::ZERO,
        feed_pacing: ScrollPacing::IMMEDIATE,
        thread_pacing: ScrollPacing::IMMEDIATE,
        ..ExtractionConfig::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SessionStore>,
    pub pipeline: Arc<Pipeline>,
}

impl Harness {
    pub fn config_path(&self) -> std::path::PathBuf {
        self.dir.path().join("config.json")
    }

    pub fn digest_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("digests")
    }

    pub fn log_in(&self) {
        self.store.save(session_cookies()).unwrap();
    }
}

pub fn harness(
    launcher: Arc<FakeLauncher>,
    scorer: Arc<FakeScorer>,
    mut config: AppConfig,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SessionStore::new(dir.path().join("cookies.json")));
    let checkpoints: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(dir.path().join("cache")));
    let launcher: Arc<dyn BrowserLauncher> = launcher;

    config.digest.output_dir = Some(dir.path().join("digests"));
    config.save(&dir.path().join("config.json")).unwrap();
    let mut components = Components::build(
        config,
        Arc::clone(&launcher),
        scorer,
        dir.path().join("digests"),
    )
    .unwrap();
    components.engine = ExtractionEngine::new(Arc::clone(&launcher), fast_extraction());

    let pipeline = Pipeline::new(Arc::clone(&store), checkpoints, launcher, components);
    Harness {
        dir,
        store,
        pipeline: Arc::new(pipeline),
    }
}
