//! Application configuration.
//!
//! Persisted as JSON under the platform config directory and created with
//! defaults on first use.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::write_atomic;

/// Directory name used under the platform config and cache roots.
pub const APP_DIR: &str = "scroll-digest";

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SCROLL_DIGEST_CONFIG";

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no platform {0} directory available")]
    NoPlatformDir(&'static str),

    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the user cares about. Fed verbatim into the scoring prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interests {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub priority_accounts: Vec<String>,
    #[serde(default)]
    pub muted_keywords: Vec<String>,
    #[serde(default)]
    pub muted_accounts: Vec<String>,
}

impl Interests {
    /// True when nothing at all is configured.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.priority_accounts.is_empty()
            && self.muted_keywords.is_empty()
            && self.muted_accounts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Posts to collect from the feed per run.
    pub posts_per_scrape: usize,
    /// Run the scraping browser without a window.
    pub headless: bool,
    /// Deadline for a whole feed extraction run.
    pub feed_timeout_secs: u64,
    /// Deadline for a whole thread extraction run.
    pub thread_timeout_secs: u64,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            posts_per_scrape: 100,
            headless: true,
            feed_timeout_secs: 5 * 60,
            thread_timeout_secs: 2 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Provider name as registered in the LLM registry.
    pub provider: String,
    pub model: String,
    /// Falls back to `ANTHROPIC_API_KEY` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Minimum score (inclusive) for a post to reach the digest.
    pub relevance_threshold: f64,
    /// Posts per provider call.
    pub batch_size: usize,
    pub request_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: llm::anthropic::default_model().to_string(),
            api_key: None,
            relevance_threshold: 0.6,
            batch_size: 10,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    /// Where rendered digests are written. Defaults to the cache root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    pub max_posts: usize,
    /// Fetch replies for posts the model flagged as needing context.
    pub include_context: bool,
    pub context_replies: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            max_posts: 20,
            include_context: true,
            context_replies: 3,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub interests: Interests,
    pub scraping: ScrapingConfig,
    pub analysis: AnalysisConfig,
    pub digest: DigestConfig,
}

impl AppConfig {
    /// Load from `path`, writing defaults there first if the file is missing.
    pub fn load_or_init(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "Wrote default configuration");
            return Ok(config.with_env_overrides());
        }
        Self::load(path)
    }

    /// Load and validate an existing config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config.with_env_overrides())
    }

    /// Save to a JSON file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, content.as_bytes()).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "analysis.batch_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.analysis.relevance_threshold) {
            return Err(ConfigError::Invalid(format!(
                "analysis.relevance_threshold must be within 0.0-1.0, got {}",
                self.analysis.relevance_threshold
            )));
        }
        if self.scraping.posts_per_scrape == 0 {
            return Err(ConfigError::Invalid(
                "scraping.posts_per_scrape must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if self.analysis.api_key.is_none() {
            self.analysis.api_key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.is_empty());
        }
        self
    }

    /// Digest output directory, falling back to `<cache>/digests`.
    pub fn digest_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.digest.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(cache_dir()?.join("digests")),
        }
    }
}

/// `<config_dir>/scroll-digest`.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoPlatformDir("config"))
}

/// `<cache_dir>/scroll-digest`.
pub fn cache_dir() -> Result<PathBuf, ConfigError> {
    dirs::cache_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoPlatformDir("cache"))
}

/// Config file path, honoring `SCROLL_DIGEST_CONFIG`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_dir()?.join("config.json"))
}

/// Credential bundle location.
pub fn default_session_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("cookies.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.scraping.posts_per_scrape, 100);
        assert_eq!(config.analysis.batch_size, 10);
        assert!((config.analysis.relevance_threshold - 0.6).abs() < f64::EPSILON);
        assert!(config.digest.include_context);
        assert!(config.interests.is_empty());
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/config.json");

        let config = AppConfig::load_or_init(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.analysis.batch_size, 10);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"interests": {"keywords": ["rust"]}, "analysis": {"batch_size": 4}}"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.interests.keywords, vec!["rust".to_string()]);
        assert_eq!(config.analysis.batch_size, 4);
        assert_eq!(config.analysis.model, "claude-sonnet-4-20250514");
        assert_eq!(config.scraping.posts_per_scrape, 100);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.analysis.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.analysis.relevance_threshold = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
