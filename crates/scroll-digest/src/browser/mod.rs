//! Browser automation seam.
//!
//! Login and extraction only talk to these traits; `ChromiumLauncher` drives
//! a real Chrome over CDP, tests substitute scripted sessions.

mod chromium;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::auth::Credential;

pub use chromium::ChromiumLauncher;

/// Desktop Chrome on macOS. Matches what a regular visitor sends.
pub const STEALTH_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Chrome flags applied to every launch.
const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-extensions",
    "--disable-default-apps",
    "--disable-infobars",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-dev-shm-usage",
];

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("cookie operation failed: {0}")]
    Cookies(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

/// How to start a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    pub user_agent: String,
    pub window_size: (u32, u32),
    /// Appended after the stealth flags.
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    /// Options that present as an ordinary desktop browser.
    pub fn stealth(headless: bool) -> Self {
        Self {
            headless,
            user_agent: STEALTH_USER_AGENT.to_string(),
            window_size: (1920, 1080),
            extra_args: Vec::new(),
        }
    }

    /// Full Chrome argument list.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = STEALTH_ARGS.iter().map(|a| (*a).to_string()).collect();
        args.push(format!("--user-agent={}", self.user_agent));
        if self.headless {
            args.push("--disable-gpu".to_string());
        } else {
            args.push("--start-maximized".to_string());
        }
        if in_container() {
            args.push("--no-sandbox".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

fn in_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var_os("KUBERNETES_SERVICE_HOST").is_some()
}

/// Starts browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// One browser with a single page.
///
/// A session is driven by one task at a time. `close` must be called on
/// every exit path; dropping without closing kills the process.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError>;

    /// Wait until `selector` matches at least one element.
    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError>;

    /// Evaluate a JavaScript expression and return its JSON value.
    ///
    /// Expressions without a value yield `Value::Null`.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, BrowserError>;

    async fn set_cookies(&mut self, cookies: &[Credential]) -> Result<(), BrowserError>;

    /// All cookies visible to the browser, including HttpOnly ones.
    async fn cookies(&mut self) -> Result<Vec<Credential>, BrowserError>;

    async fn current_url(&mut self) -> Result<Option<String>, BrowserError>;

    /// Shut the browser down. Safe to call more than once.
    async fn close(&mut self) -> Result<(), BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stealth_args() {
        let args = LaunchOptions::stealth(true).args();
        assert!(args.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(args.contains(&"--disable-gpu".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-agent=Mozilla/5.0")));
        assert!(!args.contains(&"--start-maximized".to_string()));
    }

    #[test]
    fn test_headful_args() {
        let mut options = LaunchOptions::stealth(false);
        options.extra_args.push("--lang=en-US".to_string());
        let args = options.args();
        assert!(args.contains(&"--start-maximized".to_string()));
        assert!(!args.contains(&"--disable-gpu".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--lang=en-US"));
    }
}
