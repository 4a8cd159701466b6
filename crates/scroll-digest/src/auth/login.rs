//! Interactive login in a visible browser.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::browser::{BrowserError, BrowserLauncher, BrowserSession, LaunchOptions};

use super::credentials::{Credential, CredentialBundle, AUTH_TOKEN};
use super::store::{SessionError, SessionStore};

pub const LOGIN_URL: &str = "https://x.com/login";

/// Pages that only an authenticated user lands on.
pub const HOME_URLS: &[&str] = &["https://x.com/home", "https://twitter.com/home"];

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login not completed within {0:?}")]
    Timeout(Duration),

    #[error("login cancelled")]
    Cancelled,

    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Progress of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    BrowserLaunched,
    AwaitingUserLogin,
    LoginDetected,
    CredentialsExtracted,
    Saved,
    Failed,
}

impl fmt::Display for LoginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::BrowserLaunched => "browser_launched",
            Self::AwaitingUserLogin => "awaiting_user_login",
            Self::LoginDetected => "login_detected",
            Self::CredentialsExtracted => "credentials_extracted",
            Self::Saved => "saved",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub login_url: String,
    pub home_urls: Vec<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub launch: LaunchOptions,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            login_url: LOGIN_URL.to_string(),
            home_urls: HOME_URLS.iter().map(|u| (*u).to_string()).collect(),
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(5 * 60),
            // The user has to see the page to log in
            launch: LaunchOptions::stealth(false),
        }
    }
}

/// Opens a browser on the login page and waits for the user to finish.
pub struct InteractiveAuthenticator {
    launcher: Arc<dyn BrowserLauncher>,
    store: Arc<SessionStore>,
    config: LoginConfig,
}

impl InteractiveAuthenticator {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        store: Arc<SessionStore>,
        config: LoginConfig,
    ) -> Self {
        Self {
            launcher,
            store,
            config,
        }
    }

    /// Run a full login and persist the captured credentials.
    ///
    /// The browser is closed on every path. Nothing is written unless login
    /// was detected.
    pub async fn login(&self, cancel: &CancellationToken) -> Result<CredentialBundle, AuthError> {
        let mut state = LoginState::Idle;
        let result = self.attempt(&mut state, cancel).await;
        if let Err(e) = &result {
            advance(&mut state, LoginState::Failed);
            tracing::warn!(error = %e, "Login failed");
        }
        result
    }

    async fn attempt(
        &self,
        state: &mut LoginState,
        cancel: &CancellationToken,
    ) -> Result<CredentialBundle, AuthError> {
        let mut session = self.launcher.launch(&self.config.launch).await?;
        advance(state, LoginState::BrowserLaunched);

        let captured = self.await_login(session.as_mut(), state, cancel).await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "Failed to close login browser");
        }
        let credentials = captured?;
        advance(state, LoginState::CredentialsExtracted);

        let bundle = self.store.save(credentials)?;
        advance(state, LoginState::Saved);
        if !bundle.is_valid() {
            tracing::warn!("Saved cookies are session-only; the session will not be reusable");
        }
        Ok(bundle)
    }

    async fn await_login(
        &self,
        session: &mut dyn BrowserSession,
        state: &mut LoginState,
        cancel: &CancellationToken,
    ) -> Result<Vec<Credential>, AuthError> {
        session.navigate(&self.config.login_url).await?;
        advance(state, LoginState::AwaitingUserLogin);
        tracing::info!(
            timeout_secs = self.config.timeout.as_secs(),
            "Waiting for user to log in"
        );

        let deadline = tokio::time::sleep(self.config.timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(AuthError::Cancelled),
                () = &mut deadline => return Err(AuthError::Timeout(self.config.timeout)),
                _ = ticker.tick() => {
                    if let Some(credentials) = self.check_logged_in(session).await? {
                        advance(state, LoginState::LoginDetected);
                        return Ok(credentials);
                    }
                }
            }
        }
    }

    /// Both signals are required: a post-login URL and a non-empty token.
    async fn check_logged_in(
        &self,
        session: &mut dyn BrowserSession,
    ) -> Result<Option<Vec<Credential>>, AuthError> {
        let url = session.current_url().await?.unwrap_or_default();
        if !is_home_url(&url, &self.config.home_urls) {
            return Ok(None);
        }

        let cookies = session.cookies().await?;
        let has_token = cookies
            .iter()
            .any(|c| c.name == AUTH_TOKEN && !c.value.is_empty());
        if !has_token {
            tracing::debug!(url, "On home page but auth token not set yet");
            return Ok(None);
        }
        Ok(Some(cookies))
    }

    /// Remove stored credentials. Logging out twice is not an error.
    pub fn logout(&self) -> Result<(), AuthError> {
        match self.store.clear() {
            Ok(()) | Err(SessionError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn advance(state: &mut LoginState, next: LoginState) {
    tracing::debug!(from = %state, to = %next, "Login state");
    *state = next;
}

/// Compare scheme, host and path. Query and fragment are ignored.
fn is_home_url(current: &str, home_urls: &[String]) -> bool {
    let Ok(current) = url::Url::parse(current) else {
        return false;
    };
    home_urls.iter().any(|expected| {
        url::Url::parse(expected).is_ok_and(|expected| {
            current.scheme() == expected.scheme()
                && current.host_str() == expected.host_str()
                && current.path().trim_end_matches('/') == expected.path().trim_end_matches('/')
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn homes() -> Vec<String> {
        HOME_URLS.iter().map(|u| (*u).to_string()).collect()
    }

    #[test]
    fn test_home_url_detection() {
        assert!(is_home_url("https://x.com/home", &homes()));
        assert!(is_home_url("https://x.com/home/", &homes()));
        assert!(is_home_url("https://twitter.com/home?lang=en", &homes()));
        assert!(!is_home_url("https://x.com/login", &homes()));
        assert!(!is_home_url("https://x.com/i/flow/login", &homes()));
        assert!(!is_home_url("https://evil.com/home", &homes()));
        assert!(!is_home_url("", &homes()));
    }
}
