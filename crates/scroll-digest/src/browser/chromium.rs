//! Chrome over CDP via chromiumoxide.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::Page;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::auth::{Credential, SameSite};

use super::{BrowserError, BrowserLauncher, BrowserSession, LaunchOptions};

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Launches a local Chrome/Chromium.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let (width, height) = options.window_size;
        let mut builder = BrowserConfig::builder().window_size(width, height);
        if !options.headless {
            builder = builder.with_head();
        }
        for arg in options.args() {
            builder = builder.arg(arg);
        }
        let config = builder
            .build()
            .map_err(|e| BrowserError::Launch(format!("invalid browser config: {e}")))?;

        tracing::debug!(headless = options.headless, "Launching Chrome");
        let (mut browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser.close().await;
                handle.abort();
                return Err(BrowserError::Launch(format!("failed to open page: {e}")));
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler: Some(handle),
        }))
    }
}

struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: Option<JoinHandle<()>>,
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if let Some(handle) = self.handler.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> Result<(), BrowserError> {
        tracing::debug!(url, "Navigating");
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let page = &self.page;
        let found = tokio::time::timeout(timeout, async {
            loop {
                if page.find_element(selector).await.is_ok() {
                    return;
                }
                tokio::time::sleep(SELECTOR_POLL).await;
            }
        })
        .await;

        found.map_err(|_| BrowserError::Timeout {
            what: selector.to_string(),
            after: timeout,
        })
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn set_cookies(&mut self, cookies: &[Credential]) -> Result<(), BrowserError> {
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>, _>>()?;
        self.page
            .set_cookies(params)
            .await
            .map_err(|e| BrowserError::Cookies(e.to_string()))?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<Credential>, BrowserError> {
        // CDP sees HttpOnly cookies that document.cookie hides
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Cookies(e.to_string()))?;
        Ok(cookies.into_iter().map(from_cdp_cookie).collect())
    }

    async fn current_url(&mut self) -> Result<Option<String>, BrowserError> {
        self.page
            .url()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), BrowserError> {
        let Some(handle) = self.handler.take() else {
            return Ok(());
        };
        let closed = self
            .browser
            .close()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()));
        if closed.is_err() {
            handle.abort();
        }
        match handle.await {
            Err(e) if !e.is_cancelled() => {
                tracing::debug!(error = %e, "Browser handler task ended abnormally");
            }
            _ => {}
        }
        closed.map(|_| ())
    }
}

fn to_cookie_param(credential: &Credential) -> Result<CookieParam, BrowserError> {
    let mut builder = CookieParam::builder()
        .name(credential.name.clone())
        .value(credential.value.clone())
        .domain(credential.domain.clone())
        .path(credential.path.clone())
        .secure(credential.secure)
        .http_only(credential.http_only);
    if let Some(same_site) = credential.same_site {
        builder = builder.same_site(match same_site {
            SameSite::Strict => CookieSameSite::Strict,
            SameSite::Lax => CookieSameSite::Lax,
            SameSite::None => CookieSameSite::None,
        });
    }
    if let Some(expires) = credential.expires {
        builder = builder.expires(TimeSinceEpoch::new(expires.timestamp() as f64));
    }
    builder
        .build()
        .map_err(|e| BrowserError::Cookies(format!("invalid cookie {}: {e}", credential.name)))
}

fn from_cdp_cookie(cookie: Cookie) -> Credential {
    let expires = if cookie.session || cookie.expires <= 0.0 {
        None
    } else {
        DateTime::<Utc>::from_timestamp(cookie.expires as i64, 0)
    };
    Credential {
        name: cookie.name,
        value: cookie.value,
        domain: cookie.domain,
        path: cookie.path,
        secure: cookie.secure,
        http_only: cookie.http_only,
        same_site: cookie.same_site.map(|s| match s {
            CookieSameSite::Strict => SameSite::Strict,
            CookieSameSite::Lax => SameSite::Lax,
            CookieSameSite::None => SameSite::None,
        }),
        expires,
    }
}
