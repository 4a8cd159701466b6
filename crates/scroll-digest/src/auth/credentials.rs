//! Browser cookies and the bundle persisted after login.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The long-lived session cookie.
pub const AUTH_TOKEN: &str = "auth_token";
/// The CSRF token cookie.
pub const CSRF_TOKEN: &str = "ct0";

/// Cookies whose expiry bounds the whole bundle.
const REQUIRED: [&str; 2] = [AUTH_TOKEN, CSRF_TOKEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A single browser cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,
    /// `None` for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl Credential {
    /// A secure cookie scoped to `/`.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".to_string(),
            secure: true,
            http_only: false,
            same_site: None,
            expires: None,
        }
    }

    #[must_use]
    pub fn expiring(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    /// True when the cookie domain is `suffix` or a subdomain of it.
    ///
    /// A leading dot on either side is ignored, so `.x.com` and `x.com`
    /// both match `x.com`.
    pub fn matches_domain(&self, suffix: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        let suffix = suffix.trim_start_matches('.');
        domain == suffix
            || domain
                .strip_suffix(suffix)
                .is_some_and(|prefix| prefix.ends_with('.'))
    }
}

/// Everything captured from a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub credentials: Vec<Credential>,
    pub captured_at: DateTime<Utc>,
    /// Earliest expiry of the required cookies. `None` makes the bundle invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl CredentialBundle {
    /// Bundle credentials captured now.
    pub fn new(credentials: Vec<Credential>) -> Self {
        Self::captured_at(credentials, Utc::now())
    }

    pub fn captured_at(credentials: Vec<Credential>, captured_at: DateTime<Utc>) -> Self {
        let expires_at = Self::compute_expiration(&credentials);
        Self {
            credentials,
            captured_at,
            expires_at,
        }
    }

    /// Earliest expiry among the required cookies.
    ///
    /// `None` when either required cookie is missing or is a session cookie;
    /// session cookies die with the browser that set them.
    pub fn compute_expiration(credentials: &[Credential]) -> Option<DateTime<Utc>> {
        REQUIRED
            .iter()
            .map(|name| {
                credentials
                    .iter()
                    .find(|c| c.name == *name)
                    .and_then(|c| c.expires)
            })
            .collect::<Option<Vec<_>>>()?
            .into_iter()
            .min()
    }

    pub fn get(&self, name: &str) -> Option<&Credential> {
        self.credentials.iter().find(|c| c.name == name)
    }

    fn has_value(&self, name: &str) -> bool {
        self.get(name).is_some_and(|c| !c.value.is_empty())
    }

    /// Both required cookies are present, persistent, and unexpired at `now`.
    ///
    /// A bundle expiring exactly at `now` is already invalid.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if !REQUIRED.iter().all(|name| self.has_value(name)) {
            return false;
        }
        Self::compute_expiration(&self.credentials).is_some_and(|expires| expires > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Credentials applicable to `domain_suffix`, in capture order.
    pub fn scoped(&self, domain_suffix: &str) -> Vec<Credential> {
        self.credentials
            .iter()
            .filter(|c| c.matches_domain(domain_suffix))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn bundle_expiring(auth: Option<DateTime<Utc>>, ct0: Option<DateTime<Utc>>) -> CredentialBundle {
        let mut auth_cookie = Credential::new(AUTH_TOKEN, "token", ".x.com");
        auth_cookie.expires = auth;
        let mut ct0_cookie = Credential::new(CSRF_TOKEN, "csrf", ".x.com");
        ct0_cookie.expires = ct0;
        CredentialBundle::new(vec![auth_cookie, ct0_cookie])
    }

    #[test]
    fn test_expiration_is_earliest_required() {
        let now = Utc::now();
        let early = now + Duration::hours(1);
        let late = now + Duration::days(30);

        let mut bundle = bundle_expiring(Some(late), Some(early));
        // Unrelated cookies never shorten the bundle lifetime
        bundle
            .credentials
            .push(Credential::new("guest_id", "g", ".x.com").expiring(now));
        assert_eq!(
            CredentialBundle::compute_expiration(&bundle.credentials),
            Some(early)
        );
    }

    #[test]
    fn test_validity_boundaries() {
        let now = Utc::now();

        let later = now + Duration::days(1);

        let bundle = bundle_expiring(Some(now + Duration::seconds(1)), Some(later));
        assert!(bundle.is_valid_at(now));

        let bundle = bundle_expiring(Some(now), Some(later));
        assert!(!bundle.is_valid_at(now));

        let bundle = bundle_expiring(Some(later), Some(now - Duration::seconds(1)));
        assert!(!bundle.is_valid_at(now));
    }

    #[test]
    fn test_session_cookies_are_not_a_valid_login() {
        let now = Utc::now();
        let later = now + Duration::days(1);

        let bundle = bundle_expiring(None, None);
        assert_eq!(bundle.expires_at, None);
        assert!(!bundle.is_valid_at(now));

        let bundle = bundle_expiring(Some(later), None);
        assert_eq!(bundle.expires_at, None);
        assert!(!bundle.is_valid_at(now));

        let bundle = bundle_expiring(None, Some(later));
        assert!(!bundle.is_valid_at(now));
    }

    #[test]
    fn test_missing_required_cookie_is_invalid() {
        let bundle = CredentialBundle::new(vec![Credential::new(AUTH_TOKEN, "token", ".x.com")]);
        assert!(!bundle.is_valid());

        let bundle = CredentialBundle::new(vec![
            Credential::new(AUTH_TOKEN, "", ".x.com"),
            Credential::new(CSRF_TOKEN, "csrf", ".x.com"),
        ]);
        assert!(!bundle.is_valid());
    }

    #[test]
    fn test_scoped_filters_by_domain() {
        let bundle = CredentialBundle::new(vec![
            Credential::new(AUTH_TOKEN, "a", ".x.com"),
            Credential::new("lang", "en", "x.com"),
            Credential::new("sub", "s", "api.x.com"),
            Credential::new("other", "o", ".twitter.com"),
            Credential::new("lookalike", "l", "notx.com"),
        ]);

        let names: Vec<_> = bundle
            .scoped("x.com")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec![AUTH_TOKEN, "lang", "sub"]);
    }
}
