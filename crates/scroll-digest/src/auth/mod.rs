//! Authentication for X.
//!
//! Provides interactive browser login and credential persistence.

mod credentials;
mod login;
mod store;

pub use credentials::{Credential, CredentialBundle, SameSite, AUTH_TOKEN, CSRF_TOKEN};
pub use login::{AuthError, InteractiveAuthenticator, LoginConfig, LoginState, HOME_URLS, LOGIN_URL};
pub use store::{SessionError, SessionStore};
