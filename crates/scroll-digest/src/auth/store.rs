//! Credential persistence.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::write_atomic;

use super::credentials::{Credential, CredentialBundle};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no saved session at {0}")]
    NotFound(PathBuf),

    #[error("saved session at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("session storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Stores one credential bundle as an owner-only JSON file.
///
/// Writes go through a temp file and rename, so a concurrent reader sees
/// either the previous bundle or the new one.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist a bundle, replacing any previous one.
    ///
    /// The expiration is recomputed from the credentials before writing.
    pub fn save(&self, credentials: Vec<Credential>) -> Result<CredentialBundle, SessionError> {
        let bundle = CredentialBundle::new(credentials);
        self.save_bundle(&bundle)?;
        Ok(bundle)
    }

    pub fn save_bundle(&self, bundle: &CredentialBundle) -> Result<(), SessionError> {
        let mut bundle = bundle.clone();
        bundle.expires_at = CredentialBundle::compute_expiration(&bundle.credentials);

        let content = serde_json::to_vec_pretty(&bundle).map_err(|source| SessionError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &content).map_err(|source| SessionError::Storage {
            path: self.path.clone(),
            source,
        })?;

        tracing::info!(
            path = %self.path.display(),
            credentials = bundle.credentials.len(),
            expires_at = ?bundle.expires_at,
            "Saved session"
        );
        Ok(())
    }

    pub fn load(&self) -> Result<CredentialBundle, SessionError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SessionError::NotFound(self.path.clone()));
            }
            Err(source) => {
                return Err(SessionError::Storage {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        serde_json::from_str(&content).map_err(|source| SessionError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Whether a usable session exists right now. Never fails.
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.load() {
            Ok(bundle) => bundle.is_valid_at(now),
            Err(SessionError::NotFound(_)) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Treating unreadable session as invalid");
                false
            }
        }
    }

    /// Delete the saved bundle.
    pub fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Cleared session");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SessionError::NotFound(self.path.clone()))
            }
            Err(source) => Err(SessionError::Storage {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Saved credentials that apply to `domain_suffix`.
    pub fn scoped_credentials(&self, domain_suffix: &str) -> Result<Vec<Credential>, SessionError> {
        Ok(self.load()?.scoped(domain_suffix))
    }
}
