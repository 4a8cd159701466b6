//! Timestamped stage checkpoints.
//!
//! Every pipeline stage persists its output so later stages can be rerun in
//! isolation. Files live at `<root>/<step>/<timestamp>-<suffix>.<ext>`; the
//! timestamp prefix makes lexical order equal chronological order.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use super::atomic::write_atomic;

/// Checkpoint categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Posts,
    Analyses,
    Filtered,
    Context,
    Digests,
    /// Raw provider exchanges, one file per scoring call.
    LlmExchanges,
}

impl Step {
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Posts => "step1_posts",
            Self::Analyses => "step2_analyses",
            Self::Filtered => "step3_filtered",
            Self::Context => "step4_context",
            Self::Digests => "step5_digests",
            Self::LlmExchanges => "llm",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode checkpoint {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no checkpoint found for {0}")]
    NotFound(Step),
}

/// Persists opaque stage payloads.
pub trait CheckpointStore: Send + Sync {
    /// Save a JSON payload, returning the written path.
    fn save(&self, step: Step, payload: &serde_json::Value) -> Result<PathBuf, StorageError>;

    /// Save a text payload with the given file extension.
    fn save_text(&self, step: Step, content: &str, extension: &str)
        -> Result<PathBuf, StorageError>;

    /// Path of the newest checkpoint for `step`.
    fn latest(&self, step: Step) -> Result<PathBuf, StorageError>;

    /// Read the newest JSON checkpoint for `step`.
    fn load_latest(&self, step: Step) -> Result<serde_json::Value, StorageError> {
        let path = self.latest(step)?;
        let content = std::fs::read_to_string(&path).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StorageError::Decode { path, source })
    }
}

/// Serialize `data` and save it as a checkpoint.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn CheckpointStore,
    step: Step,
    data: &T,
) -> Result<PathBuf, StorageError> {
    let payload = serde_json::to_value(data).map_err(StorageError::Encode)?;
    store.save(step, &payload)
}

/// Load and deserialize the newest checkpoint for `step`.
pub fn load_latest_json<T: DeserializeOwned>(
    store: &dyn CheckpointStore,
    step: Step,
) -> Result<T, StorageError> {
    let payload = store.load_latest(step)?;
    serde_json::from_value(payload).map_err(|source| StorageError::Decode {
        path: PathBuf::from(step.dir_name()),
        source,
    })
}

/// Checkpoints stored as files under a root directory.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn next_path(&self, step: Step, extension: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let suffix = Uuid::new_v4().simple().to_string();
        self.root
            .join(step.dir_name())
            .join(format!("{stamp}-{}.{extension}", &suffix[..8]))
    }

    fn write(&self, path: PathBuf, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        write_atomic(&path, bytes).map_err(|source| StorageError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Saved checkpoint");
        Ok(path)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, step: Step, payload: &serde_json::Value) -> Result<PathBuf, StorageError> {
        let content = serde_json::to_vec_pretty(payload).map_err(StorageError::Encode)?;
        self.write(self.next_path(step, "json"), &content)
    }

    fn save_text(
        &self,
        step: Step,
        content: &str,
        extension: &str,
    ) -> Result<PathBuf, StorageError> {
        self.write(self.next_path(step, extension), content.as_bytes())
    }

    fn latest(&self, step: Step) -> Result<PathBuf, StorageError> {
        let dir = self.root.join(step.dir_name());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(step));
            }
            Err(source) => return Err(StorageError::Io { path: dir, source }),
        };

        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| !name.starts_with('.'))
            })
            .max()
            .ok_or(StorageError::NotFound(step))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_latest_is_newest() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        store.save(Step::Posts, &json!([1])).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newest = store.save(Step::Posts, &json!([1, 2])).unwrap();

        assert_eq!(store.latest(Step::Posts).unwrap(), newest);
        assert_eq!(store.load_latest(Step::Posts).unwrap(), json!([1, 2]));
    }

    #[test]
    fn test_missing_step() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(matches!(
            store.latest(Step::Analyses),
            Err(StorageError::NotFound(Step::Analyses))
        ));
    }

    #[test]
    fn test_typed_helpers() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        save_json(&store, Step::Filtered, &vec!["a".to_string(), "b".to_string()]).unwrap();
        let loaded: Vec<String> = load_latest_json(&store, Step::Filtered).unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
    }

    #[test]
    fn test_text_checkpoint_layout() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let path = store.save_text(Step::Digests, "# Digest", "md").unwrap();
        assert!(path.starts_with(dir.path().join("step5_digests")));
        assert_eq!(path.extension().unwrap(), "md");
    }
}
