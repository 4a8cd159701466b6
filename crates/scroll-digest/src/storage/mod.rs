//! Local persistence: atomic file writes and per-stage checkpoints.

mod atomic;
pub mod checkpoint;

pub use atomic::write_atomic;
pub use checkpoint::{
    load_latest_json, save_json, CheckpointStore, FileCheckpointStore, Step, StorageError,
};
