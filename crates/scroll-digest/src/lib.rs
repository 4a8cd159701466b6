//! Personal digest generator for the X home timeline.
//!
//! This crate provides:
//! - Interactive login through a visible browser and an on-disk session
//! - Scroll-and-collect extraction of the rendered feed and reply threads
//! - Batched AI relevance scoring against configured interests
//! - Markdown digests of the posts worth reading
//! - An action dispatcher for long-running front ends

pub mod analysis;
pub mod auth;
pub mod browser;
pub mod config;
pub mod digest;
pub mod dispatch;
pub mod feed;
pub mod pipeline;
pub mod storage;

// Re-export main types
pub use analysis::{AnalysisResult, BatchAnalyzer, ScoredItem, ScoringProvider};
pub use auth::{Credential, CredentialBundle, InteractiveAuthenticator, SessionStore};
pub use browser::{BrowserLauncher, BrowserSession, ChromiumLauncher};
pub use config::AppConfig;
pub use digest::DigestBuilder;
pub use dispatch::{Action, ActionOutcome, Dispatcher};
pub use feed::{ExtractedItem, ExtractionEngine};
pub use pipeline::{Pipeline, PipelineError, RunOutcome, RunSummary};
pub use storage::{CheckpointStore, FileCheckpointStore, Step};
