//! Feed data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post read from the rendered feed or a thread page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedItem {
    /// Numeric status ID. Never empty.
    pub id: String,
    pub author: Author,
    /// Post text after truncated content was expanded.
    pub content: String,
    #[serde(default)]
    pub media_urls: Vec<String>,
    /// Publication time, when the page exposed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub engagement: Engagement,
    #[serde(default)]
    pub is_repost: bool,
    #[serde(default)]
    pub is_quote: bool,
    #[serde(default)]
    pub is_reply: bool,
    /// Canonical permalink.
    pub url: String,
    pub extracted_at: DateTime<Utc>,
}

impl ExtractedItem {
    /// Short label used by the prompt and digest.
    pub fn kind(&self) -> &'static str {
        if self.is_repost {
            "repost"
        } else if self.is_quote {
            "quote"
        } else if self.is_reply {
            "reply"
        } else {
            "original"
        }
    }
}

/// Post author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Handle without the leading @.
    pub handle: String,
    /// Display name.
    pub name: String,
}

impl Author {
    #[must_use]
    pub fn new(handle: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            name: name.into(),
        }
    }

    /// Get the handle with @ prefix.
    #[must_use]
    pub fn at_handle(&self) -> String {
        format!("@{}", self.handle)
    }
}

/// Engagement counters as shown on the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
    pub quotes: u64,
}
