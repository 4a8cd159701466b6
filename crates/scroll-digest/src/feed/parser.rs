//! Normalization of raw page records into feed items.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use super::types::{Author, Engagement, ExtractedItem};

/// Shape returned by the extraction script. All fields are best effort.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawItem {
    pub id: String,
    pub author_handle: String,
    pub author_name: String,
    pub content: String,
    pub media_urls: Vec<String>,
    /// ISO-8601 from the `<time datetime>` attribute.
    pub timestamp: String,
    pub likes: String,
    pub retweets: String,
    pub replies: String,
    pub quotes: String,
    pub is_retweet: bool,
    pub is_quote_tweet: bool,
    pub is_reply: bool,
    pub original_url: String,
}

/// Which page a batch of raw items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Feed,
    /// Everything read from a thread page is a reply to the root post.
    Thread,
}

/// Parse a display metric such as `1,234`, `1.2K` or `5.7M`.
///
/// Anything unparseable counts as zero.
pub fn parse_metric(text: &str) -> u64 {
    let cleaned = text.trim().replace(',', "");
    if cleaned.is_empty() {
        return 0;
    }

    let (number, multiplier) = match cleaned.chars().last() {
        Some('K' | 'k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M' | 'm') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };

    match number.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => (value * multiplier).round() as u64,
        _ => 0,
    }
}

fn status_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/status/(\d+)").expect("Invalid status id pattern"))
}

/// Extract the status ID from a permalink (full or relative).
pub fn extract_item_id(url: &str) -> Option<String> {
    status_id_regex()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Turn raw records into items, dropping any without an ID.
pub fn normalize(raw: Vec<RawItem>, extracted_at: DateTime<Utc>, view: View) -> Vec<ExtractedItem> {
    raw.into_iter()
        .filter_map(|raw| normalize_one(raw, extracted_at, view))
        .collect()
}

fn normalize_one(raw: RawItem, extracted_at: DateTime<Utc>, view: View) -> Option<ExtractedItem> {
    let id = if raw.id.trim().is_empty() {
        extract_item_id(&raw.original_url)?
    } else {
        raw.id.trim().to_string()
    };

    let handle = raw.author_handle.trim().trim_start_matches('@').to_string();
    let url = if raw.original_url.starts_with("http") {
        raw.original_url
    } else if !handle.is_empty() {
        format!("https://x.com/{handle}/status/{id}")
    } else {
        format!("https://x.com/i/status/{id}")
    };

    let posted_at = DateTime::parse_from_rfc3339(raw.timestamp.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc));

    Some(ExtractedItem {
        id,
        author: Author::new(handle, raw.author_name.trim()),
        content: raw.content.trim().to_string(),
        media_urls: raw.media_urls,
        posted_at,
        engagement: Engagement {
            likes: parse_metric(&raw.likes),
            reposts: parse_metric(&raw.retweets),
            replies: parse_metric(&raw.replies),
            quotes: parse_metric(&raw.quotes),
        },
        is_repost: raw.is_retweet,
        is_quote: raw.is_quote_tweet,
        is_reply: raw.is_reply || view == View::Thread,
        url,
        extracted_at,
    })
}
