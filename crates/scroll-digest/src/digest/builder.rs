//! Markdown digest rendering.

use chrono::{DateTime, Utc};
use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::analysis::ScoredItem;
use crate::storage::write_atomic;

const DIGEST: &str = "digest";

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid digest template: {0}")]
    Template(#[from] Box<TemplateError>),

    #[error("failed to render digest: {0}")]
    Render(#[from] RenderError),

    #[error("failed to write digest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no digest found in {0}")]
    NotFound(PathBuf),
}

#[derive(Serialize)]
struct DigestReply<'a> {
    handle: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct DigestEntry<'a> {
    rank: usize,
    handle: &'a str,
    name: &'a str,
    url: &'a str,
    score: String,
    summary: &'a str,
    content: &'a str,
    topics: String,
    likes: u64,
    reposts: u64,
    replies: u64,
    context: Vec<DigestReply<'a>>,
}

#[derive(Serialize)]
struct DigestData<'a> {
    date: String,
    generated_at: String,
    total_scraped: usize,
    relevant: usize,
    shown: usize,
    entries: Vec<DigestEntry<'a>>,
}

/// Renders relevant posts into a Markdown digest.
pub struct DigestBuilder {
    handlebars: Handlebars<'static>,
    max_posts: usize,
}

impl DigestBuilder {
    pub fn new(max_posts: usize) -> Result<Self, DigestError> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .register_template_string(DIGEST, DIGEST_TEMPLATE)
            .map_err(Box::new)?;
        Ok(Self {
            handlebars,
            max_posts,
        })
    }

    /// Render the digest, highest score first, capped at `max_posts`.
    pub fn render(
        &self,
        items: &[ScoredItem],
        total_scraped: usize,
        generated_at: DateTime<Utc>,
    ) -> Result<String, DigestError> {
        let mut ranked: Vec<&ScoredItem> = items.iter().collect();
        ranked.sort_by(|a, b| {
            b.analysis
                .relevance_score
                .total_cmp(&a.analysis.relevance_score)
        });
        ranked.truncate(self.max_posts);

        let entries = ranked
            .iter()
            .enumerate()
            .map(|(i, scored)| DigestEntry {
                rank: i + 1,
                handle: &scored.item.author.handle,
                name: &scored.item.author.name,
                url: &scored.item.url,
                score: format!("{:.2}", scored.analysis.relevance_score),
                summary: &scored.analysis.summary,
                content: &scored.item.content,
                topics: scored.analysis.topics.join(", "),
                likes: scored.item.engagement.likes,
                reposts: scored.item.engagement.reposts,
                replies: scored.item.engagement.replies,
                context: scored
                    .context
                    .iter()
                    .map(|reply| DigestReply {
                        handle: &reply.author.handle,
                        content: &reply.content,
                    })
                    .collect(),
            })
            .collect::<Vec<_>>();

        let data = DigestData {
            date: generated_at.format("%B %d, %Y").to_string(),
            generated_at: generated_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            total_scraped,
            relevant: items.len(),
            shown: entries.len(),
            entries,
        };
        Ok(self.handlebars.render(DIGEST, &data)?)
    }

    /// Write a rendered digest into `dir` and return its path.
    ///
    /// Names sort by generation time; the random suffix keeps two digests
    /// from the same millisecond apart.
    pub fn write(
        &self,
        dir: &Path,
        markdown: &str,
        generated_at: DateTime<Utc>,
    ) -> Result<PathBuf, DigestError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!(
            "digest-{}-{}.md",
            generated_at.format("%Y-%m-%d-%H%M%S%3f"),
            &suffix[..8]
        ));
        write_atomic(&path, markdown.as_bytes()).map_err(|source| DigestError::Io {
            path: path.clone(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Wrote digest");
        Ok(path)
    }
}

/// Newest `digest-*.md` in `dir`.
pub fn latest_digest(dir: &Path) -> Result<PathBuf, DigestError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DigestError::NotFound(dir.to_path_buf()));
        }
        Err(source) => {
            return Err(DigestError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("digest-") && name.ends_with(".md"))
        })
        .max()
        .ok_or_else(|| DigestError::NotFound(dir.to_path_buf()))
}

const DIGEST_TEMPLATE: &str = r"# Feed Digest - {{date}}

_{{shown}} of {{relevant}} relevant posts from {{total_scraped}} scanned. Generated {{generated_at}}._

{{#each entries}}
## {{rank}}. @{{handle}}{{#if name}} ({{name}}){{/if}} - {{score}}

{{#if summary}}**{{summary}}**

{{/if}}
> {{content}}

{{#if topics}}Topics: {{topics}} | {{/if}}{{likes}} likes, {{reposts}} reposts, {{replies}} replies | [Open post]({{url}})
{{#if context}}

Replies:
{{#each context}}
- @{{handle}}: {{content}}
{{/each}}
{{/if}}

{{/each}}
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalysisResult;
    use crate::feed::{Author, Engagement, ExtractedItem};
    use tempfile::TempDir;

    fn scored(id: &str, score: f64) -> ScoredItem {
        ScoredItem::new(
            ExtractedItem {
                id: id.to_string(),
                author: Author::new(format!("user{id}"), "User"),
                content: format!("content {id}"),
                media_urls: Vec::new(),
                posted_at: None,
                engagement: Engagement::default(),
                is_repost: false,
                is_quote: false,
                is_reply: false,
                url: format!("https://x.com/user{id}/status/{id}"),
                extracted_at: Utc::now(),
            },
            AnalysisResult {
                item_id: id.to_string(),
                relevance_score: score,
                topics: vec!["rust".to_string()],
                summary: format!("summary {id}"),
                needs_context: false,
                analyzed_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_render_sorts_and_caps() {
        let builder = DigestBuilder::new(2).unwrap();
        let items = vec![scored("1", 0.6), scored("2", 0.95), scored("3", 0.7)];

        let markdown = builder.render(&items, 50, Utc::now()).unwrap();

        let first = markdown.find("@user2").unwrap();
        let second = markdown.find("@user3").unwrap();
        assert!(first < second);
        assert!(!markdown.contains("@user1"));
        assert!(markdown.contains("2 of 3 relevant posts from 50 scanned"));
        assert!(markdown.contains("**summary 2**"));
    }

    #[test]
    fn test_render_includes_context() {
        let builder = DigestBuilder::new(5).unwrap();
        let mut item = scored("1", 0.9);
        let mut reply = item.item.clone();
        reply.author = Author::new("replier", "R");
        reply.content = "good point".to_string();
        item.context.push(reply);

        let markdown = builder.render(&[item], 1, Utc::now()).unwrap();
        assert!(markdown.contains("- @replier: good point"));
    }

    #[test]
    fn test_write_and_latest() {
        let dir = TempDir::new().unwrap();
        let builder = DigestBuilder::new(5).unwrap();
        let earlier = Utc::now() - chrono::Duration::hours(1);
        let now = Utc::now();

        builder.write(dir.path(), "old", earlier).unwrap();
        let newest = builder.write(dir.path(), "new", now).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();

        assert_eq!(latest_digest(dir.path()).unwrap(), newest);
        assert!(matches!(
            latest_digest(&dir.path().join("missing")),
            Err(DigestError::NotFound(_))
        ));
    }

    #[test]
    fn test_same_instant_writes_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let builder = DigestBuilder::new(5).unwrap();
        let now = Utc::now();

        let first = builder.write(dir.path(), "first", now).unwrap();
        let second = builder.write(dir.path(), "second", now).unwrap();

        assert_ne!(first, second);
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "first");
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "second");
    }
}
