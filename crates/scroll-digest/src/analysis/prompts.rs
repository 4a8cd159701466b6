//! Prompt template management.

use handlebars::{Handlebars, RenderError, TemplateError};
use serde::Serialize;

use crate::config::Interests;
use crate::feed::ExtractedItem;

use super::types::MAX_TOPICS;

const SCORE_BATCH: &str = "score_batch";

/// Manages Handlebars prompt templates.
pub struct PromptManager {
    handlebars: Handlebars<'static>,
}

#[derive(Serialize)]
struct PromptPost<'a> {
    index: usize,
    id: &'a str,
    handle: &'a str,
    name: &'a str,
    content: &'a str,
    likes: u64,
    reposts: u64,
    replies: u64,
    kind: &'static str,
}

#[derive(Serialize)]
struct BatchPrompt<'a> {
    has_interests: bool,
    keywords: String,
    priority_accounts: String,
    muted_keywords: String,
    muted_accounts: String,
    max_topics: usize,
    posts: Vec<PromptPost<'a>>,
}

impl PromptManager {
    /// Create a new prompt manager with embedded templates.
    pub fn new() -> Result<Self, TemplateError> {
        let mut handlebars = Handlebars::new();
        // Prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_template_string(SCORE_BATCH, SCORE_BATCH_TEMPLATE)?;
        Ok(Self { handlebars })
    }

    /// Render the scoring prompt for one batch.
    pub fn score_batch(
        &self,
        items: &[ExtractedItem],
        interests: &Interests,
    ) -> Result<String, RenderError> {
        let data = BatchPrompt {
            has_interests: !interests.is_empty(),
            keywords: interests.keywords.join(", "),
            priority_accounts: interests.priority_accounts.join(", "),
            muted_keywords: interests.muted_keywords.join(", "),
            muted_accounts: interests.muted_accounts.join(", "),
            max_topics: MAX_TOPICS,
            posts: items
                .iter()
                .enumerate()
                .map(|(i, item)| PromptPost {
                    index: i + 1,
                    id: &item.id,
                    handle: &item.author.handle,
                    name: &item.author.name,
                    content: &item.content,
                    likes: item.engagement.likes,
                    reposts: item.engagement.reposts,
                    replies: item.engagement.replies,
                    kind: item.kind(),
                })
                .collect(),
        };
        self.handlebars.render(SCORE_BATCH, &data)
    }
}

pub const SYSTEM_PROMPT: &str = "You are a content curator scoring social media posts for one \
reader. You respond only with a JSON array, one object per post, in the order the posts were \
given.";

/// Batch scoring prompt template.
const SCORE_BATCH_TEMPLATE: &str = r#"Analyze these posts from my feed and score their relevance to my interests.

## My Interests
{{#if has_interests}}
{{#if keywords}}Keywords: {{keywords}}
{{/if}}
{{#if priority_accounts}}Priority accounts (boost their posts): {{priority_accounts}}
{{/if}}
{{#if muted_keywords}}Muted keywords (score 0 if the post is mainly about these): {{muted_keywords}}
{{/if}}
{{#if muted_accounts}}Muted accounts (always score 0): {{muted_accounts}}
{{/if}}
{{else}}
No specific interests are configured. Score by general quality: insight, originality and substance over engagement bait.
{{/if}}

## Posts
{{#each posts}}
### Post {{index}} ({{id}})
Author: @{{handle}} ({{name}})
Content: {{content}}
Engagement: {{likes}} likes, {{reposts}} reposts, {{replies}} replies
Type: {{kind}}

{{/each}}
## Task
For each post return an object with:
- "post_id": the ID shown in parentheses
- "relevance_score": 0.0 to 1.0 (1.0 = must read)
- "topics": up to {{max_topics}} short topic labels
- "summary": one sentence
- "needs_context": true if the replies would help understand the post

Return a JSON array with exactly one object per post.
"#;
