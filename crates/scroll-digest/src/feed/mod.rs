//! X feed extraction.
//!
//! Scrolls the rendered home timeline (or a thread page) in a browser and
//! collects posts.

mod extractor;
pub mod parser;
pub mod scripts;
mod types;

pub use extractor::{
    feed_attempts, thread_attempts, ExtractionConfig, ExtractionEngine, ExtractionError,
    ItemAccumulator, ScrollPacing, FEED_URL, ITEM_SELECTOR,
};
pub use parser::{extract_item_id, parse_metric};
pub use types::{Author, Engagement, ExtractedItem};
