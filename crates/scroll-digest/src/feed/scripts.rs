//! Scripts evaluated inside the page.
//!
//! The sources live under `scripts/` so they can be versioned and edited as
//! JavaScript. Each file holds a single function expression; the helpers
//! below apply it to its argument.

const EXTRACT_ITEMS: &str = include_str!("../../scripts/extract_items.js");
const EXPAND_TRUNCATED: &str = include_str!("../../scripts/expand_truncated.js");
const SCROLL_PAGE: &str = include_str!("../../scripts/scroll_page.js");

/// Marker present in the extraction script header.
pub const EXTRACT_ITEMS_MARKER: &str = "scroll-digest: extract-items";
/// Marker present in the expansion script header.
pub const EXPAND_TRUNCATED_MARKER: &str = "scroll-digest: expand-truncated";
/// Marker present in the scroll script header.
pub const SCROLL_PAGE_MARKER: &str = "scroll-digest: scroll-page";

fn call(source: &str, argument: &str) -> String {
    format!("({}\n)({argument})", source.trim())
}

/// Read every visible post.
pub fn extract_items() -> String {
    call(EXTRACT_ITEMS, "")
}

/// Count collapsed "Show more" posts.
pub fn count_truncated() -> String {
    call(EXPAND_TRUNCATED, "\"count\"")
}

/// Expand the first collapsed post. Evaluates to whether one was found.
pub fn expand_next_truncated() -> String {
    call(EXPAND_TRUNCATED, "\"click\"")
}

/// Scroll down by one viewport height.
pub fn scroll_page() -> String {
    call(SCROLL_PAGE, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripts_carry_markers() {
        assert!(extract_items().contains(EXTRACT_ITEMS_MARKER));
        assert!(count_truncated().contains(EXPAND_TRUNCATED_MARKER));
        assert!(scroll_page().contains(SCROLL_PAGE_MARKER));
    }

    #[test]
    fn test_invocation_arguments() {
        assert!(extract_items().ends_with("\n)()"));
        assert!(count_truncated().ends_with("(\"count\")"));
        assert!(expand_next_truncated().ends_with("(\"click\")"));
        assert!(scroll_page().ends_with("\n)()"));
    }
}
