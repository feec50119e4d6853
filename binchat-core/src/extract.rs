//! Script block extraction
//!
//! Agent responses mix prose with fragments wrapped in a fixed tag pair
//! (`<idascript>...</idascript>` by default). Matching is non-greedy and spans
//! lines, so several blocks in one text come out separately, left to right.
//! Nested or overlapping tags are not supported: the first closing tag ends
//! the block.

use regex::Regex;

/// Default tag name wrapping executable fragments
pub const DEFAULT_SCRIPT_TAG: &str = "idascript";

/// Pulls delimited code fragments out of free-form text.
#[derive(Debug, Clone)]
pub struct ScriptBlockExtractor {
    tag: String,
    pattern: Regex,
}

impl ScriptBlockExtractor {
    /// Extractor for `<idascript>...</idascript>`
    pub fn new() -> Self {
        Self::with_tag(DEFAULT_SCRIPT_TAG)
    }

    /// Extractor for `<tag>...</tag>`
    pub fn with_tag(tag: &str) -> Self {
        let escaped = regex::escape(tag);
        let pattern = Regex::new(&format!("(?s)<{0}>(.*?)</{0}>", escaped))
            .unwrap_or_else(|_| unreachable!("escaped tag always compiles"));
        Self {
            tag: tag.to_string(),
            pattern,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Fragment bodies in order of appearance, untrimmed
    pub fn extract(&self, text: &str) -> Vec<String> {
        self.pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }

    /// The text with every block (tags included) removed, trimmed.
    pub fn display_text(&self, text: &str) -> String {
        self.pattern.replace_all(text, "").trim().to_string()
    }

    pub fn has_blocks(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

impl Default for ScriptBlockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_blocks() {
        let ex = ScriptBlockExtractor::new();
        let text = "  The entry point is at 0x401000.\n";
        assert!(ex.extract(text).is_empty());
        assert!(!ex.has_blocks(text));
        assert_eq!(ex.display_text(text), "The entry point is at 0x401000.");
    }

    #[test]
    fn test_empty_input() {
        let ex = ScriptBlockExtractor::new();
        assert!(ex.extract("").is_empty());
        assert_eq!(ex.display_text(""), "");
    }

    #[test]
    fn test_multiple_blocks_in_order() {
        let ex = ScriptBlockExtractor::new();
        let text = "Let me look.\n<idascript>\nprint(1)\n</idascript>\nand then\n<idascript>print(2)</idascript> done";

        let blocks = ex.extract(text);
        assert_eq!(blocks, vec!["\nprint(1)\n".to_string(), "print(2)".to_string()]);
        assert_eq!(ex.display_text(text), "Let me look.\n\nand then\n done");
    }

    #[test]
    fn test_non_greedy_first_close_wins() {
        let ex = ScriptBlockExtractor::new();
        let text = "<idascript>a</idascript>middle<idascript>b</idascript>";
        assert_eq!(ex.extract(text), vec!["a", "b"]);
        assert_eq!(ex.display_text(text), "middle");
    }

    #[test]
    fn test_nested_tags_are_not_supported() {
        let ex = ScriptBlockExtractor::new();
        let text = "<idascript>outer <idascript>inner</idascript> tail</idascript>";
        // The first closing tag ends the first block.
        assert_eq!(ex.extract(text), vec!["outer <idascript>inner"]);
    }

    #[test]
    fn test_unterminated_block_is_prose() {
        let ex = ScriptBlockExtractor::new();
        let text = "<idascript>print(db)";
        assert!(ex.extract(text).is_empty());
        assert_eq!(ex.display_text(text), text);
    }

    #[test]
    fn test_custom_tag_is_escaped() {
        let ex = ScriptBlockExtractor::with_tag("py.run");
        assert_eq!(ex.extract("<py.run>x</py.run>"), vec!["x"]);
        // '.' must not act as a wildcard
        assert!(ex.extract("<pyXrun>x</pyXrun>").is_empty());
        assert_eq!(ex.tag(), "py.run");
    }

    #[test]
    fn test_idempotent_display_text() {
        let ex = ScriptBlockExtractor::new();
        let text = "Checking...\n<idascript>print(db.functions[0])</idascript>";
        let once = ex.display_text(text);
        assert_eq!(once, "Checking...");
        assert_eq!(ex.display_text(&once), once);
    }
}
