//! System messages that must not be spoken

/// Greeting the bot sends when a conversation opens
pub const WELCOME_BANNER: &str = "Welcome to Azure GPT Bot!";

/// Replies suppressed on exact match (after trimming)
const DEFAULT_EXACT: &[&str] = &[WELCOME_BANNER];

/// Replies suppressed when they contain one of these (case-insensitive)
const DEFAULT_SUBSTRINGS: &[&str] = &[
    "exceeded the token rate limit",
    "conversation history has been cleared",
];

/// Denylist of sentinel replies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelFilter {
    exact: Vec<String>,
    /// Stored lowercased
    substrings: Vec<String>,
}

impl Default for SentinelFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXACT.iter().map(ToString::to_string).collect(),
            DEFAULT_SUBSTRINGS.iter().map(ToString::to_string).collect(),
        )
    }
}

impl SentinelFilter {
    /// Create a filter from exact and substring patterns
    #[must_use]
    pub fn new(exact: Vec<String>, substrings: Vec<String>) -> Self {
        Self {
            exact: exact.into_iter().map(|s| s.trim().to_string()).collect(),
            substrings: substrings
                .into_iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// A filter that suppresses nothing
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            exact: Vec::new(),
            substrings: Vec::new(),
        }
    }

    /// Exact-match patterns
    #[must_use]
    pub fn exact(&self) -> &[String] {
        &self.exact
    }

    /// Substring patterns (lowercased)
    #[must_use]
    pub fn substrings(&self) -> &[String] {
        &self.substrings
    }

    /// Whether `text` is a sentinel message
    #[must_use]
    pub fn is_sentinel(&self, text: &str) -> bool {
        let text = text.trim();
        if self.exact.iter().any(|e| e == text) {
            return true;
        }
        if self.substrings.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.substrings.iter().any(|s| lower.contains(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welcome_banner_is_sentinel() {
        let filter = SentinelFilter::default();
        assert!(filter.is_sentinel(WELCOME_BANNER));
        assert!(filter.is_sentinel("  Welcome to Azure GPT Bot!\n"));
        assert!(!filter.is_sentinel("Welcome to Azure GPT Bot! How can I help?"));
    }

    #[test]
    fn test_substring_match_is_case_insensitive() {
        let filter = SentinelFilter::default();
        assert!(filter.is_sentinel("Sorry, you have Exceeded the token rate limit. Retry later."));
        assert!(filter.is_sentinel("Your conversation history has been cleared."));
        assert!(!filter.is_sentinel("It is sunny"));
    }

    #[test]
    fn test_custom_and_empty_filters() {
        let filter = SentinelFilter::new(vec!["ping".to_string()], vec![String::new()]);
        assert!(filter.is_sentinel("ping"));
        assert!(!filter.is_sentinel("pong"));
        assert!(!filter.is_sentinel(WELCOME_BANNER));

        assert!(!SentinelFilter::empty().is_sentinel(WELCOME_BANNER));
    }
}
