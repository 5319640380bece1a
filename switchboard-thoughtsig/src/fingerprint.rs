use crate::CacheKey;

use ahash::AHasher;
use std::hash::Hasher;

const TEXT_KEY_PREFIX_CHARS: usize = 100;

/// Scopes cache keys to one (model family, conversation) pair so signatures
/// never leak across sessions or across the claude/gemini dialects.
#[derive(Debug, Clone)]
pub struct KeyScope {
    family: String,
    session_id: String,
}

impl KeyScope {
    pub fn new(family: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            session_id: session_id.into(),
        }
    }

    /// Stable text key: first 100 chars of the thought text joined with its
    /// total length. Long thoughts differing only past the prefix still get
    /// distinct keys through the length component.
    pub fn text_key(text: &str) -> String {
        let prefix_end = text
            .char_indices()
            .nth(TEXT_KEY_PREFIX_CHARS)
            .map_or(text.len(), |(idx, _)| idx);
        format!("{}::{}", &text[..prefix_end], text.len())
    }

    /// Cache key for a thought text within this scope. Empty or
    /// whitespace-only text has no key.
    pub fn cache_key(&self, text: &str) -> Option<CacheKey> {
        if text.trim().is_empty() {
            return None;
        }

        let text_key = Self::text_key(text);
        let mut hasher = AHasher::default();
        hasher.write(self.family.as_bytes());
        hasher.write_u8(0);
        hasher.write(self.session_id.as_bytes());
        hasher.write_u8(0);
        hasher.write(text_key.as_bytes());
        Some(hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_key_truncates_at_100_chars_and_appends_length() {
        let short = "abc";
        assert_eq!(KeyScope::text_key(short), "abc::3");

        let long = "x".repeat(250);
        let key = KeyScope::text_key(&long);
        assert_eq!(key, format!("{}::250", "x".repeat(100)));
    }

    #[test]
    fn text_key_respects_char_boundaries() {
        let text = "é".repeat(150);
        let key = KeyScope::text_key(&text);
        assert!(key.starts_with(&"é".repeat(100)));
        assert!(key.ends_with(&format!("::{}", text.len())));
    }

    #[test]
    fn same_text_same_scope_same_key() {
        let scope = KeyScope::new("claude", "session-1");
        assert_eq!(scope.cache_key("pondering"), scope.cache_key("pondering"));
    }

    #[test]
    fn different_session_different_key() {
        let a = KeyScope::new("claude", "session-1");
        let b = KeyScope::new("claude", "session-2");
        assert_ne!(a.cache_key("pondering"), b.cache_key("pondering"));
    }

    #[test]
    fn different_family_different_key() {
        let a = KeyScope::new("claude", "session-1");
        let b = KeyScope::new("gemini-pro", "session-1");
        assert_ne!(a.cache_key("pondering"), b.cache_key("pondering"));
    }

    #[test]
    fn blank_text_has_no_key() {
        let scope = KeyScope::new("claude", "session-1");
        assert_eq!(scope.cache_key("   "), None);
    }
}
