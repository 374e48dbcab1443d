//! Redaction of prompt-injection triggers from free text.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::text::truncate_chars;

/// Replacement for every denylisted phrase.
pub const FILTERED: &str = "[filtered]";

/// Default bound on sanitized text, in characters.
pub const DEFAULT_MAX_CHARS: usize = 3000;

static DENYLIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)ignore previous|system:|developer:|you are chatgpt|jailbreak|override|sudo|password|api[_-]?key|token",
    )
    .expect("denylist pattern should compile")
});

/// Strips or redacts unsafe substrings before text is embedded in a prompt.
pub trait Sanitizer {
    /// Must never fail; empty input yields empty output.
    fn sanitize(&self, text: &str) -> String;
}

/// Truncating, case-insensitive denylist sanitizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptGuard {
    max_chars: usize,
}

impl PromptGuard {
    pub const fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }
}

impl Default for PromptGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS)
    }
}

impl Sanitizer for PromptGuard {
    fn sanitize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        let bounded = truncate_chars(text, self.max_chars);
        DENYLIST.replace_all(bounded, FILTERED).trim().to_string()
    }
}
