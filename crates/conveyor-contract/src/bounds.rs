// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded-text helpers for summaries, failure reasons, and log excerpts.
//!
//! Truncation is measured in characters, never bytes, so multi-byte input
//! cannot split a code point.

/// Maximum stored length of a station summary or run failure reason.
pub const SUMMARY_MAX_CHARS: usize = 500;

/// Maximum stored length of an inline runner log excerpt.
pub const LOG_EXCERPT_MAX_CHARS: usize = 4000;

/// Truncate a summary or failure reason to [`SUMMARY_MAX_CHARS`], replacing
/// the final character with an ellipsis marker when truncation occurs.
pub fn truncate_summary(input: &str) -> String {
    truncate_with_marker(input, SUMMARY_MAX_CHARS)
}

fn truncate_with_marker(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    let mut truncated: String = input.chars().take(max_chars.saturating_sub(1)).collect();
    truncated.push('…');
    truncated
}

/// A bounded log excerpt with truncation evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogExcerpt {
    /// The excerpt, with a truncation note appended when truncated.
    pub excerpt: String,
    /// Whether the original exceeded [`LOG_EXCERPT_MAX_CHARS`].
    pub truncated: bool,
    /// Character length of the original input.
    pub original_length: usize,
}

/// Bound inline runner logs to [`LOG_EXCERPT_MAX_CHARS`].
///
/// Input at exactly the limit passes through untouched; longer input keeps
/// the first `LOG_EXCERPT_MAX_CHARS` characters and gains an explicit note.
pub fn excerpt_logs(input: &str) -> LogExcerpt {
    let original_length = input.chars().count();
    if original_length <= LOG_EXCERPT_MAX_CHARS {
        return LogExcerpt {
            excerpt: input.to_string(),
            truncated: false,
            original_length,
        };
    }
    let mut excerpt: String = input.chars().take(LOG_EXCERPT_MAX_CHARS).collect();
    excerpt.push_str(&format!(
        "\n… [excerpt truncated; original was {} chars]",
        original_length
    ));
    LogExcerpt {
        excerpt,
        truncated: true,
        original_length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_summary_is_unchanged() {
        assert_eq!(truncate_summary("fine"), "fine");
        let exact = "a".repeat(SUMMARY_MAX_CHARS);
        assert_eq!(truncate_summary(&exact), exact);
    }

    #[test]
    fn long_summary_is_bounded_with_marker() {
        let long = "b".repeat(SUMMARY_MAX_CHARS + 1);
        let truncated = truncate_summary(&long);
        assert_eq!(truncated.chars().count(), SUMMARY_MAX_CHARS);
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn multibyte_summary_truncates_on_char_boundary() {
        let long = "é".repeat(SUMMARY_MAX_CHARS + 10);
        let truncated = truncate_summary(&long);
        assert_eq!(truncated.chars().count(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn logs_at_limit_are_not_truncated() {
        let exact = "x".repeat(LOG_EXCERPT_MAX_CHARS);
        let excerpt = excerpt_logs(&exact);
        assert!(!excerpt.truncated);
        assert_eq!(excerpt.excerpt, exact);
        assert_eq!(excerpt.original_length, LOG_EXCERPT_MAX_CHARS);
    }

    #[test]
    fn logs_over_limit_carry_evidence() {
        let long = "x".repeat(LOG_EXCERPT_MAX_CHARS + 1);
        let excerpt = excerpt_logs(&long);
        assert!(excerpt.truncated);
        assert_eq!(excerpt.original_length, LOG_EXCERPT_MAX_CHARS + 1);
        assert!(excerpt.excerpt.starts_with(&"x".repeat(LOG_EXCERPT_MAX_CHARS)));
        assert!(excerpt.excerpt.contains("excerpt truncated"));
    }
}
