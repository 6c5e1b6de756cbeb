//! Token estimation and truncation
//!
//! The service never calls a real tokenizer; every token count in the data
//! model comes from this deterministic estimator so that accounting is
//! reproducible across processes.

/// Estimate token count for text.
/// Rough estimate: ~0.75 tokens per character (English).
///
/// # Arguments
/// * `text` - The text to estimate tokens for
///
/// # Returns
/// Estimated token count (always >= 0)
pub fn estimate_tokens(text: &str) -> i32 {
    if text.is_empty() {
        return 0;
    }
    (text.len() as f32 * 0.75).ceil() as i32
}

/// Truncate text to fit within a token budget.
/// Prefers sentence boundaries, falls back to word boundaries.
pub fn truncate_to_token_budget(text: &str, budget: i32) -> String {
    if budget <= 0 {
        return String::new();
    }

    // Convert token budget to approximate character limit
    let max_chars = (budget as f32 / 0.75).floor() as usize;

    if text.len() <= max_chars {
        return text.to_string();
    }

    let truncated = safe_truncate(text, max_chars);

    // Try to find a sentence boundary (., ?, !)
    let last_sentence = [
        truncated.rfind('.'),
        truncated.rfind('?'),
        truncated.rfind('!'),
    ]
    .into_iter()
    .flatten()
    .max();

    // Only use a sentence boundary from the latter half
    if let Some(pos) = last_sentence {
        if pos > max_chars / 2 {
            return truncated[..=pos].to_string();
        }
    }

    // Fall back to a word boundary in the latter 80%
    if let Some(pos) = truncated.rfind(' ') {
        if pos > max_chars * 4 / 5 {
            return truncated[..pos].to_string();
        }
    }

    truncated.to_string()
}

/// Safely truncate a string at a UTF-8 boundary.
fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }

    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_tokens_short() {
        // "hello" = 5 chars * 0.75 = 3.75, ceil = 4
        assert_eq!(estimate_tokens("hello"), 4);
    }

    #[test]
    fn test_estimate_tokens_longer() {
        let text = "a".repeat(100);
        assert_eq!(estimate_tokens(&text), 75);
    }

    #[test]
    fn test_truncate_empty_budget() {
        assert_eq!(truncate_to_token_budget("hello world", 0), "");
        assert_eq!(truncate_to_token_budget("hello world", -5), "");
    }

    #[test]
    fn test_truncate_fits() {
        let text = "hello";
        assert_eq!(truncate_to_token_budget(text, 100), text);
    }

    #[test]
    fn test_truncate_sentence_boundary() {
        let text = "First sentence. Second sentence. Third sentence.";
        let result = truncate_to_token_budget(text, 15);
        assert!(result.ends_with('.'));
    }

    #[test]
    fn test_truncate_multibyte_safe() {
        let text = "日本語のテキストです。".repeat(10);
        let result = truncate_to_token_budget(&text, 10);
        // Must not panic and must remain valid UTF-8
        assert!(result.len() <= text.len());
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// For any text T, estimate_tokens(T) is >= 0 and proportional to length.
        #[test]
        fn prop_token_estimation_consistency(text in ".*") {
            let tokens = estimate_tokens(&text);
            prop_assert!(tokens >= 0);

            if !text.is_empty() {
                let expected = (text.len() as f32 * 0.75).ceil() as i32;
                prop_assert_eq!(tokens, expected);
            }
        }

        /// Truncated text always fits the budget it was truncated to.
        #[test]
        fn prop_truncation_respects_budget(
            text in ".{0,1000}",
            budget in 1i32..500,
        ) {
            let truncated = truncate_to_token_budget(&text, budget);
            prop_assert!(estimate_tokens(&truncated) <= budget);
        }

        /// Text that fits the budget is returned unchanged.
        #[test]
        fn prop_text_fits_unchanged(text in ".{0,100}") {
            prop_assert_eq!(truncate_to_token_budget(&text, 1000), text);
        }
    }
}
