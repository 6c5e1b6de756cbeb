//! Composite relevance scoring
//!
//! Recall ranks candidates by a weighted sum of semantic similarity,
//! recency, access frequency, and importance. Ties break by descending
//! importance, then by descending creation time.

use engram_core::{Memory, RelevanceWeights, Timestamp};
use std::collections::HashSet;

/// Compute the composite relevance of one recalled memory.
///
/// `relevance = w_sem·cos + w_rec·exp(−age_days/H) +
///  w_freq·log(1+access)/log(1+cap) + w_imp·importance`
pub fn composite_relevance(
    weights: &RelevanceWeights,
    half_life_days: f32,
    access_cap: i32,
    similarity: f32,
    age_days: f32,
    access_count: i32,
    importance: f32,
) -> f32 {
    let recency = (-age_days.max(0.0) / half_life_days).exp();
    // Frequency saturates at the cap
    let capped = access_count.clamp(0, access_cap) as f32;
    let frequency = (1.0 + capped).ln() / (1.0 + access_cap as f32).ln();

    weights.semantic * similarity
        + weights.recency * recency
        + weights.frequency * frequency
        + weights.importance * importance
}

/// Age of a memory in fractional days at the given instant.
pub fn age_days(created_at: Timestamp, now: Timestamp) -> f32 {
    let seconds = (now - created_at).num_seconds().max(0) as f32;
    seconds / 86_400.0
}

/// A memory returned by recall, annotated with its scores.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalledMemory {
    pub memory: Memory,
    /// Cosine similarity that selected this memory
    pub similarity: f32,
    /// Composite relevance used for ranking
    pub relevance: f32,
}

/// Rank recalled memories: relevance desc, then importance desc, then
/// creation time desc.
pub fn rank_recalled(results: &mut [RecalledMemory]) {
    results.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.memory
                    .importance
                    .partial_cmp(&a.memory.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });
}

/// Token-set Jaccard similarity of two texts. Tokens are lowercased runs
/// of alphanumeric characters.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let tokens_a = token_set(a);
    let tokens_b = token_set(b);

    if tokens_a.is_empty() && tokens_b.is_empty() {
        return 1.0;
    }

    let intersection = tokens_a.intersection(&tokens_b).count();
    let union = tokens_a.union(&tokens_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

fn token_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_weights() -> RelevanceWeights {
        RelevanceWeights::default()
    }

    #[test]
    fn test_fresh_perfect_match_scores_high() {
        let score = composite_relevance(&default_weights(), 30.0, 100, 1.0, 0.0, 0, 1.0);
        // w_sem + w_rec + w_imp = 0.5 + 0.2 + 0.2 = 0.9, frequency term 0
        assert!((score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_recency_decays() {
        let fresh = composite_relevance(&default_weights(), 30.0, 100, 0.8, 0.0, 0, 0.5);
        let month_old = composite_relevance(&default_weights(), 30.0, 100, 0.8, 30.0, 0, 0.5);
        let ancient = composite_relevance(&default_weights(), 30.0, 100, 0.8, 300.0, 0, 0.5);
        assert!(fresh > month_old);
        assert!(month_old > ancient);
        // At one half-life constant the recency term is 1/e of its weight
        let expected_drop = 0.2 * (1.0 - (-1.0f32).exp());
        assert!((fresh - month_old - expected_drop).abs() < 1e-4);
    }

    #[test]
    fn test_frequency_saturates_at_cap() {
        let at_cap = composite_relevance(&default_weights(), 30.0, 100, 0.5, 10.0, 100, 0.5);
        let over_cap = composite_relevance(&default_weights(), 30.0, 100, 0.5, 10.0, 100_000, 0.5);
        assert!((at_cap - over_cap).abs() < 1e-6);
        // At the cap the frequency term contributes its full weight
        let none = composite_relevance(&default_weights(), 30.0, 100, 0.5, 10.0, 0, 0.5);
        assert!((at_cap - none - 0.1).abs() < 1e-5);
    }

    #[test]
    fn test_age_days() {
        let now = chrono::Utc::now();
        let yesterday = now - chrono::Duration::days(1);
        assert!((age_days(yesterday, now) - 1.0).abs() < 1e-3);
        // Clock skew never yields negative age
        assert_eq!(age_days(now + chrono::Duration::days(1), now), 0.0);
    }

    #[test]
    fn test_jaccard_identical() {
        assert_eq!(jaccard_similarity("the quick brown fox", "the quick brown fox"), 1.0);
    }

    #[test]
    fn test_jaccard_disjoint() {
        assert_eq!(jaccard_similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn test_jaccard_partial_overlap() {
        // {a, b, c} vs {b, c, d}: intersection 2, union 4
        let sim = jaccard_similarity("a b c", "b c d");
        assert!((sim - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_jaccard_case_and_punctuation_insensitive() {
        let sim = jaccard_similarity("Uses PostgreSQL!", "uses postgresql");
        assert_eq!(sim, 1.0);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Composite relevance is bounded when all inputs are in range.
        #[test]
        fn prop_relevance_bounded(
            similarity in 0.0f32..=1.0,
            age in 0.0f32..=10_000.0,
            access in 0i32..=1_000_000,
            importance in 0.0f32..=1.0,
        ) {
            let score = composite_relevance(
                &RelevanceWeights::default(),
                30.0,
                100,
                similarity,
                age,
                access,
                importance,
            );
            prop_assert!((0.0..=1.0 + 1e-5).contains(&score));
        }

        /// More similar always scores at least as high, all else equal.
        #[test]
        fn prop_relevance_monotone_in_similarity(
            lo in 0.0f32..=1.0,
            hi in 0.0f32..=1.0,
            age in 0.0f32..=1_000.0,
        ) {
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let weights = RelevanceWeights::default();
            let score_lo = composite_relevance(&weights, 30.0, 100, lo, age, 5, 0.5);
            let score_hi = composite_relevance(&weights, 30.0, 100, hi, age, 5, 0.5);
            prop_assert!(score_hi >= score_lo - 1e-6);
        }

        /// Jaccard is symmetric and bounded.
        #[test]
        fn prop_jaccard_symmetric_bounded(a in ".{0,200}", b in ".{0,200}") {
            let ab = jaccard_similarity(&a, &b);
            let ba = jaccard_similarity(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!((0.0..=1.0).contains(&ab));
        }
    }
}
