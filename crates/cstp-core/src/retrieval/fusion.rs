// crates/cstp-core/src/retrieval/fusion.rs
// ============================================================================
// Module: Hybrid Score Fusion
// Description: Min-max normalization and weighted merge of retrieval scores.
// Purpose: Combine semantic and keyword rankings into one ranked list.
// Dependencies: serde, std
// ============================================================================

//! ## Overview
//! Hybrid retrieval fetches both semantic and keyword results, normalizes
//! each score set to `[0, 1]` with min-max scaling, and combines them as
//! `w * semantic + (1 - w) * keyword`. Documents appearing on either side
//! participate; missing-side scores are zero.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Score Triple
// ============================================================================

/// Per-document score triple attached to hybrid results.
///
/// # Invariants
/// - All components lie in `[0, 1]` after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ScoreTriple {
    /// Normalized semantic score.
    pub semantic: f64,
    /// Normalized keyword score.
    pub keyword: f64,
    /// Weighted combination of the two.
    pub combined: f64,
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Min-max normalizes `(id, score)` pairs to `[0, 1]`.
///
/// A degenerate range (all scores equal) maps every document to 1.0.
#[must_use]
pub fn normalize_scores(results: &[(String, f64)]) -> HashMap<String, f64> {
    if results.is_empty() {
        return HashMap::new();
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for (_, score) in results {
        min = min.min(*score);
        max = max.max(*score);
    }
    let range = max - min;
    results
        .iter()
        .map(|(id, score)| {
            let normalized = if range == 0.0 { 1.0 } else { (score - min) / range };
            (id.clone(), normalized)
        })
        .collect()
}

// ============================================================================
// SECTION: Merge
// ============================================================================

/// Merges semantic and keyword rankings with a weighted combination.
///
/// The weight applies to the semantic side and is clamped to `[0, 1]`.
/// Results are deduplicated by id and sorted by combined score descending,
/// truncated to `top_k`.
#[must_use]
pub fn merge_results(
    semantic: &[(String, f64)],
    keyword: &[(String, f64)],
    semantic_weight: f64,
    top_k: usize,
) -> Vec<(String, ScoreTriple)> {
    let weight = semantic_weight.clamp(0.0, 1.0);
    let semantic_scores = normalize_scores(semantic);
    let keyword_scores = normalize_scores(keyword);

    let mut all_ids: BTreeMap<String, ()> = BTreeMap::new();
    for id in semantic_scores.keys().chain(keyword_scores.keys()) {
        all_ids.insert(id.clone(), ());
    }

    let mut merged: Vec<(String, ScoreTriple)> = all_ids
        .into_keys()
        .map(|id| {
            let semantic = semantic_scores.get(&id).copied().unwrap_or(0.0);
            let keyword = keyword_scores.get(&id).copied().unwrap_or(0.0);
            let combined = weight.mul_add(semantic, (1.0 - weight) * keyword);
            (
                id,
                ScoreTriple {
                    semantic: round4(semantic),
                    keyword: round4(keyword),
                    combined: round4(combined),
                },
            )
        })
        .collect();

    merged.sort_by(|a, b| {
        b.1.combined
            .partial_cmp(&a.1.combined)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(top_k);
    merged
}

/// Rounds to four decimal places for stable wire output.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::merge_results;
    use super::normalize_scores;

    #[test]
    fn normalization_maps_extremes_to_unit_range() {
        let scores = vec![
            ("a".to_string(), 2.0),
            ("b".to_string(), 6.0),
            ("c".to_string(), 4.0),
        ];
        let normalized = normalize_scores(&scores);
        assert!((normalized["a"] - 0.0).abs() < f64::EPSILON);
        assert!((normalized["b"] - 1.0).abs() < f64::EPSILON);
        assert!((normalized["c"] - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn degenerate_range_maps_to_one() {
        let scores = vec![("a".to_string(), 3.0), ("b".to_string(), 3.0)];
        let normalized = normalize_scores(&scores);
        assert!((normalized["a"] - 1.0).abs() < f64::EPSILON);
        assert!((normalized["b"] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_weights_semantic_side() {
        let semantic = vec![("a".to_string(), 0.9), ("b".to_string(), 0.1)];
        let keyword = vec![("b".to_string(), 5.0), ("c".to_string(), 1.0)];
        let merged = merge_results(&semantic, &keyword, 0.7, 10);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].0, "a");
        let a = &merged[0].1;
        assert!((a.combined - 0.7).abs() < 1e-9);
        assert!((a.keyword - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merge_clamps_weight_and_truncates() {
        let semantic = vec![("a".to_string(), 1.0)];
        let keyword = vec![("b".to_string(), 1.0)];
        let merged = merge_results(&semantic, &keyword, 7.0, 1);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].0, "a");
    }
}
