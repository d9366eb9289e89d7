// crates/cstp-core/tests/proptest_retrieval.rs
// ============================================================================
// Module: Retrieval Property Tests
// Description: Invariants of score normalization and hybrid fusion.
// Purpose: Ensure fusion stays within bounds for arbitrary score sets.
// Dependencies: cstp-core, proptest
// ============================================================================

//! Property tests over the hybrid fusion math: normalized scores stay in
//! the unit interval, merged output is deduplicated and ordered, and the
//! weight clamp holds for arbitrary inputs.

use proptest::prelude::ProptestConfig;
use proptest::prop_assert;
use proptest::prop_assert_eq;
use proptest::proptest;

use cstp_core::retrieval::merge_results;
use cstp_core::retrieval::normalize_scores;

/// Generates `(id, score)` pairs with distinct ids.
fn scored(prefix: &str, scores: &[f64]) -> Vec<(String, f64)> {
    scores
        .iter()
        .enumerate()
        .map(|(index, score)| (format!("{prefix}{index:04}"), *score))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn normalized_scores_stay_in_unit_interval(
        raw in proptest::collection::vec(-1_000.0..1_000.0_f64, 0..32),
    ) {
        let normalized = normalize_scores(&scored("d", &raw));
        for value in normalized.values() {
            prop_assert!((0.0..=1.0).contains(value));
        }
        prop_assert_eq!(normalized.len(), raw.len());
    }

    #[test]
    fn merged_results_are_deduplicated_ordered_and_bounded(
        semantic in proptest::collection::vec(0.0..1.0_f64, 0..16),
        keyword in proptest::collection::vec(0.0..20.0_f64, 0..16),
        weight in -10.0..10.0_f64,
        top_k in 1..32_usize,
    ) {
        let merged = merge_results(
            &scored("s", &semantic),
            &scored("k", &keyword),
            weight,
            top_k,
        );

        prop_assert!(merged.len() <= top_k);

        let mut seen = std::collections::BTreeSet::new();
        for (id, triple) in &merged {
            prop_assert!(seen.insert(id.clone()));
            prop_assert!((0.0..=1.0).contains(&triple.semantic));
            prop_assert!((0.0..=1.0).contains(&triple.keyword));
            prop_assert!((0.0..=1.0).contains(&triple.combined));
        }
        for window in merged.windows(2) {
            prop_assert!(window[0].1.combined >= window[1].1.combined);
        }
    }
}
