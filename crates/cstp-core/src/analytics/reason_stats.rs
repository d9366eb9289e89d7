// crates/cstp-core/src/analytics/reason_stats.rs
// ============================================================================
// Module: Reason-Type Statistics
// Description: Per-reason-type calibration and diversity analysis.
// Purpose: Answer which reasoning types correlate with better outcomes.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Reasons are grouped by type, each type counted once per decision. Per
//! type the engine reports total and reviewed uses, outcome counts, a
//! success rate (partial counts half), mean confidence and strength, and a
//! Brier score once the reviewed count reaches the minimum. Diversity
//! buckets group decisions by their number of distinct reason types; the
//! recommendation pass compares types, flags overconfident ones, and names
//! never-used types from the canonical vocabulary.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Serialize;

use crate::core::decision::DecisionRecord;
use crate::core::enums::Outcome;
use crate::core::enums::ReasonType;

// ============================================================================
// SECTION: Shapes
// ============================================================================

/// Statistics for a single reason type.
///
/// # Invariants
/// - A type is counted once per decision regardless of reason multiplicity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonTypeStats {
    /// The reason type.
    pub reason_type: ReasonType,
    /// Decisions using this type.
    pub total_uses: usize,
    /// Reviewed decisions using this type.
    pub reviewed_uses: usize,
    /// Successes among reviewed uses.
    pub success_count: usize,
    /// Partials among reviewed uses.
    pub partial_count: usize,
    /// Failures (including abandoned) among reviewed uses.
    pub failure_count: usize,
    /// `(successes + 0.5 * partials) / reviewed`.
    pub success_rate: f64,
    /// Mean stated confidence of decisions using this type.
    pub avg_confidence: f64,
    /// Mean strength across reasons of this type.
    pub avg_strength: f64,
    /// Brier score, present once `reviewed_uses >= min_reviewed`.
    pub brier_score: Option<f64>,
}

/// One diversity bucket keyed by distinct reason-type count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiversityBucket {
    /// Distinct reason types in the bucketed decisions.
    pub distinct_reason_types: usize,
    /// Decisions in the bucket.
    pub total_decisions: usize,
    /// Reviewed decisions in the bucket.
    pub reviewed_decisions: usize,
    /// Success rate over reviewed decisions; `None` when none reviewed.
    pub success_rate: Option<f64>,
    /// Mean stated confidence in the bucket.
    pub avg_confidence: f64,
    /// Brier score over reviewed decisions.
    pub brier_score: Option<f64>,
}

/// Diversity analysis across the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct DiversityStats {
    /// Mean distinct reason types per decision.
    pub avg_types_per_decision: f64,
    /// Mean total reasons per decision.
    pub avg_reasons_per_decision: f64,
    /// Buckets by distinct-type count, ascending.
    pub diversity_buckets: Vec<DiversityBucket>,
}

/// One actionable recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasonRecommendation {
    /// Recommendation type label.
    #[serde(rename = "type")]
    pub rec_type: String,
    /// Human-readable message.
    pub message: String,
    /// Severity label: `info` or `warning`.
    pub severity: String,
}

/// Full reason-stats result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasonStatsReport {
    /// Per-type stats, best performing first.
    pub by_reason_type: Vec<ReasonTypeStats>,
    /// Diversity analysis.
    pub diversity: DiversityStats,
    /// Recommendations.
    pub recommendations: Vec<ReasonRecommendation>,
    /// Decisions analyzed (those carrying reasons).
    pub total_decisions: usize,
    /// Reviewed decisions among them.
    pub reviewed_decisions: usize,
}

// ============================================================================
// SECTION: Per-Type Accumulation
// ============================================================================

/// Mutable accumulator for one reason type.
#[derive(Debug, Default)]
struct TypeAccumulator {
    /// Decisions using the type.
    total: usize,
    /// Reviewed decisions using the type.
    reviewed: usize,
    /// Success count.
    successes: usize,
    /// Partial count.
    partials: usize,
    /// Failure count.
    failures: usize,
    /// Stated confidences of decisions using the type.
    confidences: Vec<f64>,
    /// Strengths of reasons of the type.
    strengths: Vec<f64>,
    /// `(confidence, outcome value)` pairs for Brier.
    brier_pairs: Vec<(f64, f64)>,
}

/// Computes per-type statistics.
#[must_use]
pub fn calculate_type_stats(
    decisions: &[DecisionRecord],
    min_reviewed: usize,
) -> Vec<ReasonTypeStats> {
    let mut accumulators: BTreeMap<ReasonType, TypeAccumulator> = BTreeMap::new();

    for decision in decisions {
        let is_reviewed = decision.is_reviewed();
        let mut seen: BTreeSet<ReasonType> = BTreeSet::new();
        for reason in &decision.reasons {
            let acc = accumulators.entry(reason.reason_type).or_default();
            if seen.insert(reason.reason_type) {
                acc.total += 1;
                acc.confidences.push(decision.confidence);
                if is_reviewed {
                    acc.reviewed += 1;
                    match decision.outcome {
                        Some(Outcome::Success) => {
                            acc.successes += 1;
                            acc.brier_pairs.push((decision.confidence, 1.0));
                        }
                        Some(Outcome::Partial) => {
                            acc.partials += 1;
                            acc.brier_pairs.push((decision.confidence, 0.5));
                        }
                        Some(Outcome::Failure | Outcome::Abandoned) => {
                            acc.failures += 1;
                            acc.brier_pairs.push((decision.confidence, 0.0));
                        }
                        None => {}
                    }
                }
            }
            acc.strengths.push(reason.strength);
        }
    }

    let mut stats: Vec<ReasonTypeStats> = accumulators
        .into_iter()
        .map(|(reason_type, acc)| {
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let success_rate = if acc.reviewed > 0 {
                (acc.successes as f64).mul_add(1.0, acc.partials as f64 * 0.5)
                    / acc.reviewed as f64
            } else {
                0.0
            };
            let brier_score = if acc.reviewed >= min_reviewed && !acc.brier_pairs.is_empty() {
                #[allow(clippy::cast_precision_loss, reason = "counts are small")]
                let mean = acc
                    .brier_pairs
                    .iter()
                    .map(|(c, v)| (c - v) * (c - v))
                    .sum::<f64>()
                    / acc.brier_pairs.len() as f64;
                Some(round4(mean))
            } else {
                None
            };
            ReasonTypeStats {
                reason_type,
                total_uses: acc.total,
                reviewed_uses: acc.reviewed,
                success_count: acc.successes,
                partial_count: acc.partials,
                failure_count: acc.failures,
                success_rate: round3(success_rate),
                avg_confidence: round3(mean(&acc.confidences)),
                avg_strength: round3(mean(&acc.strengths)),
                brier_score,
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        let a_key = (a.reviewed_uses >= min_reviewed, a.success_rate);
        let b_key = (b.reviewed_uses >= min_reviewed, b.success_rate);
        b_key
            .partial_cmp(&a_key)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    stats
}

// ============================================================================
// SECTION: Diversity
// ============================================================================

/// Computes diversity statistics.
#[must_use]
pub fn calculate_diversity(decisions: &[DecisionRecord]) -> DiversityStats {
    let mut buckets: BTreeMap<usize, Vec<&DecisionRecord>> = BTreeMap::new();
    let mut total_types = 0usize;
    let mut total_reasons = 0usize;
    let mut with_reasons = 0usize;

    for decision in decisions {
        if decision.reasons.is_empty() {
            continue;
        }
        with_reasons += 1;
        let distinct = decision.reason_types().len();
        total_types += distinct;
        total_reasons += decision.reasons.len();
        buckets.entry(distinct).or_default().push(decision);
    }

    let denominator = with_reasons.max(1);
    let diversity_buckets = buckets
        .into_iter()
        .map(|(distinct, records)| {
            let reviewed: Vec<&&DecisionRecord> =
                records.iter().filter(|d| d.is_reviewed()).collect();
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let avg_confidence = round3(
                records.iter().map(|d| d.confidence).sum::<f64>() / records.len() as f64,
            );
            if reviewed.is_empty() {
                return DiversityBucket {
                    distinct_reason_types: distinct,
                    total_decisions: records.len(),
                    reviewed_decisions: 0,
                    success_rate: None,
                    avg_confidence,
                    brier_score: None,
                };
            }
            let successes = reviewed
                .iter()
                .filter(|d| d.outcome == Some(Outcome::Success))
                .count();
            let partials = reviewed
                .iter()
                .filter(|d| d.outcome == Some(Outcome::Partial))
                .count();
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let success_rate = (successes as f64).mul_add(1.0, partials as f64 * 0.5)
                / reviewed.len() as f64;
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let brier = reviewed
                .iter()
                .filter_map(|d| d.outcome_value().map(|v| (d.confidence - v).powi(2)))
                .sum::<f64>()
                / reviewed.len() as f64;
            DiversityBucket {
                distinct_reason_types: distinct,
                total_decisions: records.len(),
                reviewed_decisions: reviewed.len(),
                success_rate: Some(round3(success_rate)),
                avg_confidence,
                brier_score: Some(round4(brier)),
            }
        })
        .collect();

    #[allow(clippy::cast_precision_loss, reason = "counts are small")]
    let avg_types = total_types as f64 / denominator as f64;
    #[allow(clippy::cast_precision_loss, reason = "counts are small")]
    let avg_reasons = total_reasons as f64 / denominator as f64;
    DiversityStats {
        avg_types_per_decision: round2(avg_types),
        avg_reasons_per_decision: round2(avg_reasons),
        diversity_buckets,
    }
}

// ============================================================================
// SECTION: Recommendations
// ============================================================================

/// Generates recommendations from the type and diversity analyses.
#[must_use]
pub fn generate_recommendations(
    type_stats: &[ReasonTypeStats],
    diversity: &DiversityStats,
    min_reviewed: usize,
) -> Vec<ReasonRecommendation> {
    let mut recommendations = Vec::new();
    let reviewed: Vec<&ReasonTypeStats> = type_stats
        .iter()
        .filter(|s| s.reviewed_uses >= min_reviewed)
        .collect();

    // Best-versus-worst comparison.
    if let (Some(best), Some(worst)) = (
        reviewed.iter().max_by(|a, b| {
            a.success_rate
                .partial_cmp(&b.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
        reviewed.iter().min_by(|a, b| {
            a.success_rate
                .partial_cmp(&b.success_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        }),
    ) {
        if best.success_rate > worst.success_rate + 0.15 {
            recommendations.push(ReasonRecommendation {
                rec_type: "best_reason_type".to_string(),
                message: format!(
                    "'{}' reasoning has {:.0}% success rate ({} decisions), while '{}' has {:.0}%. Consider relying more on {}-based reasoning.",
                    best.reason_type,
                    best.success_rate * 100.0,
                    best.reviewed_uses,
                    worst.reason_type,
                    worst.success_rate * 100.0,
                    best.reason_type
                ),
                severity: "info".to_string(),
            });
        }
    }

    // High confidence, low success.
    for stats in &reviewed {
        if stats.avg_confidence > 0.8 && stats.success_rate < 0.6 {
            recommendations.push(ReasonRecommendation {
                rec_type: "overconfident_type".to_string(),
                message: format!(
                    "'{}' reasoning: avg confidence {:.0}% but only {:.0}% success rate. Lower confidence when relying primarily on {}.",
                    stats.reason_type,
                    stats.avg_confidence * 100.0,
                    stats.success_rate * 100.0,
                    stats.reason_type
                ),
                severity: "warning".to_string(),
            });
        }
    }

    // Diversity floor.
    if diversity.avg_types_per_decision > 0.0 && diversity.avg_types_per_decision < 1.5 {
        recommendations.push(ReasonRecommendation {
            rec_type: "low_diversity".to_string(),
            message: format!(
                "Average {:.1} distinct reason types per decision. Parallel bundles of 2 or more independent reason types are more robust than single-type chains.",
                diversity.avg_types_per_decision
            ),
            severity: "warning".to_string(),
        });
    }

    // Single-type versus multi-type comparison.
    let usable: Vec<&DiversityBucket> = diversity
        .diversity_buckets
        .iter()
        .filter(|b| b.reviewed_decisions >= 2 && b.success_rate.is_some())
        .collect();
    if usable.len() >= 2 {
        let single = usable.iter().find(|b| b.distinct_reason_types == 1);
        let multi: Vec<&&DiversityBucket> = usable
            .iter()
            .filter(|b| b.distinct_reason_types >= 2)
            .collect();
        if let Some(single) = single {
            if !multi.is_empty() {
                let single_rate = single.success_rate.unwrap_or(0.0);
                let multi_rate = multi
                    .iter()
                    .filter_map(|b| b.success_rate)
                    .fold(0.0_f64, f64::max);
                let multi_n: usize = multi.iter().map(|b| b.reviewed_decisions).sum();
                if multi_rate > single_rate + 0.1 {
                    recommendations.push(ReasonRecommendation {
                        rec_type: "diversity_benefit".to_string(),
                        message: format!(
                            "Multi-type reasoning ({:.0}% success, n={multi_n}) outperforms single-type ({:.0}%). Parallel bundles work: use 2 or more independent reason types.",
                            multi_rate * 100.0,
                            single_rate * 100.0
                        ),
                        severity: "info".to_string(),
                    });
                } else if single_rate > multi_rate + 0.1 {
                    recommendations.push(ReasonRecommendation {
                        rec_type: "diversity_no_benefit".to_string(),
                        message: format!(
                            "Single-type reasoning ({:.0}% success) currently outperforms multi-type ({:.0}%). Quality of reasons may matter more than quantity here.",
                            single_rate * 100.0,
                            multi_rate * 100.0
                        ),
                        severity: "info".to_string(),
                    });
                }
            }
        }
    }

    // Never-used types from the canonical vocabulary.
    let used: BTreeSet<ReasonType> = type_stats.iter().map(|s| s.reason_type).collect();
    let unused: Vec<&str> = ReasonType::ALL
        .into_iter()
        .filter(|t| !used.contains(t))
        .map(ReasonType::as_str)
        .collect();
    if !unused.is_empty() {
        recommendations.push(ReasonRecommendation {
            rec_type: "unused_types".to_string(),
            message: format!(
                "Never-used reason types: {}. Consider whether these perspectives could strengthen decisions.",
                unused.join(", ")
            ),
            severity: "info".to_string(),
        });
    }

    recommendations
}

/// Runs the full reason-stats analysis over decisions carrying reasons.
#[must_use]
pub fn reason_stats(decisions: &[DecisionRecord], min_reviewed: usize) -> ReasonStatsReport {
    let with_reasons: Vec<DecisionRecord> = decisions
        .iter()
        .filter(|d| !d.reasons.is_empty())
        .cloned()
        .collect();
    let reviewed = with_reasons.iter().filter(|d| d.is_reviewed()).count();

    let by_reason_type = calculate_type_stats(&with_reasons, min_reviewed);
    let diversity = calculate_diversity(&with_reasons);
    let recommendations = generate_recommendations(&by_reason_type, &diversity, min_reviewed);

    ReasonStatsReport {
        by_reason_type,
        diversity,
        recommendations,
        total_decisions: with_reasons.len(),
        reviewed_decisions: reviewed,
    }
}

/// Mean of a slice; zero for empty input.
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss, reason = "counts are small")]
    let count = values.len() as f64;
    values.iter().sum::<f64>() / count
}

/// Rounds to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Rounds to three decimal places.
fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// Rounds to four decimal places.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use crate::core::decision::DecisionRecord;
    use crate::core::decision::Reason;
    use crate::core::enums::Category;
    use crate::core::enums::DecisionStatus;
    use crate::core::enums::Outcome;
    use crate::core::enums::ReasonType;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;

    use super::reason_stats;

    fn with_reasons(
        types: &[ReasonType],
        confidence: f64,
        outcome: Option<Outcome>,
    ) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::generate(),
            summary: "d".to_string(),
            decision: "d".to_string(),
            category: Category::Process,
            confidence,
            stakes: Stakes::Medium,
            status: if outcome.is_some() {
                DecisionStatus::Reviewed
            } else {
                DecisionStatus::Pending
            },
            date: "2026-01-01T00:00:00Z".to_string(),
            context: None,
            pattern: None,
            tags: Vec::new(),
            project: None,
            feature: None,
            pr: None,
            kpi_indicators: Vec::new(),
            mental_state: None,
            review_by: None,
            recorded_by: None,
            reasons: types
                .iter()
                .map(|t| Reason {
                    reason_type: *t,
                    text: format!("{t} reason"),
                    strength: 0.8,
                })
                .collect(),
            pre_decision: None,
            related_to: Vec::new(),
            bridge: None,
            deliberation: None,
            preserve: false,
            outcome,
            actual_result: None,
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn type_counted_once_per_decision() {
        let corpus = vec![with_reasons(
            &[ReasonType::Analysis, ReasonType::Analysis],
            0.8,
            Some(Outcome::Success),
        )];
        let report = reason_stats(&corpus, 1);
        let analysis = report
            .by_reason_type
            .iter()
            .find(|s| s.reason_type == ReasonType::Analysis);
        let Some(analysis) = analysis else {
            return assert!(analysis.is_some());
        };
        assert_eq!(analysis.total_uses, 1);
        assert_eq!(analysis.reviewed_uses, 1);
        // Both reasons still feed avg_strength.
        assert!((analysis.avg_strength - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn success_rate_counts_partial_as_half() {
        let corpus = vec![
            with_reasons(&[ReasonType::Empirical], 0.7, Some(Outcome::Success)),
            with_reasons(&[ReasonType::Empirical], 0.7, Some(Outcome::Partial)),
            with_reasons(&[ReasonType::Empirical], 0.7, Some(Outcome::Failure)),
        ];
        let report = reason_stats(&corpus, 3);
        let stats = &report.by_reason_type[0];
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert!(stats.brier_score.is_some());
    }

    #[test]
    fn brier_gated_on_min_reviewed() {
        let corpus = vec![with_reasons(&[ReasonType::Pattern], 0.9, Some(Outcome::Success))];
        let report = reason_stats(&corpus, 3);
        assert!(report.by_reason_type[0].brier_score.is_none());
    }

    #[test]
    fn diversity_buckets_group_by_distinct_types() {
        let corpus = vec![
            with_reasons(&[ReasonType::Analysis], 0.6, Some(Outcome::Failure)),
            with_reasons(
                &[ReasonType::Analysis, ReasonType::Empirical],
                0.7,
                Some(Outcome::Success),
            ),
            with_reasons(
                &[ReasonType::Pattern, ReasonType::Authority],
                0.7,
                Some(Outcome::Success),
            ),
        ];
        let report = reason_stats(&corpus, 1);
        assert_eq!(report.diversity.diversity_buckets.len(), 2);
        assert_eq!(report.diversity.diversity_buckets[0].distinct_reason_types, 1);
        assert_eq!(report.diversity.diversity_buckets[1].total_decisions, 2);
    }

    #[test]
    fn unused_types_are_reported() {
        let corpus = vec![with_reasons(&[ReasonType::Analysis], 0.8, None)];
        let report = reason_stats(&corpus, 3);
        let unused = report
            .recommendations
            .iter()
            .find(|r| r.rec_type == "unused_types");
        let Some(unused) = unused else {
            return assert!(unused.is_some());
        };
        assert!(unused.message.contains("empirical"));
        assert!(!unused.message.contains("analysis,"));
    }

    #[test]
    fn overconfident_type_is_flagged() {
        let corpus = vec![
            with_reasons(&[ReasonType::Intuition], 0.9, Some(Outcome::Failure)),
            with_reasons(&[ReasonType::Intuition], 0.9, Some(Outcome::Failure)),
            with_reasons(&[ReasonType::Intuition], 0.9, Some(Outcome::Success)),
        ];
        let report = reason_stats(&corpus, 3);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.rec_type == "overconfident_type"));
    }
}
