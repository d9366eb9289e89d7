// crates/cstp-core/src/analytics/calibration.rs
// ============================================================================
// Module: Calibration Analytics
// Description: Confidence-versus-outcome statistics over reviewed decisions.
// Purpose: Report accuracy, Brier score, calibration gap, and bucket detail.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Calibration compares stated confidence with observed outcome values
//! (success 1.0, partial 0.5, failure and abandoned 0.0) over the reviewed
//! corpus. The overall view carries an interpretation thresholded at
//! plus-or-minus 0.05 and 0.10; the bucket view slices by 0.1 confidence
//! bands.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;

use crate::core::decision::DecisionRecord;

// ============================================================================
// SECTION: Interpretation
// ============================================================================

/// Calibration tendency derived from the gap.
///
/// # Invariants
/// - Thresholds are fixed at 0.05 and 0.10 on `accuracy - avg_confidence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    /// Gap within 0.05 either way.
    WellCalibrated,
    /// Confidence slightly above accuracy.
    SlightlyOverconfident,
    /// Confidence well above accuracy.
    Overconfident,
    /// Confidence slightly below accuracy.
    SlightlyUnderconfident,
    /// Confidence well below accuracy.
    Underconfident,
}

impl Interpretation {
    /// Classifies a calibration gap.
    #[must_use]
    pub fn from_gap(gap: f64) -> Self {
        if gap.abs() < 0.05 {
            Self::WellCalibrated
        } else if gap <= -0.10 {
            Self::Overconfident
        } else if gap < 0.0 {
            Self::SlightlyOverconfident
        } else if gap >= 0.10 {
            Self::Underconfident
        } else {
            Self::SlightlyUnderconfident
        }
    }

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::WellCalibrated => "well_calibrated",
            Self::SlightlyOverconfident => "slightly_overconfident",
            Self::Overconfident => "overconfident",
            Self::SlightlyUnderconfident => "slightly_underconfident",
            Self::Underconfident => "underconfident",
        }
    }
}

// ============================================================================
// SECTION: Statistics
// ============================================================================

/// Aggregate calibration statistics for one decision set.
///
/// # Invariants
/// - Derived from reviewed decisions only; `None` when the set is empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationStats {
    /// Number of reviewed decisions aggregated.
    pub reviewed_decisions: usize,
    /// Mean outcome value.
    pub accuracy: f64,
    /// Mean squared error of confidence versus outcome value.
    pub brier_score: f64,
    /// Mean stated confidence.
    pub avg_confidence: f64,
    /// `accuracy - avg_confidence`.
    pub calibration_gap: f64,
    /// Tendency classification.
    pub interpretation: Interpretation,
}

/// One 0.1-wide confidence bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationBucket {
    /// Bucket label, e.g. `0.7-0.8`.
    pub bucket: String,
    /// Reviewed decisions whose confidence falls in the band.
    pub decisions: usize,
    /// Mean outcome value in the band.
    pub accuracy: f64,
    /// Mean stated confidence in the band.
    pub avg_confidence: f64,
    /// Brier score in the band.
    pub brier_score: f64,
}

/// Computes overall calibration for a decision set.
///
/// Returns `None` when no reviewed decision with an outcome exists.
#[must_use]
pub fn calculate_calibration(decisions: &[DecisionRecord]) -> Option<CalibrationStats> {
    let pairs: Vec<(f64, f64)> = decisions
        .iter()
        .filter(|d| d.is_reviewed())
        .filter_map(|d| d.outcome_value().map(|v| (d.confidence, v)))
        .collect();
    if pairs.is_empty() {
        return None;
    }

    #[allow(clippy::cast_precision_loss, reason = "corpus sizes are small")]
    let count = pairs.len() as f64;
    let accuracy = pairs.iter().map(|(_, v)| v).sum::<f64>() / count;
    let avg_confidence = pairs.iter().map(|(c, _)| c).sum::<f64>() / count;
    let brier_score = pairs.iter().map(|(c, v)| (c - v) * (c - v)).sum::<f64>() / count;
    let calibration_gap = accuracy - avg_confidence;

    Some(CalibrationStats {
        reviewed_decisions: pairs.len(),
        accuracy: round3(accuracy),
        brier_score: round4(brier_score),
        avg_confidence: round3(avg_confidence),
        calibration_gap: round3(calibration_gap),
        interpretation: Interpretation::from_gap(calibration_gap),
    })
}

/// Computes per-band calibration buckets (0.1 bands over `[0, 1]`).
///
/// Bands are half-open except the last, which includes 1.0. Empty bands
/// are omitted.
#[must_use]
pub fn calibration_buckets(decisions: &[DecisionRecord]) -> Vec<CalibrationBucket> {
    let mut buckets: Vec<Vec<(f64, f64)>> = vec![Vec::new(); 10];
    for decision in decisions.iter().filter(|d| d.is_reviewed()) {
        let Some(value) = decision.outcome_value() else {
            continue;
        };
        let clamped = decision.confidence.clamp(0.0, 1.0);
        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            reason = "clamped to [0, 9] before the cast"
        )]
        let index = ((clamped * 10.0).floor() as usize).min(9);
        buckets[index].push((decision.confidence, value));
    }

    buckets
        .into_iter()
        .enumerate()
        .filter(|(_, pairs)| !pairs.is_empty())
        .map(|(index, pairs)| {
            #[allow(clippy::cast_precision_loss, reason = "corpus sizes are small")]
            let count = pairs.len() as f64;
            let accuracy = pairs.iter().map(|(_, v)| v).sum::<f64>() / count;
            let avg_confidence = pairs.iter().map(|(c, _)| c).sum::<f64>() / count;
            let brier = pairs.iter().map(|(c, v)| (c - v) * (c - v)).sum::<f64>() / count;
            #[allow(clippy::cast_precision_loss, reason = "index is at most 9")]
            let lo = index as f64 / 10.0;
            CalibrationBucket {
                bucket: format!("{lo:.1}-{:.1}", lo + 0.1),
                decisions: pairs.len(),
                accuracy: round3(accuracy),
                avg_confidence: round3(avg_confidence),
                brier_score: round4(brier),
            }
        })
        .collect()
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
    use crate::core::enums::Category;
    use crate::core::enums::DecisionStatus;
    use crate::core::enums::Outcome;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;

    use super::Interpretation;
    use super::calculate_calibration;
    use super::calibration_buckets;

    fn reviewed(confidence: f64, outcome: Outcome) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::generate(),
            summary: "d".to_string(),
            decision: "d".to_string(),
            category: Category::Process,
            confidence,
            stakes: Stakes::Medium,
            status: DecisionStatus::Reviewed,
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
            reasons: Vec::new(),
            pre_decision: None,
            related_to: Vec::new(),
            bridge: None,
            deliberation: None,
            preserve: false,
            outcome: Some(outcome),
            actual_result: None,
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn empty_set_yields_no_stats() {
        assert!(calculate_calibration(&[]).is_none());
    }

    #[test]
    fn perfect_calibration_reads_well_calibrated() {
        let corpus = vec![
            reviewed(1.0, Outcome::Success),
            reviewed(0.0, Outcome::Failure),
        ];
        let stats = calculate_calibration(&corpus);
        let Some(stats) = stats else {
            return assert!(stats.is_some());
        };
        assert!((stats.accuracy - 0.5).abs() < f64::EPSILON);
        assert!(stats.brier_score.abs() < f64::EPSILON);
        assert_eq!(stats.interpretation, Interpretation::WellCalibrated);
    }

    #[test]
    fn overconfidence_is_classified() {
        let corpus = vec![
            reviewed(0.9, Outcome::Failure),
            reviewed(0.9, Outcome::Failure),
        ];
        let stats = calculate_calibration(&corpus);
        let Some(stats) = stats else {
            return assert!(stats.is_some());
        };
        assert_eq!(stats.interpretation, Interpretation::Overconfident);
        assert!(stats.calibration_gap < -0.10);
    }

    #[test]
    fn interpretation_thresholds_are_exact() {
        assert_eq!(Interpretation::from_gap(0.04), Interpretation::WellCalibrated);
        assert_eq!(Interpretation::from_gap(-0.06), Interpretation::SlightlyOverconfident);
        assert_eq!(Interpretation::from_gap(-0.2), Interpretation::Overconfident);
        assert_eq!(Interpretation::from_gap(0.07), Interpretation::SlightlyUnderconfident);
        assert_eq!(Interpretation::from_gap(0.15), Interpretation::Underconfident);
    }

    #[test]
    fn buckets_slice_by_tenths_and_close_at_one() {
        let corpus = vec![
            reviewed(0.75, Outcome::Success),
            reviewed(0.72, Outcome::Failure),
            reviewed(1.0, Outcome::Success),
        ];
        let buckets = calibration_buckets(&corpus);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].bucket, "0.7-0.8");
        assert_eq!(buckets[0].decisions, 2);
        assert_eq!(buckets[1].bucket, "0.9-1.0");
        assert_eq!(buckets[1].decisions, 1);
    }
}
