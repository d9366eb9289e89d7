// crates/cstp-core/src/analytics/drift.rs
// ============================================================================
// Module: Drift Detection
// Description: Recent-versus-historical calibration comparison with alerts.
// Purpose: Surface Brier degradation and accuracy drops early.
// Dependencies: crate::analytics::calibration, crate::core, serde, time
// ============================================================================

//! ## Overview
//! Drift compares the last 30 days against the 30-to-120-day historical
//! window. Alerts fire on a relative Brier degradation above the threshold
//! (default 20%) with an absolute delta of at least 0.03, or a relative
//! accuracy drop above the threshold (default 15%) with an absolute delta
//! of at least 0.05. Insufficient data on either side produces no alert
//! and an `insufficient_data` recommendation instead.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

use crate::analytics::calibration::CalibrationStats;
use crate::analytics::calibration::calculate_calibration;
use crate::core::decision::DecisionRecord;
use crate::core::time::parse_timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Recent window length in days.
const RECENT_WINDOW_DAYS: i64 = 30;
/// Historical window horizon in days.
const HISTORICAL_WINDOW_DAYS: i64 = 120;
/// Minimum absolute Brier delta required for an alert.
const MIN_BRIER_DELTA: f64 = 0.03;
/// Minimum absolute accuracy delta required for an alert.
const MIN_ACCURACY_DELTA: f64 = 0.05;
/// Relative Brier change above which severity escalates to error.
const BRIER_ERROR_CHANGE: f64 = 0.5;
/// Relative accuracy change above which severity escalates to error.
const ACCURACY_ERROR_CHANGE: f64 = 0.25;

// ============================================================================
// SECTION: Request and Response Shapes
// ============================================================================

/// Drift check parameters.
///
/// # Invariants
/// - Thresholds are relative fractions, not percentage points.
#[derive(Debug, Clone, PartialEq)]
pub struct DriftRequest {
    /// Relative Brier degradation threshold (default 0.20).
    pub threshold_brier: f64,
    /// Relative accuracy drop threshold (default 0.15).
    pub threshold_accuracy: f64,
    /// Category filter (wire label).
    pub category: Option<String>,
    /// Project filter.
    pub project: Option<String>,
    /// Minimum decisions per window.
    pub min_decisions: usize,
}

impl Default for DriftRequest {
    fn default() -> Self {
        Self {
            threshold_brier: 0.20,
            threshold_accuracy: 0.15,
            category: None,
            project: None,
            min_decisions: 5,
        }
    }
}

/// Alert severity.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    Info,
    /// Degradation worth attention.
    Warning,
    /// Severe degradation.
    Error,
}

impl Severity {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One drift alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftAlert {
    /// Alert type: `brier_degradation` or `accuracy_drop`.
    #[serde(rename = "type")]
    pub alert_type: String,
    /// Category the alert concerns, when filtered.
    pub category: Option<String>,
    /// Recent-window value.
    pub recent_value: f64,
    /// Historical-window value.
    pub historical_value: f64,
    /// Relative change in percent (negative for drops).
    pub change_pct: f64,
    /// Alert severity.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
}

/// Stats for one comparison window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowStats {
    /// Window label (`30d` or `90d+`).
    pub window: String,
    /// Window Brier score.
    pub brier_score: f64,
    /// Window accuracy.
    pub accuracy: f64,
    /// Decisions in the window.
    pub decisions: usize,
}

/// Follow-up recommendation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftRecommendation {
    /// Recommendation type label.
    #[serde(rename = "type")]
    pub rec_type: String,
    /// Human-readable message.
    pub message: String,
    /// Severity label.
    pub severity: String,
}

/// Full drift check result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    /// Whether any alert fired.
    pub drift_detected: bool,
    /// Recent-window stats, when enough data existed.
    pub recent: Option<WindowStats>,
    /// Historical-window stats, when enough data existed.
    pub historical: Option<WindowStats>,
    /// Fired alerts.
    pub alerts: Vec<DriftAlert>,
    /// Recommendations derived from the alerts.
    pub recommendations: Vec<DriftRecommendation>,
}

// ============================================================================
// SECTION: Drift Check
// ============================================================================

/// Runs the drift check over the corpus.
#[must_use]
pub fn check_drift(
    decisions: &[DecisionRecord],
    request: &DriftRequest,
    now: OffsetDateTime,
) -> DriftReport {
    let recent_start = now - Duration::days(RECENT_WINDOW_DAYS);
    let historical_start = now - Duration::days(HISTORICAL_WINDOW_DAYS);

    let in_scope = |record: &&DecisionRecord| -> bool {
        if !record.is_reviewed() {
            return false;
        }
        if let Some(category) = &request.category {
            if record.category.as_str() != category {
                return false;
            }
        }
        if let Some(project) = &request.project {
            if record.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        true
    };

    let mut recent: Vec<DecisionRecord> = Vec::new();
    let mut historical: Vec<DecisionRecord> = Vec::new();
    for record in decisions.iter().filter(in_scope) {
        let Some(when) = parse_timestamp(&record.date) else {
            continue;
        };
        if when >= recent_start && when <= now {
            recent.push(record.clone());
        } else if when >= historical_start && when < recent_start {
            historical.push(record.clone());
        }
    }

    if recent.len() < request.min_decisions {
        return insufficient(format!(
            "Need at least {} recent decisions for drift detection (found {})",
            request.min_decisions,
            recent.len()
        ));
    }
    if historical.len() < request.min_decisions {
        return insufficient(format!(
            "Need at least {} historical decisions for drift detection (found {})",
            request.min_decisions,
            historical.len()
        ));
    }

    let (Some(recent_cal), Some(historical_cal)) = (
        calculate_calibration(&recent),
        calculate_calibration(&historical),
    ) else {
        return DriftReport {
            drift_detected: false,
            recent: None,
            historical: None,
            alerts: Vec::new(),
            recommendations: vec![DriftRecommendation {
                rec_type: "calculation_error".to_string(),
                message: "Could not calculate calibration metrics".to_string(),
                severity: "warning".to_string(),
            }],
        };
    };

    let alerts = detect_alerts(&recent_cal, &historical_cal, request);
    let recommendations = recommendations_for(&alerts);

    DriftReport {
        drift_detected: !alerts.is_empty(),
        recent: Some(WindowStats {
            window: "30d".to_string(),
            brier_score: recent_cal.brier_score,
            accuracy: recent_cal.accuracy,
            decisions: recent.len(),
        }),
        historical: Some(WindowStats {
            window: "90d+".to_string(),
            brier_score: historical_cal.brier_score,
            accuracy: historical_cal.accuracy,
            decisions: historical.len(),
        }),
        alerts,
        recommendations,
    }
}

/// Builds the insufficient-data report.
fn insufficient(message: String) -> DriftReport {
    DriftReport {
        drift_detected: false,
        recent: None,
        historical: None,
        alerts: Vec::new(),
        recommendations: vec![DriftRecommendation {
            rec_type: "insufficient_data".to_string(),
            message,
            severity: "info".to_string(),
        }],
    }
}

/// Compares window calibrations and fires alerts.
fn detect_alerts(
    recent: &CalibrationStats,
    historical: &CalibrationStats,
    request: &DriftRequest,
) -> Vec<DriftAlert> {
    let mut alerts = Vec::new();
    let category_prefix = request
        .category
        .as_ref()
        .map(|c| format!("{} decisions: ", title_case(c)))
        .unwrap_or_default();

    // Brier degradation: higher is worse.
    let brier_delta = recent.brier_score - historical.brier_score;
    if historical.brier_score > 0.001 && brier_delta >= MIN_BRIER_DELTA {
        let change = brier_delta / historical.brier_score;
        if change > request.threshold_brier {
            let severity = if change > BRIER_ERROR_CHANGE {
                Severity::Error
            } else {
                Severity::Warning
            };
            alerts.push(DriftAlert {
                alert_type: "brier_degradation".to_string(),
                category: request.category.clone(),
                recent_value: recent.brier_score,
                historical_value: historical.brier_score,
                change_pct: round1(change * 100.0),
                severity,
                message: format!(
                    "{category_prefix}Brier score degraded {:.0}% ({:.2} -> {:.2})",
                    change * 100.0,
                    historical.brier_score,
                    recent.brier_score
                ),
            });
        }
    }

    // Accuracy drop: lower is worse.
    let accuracy_delta = historical.accuracy - recent.accuracy;
    if historical.accuracy > 0.001 && accuracy_delta >= MIN_ACCURACY_DELTA {
        let change = accuracy_delta / historical.accuracy;
        if change > request.threshold_accuracy {
            let severity = if change > ACCURACY_ERROR_CHANGE {
                Severity::Error
            } else {
                Severity::Warning
            };
            alerts.push(DriftAlert {
                alert_type: "accuracy_drop".to_string(),
                category: request.category.clone(),
                recent_value: recent.accuracy,
                historical_value: historical.accuracy,
                change_pct: round1(-change * 100.0),
                severity,
                message: format!(
                    "{category_prefix}Accuracy dropped {:.0}% ({:.0}% -> {:.0}%)",
                    change * 100.0,
                    historical.accuracy * 100.0,
                    recent.accuracy * 100.0
                ),
            });
        }
    }

    alerts
}

/// Deduplicated recommendations per alert type.
fn recommendations_for(alerts: &[DriftAlert]) -> Vec<DriftRecommendation> {
    let mut seen: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
    let mut recommendations = Vec::new();
    for alert in alerts {
        if !seen.insert(alert.alert_type.as_str()) {
            continue;
        }
        match alert.alert_type.as_str() {
            "brier_degradation" => recommendations.push(DriftRecommendation {
                rec_type: "recalibrate".to_string(),
                message: "Consider adjusting confidence estimates - you may be overconfident recently"
                    .to_string(),
                severity: "info".to_string(),
            }),
            "accuracy_drop" => recommendations.push(DriftRecommendation {
                rec_type: "review_process".to_string(),
                message: "Review recent decisions - accuracy has declined from historical baseline"
                    .to_string(),
                severity: "info".to_string(),
            }),
            _ => {}
        }
    }
    recommendations
}

/// Uppercases the first character of a label.
fn title_case(value: &str) -> String {
    let mut chars = value.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().collect::<String>() + chars.as_str()
    })
}

/// Rounds to one decimal place.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use crate::core::decision::DecisionRecord;
    use crate::core::enums::Category;
    use crate::core::enums::DecisionStatus;
    use crate::core::enums::Outcome;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;

    use super::DriftRequest;
    use super::Severity;
    use super::check_drift;

    const NOW: time::OffsetDateTime = datetime!(2026-02-15 12:00:00 UTC);

    fn reviewed(date: &str, confidence: f64, outcome: Outcome) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::generate(),
            summary: "d".to_string(),
            decision: "d".to_string(),
            category: Category::Process,
            confidence,
            stakes: Stakes::Medium,
            status: DecisionStatus::Reviewed,
            date: date.to_string(),
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
    fn insufficient_recent_data_yields_recommendation_only() {
        let corpus: Vec<DecisionRecord> = (0..30)
            .map(|_| reviewed("2025-12-01", 0.8, Outcome::Success))
            .collect();
        let report = check_drift(&corpus, &DriftRequest::default(), NOW);
        assert!(!report.drift_detected);
        assert!(report.recent.is_none());
        assert_eq!(report.recommendations[0].rec_type, "insufficient_data");
    }

    #[test]
    fn brier_degradation_fires_with_error_severity() {
        // Historical: well calibrated (brier ~0.04). Recent: badly off (~0.64).
        let mut corpus: Vec<DecisionRecord> = (0..30)
            .map(|_| reviewed("2025-12-01", 0.8, Outcome::Success))
            .collect();
        corpus.extend((0..10).map(|_| reviewed("2026-02-10", 0.8, Outcome::Failure)));

        let report = check_drift(&corpus, &DriftRequest::default(), NOW);
        assert!(report.drift_detected);
        let brier = report
            .alerts
            .iter()
            .find(|a| a.alert_type == "brier_degradation");
        let Some(brier) = brier else {
            return assert!(brier.is_some());
        };
        assert_eq!(brier.severity, Severity::Error);
        assert!(brier.message.contains("Brier score degraded"));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.rec_type == "recalibrate"));
    }

    #[test]
    fn category_filter_appears_in_the_message() {
        let mut corpus: Vec<DecisionRecord> = (0..30)
            .map(|_| reviewed("2025-12-01", 0.8, Outcome::Success))
            .collect();
        corpus.extend((0..10).map(|_| reviewed("2026-02-10", 0.8, Outcome::Failure)));

        let request = DriftRequest {
            category: Some("process".to_string()),
            ..DriftRequest::default()
        };
        let report = check_drift(&corpus, &request, NOW);
        assert!(report.drift_detected);
        assert!(report.alerts[0].message.starts_with("Process decisions:"));
    }

    #[test]
    fn small_absolute_deltas_do_not_alert() {
        // Brier moves from 0.0400 to 0.0484: > 20% relative but < 0.03 absolute.
        let mut corpus: Vec<DecisionRecord> = (0..30)
            .map(|_| reviewed("2025-12-01", 0.8, Outcome::Success))
            .collect();
        corpus.extend((0..10).map(|_| reviewed("2026-02-10", 0.78, Outcome::Success)));

        let report = check_drift(&corpus, &DriftRequest::default(), NOW);
        assert!(!report.drift_detected);
        assert!(report.recent.is_some());
        assert!(report.historical.is_some());
    }
}
