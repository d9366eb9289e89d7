// crates/cstp-core/src/analytics/ready.rs
// ============================================================================
// Module: Ready Queue
// Description: Prioritized list of overdue, stale, and drifted work.
// Purpose: Surface the next cognitive actions from the loaded corpus alone.
// Dependencies: crate::analytics::drift, crate::core, serde, time
// ============================================================================

//! ## Overview
//! Three detectors feed the ready queue: pending decisions whose review-by
//! date has passed (priority from stakes), pending decisions without a
//! review date that have gone stale (30 days medium, 60 days high), and
//! per-category calibration drift (40 percent change or more is high).
//! Results are filtered by minimum priority, sorted by priority then type
//! then oldest date, and capped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Serialize;
use time::Duration;
use time::OffsetDateTime;

use crate::analytics::drift::DriftRequest;
use crate::analytics::drift::check_drift;
use crate::core::decision::DecisionRecord;
use crate::core::enums::DecisionStatus;
use crate::core::enums::Priority;
use crate::core::enums::Stakes;
use crate::core::time::format_date;
use crate::core::time::parse_timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Days after which a pending decision without a review date goes stale.
pub const STALE_MEDIUM_DAYS: i64 = 30;
/// Days after which a stale pending decision escalates to high priority.
pub const STALE_HIGH_DAYS: i64 = 60;
/// Absolute drift change percentage at which priority becomes high.
const DRIFT_HIGH_PCT: f64 = 40.0;

// ============================================================================
// SECTION: Shapes
// ============================================================================

/// Kind of ready action.
///
/// # Invariants
/// - `rank` fixes the tiebreak order: reviews first, then drift, then stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyActionType {
    /// Overdue outcome review.
    ReviewOutcome,
    /// Per-category calibration drift.
    CalibrationDrift,
    /// Stale pending decision.
    StalePending,
}

impl ReadyActionType {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReviewOutcome => "review_outcome",
            Self::CalibrationDrift => "calibration_drift",
            Self::StalePending => "stale_pending",
        }
    }

    /// Tiebreak rank after priority.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::ReviewOutcome => 0,
            Self::CalibrationDrift => 1,
            Self::StalePending => 2,
        }
    }

    /// Parses a wire label into an action type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "review_outcome" => Some(Self::ReviewOutcome),
            "calibration_drift" => Some(Self::CalibrationDrift),
            "stale_pending" => Some(Self::StalePending),
            _ => None,
        }
    }
}

/// One prioritized action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadyAction {
    /// Action kind.
    #[serde(rename = "type")]
    pub action_type: ReadyActionType,
    /// Priority level.
    pub priority: Priority,
    /// Why this action surfaced.
    pub reason: String,
    /// Suggested next step.
    pub suggestion: String,
    /// Related decision id, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    /// Related category, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Related decision date, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Related decision title, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short detail string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ready-queue request parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyRequest {
    /// Minimum priority to include.
    pub min_priority: Priority,
    /// Action-type filter; empty means all types.
    pub action_types: Vec<ReadyActionType>,
    /// Category filter.
    pub category: Option<String>,
    /// Maximum actions returned.
    pub limit: usize,
}

impl Default for ReadyRequest {
    fn default() -> Self {
        Self {
            min_priority: Priority::Low,
            action_types: Vec::new(),
            category: None,
            limit: 20,
        }
    }
}

/// Ready-queue response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadyResponse {
    /// Prioritized actions after filtering and capping.
    pub actions: Vec<ReadyAction>,
    /// Actions detected before priority filtering.
    pub total: usize,
    /// Actions removed by the priority filter.
    pub filtered: usize,
}

// ============================================================================
// SECTION: Detection
// ============================================================================

/// Builds the prioritized ready queue from the loaded corpus.
#[must_use]
pub fn ready_actions(
    decisions: &[DecisionRecord],
    request: &ReadyRequest,
    now: OffsetDateTime,
) -> ReadyResponse {
    let wants = |action: ReadyActionType| -> bool {
        request.action_types.is_empty() || request.action_types.contains(&action)
    };

    let mut actions: Vec<ReadyAction> = Vec::new();
    if wants(ReadyActionType::ReviewOutcome) {
        actions.extend(detect_review_outcome(decisions, now));
    }
    if wants(ReadyActionType::StalePending) {
        actions.extend(detect_stale_pending(decisions, now));
    }
    if wants(ReadyActionType::CalibrationDrift) {
        actions.extend(detect_drift(decisions, request.category.as_deref(), now));
    }

    if let Some(category) = &request.category {
        actions.retain(|a| a.category.as_deref() == Some(category.as_str()));
    }

    let total = actions.len();
    actions.retain(|a| a.priority >= request.min_priority);
    let filtered = total - actions.len();

    actions.sort_by(|a, b| {
        b.priority
            .rank()
            .cmp(&a.priority.rank())
            .then(a.action_type.rank().cmp(&b.action_type.rank()))
            .then_with(|| {
                let a_date = a.date.as_deref().unwrap_or("9999-99-99");
                let b_date = b.date.as_deref().unwrap_or("9999-99-99");
                a_date.cmp(b_date)
            })
    });
    actions.truncate(request.limit);

    ReadyResponse {
        actions,
        total,
        filtered,
    }
}

/// Pending decisions with a review-by date in the past.
fn detect_review_outcome(decisions: &[DecisionRecord], now: OffsetDateTime) -> Vec<ReadyAction> {
    let today = format_date(now);
    let mut actions = Vec::new();

    for record in decisions {
        if record.status != DecisionStatus::Pending {
            continue;
        }
        let Some(review_by) = &record.review_by else {
            continue;
        };
        if review_by.is_empty() || review_by.as_str() >= today.as_str() {
            continue;
        }

        let priority = match record.stakes {
            Stakes::Critical | Stakes::High => Priority::High,
            Stakes::Medium => Priority::Medium,
            Stakes::Low => Priority::Low,
        };
        let days_overdue = parse_timestamp(review_by)
            .map(|due| (now - due).whole_days())
            .unwrap_or(0);

        actions.push(ReadyAction {
            action_type: ReadyActionType::ReviewOutcome,
            priority,
            reason: format!(
                "Decision needs outcome review (due {review_by}, {days_overdue}d overdue)"
            ),
            suggestion: "Use reviewDecision to record what happened".to_string(),
            decision_id: Some(record.id.short().to_string()),
            category: Some(record.category.as_str().to_string()),
            date: Some(record.date.chars().take(10).collect()),
            title: Some(truncate(&record.summary, 80)),
            detail: Some(format!("review by {review_by} ({days_overdue}d overdue)")),
        });
    }
    actions
}

/// Pending decisions without a review date, older than the stale horizon.
fn detect_stale_pending(decisions: &[DecisionRecord], now: OffsetDateTime) -> Vec<ReadyAction> {
    let cutoff_medium = format_date(now - Duration::days(STALE_MEDIUM_DAYS));
    let cutoff_high = format_date(now - Duration::days(STALE_HIGH_DAYS));
    let mut actions = Vec::new();

    for record in decisions {
        if record.status != DecisionStatus::Pending || record.review_by.is_some() {
            continue;
        }
        let date: String = record.date.chars().take(10).collect();
        if date.is_empty() || date.as_str() >= cutoff_medium.as_str() {
            continue;
        }
        let days_old = parse_timestamp(&date)
            .map(|then| (now - then).whole_days())
            .unwrap_or(STALE_MEDIUM_DAYS);
        let priority = if date.as_str() < cutoff_high.as_str() {
            Priority::High
        } else {
            Priority::Medium
        };

        actions.push(ReadyAction {
            action_type: ReadyActionType::StalePending,
            priority,
            reason: format!("Decision pending for {days_old} days with no outcome"),
            suggestion: "Review and record outcome, or mark as abandoned".to_string(),
            decision_id: Some(record.id.short().to_string()),
            category: Some(record.category.as_str().to_string()),
            date: Some(date),
            title: Some(truncate(&record.summary, 80)),
            detail: Some(format!("pending {days_old} days")),
        });
    }
    actions
}

/// Per-category drift converted into actions.
fn detect_drift(
    decisions: &[DecisionRecord],
    category_filter: Option<&str>,
    now: OffsetDateTime,
) -> Vec<ReadyAction> {
    let mut categories: BTreeSet<String> = decisions
        .iter()
        .filter(|d| d.is_reviewed())
        .map(|d| d.category.as_str().to_string())
        .collect();
    if let Some(filter) = category_filter {
        categories.retain(|c| c == filter);
    }

    let mut actions = Vec::new();
    for category in categories {
        let request = DriftRequest {
            category: Some(category.clone()),
            ..DriftRequest::default()
        };
        let report = check_drift(decisions, &request, now);
        if !report.drift_detected {
            continue;
        }
        for alert in report.alerts {
            let priority = if alert.change_pct.abs() >= DRIFT_HIGH_PCT {
                Priority::High
            } else {
                Priority::Medium
            };
            actions.push(ReadyAction {
                action_type: ReadyActionType::CalibrationDrift,
                priority,
                reason: alert.message,
                suggestion: format!(
                    "Review recent {category} decisions - calibration has degraded from historical baseline"
                ),
                decision_id: None,
                category: Some(category.clone()),
                date: None,
                title: None,
                detail: None,
            });
        }
    }
    actions
}

/// Truncates a string to `max` characters.
fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
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
    use crate::core::enums::Priority;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;

    use super::ReadyActionType;
    use super::ReadyRequest;
    use super::ready_actions;

    const NOW: time::OffsetDateTime = datetime!(2026-02-15 12:00:00 UTC);

    fn pending(id: &str, date: &str, stakes: Stakes, review_by: Option<&str>) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new(id),
            summary: format!("decision {id}"),
            decision: format!("decision {id}"),
            category: Category::Tooling,
            confidence: 0.7,
            stakes,
            status: DecisionStatus::Pending,
            date: date.to_string(),
            context: None,
            pattern: None,
            tags: Vec::new(),
            project: None,
            feature: None,
            pr: None,
            kpi_indicators: Vec::new(),
            mental_state: None,
            review_by: review_by.map(str::to_string),
            recorded_by: None,
            reasons: Vec::new(),
            pre_decision: None,
            related_to: Vec::new(),
            bridge: None,
            deliberation: None,
            preserve: false,
            outcome: None,
            actual_result: None,
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    fn reviewed(date: &str, confidence: f64, outcome: Outcome) -> DecisionRecord {
        let mut record = pending("ee000000", date, Stakes::Medium, None);
        record.id = DecisionId::generate();
        record.status = DecisionStatus::Reviewed;
        record.confidence = confidence;
        record.outcome = Some(outcome);
        record
    }

    #[test]
    fn overdue_review_priority_follows_stakes() {
        let corpus = vec![
            pending("aa000000", "2026-01-01", Stakes::Critical, Some("2026-02-01")),
            pending("bb000000", "2026-01-01", Stakes::Medium, Some("2026-02-01")),
            pending("cc000000", "2026-01-01", Stakes::Low, Some("2026-02-01")),
        ];
        let response = ready_actions(&corpus, &ReadyRequest::default(), NOW);
        assert_eq!(response.actions.len(), 3);
        assert_eq!(response.actions[0].priority, Priority::High);
        assert_eq!(response.actions[0].decision_id.as_deref(), Some("aa000000"));
        assert_eq!(response.actions[2].priority, Priority::Low);
    }

    #[test]
    fn future_review_dates_do_not_surface() {
        let corpus = vec![pending(
            "aa000000",
            "2026-02-01",
            Stakes::High,
            Some("2026-03-01"),
        )];
        let response = ready_actions(&corpus, &ReadyRequest::default(), NOW);
        assert!(response.actions.is_empty());
    }

    #[test]
    fn stale_pending_escalates_with_age() {
        let corpus = vec![
            pending("aa000000", "2026-01-10", Stakes::Medium, None),
            pending("bb000000", "2025-12-01", Stakes::Medium, None),
            pending("cc000000", "2026-02-10", Stakes::Medium, None),
        ];
        let response = ready_actions(&corpus, &ReadyRequest::default(), NOW);
        assert_eq!(response.actions.len(), 2);
        assert_eq!(response.actions[0].priority, Priority::High);
        assert_eq!(response.actions[0].decision_id.as_deref(), Some("bb000000"));
        assert_eq!(response.actions[1].priority, Priority::Medium);
    }

    #[test]
    fn min_priority_filters_and_reports_counts() {
        let corpus = vec![
            pending("aa000000", "2026-01-01", Stakes::Low, Some("2026-02-01")),
            pending("bb000000", "2026-01-01", Stakes::Critical, Some("2026-02-01")),
        ];
        let request = ReadyRequest {
            min_priority: Priority::High,
            ..ReadyRequest::default()
        };
        let response = ready_actions(&corpus, &request, NOW);
        assert_eq!(response.total, 2);
        assert_eq!(response.filtered, 1);
        assert_eq!(response.actions.len(), 1);
    }

    #[test]
    fn drift_actions_carry_the_category() {
        let mut corpus: Vec<DecisionRecord> = (0..30)
            .map(|_| reviewed("2025-12-01", 0.8, Outcome::Success))
            .collect();
        corpus.extend((0..10).map(|_| reviewed("2026-02-10", 0.8, Outcome::Failure)));

        let request = ReadyRequest {
            action_types: vec![ReadyActionType::CalibrationDrift],
            ..ReadyRequest::default()
        };
        let response = ready_actions(&corpus, &request, NOW);
        assert!(!response.actions.is_empty());
        assert_eq!(response.actions[0].category.as_deref(), Some("tooling"));
        assert_eq!(response.actions[0].priority, Priority::High);
    }

    #[test]
    fn sort_puts_reviews_before_stale_at_equal_priority() {
        let corpus = vec![
            pending("aa000000", "2025-11-01", Stakes::Medium, None),
            pending("bb000000", "2026-01-01", Stakes::High, Some("2026-02-01")),
        ];
        let response = ready_actions(&corpus, &ReadyRequest::default(), NOW);
        assert_eq!(response.actions[0].action_type, ReadyActionType::ReviewOutcome);
    }
}
