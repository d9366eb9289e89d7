// crates/cstp-server/src/handlers/analytics.rs
// ============================================================================
// Module: Analytics Handlers
// Description: getCalibration, checkDrift, getReasonStats, and ready.
// Purpose: Serve the side-effect-free corpus analytics.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Each handler loads the corpus, applies the shared filter taxonomy, and
//! delegates to the corresponding `cstp-core` analytics engine with the
//! current moment pinned once per request. Reason-stats reads are tracked
//! for auto-deliberation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::AgentId;
use cstp_core::DecisionRecord;
use cstp_core::Priority;
use cstp_core::TrackerKey;
use cstp_core::analytics::DriftRequest;
use cstp_core::analytics::calculate_calibration;
use cstp_core::analytics::calibration_buckets;
use cstp_core::analytics::check_drift;
use cstp_core::analytics::reason_stats;
use cstp_core::analytics::ready::ReadyActionType;
use cstp_core::analytics::ready::ReadyRequest;
use cstp_core::analytics::ready::ready_actions;
use cstp_core::core::time::parse_timestamp;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::to_camel_value;

// ============================================================================
// SECTION: Shared Loading
// ============================================================================

/// Loads the corpus, mapping store failures to internal errors.
fn load_corpus(state: &ServerState) -> Result<Vec<DecisionRecord>, HandlerError> {
    state
        .store
        .load_all()
        .map_err(|e| HandlerError::internal("StoreError", e))
}

/// Applies the common category/project/since/until filters.
fn filter_corpus(
    corpus: Vec<DecisionRecord>,
    category: Option<&str>,
    project: Option<&str>,
    since: Option<&str>,
    until: Option<&str>,
) -> Vec<DecisionRecord> {
    corpus
        .into_iter()
        .filter(|record| {
            if let Some(category) = category {
                if record.category.as_str() != category {
                    return false;
                }
            }
            if let Some(project) = project {
                if record.project.as_deref() != Some(project) {
                    return false;
                }
            }
            let date: String = record.date.chars().take(10).collect();
            if let Some(since) = since {
                let bound: String = since.chars().take(10).collect();
                if date.as_str() < bound.as_str() {
                    return false;
                }
            }
            if let Some(until) = until {
                let bound: String = until.chars().take(10).collect();
                if date.as_str() > bound.as_str() {
                    return false;
                }
            }
            true
        })
        .collect()
}

// ============================================================================
// SECTION: Calibration
// ============================================================================

/// Handles `cstp.getCalibration`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_get_calibration(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let filters = params_value.get("filters").cloned().unwrap_or(Value::Null);
    let category = filters.get("category").and_then(Value::as_str);
    let project = filters.get("project").and_then(Value::as_str);
    let window = params::get_str(params_value, &["window"]);

    let mut corpus = filter_corpus(load_corpus(state)?, category, project, None, None);
    if let Some(window) = window {
        if let Some(days) = parse_window_days(window) {
            let cutoff = state.now() - time::Duration::days(days);
            corpus.retain(|record| {
                parse_timestamp(&record.date).is_some_and(|when| when >= cutoff)
            });
        }
    }

    let overall = calculate_calibration(&corpus);
    let buckets = calibration_buckets(&corpus);

    let overall_value = overall.map_or(Value::Null, |stats| {
        json!({
            "reviewedDecisions": stats.reviewed_decisions,
            "accuracy": stats.accuracy,
            "brierScore": stats.brier_score,
            "avgConfidence": stats.avg_confidence,
            "calibrationGap": stats.calibration_gap,
            "interpretation": stats.interpretation.as_str(),
        })
    });
    let bucket_values: Vec<Value> = buckets
        .iter()
        .map(|bucket| {
            json!({
                "bucket": bucket.bucket,
                "decisions": bucket.decisions,
                "accuracy": bucket.accuracy,
                "avgConfidence": bucket.avg_confidence,
                "brierScore": bucket.brier_score,
            })
        })
        .collect();

    Ok(json!({
        "overall": overall_value,
        "buckets": bucket_values,
        "agent": state.config.agent.name,
    }))
}

/// Parses a `30d`-style window into days.
fn parse_window_days(window: &str) -> Option<i64> {
    let digits = window.strip_suffix('d')?;
    digits.parse().ok()
}

// ============================================================================
// SECTION: Drift
// ============================================================================

/// Handles `cstp.checkDrift`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_check_drift(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let request = DriftRequest {
        threshold_brier: params::get_f64(params_value, &["thresholdBrier", "threshold_brier"])
            .unwrap_or(0.20),
        threshold_accuracy: params::get_f64(
            params_value,
            &["thresholdAccuracy", "threshold_accuracy"],
        )
        .unwrap_or(0.15),
        category: params::get_str(params_value, &["category"]).map(str::to_string),
        project: params::get_str(params_value, &["project"]).map(str::to_string),
        min_decisions: params::get_usize(params_value, &["minDecisions", "min_decisions"])
            .unwrap_or(5),
    };

    let corpus = load_corpus(state)?;
    let report = check_drift(&corpus, &request, state.now());
    let value = serde_json::to_value(&report)
        .map_err(|e| HandlerError::internal("SerializeError", e))?;
    Ok(to_camel_value(value))
}

// ============================================================================
// SECTION: Reason Stats
// ============================================================================

/// Handles `cstp.getReasonStats`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_get_reason_stats(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let filters = params_value.get("filters").cloned().unwrap_or(Value::Null);
    let corpus = filter_corpus(
        load_corpus(state)?,
        filters.get("category").and_then(Value::as_str),
        filters.get("project").and_then(Value::as_str),
        filters.get("since").and_then(Value::as_str),
        filters.get("until").and_then(Value::as_str),
    );
    let corpus: Vec<DecisionRecord> = match filters.get("stakes").and_then(Value::as_str) {
        Some(stakes) => corpus
            .into_iter()
            .filter(|record| record.stakes.as_str() == stakes)
            .collect(),
        None => corpus,
    };

    let min_reviewed =
        params::get_usize(params_value, &["minReviewed", "min_reviewed"]).unwrap_or(3);
    let report = reason_stats(&corpus, min_reviewed);

    let key = TrackerKey::compose(agent, None, None);
    state.tracker.track_stats(
        &key,
        report.total_decisions,
        report.by_reason_type.len(),
        Some(report.diversity.avg_types_per_decision),
    );

    let mut value = serde_json::to_value(&report)
        .map_err(|e| HandlerError::internal("SerializeError", e))?;
    value["queryTime"] = json!(state.now_rfc3339());
    Ok(to_camel_value(value))
}

// ============================================================================
// SECTION: Ready
// ============================================================================

/// Handles `cstp.ready`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_ready(state: &ServerState, params_value: &Value) -> Result<Value, HandlerError> {
    let action_types = params::get_str_list(params_value, &["actionTypes", "action_types"])
        .map(|labels| {
            labels
                .iter()
                .filter_map(|label| ReadyActionType::parse(label))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let request = ReadyRequest {
        min_priority: params::get_str(params_value, &["minPriority", "min_priority"])
            .and_then(Priority::parse)
            .unwrap_or(Priority::Low),
        action_types,
        category: params::get_str(params_value, &["category"]).map(str::to_string),
        limit: params::get_usize(params_value, &["limit"]).unwrap_or(20),
    };

    let corpus = load_corpus(state)?;
    let response = ready_actions(&corpus, &request, state.now());
    let value = serde_json::to_value(&response)
        .map_err(|e| HandlerError::internal("SerializeError", e))?;
    Ok(to_camel_value(value))
}
