// crates/cstp-server/src/handlers/attribution.rs
// ============================================================================
// Module: Attribution Handler
// Description: cstp.attributeOutcomes for PR-stability outcome linking.
// Purpose: Attribute success to pending decisions whose linked change has
//          been stable past the threshold.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Walks the pending decisions of a project and attributes a `success`
//! outcome to those whose linked PR has been stable for the configured
//! number of days (creation date used as the stability anchor). `dryRun`
//! reports what would change without writing anything.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::DecisionStatus;
use cstp_core::Outcome;
use cstp_core::core::time::age_days;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Default stability horizon in days.
const DEFAULT_STABILITY_DAYS: i64 = 14;

/// Handles `cstp.attributeOutcomes`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for a missing project and
/// [`HandlerError::AttributionFailed`] when the corpus cannot be read or
/// rewritten.
pub fn handle_attribute_outcomes(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let project = params::get_str(params_value, &["project"])
        .ok_or_else(|| HandlerError::InvalidParams("project: required field".to_string()))?;
    let since = params::get_str(params_value, &["since"]);
    let stability_days = params::get(params_value, &["stabilityDays", "stability_days"])
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_STABILITY_DAYS);
    let dry_run = params::get_bool(params_value, &["dryRun", "dry_run"]).unwrap_or(false);

    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::AttributionFailed(e.to_string()))?;
    let now = state.now();

    let mut processed = 0usize;
    let mut attributed = 0usize;
    let mut skipped = 0usize;
    let mut results: Vec<Value> = Vec::new();

    for mut record in corpus {
        if record.status != DecisionStatus::Pending {
            continue;
        }
        if record.project.as_deref() != Some(project) {
            continue;
        }
        if let Some(since) = since {
            let date: String = record.date.chars().take(10).collect();
            let bound: String = since.chars().take(10).collect();
            if date.as_str() < bound.as_str() {
                continue;
            }
        }
        processed += 1;

        // PR linkage is required for stability attribution; the creation
        // date anchors the stability window.
        let stable = record.pr.is_some()
            && age_days(&record.date, now).is_some_and(|age| age >= stability_days);
        if !stable {
            skipped += 1;
            continue;
        }

        let reason = format!("PR stable for {stability_days}+ days");
        if !dry_run {
            record.status = DecisionStatus::Reviewed;
            record.outcome = Some(Outcome::Success);
            record.actual_result = Some(reason.clone());
            record.reviewed_at = Some(state.now_rfc3339());
            record.reviewed_by = Some("attribution".to_string());
            state
                .store
                .rewrite(&record)
                .map_err(|e| HandlerError::AttributionFailed(e.to_string()))?;
        }
        attributed += 1;
        results.push(json!({
            "id": record.id.short(),
            "outcome": "success",
            "reason": reason,
            "updated": !dry_run,
        }));
    }

    Ok(json!({
        "processed": processed,
        "attributed": { "success": attributed, "skipped": skipped },
        "decisions": results,
        "dryRun": dry_run,
        "queryTime": state.now_rfc3339(),
    }))
}
