// crates/cstp-server/src/handlers/compaction.rs
// ============================================================================
// Module: Compaction Handlers
// Description: compact, getCompacted, setPreserve, and getWisdom.
// Purpose: Serve the age-based shaping engine; raw files stay untouched.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! `compact` counts levels without rewriting anything; `getCompacted`
//! shapes matching decisions; `setPreserve` flips the one field that makes
//! a record immune to compaction, atomically; `getWisdom` serves the
//! category aggregates over wisdom-age reviewed decisions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::CompactionLevel;
use cstp_core::compaction::CompactedQuery;
use cstp_core::compaction::build_wisdom;
use cstp_core::compaction::get_compacted;
use cstp_core::compaction::run_compaction;
use cstp_core::interfaces::StoreError;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::to_camel_value;

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `cstp.compact`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_compact(state: &ServerState, params_value: &Value) -> Result<Value, HandlerError> {
    let category = params::get_str(params_value, &["category"]);
    let dry_run = params::get_bool(params_value, &["dryRun", "dry_run"]).unwrap_or(true);
    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::internal("StoreError", e))?;
    let report = run_compaction(&corpus, category, state.now());
    Ok(json!({
        "compacted": report.compacted,
        "preserved": report.preserved,
        "levels": {
            "full": report.levels.full,
            "summary": report.levels.summary,
            "digest": report.levels.digest,
            "wisdom": report.levels.wisdom,
        },
        "dryRun": dry_run,
    }))
}

/// Handles `cstp.getCompacted`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for an unknown forced level.
pub fn handle_get_compacted(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let level = match params::get_str(params_value, &["level"]) {
        Some(label) => Some(CompactionLevel::parse(label).ok_or_else(|| {
            HandlerError::InvalidParams(format!(
                "level: must be one of full | summary | digest | wisdom, got '{label}'"
            ))
        })?),
        None => None,
    };
    let query = CompactedQuery {
        category: params::get_str(params_value, &["category"]).map(str::to_string),
        level,
        limit: params::get_usize(params_value, &["limit"]).unwrap_or(50),
        include_preserved: params::get_bool(params_value, &["includePreserved", "include_preserved"])
            .unwrap_or(false),
    };

    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::internal("StoreError", e))?;
    let page = get_compacted(&corpus, &query, state.now());
    let value =
        serde_json::to_value(&page).map_err(|e| HandlerError::internal("SerializeError", e))?;
    Ok(to_camel_value(value))
}

/// Handles `cstp.setPreserve`.
///
/// # Errors
///
/// Returns [`HandlerError::NotFound`] for unknown ids.
pub fn handle_set_preserve(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let id = params::get_str(params_value, &["id", "decisionId", "decision_id"])
        .ok_or_else(|| HandlerError::InvalidParams("id: required field".to_string()))?;
    let preserve = params::get_bool(params_value, &["preserve"]).unwrap_or(true);

    let mut record = match state.store.get(id) {
        Ok(record) => record,
        Err(StoreError::NotFound(_) | StoreError::AmbiguousId(_)) => {
            return Err(HandlerError::NotFound(format!("Decision not found: {id}")));
        }
        Err(error) => return Err(HandlerError::internal("StoreError", error)),
    };
    record.preserve = preserve;
    state
        .store
        .rewrite(&record)
        .map_err(|e| HandlerError::internal("StoreError", e))?;

    Ok(json!({
        "success": true,
        "decisionId": record.id.short(),
        "preserve": preserve,
    }))
}

/// Handles `cstp.getWisdom`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_get_wisdom(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let category = params::get_str(params_value, &["category"]);
    let min_decisions =
        params::get_usize(params_value, &["minDecisions", "min_decisions"]).unwrap_or(5);

    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::internal("StoreError", e))?;
    let wisdom = build_wisdom(&corpus, min_decisions, category, state.now());
    let total: usize = wisdom.iter().map(|entry| entry.decisions).sum();

    let value =
        serde_json::to_value(&wisdom).map_err(|e| HandlerError::internal("SerializeError", e))?;
    Ok(json!({
        "wisdom": to_camel_value(value),
        "totalDecisions": total,
        "categoriesAnalyzed": wisdom.len(),
    }))
}
