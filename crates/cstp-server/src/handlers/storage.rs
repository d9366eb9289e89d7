// crates/cstp-server/src/handlers/storage.rs
// ============================================================================
// Module: Storage Handlers
// Description: cstp.listDecisions and cstp.getStats.
// Purpose: Structured list/stats queries over the decision store.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Server-side filtered, sorted, paginated listing and aggregate corpus
//! statistics, both delegated to the decision store so every backend
//! answers identically.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::interfaces::ListQuery;
use cstp_core::interfaces::StatsQuery;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::to_camel_value;

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `cstp.listDecisions`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_list_decisions(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let query = ListQuery {
        limit: params::get_usize(params_value, &["limit"]).unwrap_or(50).clamp(1, 500),
        offset: params::get_usize(params_value, &["offset"]).unwrap_or(0),
        category: params::get_str(params_value, &["category"]).map(str::to_string),
        stakes: params::get_str(params_value, &["stakes"]).map(str::to_string),
        status: params::get_str(params_value, &["status"]).map(str::to_string),
        agent: params::get_str(params_value, &["agent"]).map(str::to_string),
        tags: params::get_str_list(params_value, &["tags"]).unwrap_or_default(),
        project: params::get_str(params_value, &["project"]).map(str::to_string),
        date_from: params::get_str(params_value, &["dateFrom", "date_from"]).map(str::to_string),
        date_to: params::get_str(params_value, &["dateTo", "date_to"]).map(str::to_string),
        search: params::get_str(params_value, &["search"]).map(str::to_string),
        sort: params::get_str(params_value, &["sort"]).map(str::to_string),
        order: params::get_str(params_value, &["order"]).map(str::to_string),
    };

    let page = state
        .store
        .list(&query)
        .map_err(|e| HandlerError::internal("StoreError", e))?;

    let decisions: Result<Vec<Value>, HandlerError> = page
        .decisions
        .iter()
        .map(|record| {
            serde_json::to_value(record)
                .map(to_camel_value)
                .map_err(|e| HandlerError::internal("SerializeError", e))
        })
        .collect();

    Ok(json!({
        "decisions": decisions?,
        "total": page.total,
        "limit": query.limit,
        "offset": query.offset,
    }))
}

/// Handles `cstp.getStats`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub fn handle_get_stats(state: &ServerState, params_value: &Value) -> Result<Value, HandlerError> {
    let query = StatsQuery {
        date_from: params::get_str(params_value, &["dateFrom", "date_from"]).map(str::to_string),
        date_to: params::get_str(params_value, &["dateTo", "date_to"]).map(str::to_string),
        project: params::get_str(params_value, &["project"]).map(str::to_string),
    };
    let stats = state
        .store
        .stats(&query)
        .map_err(|e| HandlerError::internal("StoreError", e))?;

    Ok(json!({
        "total": stats.total,
        "byCategory": pairs_to_object(&stats.by_category),
        "byStakes": pairs_to_object(&stats.by_stakes),
        "byStatus": pairs_to_object(&stats.by_status),
        "byAgent": pairs_to_object(&stats.by_agent),
        "byDay": pairs_to_object(&stats.by_day),
        "topTags": stats
            .top_tags
            .iter()
            .map(|(tag, count)| json!({ "tag": tag, "count": count }))
            .collect::<Vec<_>>(),
        "recentActivity": stats.recent_activity,
    }))
}

/// Converts `(label, count)` pairs into a JSON object.
fn pairs_to_object(pairs: &[(String, usize)]) -> Value {
    let mut object = serde_json::Map::new();
    for (label, count) in pairs {
        object.insert(label.clone(), json!(count));
    }
    Value::Object(object)
}
