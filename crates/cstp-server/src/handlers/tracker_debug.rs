// crates/cstp-server/src/handlers/tracker_debug.rs
// ============================================================================
// Module: Tracker Debug Handler
// Description: cstp.debugTracker read-only tracker inspection.
// Purpose: Post-hoc audit of active sessions and the consumed ring.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Any authenticated agent can inspect all sessions; the surface is an
//! admin-level debug tool, intentionally unscoped. Calling it also runs a
//! deterministic cleanup of expired sessions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::to_camel_value;

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Handles `cstp.debugTracker`.
///
/// # Errors
///
/// This handler is infallible beyond serialization.
pub fn handle_debug_tracker(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let key = params::get_str(params_value, &["key"]);
    let include_consumed =
        params::get_bool(params_value, &["includeConsumed", "include_consumed"]).unwrap_or(false);

    let snapshot = state.tracker.debug_sessions(key, include_consumed);
    let value = serde_json::to_value(&snapshot)
        .map_err(|e| HandlerError::internal("SerializeError", e))?;
    Ok(to_camel_value(value))
}
