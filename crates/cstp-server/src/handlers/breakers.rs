// crates/cstp-server/src/handlers/breakers.rs
// ============================================================================
// Module: Breaker Handlers
// Description: cstp.listBreakers, cstp.getCircuitState, cstp.resetCircuit.
// Purpose: Operator surface over the circuit-breaker manager.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Read surfaces snapshot breaker state after applying lazy transitions;
//! the reset surface requires an OPEN breaker and optionally moves it to
//! half-open for a probe-first recovery.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::breaker::BreakerError;
use cstp_core::breaker::BreakerStateInfo;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `cstp.listBreakers`.
///
/// # Errors
///
/// Returns [`HandlerError`] when the manager state is unavailable.
pub fn handle_list_breakers(state: &ServerState) -> Result<Value, HandlerError> {
    let breakers = state
        .breakers
        .list()
        .map_err(|e| HandlerError::internal("BreakerError", e))?;
    Ok(json!({
        "breakers": breakers.iter().map(render_state).collect::<Vec<_>>(),
    }))
}

/// Handles `cstp.getCircuitState`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for a missing scope and
/// [`HandlerError::NotFound`] for an unknown one.
pub fn handle_get_circuit_state(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let scope = params::get_str(params_value, &["scope"])
        .ok_or_else(|| HandlerError::InvalidParams("scope: required field".to_string()))?;
    match state.breakers.get_state(scope) {
        Ok(info) => Ok(render_state(&info)),
        Err(BreakerError::UnknownScope(scope)) => Err(HandlerError::NotFound(format!(
            "No circuit breaker found for scope: {scope}"
        ))),
        Err(error) => Err(HandlerError::internal("BreakerError", error)),
    }
}

/// Handles `cstp.resetCircuit`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] when the breaker is missing or
/// not OPEN.
pub fn handle_reset_circuit(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let scope = params::get_str(params_value, &["scope"])
        .ok_or_else(|| HandlerError::InvalidParams("scope: required field".to_string()))?;
    let probe_first = params::get_bool(params_value, &["probeFirst", "probe_first"]).unwrap_or(false);

    match state.breakers.reset(scope, probe_first) {
        Ok(info) => Ok(json!({
            "scope": info.scope,
            "previousState": info.previous_state.as_str(),
            "newState": info.new_state.as_str(),
            "message": format!(
                "Circuit breaker {} reset: {} -> {}",
                info.scope,
                info.previous_state.as_str(),
                info.new_state.as_str()
            ),
        })),
        Err(BreakerError::UnknownScope(scope)) => Err(HandlerError::NotFound(format!(
            "No circuit breaker found for scope: {scope}"
        ))),
        Err(BreakerError::NotOpen(current)) => Err(HandlerError::InvalidParams(format!(
            "Can only reset OPEN breakers, current state: {current}"
        ))),
        Err(error) => Err(HandlerError::internal("BreakerError", error)),
    }
}

/// Renders one breaker snapshot.
fn render_state(info: &BreakerStateInfo) -> Value {
    json!({
        "scope": info.scope,
        "state": info.state.as_str(),
        "failureCount": info.failure_count,
        "failureThreshold": info.failure_threshold,
        "windowMs": info.window_ms,
        "cooldownMs": info.cooldown_ms,
        "cooldownRemainingMs": info.cooldown_remaining_ms,
        "openedAt": info.opened_at,
        "probeInFlight": info.probe_in_flight,
        "fromConfig": info.from_config,
    })
}
