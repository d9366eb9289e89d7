// crates/cstp-server/src/handlers/guardrails.rs
// ============================================================================
// Module: Guardrail Handlers
// Description: cstp.checkGuardrails and cstp.listGuardrails.
// Purpose: Evaluate action contexts against rules and the breaker gate.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! A guardrail check merges the action's category/stakes/confidence with
//! any additional context, evaluates every loaded rule, and consults the
//! circuit-breaker manager. Breaker blocks surface as violations with
//! `type=circuit_breaker` plus state, failure rate, and the reset moment;
//! they are successful responses, never errors. Every check is tracked for
//! auto-deliberation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::AgentId;
use cstp_core::TrackerKey;
use cstp_core::breaker::BreakerCheckResult;
use cstp_core::breaker::BreakerContext;
use cstp_core::core::time::format_rfc3339;
use cstp_core::guardrails::EvaluationResult;
use cstp_core::guardrails::GuardrailResult;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;

// ============================================================================
// SECTION: Check Handler
// ============================================================================

/// Handles `cstp.checkGuardrails`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] when the action block is
/// missing and [`HandlerError::GuardrailEvalFailed`] when evaluation
/// cannot complete.
pub fn handle_check_guardrails(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let Some(action) = params_value.get("action").and_then(Value::as_object) else {
        return Err(HandlerError::InvalidParams(
            "action: required field".to_string(),
        ));
    };
    let description = action
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut context: Map<String, Value> = Map::new();
    for key in ["category", "stakes", "confidence"] {
        if let Some(value) = action.get(key) {
            context.insert(key.to_string(), value.clone());
        }
    }
    if let Some(extra) = action.get("context").and_then(Value::as_object) {
        for (key, value) in extra {
            context.insert(key.clone(), value.clone());
        }
    }

    let evaluation = state.guardrails.evaluate(
        &context,
        agent.as_str(),
        &description,
        state.audit.as_ref(),
        state.now_rfc3339(),
    );

    let breaker_context = breaker_context_from(&context);
    let breaker_results = state
        .breakers
        .check(&breaker_context)
        .map_err(|e| HandlerError::GuardrailEvalFailed(e.to_string()))?;

    let response = render_check_response(state, &evaluation, &breaker_results);

    let key = TrackerKey::compose(agent, None, None);
    state.tracker.track_guardrail(
        &key,
        &description,
        response["allowed"].as_bool().unwrap_or(true),
        response["violations"].as_array().map_or(0, Vec::len),
    );

    Ok(response)
}

/// Builds the breaker context from the evaluation context.
pub fn breaker_context_from(context: &Map<String, Value>) -> BreakerContext {
    BreakerContext {
        category: context
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_string),
        stakes: context
            .get("stakes")
            .and_then(Value::as_str)
            .map(str::to_string),
        agent_id: context
            .get("agent_id")
            .or_else(|| context.get("agentId"))
            .and_then(Value::as_str)
            .map(str::to_string),
        tags: context
            .get("tags")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Renders the combined guardrail + breaker response.
pub fn render_check_response(
    state: &ServerState,
    evaluation: &EvaluationResult,
    breaker_results: &[BreakerCheckResult],
) -> Value {
    let mut violations: Vec<Value> = evaluation
        .violations
        .iter()
        .map(render_guardrail_result)
        .collect();
    let warnings: Vec<Value> = evaluation
        .warnings
        .iter()
        .map(render_guardrail_result)
        .collect();

    let mut allowed = evaluation.allowed;
    for result in breaker_results {
        if result.blocked {
            allowed = false;
            violations.push(render_breaker_violation(state, result));
        }
    }

    json!({
        "allowed": allowed,
        "violations": violations,
        "warnings": warnings,
        "evaluated": evaluation.evaluated,
        "evaluatedAt": state.now_rfc3339(),
        "agent": state.config.agent.name,
    })
}

/// Renders one fired guardrail.
fn render_guardrail_result(result: &GuardrailResult) -> Value {
    json!({
        "guardrailId": result.guardrail_id,
        "name": result.name,
        "message": result.message,
        "severity": result.action.as_str(),
    })
}

/// Renders a breaker block as a guardrail-style violation.
fn render_breaker_violation(state: &ServerState, result: &BreakerCheckResult) -> Value {
    #[allow(clippy::cast_precision_loss, reason = "failure counts are small")]
    let failure_rate = result.failure_count as f64 / f64::from(result.failure_threshold.max(1));
    let reset_at = result.cooldown_remaining_ms.map(|remaining| {
        format_rfc3339(
            state.now() + time::Duration::milliseconds(i64::try_from(remaining).unwrap_or(i64::MAX)),
        )
    });
    json!({
        "guardrailId": format!("circuit_breaker:{}", result.scope),
        "name": format!("Circuit breaker {}", result.scope),
        "message": result.message,
        "severity": "block",
        "type": "circuit_breaker",
        "state": result.state.as_str(),
        "failureRate": failure_rate,
        "resetAt": reset_at,
    })
}

// ============================================================================
// SECTION: List Handler
// ============================================================================

/// Handles `cstp.listGuardrails`.
///
/// # Errors
///
/// This handler is infallible beyond serialization.
pub fn handle_list_guardrails(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let scope = params::get_str(params_value, &["scope"]);
    let guardrails: Vec<Value> = state
        .guardrails
        .guardrails()
        .iter()
        .filter(|g| scope.is_none_or(|s| g.scope.is_empty() || g.scope.iter().any(|p| p == s)))
        .map(|g| {
            json!({
                "id": g.id,
                "description": g.description,
                "action": g.action.as_str(),
                "scope": g.scope,
                "conditions": g.conditions.len(),
                "requirements": g.requirements.len(),
            })
        })
        .collect();
    let count = guardrails.len();
    Ok(json!({
        "guardrails": guardrails,
        "count": count,
        "agent": state.config.agent.name,
    }))
}
