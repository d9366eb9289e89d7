// crates/cstp-server/src/handlers/mod.rs
// ============================================================================
// Module: Method Dispatcher
// Description: Routes validated JSON-RPC requests to method handlers.
// Purpose: One registry of cstp.* methods with uniform error mapping.
// Dependencies: crate::jsonrpc, crate::state, serde_json
// ============================================================================

//! ## Overview
//! The dispatcher validates the envelope, resolves the handler from the
//! method table, and converts typed handler failures into JSON-RPC errors.
//! An unknown (but correctly namespaced) method yields METHOD_NOT_FOUND
//! with the full known-method list in the error data. Authentication has
//! already happened in the HTTP layer; handlers receive the derived agent
//! identity.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Pre-action and session-context aggregators.
pub mod aggregators;
/// Corpus analytics.
pub mod analytics;
/// Outcome attribution.
pub mod attribution;
/// Circuit-breaker operator surface.
pub mod breakers;
/// Compaction and wisdom.
pub mod compaction;
/// Decision lifecycle.
pub mod decisions;
/// Decision graph.
pub mod graph;
/// Guardrail evaluation.
pub mod guardrails;
/// Retrieval.
pub mod query;
/// Vector reindexing.
pub mod reindex;
/// Structured storage queries.
pub mod storage;
/// Tracker debug surface.
pub mod tracker_debug;

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::AgentId;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::JsonRpcError;
use crate::jsonrpc::JsonRpcRequest;
use crate::jsonrpc::JsonRpcResponse;
use crate::jsonrpc::METHOD_NOT_FOUND;
use crate::state::ServerState;

// ============================================================================
// SECTION: Method Table
// ============================================================================

/// Every method the dispatcher routes, in registration order.
pub const METHODS: [&str; 29] = [
    "cstp.queryDecisions",
    "cstp.checkGuardrails",
    "cstp.listGuardrails",
    "cstp.recordDecision",
    "cstp.updateDecision",
    "cstp.recordThought",
    "cstp.getDecision",
    "cstp.reviewDecision",
    "cstp.getCalibration",
    "cstp.attributeOutcomes",
    "cstp.checkDrift",
    "cstp.reindex",
    "cstp.getReasonStats",
    "cstp.preAction",
    "cstp.getSessionContext",
    "cstp.ready",
    "cstp.linkDecisions",
    "cstp.getGraph",
    "cstp.getNeighbors",
    "cstp.compact",
    "cstp.getCompacted",
    "cstp.setPreserve",
    "cstp.getWisdom",
    "cstp.listDecisions",
    "cstp.getStats",
    "cstp.listBreakers",
    "cstp.getCircuitState",
    "cstp.resetCircuit",
    "cstp.debugTracker",
];

// ============================================================================
// SECTION: Dispatch
// ============================================================================

/// Dispatches one validated request to its handler.
///
/// Envelope validation errors, unknown methods, and handler failures all
/// serialize into the response; the correlation id is echoed throughout.
pub async fn dispatch(
    state: &ServerState,
    request: JsonRpcRequest,
    agent: &AgentId,
) -> JsonRpcResponse {
    if let Some(error) = request.validate() {
        return JsonRpcResponse::failure(request.id, error);
    }

    let params = request.params_object();
    let result = match request.method.as_str() {
        "cstp.queryDecisions" => query::handle_query_decisions(state, &params, agent).await,
        "cstp.checkGuardrails" => guardrails::handle_check_guardrails(state, &params, agent),
        "cstp.listGuardrails" => guardrails::handle_list_guardrails(state, &params),
        "cstp.recordDecision" => decisions::handle_record_decision(state, &params, agent).await,
        "cstp.updateDecision" => decisions::handle_update_decision(state, &params),
        "cstp.recordThought" => decisions::handle_record_thought(state, &params, agent),
        "cstp.getDecision" => decisions::handle_get_decision(state, &params, agent),
        "cstp.reviewDecision" => decisions::handle_review_decision(state, &params, agent).await,
        "cstp.getCalibration" => analytics::handle_get_calibration(state, &params),
        "cstp.attributeOutcomes" => attribution::handle_attribute_outcomes(state, &params),
        "cstp.checkDrift" => analytics::handle_check_drift(state, &params),
        "cstp.reindex" => reindex::handle_reindex(state).await,
        "cstp.getReasonStats" => analytics::handle_get_reason_stats(state, &params, agent),
        "cstp.preAction" => aggregators::handle_pre_action(state, &params, agent).await,
        "cstp.getSessionContext" => {
            aggregators::handle_get_session_context(state, &params, agent).await
        }
        "cstp.ready" => analytics::handle_ready(state, &params),
        "cstp.linkDecisions" => graph::handle_link_decisions(state, &params, agent),
        "cstp.getGraph" => graph::handle_get_graph(state, &params),
        "cstp.getNeighbors" => graph::handle_get_neighbors(state, &params),
        "cstp.compact" => compaction::handle_compact(state, &params),
        "cstp.getCompacted" => compaction::handle_get_compacted(state, &params),
        "cstp.setPreserve" => compaction::handle_set_preserve(state, &params),
        "cstp.getWisdom" => compaction::handle_get_wisdom(state, &params),
        "cstp.listDecisions" => storage::handle_list_decisions(state, &params),
        "cstp.getStats" => storage::handle_get_stats(state, &params),
        "cstp.listBreakers" => breakers::handle_list_breakers(state),
        "cstp.getCircuitState" => breakers::handle_get_circuit_state(state, &params),
        "cstp.resetCircuit" => breakers::handle_reset_circuit(state, &params),
        "cstp.debugTracker" => tracker_debug::handle_debug_tracker(state, &params),
        unknown => {
            return JsonRpcResponse::failure(
                request.id,
                JsonRpcError {
                    code: METHOD_NOT_FOUND,
                    message: format!("Method not found: {unknown}"),
                    data: Some(json!({ "method": unknown, "available": METHODS })),
                },
            );
        }
    };

    match result {
        Ok(value) => JsonRpcResponse::success(request.id, value),
        Err(error) => JsonRpcResponse::failure(request.id, error.into_rpc_error()),
    }
}

/// Convenience for tests: dispatch a method with params directly.
pub async fn dispatch_method(
    state: &ServerState,
    method: &str,
    params: Value,
    agent: &AgentId,
) -> JsonRpcResponse {
    dispatch(
        state,
        JsonRpcRequest {
            jsonrpc: crate::jsonrpc::JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
            id: json!(1),
        },
        agent,
    )
    .await
}
