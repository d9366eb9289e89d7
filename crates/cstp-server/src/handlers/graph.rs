// crates/cstp-server/src/handlers/graph.rs
// ============================================================================
// Module: Graph Handlers
// Description: linkDecisions, getGraph, and getNeighbors.
// Purpose: Typed edges between validated decision ids with traversal.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Linking validates both endpoints exist and the edge type is in the
//! vocabulary; traversal walks within the requested depth and direction,
//! restricted by edge types. Cycles are legal and terminate via the
//! visited set inside the graph.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::AgentId;
use cstp_core::Direction;
use cstp_core::EdgeType;
use cstp_core::graph::EdgeRecord;
use cstp_core::interfaces::StoreError;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// Handles `cstp.linkDecisions`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for missing fields or unknown
/// edge types and [`HandlerError::NotFound`] when either endpoint is
/// missing.
pub fn handle_link_decisions(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let source = params::get_str(params_value, &["sourceId", "source_id", "source"])
        .ok_or_else(|| HandlerError::InvalidParams("sourceId: required field".to_string()))?;
    let target = params::get_str(params_value, &["targetId", "target_id", "target"])
        .ok_or_else(|| HandlerError::InvalidParams("targetId: required field".to_string()))?;
    let edge_label = params::get_str(params_value, &["edgeType", "edge_type"])
        .ok_or_else(|| HandlerError::InvalidParams("edgeType: required field".to_string()))?;
    let edge_type = EdgeType::parse(edge_label).ok_or_else(|| {
        HandlerError::InvalidParams(format!(
            "edgeType: must be one of {}",
            EdgeType::ALL
                .iter()
                .map(|e| e.as_str())
                .collect::<Vec<_>>()
                .join(" | ")
        ))
    })?;
    if source == target {
        return Err(HandlerError::InvalidParams(
            "targetId: must differ from sourceId".to_string(),
        ));
    }

    let source_record = resolve_endpoint(state, source)?;
    let target_record = resolve_endpoint(state, target)?;

    let edge = EdgeRecord {
        source: source_record,
        target: target_record,
        edge_type,
        weight: params::get_f64(params_value, &["weight"]),
        context: params::get_str(params_value, &["context"]).map(str::to_string),
        created_at: state.now_rfc3339(),
        created_by: agent.as_str().to_string(),
    };
    state
        .graph
        .link(edge.clone())
        .map_err(|e| HandlerError::internal("GraphError", e))?;

    Ok(json!({
        "success": true,
        "edge": render_edge(&edge),
    }))
}

/// Resolves an endpoint id to its canonical short id.
fn resolve_endpoint(state: &ServerState, id: &str) -> Result<String, HandlerError> {
    match state.store.get(id) {
        Ok(record) => Ok(record.id.short().to_string()),
        Err(StoreError::NotFound(_) | StoreError::AmbiguousId(_)) => {
            Err(HandlerError::NotFound(format!("Decision not found: {id}")))
        }
        Err(error) => Err(HandlerError::internal("StoreError", error)),
    }
}

/// Handles `cstp.getGraph`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for missing node ids.
pub fn handle_get_graph(state: &ServerState, params_value: &Value) -> Result<Value, HandlerError> {
    let node = params::get_str(params_value, &["nodeId", "node_id", "node"])
        .ok_or_else(|| HandlerError::InvalidParams("nodeId: required field".to_string()))?;
    let depth = params::get_usize(params_value, &["depth"]).unwrap_or(1).clamp(1, 10);
    let direction = params::get_str(params_value, &["direction"])
        .and_then(Direction::parse)
        .unwrap_or_default();
    let edge_types: Option<Vec<EdgeType>> =
        params::get_str_list(params_value, &["edgeTypes", "edge_types"]).map(|labels| {
            labels
                .iter()
                .filter_map(|label| EdgeType::parse(label))
                .collect()
        });

    let subgraph = state
        .graph
        .subgraph(node, depth, edge_types.as_deref(), direction)
        .map_err(|e| HandlerError::internal("GraphError", e))?;

    Ok(json!({
        "nodes": subgraph.nodes,
        "edges": subgraph.edges.iter().map(render_edge).collect::<Vec<_>>(),
        "depth": depth,
    }))
}

/// Handles `cstp.getNeighbors`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for missing node ids.
pub fn handle_get_neighbors(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let node = params::get_str(params_value, &["nodeId", "node_id", "node"])
        .ok_or_else(|| HandlerError::InvalidParams("nodeId: required field".to_string()))?;
    let direction = params::get_str(params_value, &["direction"])
        .and_then(Direction::parse)
        .unwrap_or_default();
    let edge_type = params::get_str(params_value, &["edgeType", "edge_type"])
        .and_then(EdgeType::parse);
    let limit = params::get_usize(params_value, &["limit"]).unwrap_or(20).clamp(1, 100);

    let neighbors = state
        .graph
        .neighbors(node, direction, edge_type, limit)
        .map_err(|e| HandlerError::internal("GraphError", e))?;

    Ok(json!({
        "neighbors": neighbors
            .iter()
            .map(|n| json!({ "id": n.id, "edge": render_edge(&n.edge) }))
            .collect::<Vec<_>>(),
        "count": neighbors.len(),
    }))
}

/// Renders one edge for the wire.
fn render_edge(edge: &EdgeRecord) -> Value {
    json!({
        "source": edge.source,
        "target": edge.target,
        "edgeType": edge.edge_type.as_str(),
        "weight": edge.weight,
        "context": edge.context,
        "createdAt": edge.created_at,
        "createdBy": edge.created_by,
    })
}
