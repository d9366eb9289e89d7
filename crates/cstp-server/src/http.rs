// crates/cstp-server/src/http.rs
// ============================================================================
// Module: HTTP Transport
// Description: axum routes for /cstp, /health, and the agent card.
// Purpose: Terminate HTTP, authenticate, and hand requests to the dispatcher.
// Dependencies: axum, crate::auth, crate::handlers, serde_json, tower-http
// ============================================================================

//! ## Overview
//! Three routes: `POST /cstp` (JSON-RPC, bearer-authenticated),
//! `GET /health`, and `GET /.well-known/agent.json`. Authentication
//! failures answer HTTP 401 with `WWW-Authenticate: Bearer` rather than a
//! JSON-RPC error, keeping bearer-token semantics. Malformed JSON bodies
//! answer a JSON-RPC parse error with a null id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::Value;
use serde_json::json;
use tower_http::cors::AllowOrigin;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;

use crate::handlers::METHODS;
use crate::handlers::dispatch;
use crate::jsonrpc::JsonRpcError;
use crate::jsonrpc::JsonRpcRequest;
use crate::jsonrpc::JsonRpcResponse;
use crate::jsonrpc::PARSE_ERROR;
use crate::state::ServerState;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the axum router over a shared server state.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    Router::new()
        .route("/cstp", post(cstp_endpoint))
        .route("/health", get(health))
        .route("/.well-known/agent.json", get(agent_card))
        .layer(cors)
        .with_state(state)
}

/// CORS layer from the configured origins (`*` allows any).
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

// ============================================================================
// SECTION: Endpoints
// ============================================================================

/// `POST /cstp`: bearer auth, parse, dispatch.
async fn cstp_endpoint(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let agent = match state.auth.verify(authorization) {
        Ok(agent) => agent,
        Err(failure) => {
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
                Json(json!({ "detail": failure.detail() })),
            )
                .into_response();
        }
    };

    let Ok(parsed) = serde_json::from_str::<Value>(&body) else {
        let response = JsonRpcResponse::failure(
            Value::Null,
            JsonRpcError {
                code: PARSE_ERROR,
                message: "Invalid JSON".to_string(),
                data: None,
            },
        );
        return Json(response).into_response();
    };
    let Ok(request) = serde_json::from_value::<JsonRpcRequest>(parsed) else {
        let response = JsonRpcResponse::failure(
            Value::Null,
            JsonRpcError {
                code: crate::jsonrpc::INVALID_REQUEST,
                message: "Request must be an object".to_string(),
                data: None,
            },
        );
        return Json(response).into_response();
    };

    let response = dispatch(&state, request, &agent).await;
    Json(response).into_response()
}

/// `GET /health`.
async fn health(State(state): State<Arc<ServerState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": state.config.agent.version,
        "uptime_seconds": state.started.elapsed().as_secs_f64(),
        "timestamp": state.now_rfc3339(),
    }))
}

/// `GET /.well-known/agent.json`: the A2A agent card.
async fn agent_card(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let agent = &state.config.agent;
    let mut card = json!({
        "name": agent.name,
        "description": agent.description,
        "version": agent.version,
        "url": agent.url,
        "capabilities": {
            "cstp": {
                "version": "1.0",
                "methods": METHODS,
            }
        },
        "authentication": { "schemes": ["bearer"] },
    });
    if let Some(contact) = &agent.contact {
        card["contact"] = json!(contact);
    }
    Json(card)
}

// ============================================================================
// SECTION: Serve
// ============================================================================

/// Binds and serves the router until the process ends.
///
/// # Errors
///
/// Returns the bind or serve error as a boxed error.
pub async fn serve(state: Arc<ServerState>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let address = format!(
        "{}:{}",
        state.config.server.host, state.config.server.port
    );
    let listener = tokio::net::TcpListener::bind(&address).await?;
    let router = build_router(state);
    axum::serve(listener, router).await?;
    Ok(())
}
