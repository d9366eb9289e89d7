// crates/cstp-server/src/lib.rs
// ============================================================================
// Module: CSTP Server
// Description: HTTP transport, auth, JSON-RPC dispatch, and method handlers.
// Purpose: The middle tier between agents and the storage/vector backends.
// Dependencies: axum, cstp-config, cstp-core, cstp-providers, cstp-store,
//               serde_json, subtle, tokio, tower-http
// ============================================================================

//! ## Overview
//! `cstp-server` wires the core engines to the wire: bearer-authenticated
//! JSON-RPC 2.0 over `POST /cstp`, plus `/health` and the A2A agent card.
//! All shared state is dependency-injected through [`state::ServerState`];
//! tests substitute in-memory backends and dispatch methods directly.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Audit sink implementations.
pub mod audit;
/// Bearer authentication.
pub mod auth;
/// Bridge resolution (rule-based + LLM chain).
pub mod bridge;
/// Method handlers and the dispatcher.
pub mod handlers;
/// HTTP transport.
pub mod http;
/// JSON-RPC envelope and error codes.
pub mod jsonrpc;
/// Dual-convention parameter helpers.
pub mod params;
/// Shared service wiring.
pub mod state;
/// camelCase wire shapes.
pub mod wire;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use handlers::METHODS;
pub use handlers::dispatch;
pub use handlers::dispatch_method;
pub use http::build_router;
pub use http::serve;
pub use jsonrpc::HandlerError;
pub use jsonrpc::JsonRpcRequest;
pub use jsonrpc::JsonRpcResponse;
pub use state::ServerState;
