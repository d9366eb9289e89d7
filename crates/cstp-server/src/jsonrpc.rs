// crates/cstp-server/src/jsonrpc.rs
// ============================================================================
// Module: JSON-RPC Envelope
// Description: JSON-RPC 2.0 request/response models and CSTP error codes.
// Purpose: Validate the wire envelope and serialize typed handler errors.
// Dependencies: serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Implements the JSON-RPC 2.0 envelope for the `/cstp` endpoint. Requests
//! must carry the fixed protocol version, a `cstp.`-prefixed method name,
//! and named (object) parameters. Handler failures map onto the standard
//! codes plus the CSTP range `-32001..-32008`; every response echoes the
//! request's correlation id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Error Codes
// ============================================================================

/// Parse error.
pub const PARSE_ERROR: i64 = -32_700;
/// Invalid request envelope.
pub const INVALID_REQUEST: i64 = -32_600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// Invalid parameters.
pub const INVALID_PARAMS: i64 = -32_602;
/// Internal error.
pub const INTERNAL_ERROR: i64 = -32_603;
/// Authentication required.
pub const AUTHENTICATION_REQUIRED: i64 = -32_001;
/// Rate limited.
pub const RATE_LIMITED: i64 = -32_002;
/// Query failed.
pub const QUERY_FAILED: i64 = -32_003;
/// Guardrail evaluation failed.
pub const GUARDRAIL_EVAL_FAILED: i64 = -32_004;
/// Record failed.
pub const RECORD_FAILED: i64 = -32_005;
/// Review failed.
pub const REVIEW_FAILED: i64 = -32_006;
/// Decision not found.
pub const DECISION_NOT_FOUND: i64 = -32_007;
/// Attribution failed.
pub const ATTRIBUTION_FAILED: i64 = -32_008;

/// Required JSON-RPC protocol version.
pub const JSONRPC_VERSION: &str = "2.0";
/// Required method namespace prefix.
pub const METHOD_NAMESPACE: &str = "cstp.";

// ============================================================================
// SECTION: Envelope Types
// ============================================================================

/// JSON-RPC 2.0 error object.
///
/// # Invariants
/// - `code` is one of the documented codes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i64,
    /// Short error description.
    pub message: String,
    /// Additional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// JSON-RPC 2.0 request object.
///
/// # Invariants
/// - `id` is echoed verbatim in the response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version; must be `2.0`.
    #[serde(default)]
    pub jsonrpc: String,
    /// Method name, namespaced `cstp.`.
    #[serde(default)]
    pub method: String,
    /// Named parameters.
    #[serde(default)]
    pub params: Value,
    /// Correlation id.
    #[serde(default)]
    pub id: Value,
}

impl JsonRpcRequest {
    /// Validates the envelope.
    ///
    /// Returns the error to serialize when invalid.
    #[must_use]
    pub fn validate(&self) -> Option<JsonRpcError> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcError {
                code: INVALID_REQUEST,
                message: "Invalid JSON-RPC version".to_string(),
                data: Some(json!({ "expected": JSONRPC_VERSION, "got": self.jsonrpc })),
            });
        }
        if self.method.is_empty() {
            return Some(JsonRpcError {
                code: INVALID_REQUEST,
                message: "Method is required".to_string(),
                data: None,
            });
        }
        if !self.method.starts_with(METHOD_NAMESPACE) {
            return Some(JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Unknown method: {}", self.method),
                data: Some(json!({ "method": self.method })),
            });
        }
        if !self.params.is_null() && !self.params.is_object() {
            return Some(JsonRpcError {
                code: INVALID_PARAMS,
                message: "Params must be an object (named parameters only)".to_string(),
                data: Some(json!({ "got": json_type_name(&self.params) })),
            });
        }
        None
    }

    /// Parameters as an object, treating null as empty.
    #[must_use]
    pub fn params_object(&self) -> Value {
        if self.params.is_object() {
            self.params.clone()
        } else {
            json!({})
        }
    }
}

/// JSON-RPC 2.0 response object.
///
/// # Invariants
/// - Exactly one of `result` and `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version, always `2.0`.
    pub jsonrpc: &'static str,
    /// Echoed correlation id.
    pub id: Value,
    /// Method result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Builds a success response.
    #[must_use]
    pub const fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    #[must_use]
    pub const fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Label for a JSON value's type, used in error data.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// SECTION: Handler Errors
// ============================================================================

/// Typed handler failure mapped to JSON-RPC error codes.
///
/// # Invariants
/// - Validation failures name the offending field(s) in the message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Parameter validation failed.
    #[error("{0}")]
    InvalidParams(String),
    /// Referenced decision (or breaker scope) does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Retrieval failed without a degraded mode.
    #[error("{0}")]
    QueryFailed(String),
    /// Guardrail evaluation failed.
    #[error("{0}")]
    GuardrailEvalFailed(String),
    /// Recording failed; no partial file remains.
    #[error("{0}")]
    RecordFailed(String),
    /// Review failed.
    #[error("{0}")]
    ReviewFailed(String),
    /// Attribution failed.
    #[error("{0}")]
    AttributionFailed(String),
    /// Any other failure.
    #[error("{message}")]
    Internal {
        /// Stable kind label included in error data.
        kind: String,
        /// Human-readable message.
        message: String,
    },
}

impl HandlerError {
    /// Builds an internal error from any displayable source.
    pub fn internal(kind: &str, error: impl std::fmt::Display) -> Self {
        Self::Internal {
            kind: kind.to_string(),
            message: error.to_string(),
        }
    }

    /// Converts the error into a JSON-RPC error object.
    #[must_use]
    pub fn into_rpc_error(self) -> JsonRpcError {
        match self {
            Self::InvalidParams(message) => JsonRpcError {
                code: INVALID_PARAMS,
                message,
                data: None,
            },
            Self::NotFound(message) => JsonRpcError {
                code: DECISION_NOT_FOUND,
                message,
                data: None,
            },
            Self::QueryFailed(message) => JsonRpcError {
                code: QUERY_FAILED,
                message,
                data: None,
            },
            Self::GuardrailEvalFailed(message) => JsonRpcError {
                code: GUARDRAIL_EVAL_FAILED,
                message,
                data: None,
            },
            Self::RecordFailed(message) => JsonRpcError {
                code: RECORD_FAILED,
                message,
                data: None,
            },
            Self::ReviewFailed(message) => JsonRpcError {
                code: REVIEW_FAILED,
                message,
                data: None,
            },
            Self::AttributionFailed(message) => JsonRpcError {
                code: ATTRIBUTION_FAILED,
                message,
                data: None,
            },
            Self::Internal { kind, message } => JsonRpcError {
                code: INTERNAL_ERROR,
                message,
                data: Some(json!({ "type": kind })),
            },
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::HandlerError;
    use super::INVALID_PARAMS;
    use super::INVALID_REQUEST;
    use super::JsonRpcRequest;
    use super::METHOD_NOT_FOUND;

    fn request(jsonrpc: &str, method: &str, params: serde_json::Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: jsonrpc.to_string(),
            method: method.to_string(),
            params,
            id: json!(1),
        }
    }

    #[test]
    fn envelope_validation_catches_each_failure() {
        let bad_version = request("1.0", "cstp.getStats", json!({}));
        assert_eq!(
            bad_version.validate().map(|e| e.code),
            Some(INVALID_REQUEST)
        );

        let no_method = request("2.0", "", json!({}));
        assert_eq!(no_method.validate().map(|e| e.code), Some(INVALID_REQUEST));

        let wrong_namespace = request("2.0", "admin.shutdown", json!({}));
        assert_eq!(
            wrong_namespace.validate().map(|e| e.code),
            Some(METHOD_NOT_FOUND)
        );

        let positional = request("2.0", "cstp.getStats", json!([1, 2]));
        assert_eq!(positional.validate().map(|e| e.code), Some(INVALID_PARAMS));

        let valid = request("2.0", "cstp.getStats", json!({}));
        assert!(valid.validate().is_none());
    }

    #[test]
    fn handler_errors_map_to_their_codes() {
        assert_eq!(
            HandlerError::NotFound("missing".to_string())
                .into_rpc_error()
                .code,
            super::DECISION_NOT_FOUND
        );
        let internal = HandlerError::internal("StoreError", "disk gone").into_rpc_error();
        assert_eq!(internal.code, super::INTERNAL_ERROR);
        assert_eq!(internal.data, Some(json!({ "type": "StoreError" })));
    }
}
