// crates/cstp-server/src/auth.rs
// ============================================================================
// Module: Bearer Authentication
// Description: Constant-time bearer token verification for CSTP endpoints.
// Purpose: Derive the transport agent identity before dispatch.
// Dependencies: cstp-config, cstp-core, subtle
// ============================================================================

//! ## Overview
//! Authentication runs before dispatch. The bearer token is compared
//! against every configured token with a constant-time comparison so the
//! table never leaks match positions through timing. Missing or invalid
//! credentials map to HTTP 401 with `WWW-Authenticate: Bearer`, not to a
//! JSON-RPC error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_config::AuthConfig;
use cstp_core::AgentId;
use subtle::ConstantTimeEq;

// ============================================================================
// SECTION: Failure Reasons
// ============================================================================

/// Why authentication failed.
///
/// # Invariants
/// - Variants are stable for the 401 response detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No Authorization header present.
    MissingHeader,
    /// Header present but not a Bearer scheme.
    WrongScheme,
    /// Token matched no configured agent.
    UnknownToken,
}

impl AuthFailure {
    /// Human-readable detail for the 401 body.
    #[must_use]
    pub const fn detail(self) -> &'static str {
        match self {
            Self::MissingHeader => "Authorization header required",
            Self::WrongScheme => "Invalid authorization scheme, expected Bearer",
            Self::UnknownToken => "Invalid or expired token",
        }
    }
}

// ============================================================================
// SECTION: Verifier
// ============================================================================

/// Bearer-token verifier over the configured token table.
#[derive(Debug, Clone)]
pub struct AuthVerifier {
    /// Authentication configuration.
    config: AuthConfig,
}

impl AuthVerifier {
    /// Creates a verifier for a configuration.
    #[must_use]
    pub const fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Verifies an Authorization header value, returning the agent id.
    ///
    /// With authentication disabled every request resolves to `anonymous`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthFailure`] when the header is missing, malformed, or
    /// the token matches no configured agent.
    pub fn verify(&self, authorization: Option<&str>) -> Result<AgentId, AuthFailure> {
        if !self.config.enabled {
            return Ok(AgentId::new("anonymous"));
        }
        let Some(header) = authorization else {
            return Err(AuthFailure::MissingHeader);
        };
        let Some(token) = header.strip_prefix("Bearer ") else {
            return Err(AuthFailure::WrongScheme);
        };
        self.lookup(token).ok_or(AuthFailure::UnknownToken)
    }

    /// Constant-time token table lookup.
    ///
    /// Every configured token is compared regardless of earlier matches so
    /// timing does not reveal table position.
    fn lookup(&self, token: &str) -> Option<AgentId> {
        let mut matched: Option<AgentId> = None;
        for entry in &self.config.tokens {
            let equal: bool = entry
                .token
                .as_bytes()
                .ct_eq(token.as_bytes())
                .into();
            if equal && matched.is_none() {
                matched = Some(AgentId::new(entry.agent.clone()));
            }
        }
        matched
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_config::AuthConfig;
    use cstp_config::AuthToken;

    use super::AuthFailure;
    use super::AuthVerifier;

    fn verifier(enabled: bool) -> AuthVerifier {
        AuthVerifier::new(AuthConfig {
            enabled,
            tokens: vec![
                AuthToken {
                    agent: "claude".to_string(),
                    token: "tok-claude".to_string(),
                },
                AuthToken {
                    agent: "gemini".to_string(),
                    token: "tok-gemini".to_string(),
                },
            ],
        })
    }

    #[test]
    fn valid_tokens_resolve_their_agents() -> Result<(), AuthFailure> {
        let verifier = verifier(true);
        assert_eq!(
            verifier.verify(Some("Bearer tok-claude"))?.as_str(),
            "claude"
        );
        assert_eq!(
            verifier.verify(Some("Bearer tok-gemini"))?.as_str(),
            "gemini"
        );
        Ok(())
    }

    #[test]
    fn failures_report_their_reasons() {
        let verifier = verifier(true);
        assert_eq!(verifier.verify(None), Err(AuthFailure::MissingHeader));
        assert_eq!(
            verifier.verify(Some("Basic dXNlcg==")),
            Err(AuthFailure::WrongScheme)
        );
        assert_eq!(
            verifier.verify(Some("Bearer nope")),
            Err(AuthFailure::UnknownToken)
        );
        // Token lengths differing from configured entries still fail closed.
        assert_eq!(
            verifier.verify(Some("Bearer tok-claude-extended")),
            Err(AuthFailure::UnknownToken)
        );
    }

    #[test]
    fn disabled_auth_resolves_anonymous() -> Result<(), AuthFailure> {
        let verifier = verifier(false);
        assert_eq!(verifier.verify(None)?.as_str(), "anonymous");
        Ok(())
    }
}
