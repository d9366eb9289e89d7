// crates/cstp-core/src/core/identifiers.rs
// ============================================================================
// Module: CSTP Identifiers
// Description: Canonical opaque identifiers for decisions, agents, and tracker scopes.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: rand, serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout CSTP.
//! Identifiers are opaque strings on the wire. Decision identifiers are
//! generated as 8 lowercase hex characters; lookups additionally accept
//! prefixes, which is handled at the store boundary rather than here.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;
use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Decision Identifier
// ============================================================================

/// Length in characters of a generated decision identifier.
pub const DECISION_ID_LENGTH: usize = 8;

/// Decision identifier.
///
/// # Invariants
/// - Generated values are exactly 8 lowercase hex characters.
/// - Parsed values are opaque; prefix matching is a store concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(String);

impl DecisionId {
    /// Creates a decision identifier from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random 8-hex-character identifier.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 4];
        OsRng.fill_bytes(&mut bytes);
        Self(format!(
            "{:02x}{:02x}{:02x}{:02x}",
            bytes[0], bytes[1], bytes[2], bytes[3]
        ))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the first 8 characters, the canonical short form.
    #[must_use]
    pub fn short(&self) -> &str {
        if self.0.len() > DECISION_ID_LENGTH {
            &self.0[..DECISION_ID_LENGTH]
        } else {
            &self.0
        }
    }
}

impl fmt::Display for DecisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for DecisionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DecisionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Agent Identifier
// ============================================================================

/// Agent identifier derived from authentication or client scoping.
///
/// # Invariants
/// - Opaque UTF-8 string; no normalization or validation is applied by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new agent identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Tracker Scope Key
// ============================================================================

/// Deliberation tracker scope key.
///
/// Composed, first match wins, from the client-provided scoping parameters
/// and the transport-derived fallback:
/// - `agent:{agent_id}:decision:{decision_id}`
/// - `agent:{agent_id}`
/// - `decision:{decision_id}`
/// - `rpc:{transport_agent_id}`
///
/// # Invariants
/// - Keys are stable strings; equality is byte equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackerKey(String);

impl TrackerKey {
    /// Creates a tracker key from a raw string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Composes a scope key from client scoping params and the transport agent.
    #[must_use]
    pub fn compose(
        transport_agent: &AgentId,
        agent_id: Option<&str>,
        decision_id: Option<&str>,
    ) -> Self {
        match (agent_id, decision_id) {
            (Some(agent), Some(decision)) => Self(format!("agent:{agent}:decision:{decision}")),
            (Some(agent), None) => Self(format!("agent:{agent}")),
            (None, Some(decision)) => Self(format!("decision:{decision}")),
            (None, None) => Self(format!("rpc:{}", transport_agent.as_str())),
        }
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extracts the `agent:` component of a composite key, if present.
    #[must_use]
    pub fn agent_component(&self) -> Option<&str> {
        let rest = self.0.strip_prefix("agent:")?;
        Some(rest.split(":decision:").next().unwrap_or(rest))
    }

    /// Extracts the `decision:` component of a composite key, if present.
    #[must_use]
    pub fn decision_component(&self) -> Option<&str> {
        if let Some((_, decision)) = self.0.split_once(":decision:") {
            return Some(decision);
        }
        self.0.strip_prefix("decision:")
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for TrackerKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TrackerKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::AgentId;
    use super::DecisionId;
    use super::TrackerKey;

    #[test]
    fn generated_ids_are_eight_hex_chars() {
        let id = DecisionId::generate();
        assert_eq!(id.as_str().len(), 8);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn short_truncates_long_ids() {
        let id = DecisionId::new("0123456789abcdef");
        assert_eq!(id.short(), "01234567");
    }

    #[test]
    fn tracker_key_composition_prefers_most_specific() {
        let transport = AgentId::new("claude");
        let both = TrackerKey::compose(&transport, Some("a1"), Some("d1"));
        assert_eq!(both.as_str(), "agent:a1:decision:d1");
        assert_eq!(both.agent_component(), Some("a1"));
        assert_eq!(both.decision_component(), Some("d1"));

        let agent_only = TrackerKey::compose(&transport, Some("a1"), None);
        assert_eq!(agent_only.as_str(), "agent:a1");

        let decision_only = TrackerKey::compose(&transport, None, Some("d1"));
        assert_eq!(decision_only.as_str(), "decision:d1");
        assert_eq!(decision_only.decision_component(), Some("d1"));

        let fallback = TrackerKey::compose(&transport, None, None);
        assert_eq!(fallback.as_str(), "rpc:claude");
        assert_eq!(fallback.agent_component(), None);
    }
}
