// crates/cstp-config/src/lib.rs
// ============================================================================
// Module: CSTP Configuration
// Description: Server configuration model, YAML loading, and env overrides.
// Purpose: One validated configuration surface for all CSTP crates.
// Dependencies: serde, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! Configuration loads from a YAML file, then environment variables with
//! the `CSTP_` prefix override individual keys. Token values support
//! `${ENV_VAR}` expansion so secrets stay out of config files. Validation
//! produces field-naming errors plus non-fatal warnings (for example the
//! deprecated `session_ttl_minutes` key).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
///
/// # Invariants
/// - Messages name the offending field.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("config read error: {0}")]
    Read(String),
    /// Config file failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),
    /// A field failed validation.
    #[error("config validation error: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// HTTP server settings.
///
/// # Invariants
/// - `port` is non-zero after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8_100,
            cors_origins: vec!["*".to_string()],
        }
    }
}

/// Agent identity settings served on the agent card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent identifier.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Agent version string.
    pub version: String,
    /// Base URL for the agent's API.
    pub url: String,
    /// Optional contact email.
    pub contact: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "cognition-engines".to_string(),
            description: "Decision intelligence for AI agents".to_string(),
            version: "0.7.0".to_string(),
            url: "http://localhost:8100".to_string(),
            contact: None,
        }
    }
}

/// One bearer token mapped to an agent identity.
///
/// # Invariants
/// - `token` values are expanded from `${ENV_VAR}` references at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Agent identifier.
    pub agent: String,
    /// Bearer token value.
    pub token: String,
}

/// Authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether authentication is required.
    pub enabled: bool,
    /// Valid token table.
    pub tokens: Vec<AuthToken>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tokens: Vec::new(),
        }
    }
}

/// Deliberation tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    /// TTL for individual inputs, seconds.
    pub input_ttl_seconds: u64,
    /// TTL for idle sessions, seconds.
    pub session_ttl_seconds: u64,
    /// Consumed-history ring capacity.
    pub consumed_history_size: usize,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            input_ttl_seconds: 300,
            session_ttl_seconds: 1_800,
            consumed_history_size: 50,
        }
    }
}

/// Decision storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend: `yaml` or `memory`.
    pub backend: String,
    /// Root directory for decision files.
    pub decisions_path: String,
    /// Path to the circuit-breaker JSONL journal.
    pub breaker_journal_path: String,
    /// Path to the graph edge log.
    pub edge_log_path: String,
    /// Directory of guardrail YAML files.
    pub guardrails_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "yaml".to_string(),
            decisions_path: "decisions".to_string(),
            breaker_journal_path: "data/circuit_breakers.jsonl".to_string(),
            edge_log_path: "data/decision_edges.jsonl".to_string(),
            guardrails_path: "guardrails".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Root Configuration
// ============================================================================

/// Raw tracker section accepting the legacy minutes key.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawTrackerSection {
    /// Canonical input TTL key.
    input_ttl_seconds: Option<u64>,
    /// Canonical session TTL key.
    session_ttl_seconds: Option<u64>,
    /// Deprecated session TTL key, multiplied by 60.
    session_ttl_minutes: Option<u64>,
    /// Ring capacity.
    consumed_history_size: Option<usize>,
}

/// Raw top-level document shape.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    /// Server section.
    server: Option<ServerConfig>,
    /// Agent section.
    agent: Option<AgentConfig>,
    /// Auth section.
    auth: Option<AuthConfig>,
    /// Tracker section (raw, for legacy key handling).
    tracker: Option<RawTrackerSection>,
    /// Storage section.
    storage: Option<StorageConfig>,
}

/// Complete validated server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Agent identity settings.
    pub agent: AgentConfig,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Tracker settings.
    pub tracker: TrackerSection,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Non-fatal warnings collected during load.
    #[serde(skip)]
    pub warnings: Vec<String>,
}

impl Config {
    /// Loads configuration from a YAML file, applying env expansion and
    /// `CSTP_` overrides.
    ///
    /// A missing file yields defaults (with env overrides still applied).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable or malformed files and on
    /// validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Read(format!("{}: {e}", path.display())))?;
            Self::from_yaml_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(&env_snapshot());
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the document is malformed.
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut warnings = Vec::new();

        let tracker = raw.tracker.map_or_else(TrackerSection::default, |raw| {
            let defaults = TrackerSection::default();
            let session_ttl_seconds = match (raw.session_ttl_seconds, raw.session_ttl_minutes) {
                (Some(seconds), Some(minutes)) => {
                    warnings.push(format!(
                        "tracker: both session_ttl_seconds and session_ttl_minutes present; \
                         using session_ttl_seconds={seconds}, ignoring session_ttl_minutes={minutes}"
                    ));
                    seconds
                }
                (Some(seconds), None) => seconds,
                (None, Some(minutes)) => {
                    warnings.push(
                        "tracker: session_ttl_minutes is deprecated; use session_ttl_seconds"
                            .to_string(),
                    );
                    minutes * 60
                }
                (None, None) => defaults.session_ttl_seconds,
            };
            TrackerSection {
                input_ttl_seconds: raw.input_ttl_seconds.unwrap_or(defaults.input_ttl_seconds),
                session_ttl_seconds,
                consumed_history_size: raw
                    .consumed_history_size
                    .unwrap_or(defaults.consumed_history_size),
            }
        });

        let mut auth = raw.auth.unwrap_or_default();
        for token in &mut auth.tokens {
            token.token = expand_env_token(&token.token, &env_snapshot());
        }

        Ok(Self {
            server: raw.server.unwrap_or_default(),
            agent: raw.agent.unwrap_or_default(),
            auth,
            tracker,
            storage: raw.storage.unwrap_or_default(),
            warnings,
        })
    }

    /// Applies `CSTP_` environment overrides.
    pub fn apply_env_overrides(&mut self, vars: &BTreeMap<String, String>) {
        if let Some(host) = vars.get("CSTP_HOST") {
            self.server.host.clone_from(host);
        }
        if let Some(port) = vars.get("CSTP_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Some(name) = vars.get("CSTP_AGENT_NAME") {
            self.agent.name.clone_from(name);
        }
        if let Some(description) = vars.get("CSTP_AGENT_DESCRIPTION") {
            self.agent.description.clone_from(description);
        }
        if let Some(version) = vars.get("CSTP_AGENT_VERSION") {
            self.agent.version.clone_from(version);
        }
        if let Some(url) = vars.get("CSTP_AGENT_URL") {
            self.agent.url.clone_from(url);
        }
        if let Some(contact) = vars.get("CSTP_AGENT_CONTACT") {
            self.agent.contact = Some(contact.clone());
        }
        if let Some(tokens) = vars.get("CSTP_AUTH_TOKENS") {
            let parsed = parse_auth_tokens(tokens);
            if !parsed.is_empty() {
                self.auth.tokens = parsed;
            }
        }
        if let Some(ttl) = vars.get("CSTP_TRACKER_INPUT_TTL") {
            if let Ok(ttl) = ttl.parse() {
                self.tracker.input_ttl_seconds = ttl;
            }
        }
        if let Some(ttl) = vars.get("CSTP_TRACKER_SESSION_TTL") {
            if let Ok(ttl) = ttl.parse() {
                self.tracker.session_ttl_seconds = ttl;
            }
        }
        if let Some(size) = vars.get("CSTP_TRACKER_HISTORY_SIZE") {
            if let Ok(size) = size.parse() {
                self.tracker.consumed_history_size = size;
            }
        }
        if let Some(backend) = vars.get("CSTP_STORAGE") {
            self.storage.backend.clone_from(backend);
        }
        if let Some(path) = vars.get("CSTP_DECISIONS_PATH") {
            self.storage.decisions_path.clone_from(path);
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid(
                "server.port: must be non-zero".to_string(),
            ));
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "server.host: must not be empty".to_string(),
            ));
        }
        match self.storage.backend.as_str() {
            "yaml" | "memory" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "storage.backend: unknown backend '{other}' (expected yaml or memory)"
                )));
            }
        }
        if self.tracker.input_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "tracker.input_ttl_seconds: must be positive".to_string(),
            ));
        }
        if self.tracker.session_ttl_seconds == 0 {
            return Err(ConfigError::Invalid(
                "tracker.session_ttl_seconds: must be positive".to_string(),
            ));
        }
        if self.auth.enabled {
            for (index, token) in self.auth.tokens.iter().enumerate() {
                if token.agent.trim().is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "auth.tokens[{index}].agent: must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Snapshot of the process environment.
fn env_snapshot() -> BTreeMap<String, String> {
    env::vars().collect()
}

/// Expands a `${ENV_VAR}` token reference; unknown vars become empty.
fn expand_env_token(value: &str, vars: &BTreeMap<String, String>) -> String {
    if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        return vars.get(name).cloned().unwrap_or_default();
    }
    value.to_string()
}

/// Parses the `CSTP_AUTH_TOKENS` format: `agent1:token1,agent2:token2`.
#[must_use]
pub fn parse_auth_tokens(value: &str) -> Vec<AuthToken> {
    value
        .split(',')
        .filter_map(|pair| {
            let (agent, token) = pair.trim().split_once(':')?;
            let agent = agent.trim();
            let token = token.trim();
            if agent.is_empty() || token.is_empty() {
                return None;
            }
            Some(AuthToken {
                agent: agent.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::Config;
    use super::expand_env_token;
    use super::parse_auth_tokens;

    #[test]
    fn defaults_validate() -> Result<(), super::ConfigError> {
        let config = Config::default();
        config.validate()?;
        assert_eq!(config.server.port, 8_100);
        assert_eq!(config.tracker.session_ttl_seconds, 1_800);
        Ok(())
    }

    #[test]
    fn yaml_sections_override_defaults() -> Result<(), super::ConfigError> {
        let config = Config::from_yaml_str(
            "
server:
  host: 127.0.0.1
  port: 9000
agent:
  name: test-agent
tracker:
  input_ttl_seconds: 60
storage:
  backend: memory
",
        )?;
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9_000);
        assert_eq!(config.agent.name, "test-agent");
        assert_eq!(config.tracker.input_ttl_seconds, 60);
        assert_eq!(config.tracker.session_ttl_seconds, 1_800);
        assert_eq!(config.storage.backend, "memory");
        Ok(())
    }

    #[test]
    fn legacy_minutes_key_converts_with_warning() -> Result<(), super::ConfigError> {
        let config = Config::from_yaml_str(
            "
tracker:
  session_ttl_minutes: 10
",
        )?;
        assert_eq!(config.tracker.session_ttl_seconds, 600);
        assert!(config.warnings.iter().any(|w| w.contains("deprecated")));
        Ok(())
    }

    #[test]
    fn seconds_key_wins_when_both_present() -> Result<(), super::ConfigError> {
        let config = Config::from_yaml_str(
            "
tracker:
  session_ttl_seconds: 900
  session_ttl_minutes: 10
",
        )?;
        assert_eq!(config.tracker.session_ttl_seconds, 900);
        assert!(config
            .warnings
            .iter()
            .any(|w| w.contains("ignoring session_ttl_minutes")));
        Ok(())
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let mut vars = BTreeMap::new();
        vars.insert("CSTP_HOST".to_string(), "10.0.0.1".to_string());
        vars.insert("CSTP_PORT".to_string(), "8200".to_string());
        vars.insert(
            "CSTP_AUTH_TOKENS".to_string(),
            "claude:tok1, gemini:tok2".to_string(),
        );
        vars.insert("CSTP_TRACKER_SESSION_TTL".to_string(), "600".to_string());
        config.apply_env_overrides(&vars);

        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 8_200);
        assert_eq!(config.auth.tokens.len(), 2);
        assert_eq!(config.auth.tokens[1].agent, "gemini");
        assert_eq!(config.tracker.session_ttl_seconds, 600);
    }

    #[test]
    fn token_env_expansion() {
        let mut vars = BTreeMap::new();
        vars.insert("SECRET".to_string(), "s3cret".to_string());
        assert_eq!(expand_env_token("${SECRET}", &vars), "s3cret");
        assert_eq!(expand_env_token("${MISSING}", &vars), "");
        assert_eq!(expand_env_token("literal", &vars), "literal");
    }

    #[test]
    fn malformed_token_pairs_are_skipped() {
        let tokens = parse_auth_tokens("a:1,broken,:empty,b:2,");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].agent, "a");
        assert_eq!(tokens[1].token, "2");
    }

    #[test]
    fn validation_names_the_offending_field() {
        let config = Config::from_yaml_str("storage:\n  backend: postgres\n");
        let Ok(config) = config else {
            return assert!(config.is_ok());
        };
        let error = config.validate();
        let Err(error) = error else {
            return assert!(error.is_err());
        };
        assert!(error.to_string().contains("storage.backend"));
    }
}
