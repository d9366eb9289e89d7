// crates/cstp-server/src/state.rs
// ============================================================================
// Module: Server State
// Description: Process-wide service wiring shared across request handlers.
// Purpose: Dependency-injected singletons; tests substitute fakes freely.
// Dependencies: cstp-config, cstp-core, cstp-providers, cstp-store
// ============================================================================

//! ## Overview
//! One `ServerState` holds every shared service: the decision store, the
//! vector store and embedding provider, the deliberation tracker, the
//! circuit-breaker manager, the guardrail registry, the decision graph,
//! the BM25 cache, and the audit sink. Everything is reached through
//! interfaces injected at construction; handlers never touch hidden
//! module-level state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use cstp_config::Config;
use cstp_core::AuditSink;
use cstp_core::DecisionStore;
use cstp_core::EmbeddingProvider;
use cstp_core::VectorStore;
use cstp_core::breaker::BreakerManager;
use cstp_core::breaker::SystemBreakerClock;
use cstp_core::breaker::parse_breaker_configs;
use cstp_core::graph::DecisionGraph;
use cstp_core::graph::GraphError;
use cstp_core::graph::MemoryEdgeLog;
use cstp_core::guardrails::GuardrailRegistry;
use cstp_core::interfaces::MemoryBreakerJournal;
use cstp_core::retrieval::Bm25Cache;
use cstp_core::tracker::DeliberationTracker;
use cstp_core::tracker::TrackerConfig;
use cstp_providers::DisabledLlmBridge;
use cstp_providers::GeminiEmbeddings;
use cstp_providers::GeminiEmbeddingsConfig;
use cstp_providers::GeminiLlmBridge;
use cstp_providers::HashEmbeddings;
use cstp_providers::LlmBridge;
use cstp_providers::MemoryVectorStore;
use cstp_store::FileBreakerJournal;
use cstp_store::FileEdgeLog;
use cstp_store::MemoryDecisionStore;
use cstp_store::YamlDecisionStore;
use time::OffsetDateTime;

use crate::audit::FileAuditSink;
use crate::auth::AuthVerifier;
use crate::bridge::BridgeMode;
use crate::jsonrpc::HandlerError;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared service wiring for the CSTP server.
pub struct ServerState {
    /// Loaded configuration.
    pub config: Config,
    /// Bearer-token verifier.
    pub auth: AuthVerifier,
    /// Decision corpus store.
    pub store: Arc<dyn DecisionStore>,
    /// Vector store backend.
    pub vector: Arc<dyn VectorStore>,
    /// Embedding provider.
    pub embeddings: Arc<dyn EmbeddingProvider>,
    /// LLM bridge client.
    pub llm_bridge: Arc<dyn LlmBridge>,
    /// Bridge extraction mode.
    pub bridge_mode: BridgeMode,
    /// Deliberation tracker.
    pub tracker: Arc<DeliberationTracker>,
    /// Circuit-breaker manager.
    pub breakers: Arc<BreakerManager>,
    /// Guardrail registry.
    pub guardrails: Arc<GuardrailRegistry>,
    /// Decision graph.
    pub graph: Arc<DecisionGraph>,
    /// Keyword index cache.
    pub bm25: Arc<Bm25Cache>,
    /// Audit sink.
    pub audit: Arc<dyn AuditSink>,
    /// Server start moment for uptime reporting.
    pub started: Instant,
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("agent", &self.config.agent.name)
            .finish_non_exhaustive()
    }
}

impl ServerState {
    /// Wires production services from configuration.
    ///
    /// The storage backend selects YAML or memory stores; the embedding
    /// provider is Gemini when `GEMINI_API_KEY` is set, otherwise the
    /// deterministic local provider. Chroma wiring happens in the CLI where
    /// the vector backend is chosen.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the breaker journal or edge log cannot
    /// be replayed.
    pub fn from_config(
        config: Config,
        vector: Arc<dyn VectorStore>,
    ) -> Result<Self, HandlerError> {
        let store: Arc<dyn DecisionStore> = if config.storage.backend == "memory" {
            Arc::new(MemoryDecisionStore::new())
        } else {
            Arc::new(YamlDecisionStore::new(config.storage.decisions_path.clone()))
        };

        let gemini_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
        let embeddings: Arc<dyn EmbeddingProvider> =
            match GeminiEmbeddings::new(GeminiEmbeddingsConfig::new(gemini_key.clone())) {
                Ok(provider) => Arc::new(provider),
                Err(_) => Arc::new(HashEmbeddings::new()),
            };
        let llm_bridge: Arc<dyn LlmBridge> = if gemini_key.trim().is_empty() {
            Arc::new(DisabledLlmBridge)
        } else {
            Arc::new(GeminiLlmBridge::new(gemini_key, None))
        };
        let bridge_mode = BridgeMode::parse_lenient(
            &std::env::var("CSTP_BRIDGE_MODE").unwrap_or_default(),
        );

        let audit: Arc<dyn AuditSink> = Arc::new(FileAuditSink::new("data/audit.jsonl"));

        let guardrails = Arc::new(load_guardrails(Path::new(&config.storage.guardrails_path)));
        let breaker_configs = load_breaker_configs(Path::new(&config.storage.guardrails_path));
        let breakers = BreakerManager::initialize(
            breaker_configs,
            Arc::new(FileBreakerJournal::new(
                config.storage.breaker_journal_path.clone(),
            )),
            Arc::clone(&audit),
            Arc::new(SystemBreakerClock::new()),
        )
        .map_err(|e| HandlerError::internal("BreakerError", e))?;

        let graph = DecisionGraph::load(Box::new(FileEdgeLog::new(
            config.storage.edge_log_path.clone(),
        )))
        .map_err(|e| graph_error(&e))?;

        let tracker = DeliberationTracker::new(TrackerConfig {
            input_ttl_secs: config.tracker.input_ttl_seconds,
            session_ttl_secs: config.tracker.session_ttl_seconds,
            consumed_history_size: config.tracker.consumed_history_size,
        });

        let auth = AuthVerifier::new(config.auth.clone());

        Ok(Self {
            config,
            auth,
            store,
            vector,
            embeddings,
            llm_bridge,
            bridge_mode,
            tracker: Arc::new(tracker),
            breakers: Arc::new(breakers),
            guardrails,
            graph: Arc::new(graph),
            bm25: Arc::new(Bm25Cache::new()),
            audit,
            started: Instant::now(),
        })
    }

    /// Wires an all-in-memory state for tests.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when manager initialization fails, which
    /// cannot happen with the memory backends.
    pub fn for_tests(config: Config) -> Result<Self, HandlerError> {
        let audit: Arc<dyn AuditSink> = Arc::new(cstp_core::NoopAuditSink);
        let breakers = BreakerManager::initialize(
            Vec::new(),
            Arc::new(MemoryBreakerJournal::new()),
            Arc::clone(&audit),
            Arc::new(SystemBreakerClock::new()),
        )
        .map_err(|e| HandlerError::internal("BreakerError", e))?;
        let graph =
            DecisionGraph::load(Box::new(MemoryEdgeLog::new())).map_err(|e| graph_error(&e))?;
        let tracker = DeliberationTracker::new(TrackerConfig {
            input_ttl_secs: config.tracker.input_ttl_seconds,
            session_ttl_secs: config.tracker.session_ttl_seconds,
            consumed_history_size: config.tracker.consumed_history_size,
        });
        let auth = AuthVerifier::new(config.auth.clone());

        Ok(Self {
            config,
            auth,
            store: Arc::new(MemoryDecisionStore::new()),
            vector: Arc::new(MemoryVectorStore::new()),
            embeddings: Arc::new(HashEmbeddings::new()),
            llm_bridge: Arc::new(DisabledLlmBridge),
            bridge_mode: BridgeMode::Rule,
            tracker: Arc::new(tracker),
            breakers: Arc::new(breakers),
            guardrails: Arc::new(GuardrailRegistry::new()),
            graph: Arc::new(graph),
            bm25: Arc::new(Bm25Cache::new()),
            audit,
            started: Instant::now(),
        })
    }

    /// Current wall-clock moment.
    #[must_use]
    pub fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    /// Current moment, RFC 3339.
    #[must_use]
    pub fn now_rfc3339(&self) -> String {
        cstp_core::core::time::format_rfc3339(self.now())
    }
}

/// Maps a graph error into a handler error.
fn graph_error(error: &GraphError) -> HandlerError {
    HandlerError::internal("GraphError", error)
}

// ============================================================================
// SECTION: Startup Loading
// ============================================================================

/// Breaker config file name inside the guardrails directory.
const BREAKER_CONFIG_FILE: &str = "circuit_breakers.yaml";

/// Loads guardrails from every YAML file in a directory.
///
/// The breaker config file is excluded; unreadable or malformed files are
/// skipped so one bad rule never takes the registry down.
#[must_use]
pub fn load_guardrails(dir: &Path) -> GuardrailRegistry {
    let mut all = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        let mut paths: Vec<std::path::PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.extension().and_then(|e| e.to_str()) == Some("yaml")
                    && p.file_name().and_then(|n| n.to_str()) != Some(BREAKER_CONFIG_FILE)
            })
            .collect();
        paths.sort();
        for path in paths {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(parsed) = GuardrailRegistry::parse_yaml(&content) {
                all.extend(parsed);
            }
        }
    }
    GuardrailRegistry::from_guardrails(all)
}

/// Loads breaker configs from `guardrails/circuit_breakers.yaml`.
#[must_use]
pub fn load_breaker_configs(dir: &Path) -> Vec<cstp_core::breaker::BreakerConfig> {
    let path = dir.join(BREAKER_CONFIG_FILE);
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    parse_breaker_configs(&content).unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::load_breaker_configs;
    use super::load_guardrails;

    #[test]
    fn guardrail_loading_skips_breaker_config_and_bad_files()
    -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut rules = std::fs::File::create(dir.path().join("rules.yaml"))?;
        writeln!(
            rules,
            "- id: low-confidence\n  condition_stakes: high\n  requires_confidence: '>= 0.7'\n  action: block"
        )?;
        std::fs::write(dir.path().join("broken.yaml"), "{{{{")?;
        std::fs::write(
            dir.path().join("circuit_breakers.yaml"),
            "circuit_breakers:\n  - scope: global\n    failure_threshold: 3\n",
        )?;

        let registry = load_guardrails(dir.path());
        assert_eq!(registry.guardrails().len(), 1);

        let breakers = load_breaker_configs(dir.path());
        assert_eq!(breakers.len(), 1);
        assert_eq!(breakers[0].failure_threshold, 3);
        Ok(())
    }
}
