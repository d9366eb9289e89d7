// crates/cstp-core/src/lib.rs
// ============================================================================
// Module: CSTP Core
// Description: Data model, interfaces, and pure engines for the CSTP server.
// Purpose: Everything the transport layer composes, free of I/O backends.
// Dependencies: async-trait, rand, serde, serde_json, serde_yaml, thiserror, time
// ============================================================================

//! ## Overview
//! `cstp-core` holds the decision data model, the backend-agnostic
//! interfaces (decision store, vector store, embedding provider, breaker
//! journal, audit sink), and the pure engines: guardrail evaluation, the
//! circuit-breaker state machine, compaction and wisdom, the analytics
//! suite, keyword retrieval with hybrid fusion, the deliberation tracker,
//! and the decision graph. Network and filesystem backends live in the
//! `cstp-providers` and `cstp-store` crates; the HTTP surface lives in
//! `cstp-server`.
//!
//! Engines never read ambient wall-clock time; callers pass the current
//! moment or inject a clock, keeping every transition testable.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Decision analytics (calibration, drift, reason stats, ready queue).
pub mod analytics;
/// Circuit-breaker state machine and manager.
pub mod breaker;
/// Compaction levels and wisdom aggregation.
pub mod compaction;
/// Core data model.
pub mod core;
/// Decision graph edges and traversal.
pub mod graph;
/// Guardrail parsing and evaluation.
pub mod guardrails;
/// Backend-agnostic interfaces.
pub mod interfaces;
/// Keyword retrieval and hybrid fusion.
pub mod retrieval;
/// Deliberation tracker.
pub mod tracker;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use crate::core::AgentId;
pub use crate::core::BridgeDefinition;
pub use crate::core::BridgeMethod;
pub use crate::core::BridgeSide;
pub use crate::core::Category;
pub use crate::core::CompactionLevel;
pub use crate::core::DecisionId;
pub use crate::core::DecisionRecord;
pub use crate::core::DecisionStatus;
pub use crate::core::Deliberation;
pub use crate::core::DeliberationInput;
pub use crate::core::DeliberationStep;
pub use crate::core::Direction;
pub use crate::core::EdgeType;
pub use crate::core::GuardrailAction;
pub use crate::core::MentalState;
pub use crate::core::Outcome;
pub use crate::core::PreDecisionProtocol;
pub use crate::core::Priority;
pub use crate::core::Reason;
pub use crate::core::ReasonType;
pub use crate::core::RelatedDecision;
pub use crate::core::RetrievalMode;
pub use crate::core::Stakes;
pub use crate::core::TrackerKey;
pub use crate::interfaces::AuditEvent;
pub use crate::interfaces::AuditSink;
pub use crate::interfaces::BreakerJournal;
pub use crate::interfaces::BreakerJournalRecord;
pub use crate::interfaces::CorpusStats;
pub use crate::interfaces::DecisionStore;
pub use crate::interfaces::EmbeddingError;
pub use crate::interfaces::EmbeddingProvider;
pub use crate::interfaces::JournalError;
pub use crate::interfaces::ListPage;
pub use crate::interfaces::ListQuery;
pub use crate::interfaces::MemoryBreakerJournal;
pub use crate::interfaces::NoopAuditSink;
pub use crate::interfaces::StatsQuery;
pub use crate::interfaces::StoreError;
pub use crate::interfaces::VectorError;
pub use crate::interfaces::VectorResult;
pub use crate::interfaces::VectorStore;
