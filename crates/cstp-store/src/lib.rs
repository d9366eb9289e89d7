// crates/cstp-store/src/lib.rs
// ============================================================================
// Module: CSTP Store
// Description: Filesystem persistence backends for the CSTP server.
// Purpose: YAML decision corpus, breaker journal, and graph edge log.
// Dependencies: cstp-core, serde_json, serde_yaml, tempfile
// ============================================================================

//! ## Overview
//! Durable backends for the `cstp-core` interfaces: the YAML decision
//! store with atomic tempfile-rename writes, an in-memory store sharing
//! the same query semantics, the circuit-breaker JSONL journal, and the
//! graph edge log. Raw decision data is never deleted by any operation
//! here; compaction shapes query output only and lives in `cstp-core`.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Circuit-breaker JSONL journal.
pub mod breaker_journal;
/// Graph edge JSONL log.
pub mod edge_log;
/// In-memory decision store.
pub mod memory_store;
/// YAML-file decision store.
pub mod yaml_store;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use breaker_journal::FileBreakerJournal;
pub use edge_log::FileEdgeLog;
pub use memory_store::MemoryDecisionStore;
pub use yaml_store::YamlDecisionStore;
