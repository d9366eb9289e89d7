// crates/cstp-core/src/retrieval/mod.rs
// ============================================================================
// Module: Retrieval Engine Building Blocks
// Description: Keyword index, score fusion, and the shared filter taxonomy.
// Purpose: Group the pieces composed by the server's retrieval orchestration.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Retrieval has three modes. The semantic side lives behind the vector
//! store interface; this module provides the keyword BM25 index with its
//! cache, the hybrid score fusion, and the filter taxonomy shared by all
//! modes.

/// Okapi BM25 index and TTL cache.
pub mod bm25;
/// Shared filter taxonomy and where-clause assembly.
pub mod filter;
/// Min-max normalization and weighted merge.
pub mod fusion;

pub use bm25::Bm25Cache;
pub use bm25::Bm25Index;
pub use bm25::tokenize;
pub use filter::QueryFilters;
pub use fusion::ScoreTriple;
pub use fusion::merge_results;
pub use fusion::normalize_scores;
