// crates/cstp-server/src/handlers/reindex.rs
// ============================================================================
// Module: Reindex Handler
// Description: cstp.reindex rebuilds the vector collection from the corpus.
// Purpose: Recover the index after embedding-model or collection changes.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Resets the vector collection and re-embeds every parseable decision.
//! Per-record embedding failures are counted, not fatal; the YAML corpus
//! remains the source of truth throughout.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::state::ServerState;

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Handles `cstp.reindex`.
///
/// # Errors
///
/// Returns [`HandlerError::QueryFailed`] when the collection reset fails;
/// individual record failures degrade to counts.
pub async fn handle_reindex(state: &ServerState) -> Result<Value, HandlerError> {
    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::internal("StoreError", e))?;

    state
        .vector
        .reset()
        .await
        .map_err(|e| HandlerError::QueryFailed(format!("collection reset failed: {e}")))?;

    let mut indexed = 0usize;
    let mut failed = 0usize;
    for record in &corpus {
        let Ok(embedding) = state.embeddings.embed(&record.embedding_text()).await else {
            failed += 1;
            continue;
        };
        let metadata = json!({
            "title": record.summary,
            "date": record.date.chars().take(10).collect::<String>(),
            "category": record.category.as_str(),
            "stakes": record.stakes.as_str(),
            "confidence": record.confidence,
            "status": record.status.as_str(),
        });
        if state
            .vector
            .upsert(record.id.short(), &record.embedding_text(), &embedding, metadata)
            .await
            .is_ok()
        {
            indexed += 1;
        } else {
            failed += 1;
        }
    }

    Ok(json!({
        "success": true,
        "total": corpus.len(),
        "indexed": indexed,
        "failed": failed,
        "model": state.embeddings.model_name(),
    }))
}
