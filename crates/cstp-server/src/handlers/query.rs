// crates/cstp-server/src/handlers/query.rs
// ============================================================================
// Module: Query Handler
// Description: cstp.queryDecisions across semantic, keyword, hybrid, and list.
// Purpose: One retrieval surface with filters, fusion, and compaction notes.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! An empty query lists the corpus newest-first with the limit ceiling
//! raised to 500; non-empty queries cap at 50. Keyword mode scores the
//! cached BM25 index; hybrid fetches both sides at twice the limit and
//! fuses min-max-normalized scores with the clamped semantic weight.
//! When compaction annotation is requested, wisdom-level hits are removed
//! from the result list. Every query run is captured by the tracker.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Instant;

use cstp_core::AgentId;
use cstp_core::BridgeSide;
use cstp_core::CompactionLevel;
use cstp_core::DecisionRecord;
use cstp_core::RetrievalMode;
use cstp_core::TrackerKey;
use cstp_core::compaction::determine_level;
use cstp_core::retrieval::QueryFilters;
use cstp_core::retrieval::ScoreTriple;
use cstp_core::retrieval::merge_results;
use serde_json::Value;
use serde_json::json;

use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::DecisionSummary;
use crate::wire::SummaryOptions;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Limit ceiling for non-empty queries.
const QUERY_LIMIT_MAX: usize = 50;
/// Limit ceiling for empty (list-all) queries.
const LIST_LIMIT_MAX: usize = 500;
/// Default result limit.
const DEFAULT_LIMIT: usize = 10;
/// Default hybrid semantic weight.
const DEFAULT_HYBRID_WEIGHT: f64 = 0.7;

// ============================================================================
// SECTION: Request
// ============================================================================

/// Parsed query request.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    /// Raw query text.
    pub query: String,
    /// Shared filters.
    pub filters: QueryFilters,
    /// Result limit after clamping.
    pub limit: usize,
    /// Include reason texts.
    pub include_reasons: bool,
    /// Include lessons/actual-result detail.
    pub include_detail: bool,
    /// Retrieval mode (lenient).
    pub mode: RetrievalMode,
    /// Hybrid semantic weight, clamped.
    pub hybrid_weight: f64,
    /// Bridge-side bias for the semantic embed query.
    pub bridge_side: Option<BridgeSide>,
    /// Annotate results with compaction levels.
    pub compacted: bool,
}

impl QueryRequest {
    /// Parses a request from JSON-RPC params.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidParams`] when the filters are
    /// malformed.
    pub fn from_params(params_value: &Value) -> Result<Self, HandlerError> {
        let query = params::get_str(params_value, &["query"])
            .unwrap_or_default()
            .to_string();
        let filters: QueryFilters = match params_value.get("filters") {
            Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())
                .map_err(|e| HandlerError::InvalidParams(format!("filters: {e}")))?,
            _ => QueryFilters {
                max_confidence: 1.0,
                ..QueryFilters::default()
            },
        };

        let max_limit = if query.trim().is_empty() {
            LIST_LIMIT_MAX
        } else {
            QUERY_LIMIT_MAX
        };
        let limit = params::get_usize(params_value, &["limit", "top_k", "topK"])
            .unwrap_or(DEFAULT_LIMIT)
            .clamp(1, max_limit);

        let mode = params::get_str(params_value, &["retrievalMode", "retrieval_mode"])
            .map_or(RetrievalMode::Semantic, RetrievalMode::parse_lenient);
        let hybrid_weight = params::get_f64(params_value, &["hybridWeight", "hybrid_weight"])
            .unwrap_or(DEFAULT_HYBRID_WEIGHT)
            .clamp(0.0, 1.0);
        let bridge_side = params::get_str(params_value, &["bridgeSide", "bridge_side"])
            .and_then(BridgeSide::parse);

        Ok(Self {
            query,
            filters,
            limit,
            include_reasons: params::get_bool(params_value, &["includeReasons", "include_reasons"])
                .unwrap_or(false),
            include_detail: params::get_bool(params_value, &["includeDetail", "include_detail"])
                .unwrap_or(false),
            mode,
            hybrid_weight,
            bridge_side,
            compacted: params::get_bool(params_value, &["compacted"]).unwrap_or(false),
        })
    }

    /// Embed query with the bridge-side prefix applied (semantic side only).
    #[must_use]
    pub fn effective_query(&self) -> String {
        match self.bridge_side {
            Some(side) if !self.query.trim().is_empty() => {
                format!("{}{}", side.query_prefix(), self.query)
            }
            _ => self.query.clone(),
        }
    }

    /// Summary rendering options.
    const fn summary_options(&self) -> SummaryOptions {
        SummaryOptions {
            include_reasons: self.include_reasons,
            include_detail: self.include_detail,
        }
    }
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// Handles `cstp.queryDecisions`.
///
/// # Errors
///
/// Returns [`HandlerError`] on invalid params or unrecoverable retrieval
/// failure.
pub async fn handle_query_decisions(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let started = Instant::now();
    let request = QueryRequest::from_params(params_value)?;

    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::QueryFailed(e.to_string()))?;
    let record_map: BTreeMap<String, &DecisionRecord> = corpus
        .iter()
        .map(|record| (record.id.short().to_string(), record))
        .collect();

    let (mut summaries, scores, mode_label) = if request.query.trim().is_empty() {
        (list_all(&corpus, &request), BTreeMap::new(), "list")
    } else {
        match request.mode {
            RetrievalMode::Keyword => {
                let (summaries, scores) = keyword_search(state, &corpus, &record_map, &request);
                (summaries, scores, "keyword")
            }
            RetrievalMode::Hybrid => {
                let (summaries, scores) =
                    hybrid_search(state, &corpus, &record_map, &request).await?;
                (summaries, scores, "hybrid")
            }
            RetrievalMode::Semantic | RetrievalMode::List => {
                let summaries = semantic_search(state, &record_map, &request).await?;
                (summaries, BTreeMap::new(), "semantic")
            }
        }
    };

    if request.compacted {
        annotate_compaction(&mut summaries, &record_map, state);
    }

    let query_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    // Capture for auto-deliberation; fail-open by construction.
    let key = TrackerKey::compose(agent, None, None);
    let top_results: Vec<Value> = summaries
        .iter()
        .take(5)
        .map(|s| json!({ "id": s.id, "summary": s.title, "distance": s.distance }))
        .collect();
    state.tracker.track_query(
        &key,
        &request.query,
        summaries.len(),
        mode_label,
        &top_results,
    );

    let total = summaries.len();
    let mut response = json!({
        "decisions": summaries,
        "total": total,
        "query": request.query,
        "queryTimeMs": query_time_ms,
        "agent": state.config.agent.name,
        "retrievalMode": mode_label,
    });
    if !scores.is_empty() {
        response["scores"] = serde_json::to_value(scores)
            .map_err(|e| HandlerError::internal("SerializeError", e))?;
    }
    Ok(response)
}

// ============================================================================
// SECTION: Modes
// ============================================================================

/// Empty-query list-all mode: filters, newest first, raised limit.
fn list_all(corpus: &[DecisionRecord], request: &QueryRequest) -> Vec<DecisionSummary> {
    let mut matching: Vec<&DecisionRecord> = corpus
        .iter()
        .filter(|record| request.filters.matches(record))
        .collect();
    matching.sort_by(|a, b| b.date.cmp(&a.date));
    matching
        .into_iter()
        .take(request.limit)
        .map(|record| DecisionSummary::from_record(record, 0.0, request.summary_options()))
        .collect()
}

/// Keyword mode: cached BM25 over the category/project-scoped corpus.
fn keyword_search(
    state: &ServerState,
    corpus: &[DecisionRecord],
    record_map: &BTreeMap<String, &DecisionRecord>,
    request: &QueryRequest,
) -> (Vec<DecisionSummary>, BTreeMap<String, ScoreTriple>) {
    let scoped = scope_corpus(corpus, &request.filters);
    let cache_key = request.filters.cache_key("kw");
    let index = state.bm25.get_or_build(&cache_key, &scoped);
    let hits = index.search(&request.query, request.limit);

    let mut summaries = Vec::with_capacity(hits.len());
    let mut scores = BTreeMap::new();
    for (doc_id, score) in hits {
        let short: String = doc_id.chars().take(8).collect();
        if let Some(record) = record_map.get(&short) {
            // Keyword scores approximate a distance for display parity.
            let distance = (1.0 - score / 10.0).max(0.0);
            summaries.push(DecisionSummary::from_record(
                record,
                round4(distance),
                request.summary_options(),
            ));
            scores.insert(
                short,
                ScoreTriple {
                    semantic: 0.0,
                    keyword: round4(score),
                    combined: round4(score),
                },
            );
        }
    }
    (summaries, scores)
}

/// Semantic mode: embed the effective query and filter in the vector store.
async fn semantic_search(
    state: &ServerState,
    record_map: &BTreeMap<String, &DecisionRecord>,
    request: &QueryRequest,
) -> Result<Vec<DecisionSummary>, HandlerError> {
    let results = semantic_hits(state, request, request.limit).await?;
    Ok(results
        .into_iter()
        .map(|(id, metadata, distance)| {
            let short: String = id.chars().take(8).collect();
            record_map.get(&short).map_or_else(
                || DecisionSummary::from_metadata(&id, &metadata, round4(distance)),
                |record| {
                    DecisionSummary::from_record(record, round4(distance), request.summary_options())
                },
            )
        })
        .collect())
}

/// Hybrid mode: both sides at twice the limit, min-max fusion.
async fn hybrid_search(
    state: &ServerState,
    corpus: &[DecisionRecord],
    record_map: &BTreeMap<String, &DecisionRecord>,
    request: &QueryRequest,
) -> Result<(Vec<DecisionSummary>, BTreeMap<String, ScoreTriple>), HandlerError> {
    let fetch = request.limit * 2;

    let semantic_raw = semantic_hits(state, request, fetch).await?;
    // Distance is inverse similarity; flip for fusion.
    let semantic_scored: Vec<(String, f64)> = semantic_raw
        .iter()
        .map(|(id, _, distance)| (id.chars().take(8).collect(), 1.0 - distance))
        .collect();

    let scoped = scope_corpus(corpus, &request.filters);
    let cache_key = request.filters.cache_key("hybrid");
    let index = state.bm25.get_or_build(&cache_key, &scoped);
    let keyword_scored: Vec<(String, f64)> = index
        .search(&request.query, fetch)
        .into_iter()
        .map(|(id, score)| (id.chars().take(8).collect(), score))
        .collect();

    let merged = merge_results(
        &semantic_scored,
        &keyword_scored,
        request.hybrid_weight,
        request.limit,
    );

    let metadata_map: BTreeMap<String, &Value> = semantic_raw
        .iter()
        .map(|(id, metadata, _)| (id.chars().take(8).collect(), metadata))
        .collect();

    let mut summaries = Vec::with_capacity(merged.len());
    let mut scores = BTreeMap::new();
    for (short, triple) in merged {
        let distance = round4(1.0 - triple.combined);
        if let Some(record) = record_map.get(&short) {
            summaries.push(DecisionSummary::from_record(
                record,
                distance,
                request.summary_options(),
            ));
        } else if let Some(metadata) = metadata_map.get(&short) {
            summaries.push(DecisionSummary::from_metadata(&short, metadata, distance));
        } else {
            continue;
        }
        scores.insert(short, triple);
    }
    Ok((summaries, scores))
}

/// Runs the semantic query, returning `(id, metadata, distance)` triples.
async fn semantic_hits(
    state: &ServerState,
    request: &QueryRequest,
    n_results: usize,
) -> Result<Vec<(String, Value, f64)>, HandlerError> {
    let embedding = state
        .embeddings
        .embed(&request.effective_query())
        .await
        .map_err(|e| HandlerError::QueryFailed(format!("Embedding generation failed: {e}")))?;
    let where_clause = request.filters.to_where_clause();
    let results = state
        .vector
        .query(&embedding, n_results, where_clause.as_ref())
        .await
        .map_err(|e| HandlerError::QueryFailed(format!("Query failed: {e}")))?;
    Ok(results
        .into_iter()
        .map(|result| (result.id, result.metadata, result.distance))
        .collect())
}

/// Restricts the corpus to the cache-key dimensions (category, project).
fn scope_corpus(corpus: &[DecisionRecord], filters: &QueryFilters) -> Vec<DecisionRecord> {
    corpus
        .iter()
        .filter(|record| {
            filters
                .category
                .as_ref()
                .is_none_or(|category| record.category.as_str() == category)
                && filters
                    .project
                    .as_ref()
                    .is_none_or(|project| record.project.as_deref() == Some(project.as_str()))
        })
        .cloned()
        .collect()
}

/// Annotates summaries with levels and removes wisdom-level hits.
fn annotate_compaction(
    summaries: &mut Vec<DecisionSummary>,
    record_map: &BTreeMap<String, &DecisionRecord>,
    state: &ServerState,
) {
    let now = state.now();
    summaries.retain_mut(|summary| {
        let level = record_map
            .get(&summary.id)
            .map_or(CompactionLevel::Full, |record| determine_level(record, now));
        summary.compaction_level = Some(level.as_str().to_string());
        level != CompactionLevel::Wisdom
    });
}

/// Rounds to four decimal places for stable wire output.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
