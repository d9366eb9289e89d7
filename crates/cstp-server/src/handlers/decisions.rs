// crates/cstp-server/src/handlers/decisions.rs
// ============================================================================
// Module: Decision Lifecycle Handlers
// Description: record, review, get, update, and recordThought.
// Purpose: Atomic persistence plus vector indexing, deliberation splice,
//          bridge resolution, auto-link, and breaker feedback.
// Dependencies: crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Recording validates the request, resolves the tracker scope key,
//! splices auto-captured deliberation, derives a bridge when absent, writes
//! the YAML atomically, and then indexes the embedding. Vector-store
//! failure is non-fatal (`indexed=false`); persistence failure fails the
//! record with no partial file. Review mutates only the review fields and
//! feeds the outcome to the circuit-breaker manager as a post-action.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use cstp_core::AgentId;
use cstp_core::BridgeDefinition;
use cstp_core::BridgeMethod;
use cstp_core::Category;
use cstp_core::DecisionId;
use cstp_core::DecisionRecord;
use cstp_core::DecisionStatus;
use cstp_core::Deliberation;
use cstp_core::MentalState;
use cstp_core::Outcome;
use cstp_core::PreDecisionProtocol;
use cstp_core::Reason;
use cstp_core::ReasonType;
use cstp_core::RelatedDecision;
use cstp_core::Stakes;
use cstp_core::TrackerKey;
use cstp_core::breaker::BreakerContext;
use cstp_core::compaction::determine_level;
use cstp_core::core::time::format_rfc3339;
use cstp_core::core::time::resolve_review_interval;
use cstp_core::graph::auto_link_candidates;
use cstp_core::interfaces::StoreError;
use cstp_core::tracker::auto_attach_deliberation;
use serde_json::Value;
use serde_json::json;

use crate::bridge::BridgeSource;
use crate::bridge::resolve_bridge;
use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::to_camel_value;

// ============================================================================
// SECTION: Record Request
// ============================================================================

/// Parsed record request.
#[derive(Debug, Clone)]
pub struct RecordRequest {
    /// Decision text.
    pub decision: String,
    /// Stated confidence.
    pub confidence: f64,
    /// Category.
    pub category: Category,
    /// Stakes.
    pub stakes: Stakes,
    /// Optional context.
    pub context: Option<String>,
    /// Optional pattern.
    pub pattern: Option<String>,
    /// Reasons.
    pub reasons: Vec<Reason>,
    /// KPI indicators.
    pub kpi_indicators: Vec<String>,
    /// Mental state.
    pub mental_state: Option<MentalState>,
    /// Relative review interval (`7d`, `2w`, `1m`).
    pub review_in: Option<String>,
    /// Tags.
    pub tags: Vec<String>,
    /// Project linkage.
    pub project: Option<String>,
    /// Feature linkage.
    pub feature: Option<String>,
    /// PR linkage.
    pub pr: Option<i64>,
    /// Pre-decision protocol block.
    pub pre_decision: Option<PreDecisionProtocol>,
    /// Explicit bridge.
    pub bridge: Option<BridgeDefinition>,
    /// Explicit deliberation.
    pub deliberation: Option<Deliberation>,
    /// Explicit related decisions.
    pub related_to: Vec<RelatedDecision>,
    /// Client-supplied tracker scoping agent id.
    pub scope_agent_id: Option<String>,
    /// Client-supplied tracker scoping decision id.
    pub scope_decision_id: Option<String>,
}

impl RecordRequest {
    /// Parses and validates JSON-RPC params.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidParams`] naming every failing field.
    pub fn from_params(params_value: &Value) -> Result<Self, HandlerError> {
        let mut errors: Vec<String> = Vec::new();

        let decision = params::get_str(params_value, &["decision"])
            .unwrap_or_default()
            .to_string();
        if decision.trim().is_empty() {
            errors.push("decision: required field".to_string());
        }

        let confidence = params::get_f64(params_value, &["confidence"]).unwrap_or(0.5);
        if !(0.0..=1.0).contains(&confidence) {
            errors.push("confidence: must be between 0.0 and 1.0".to_string());
        }

        let category_label = params::get_str(params_value, &["category"]).unwrap_or("process");
        let category = Category::parse(category_label);
        if category.is_none() {
            errors.push(format!(
                "category: must be one of {}",
                enum_list(Category::ALL.iter().map(|c| c.as_str()))
            ));
        }

        let stakes_label = params::get_str(params_value, &["stakes"]).unwrap_or("medium");
        let stakes = Stakes::parse(stakes_label);
        if stakes.is_none() {
            errors.push(format!(
                "stakes: must be one of {}",
                enum_list(Stakes::ALL.iter().map(|s| s.as_str()))
            ));
        }

        let mut reasons: Vec<Reason> = Vec::new();
        if let Some(raw_reasons) = params_value.get("reasons").and_then(Value::as_array) {
            for (index, raw) in raw_reasons.iter().enumerate() {
                let type_label = raw.get("type").and_then(Value::as_str).unwrap_or_default();
                let Some(reason_type) = ReasonType::parse(type_label) else {
                    errors.push(format!(
                        "reasons[{index}].type: must be one of {}",
                        enum_list(ReasonType::ALL.iter().map(|r| r.as_str()))
                    ));
                    continue;
                };
                let text = raw
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if text.is_empty() {
                    errors.push(format!("reasons[{index}].text: required"));
                    continue;
                }
                let strength = raw.get("strength").and_then(Value::as_f64).unwrap_or(0.8);
                if !(0.0..=1.0).contains(&strength) {
                    errors.push(format!(
                        "reasons[{index}].strength: must be between 0.0 and 1.0"
                    ));
                    continue;
                }
                reasons.push(Reason {
                    reason_type,
                    text,
                    strength,
                });
            }
        }

        let mental_state = match params::get_str(params_value, &["mentalState", "mental_state"]) {
            Some(label) => {
                let parsed = MentalState::parse(label);
                if parsed.is_none() {
                    errors.push(format!(
                        "mentalState: must be one of {}",
                        enum_list(MentalState::ALL.iter().map(|m| m.as_str()))
                    ));
                }
                parsed
            }
            None => None,
        };

        let bridge = match params_value.get("bridge") {
            Some(raw) if !raw.is_null() => Some(
                serde_json::from_value::<BridgeDefinition>(raw.clone())
                    .map_err(|e| HandlerError::InvalidParams(format!("bridge: {e}")))?,
            ),
            _ => None,
        };

        let deliberation = match params_value.get("deliberation") {
            Some(raw) if !raw.is_null() => {
                let parsed = serde_json::from_value::<Deliberation>(raw.clone())
                    .map_err(|e| HandlerError::InvalidParams(format!("deliberation: {e}")))?;
                let unknown = parsed.unknown_input_refs();
                if !unknown.is_empty() {
                    errors.push(format!(
                        "deliberation.steps: unknown input ids {}",
                        unknown.join(", ")
                    ));
                }
                Some(parsed)
            }
            _ => None,
        };

        let related_to = match params_value.get("relatedTo").or_else(|| params_value.get("related_to")) {
            Some(raw) if !raw.is_null() => serde_json::from_value::<Vec<RelatedDecision>>(raw.clone())
                .map_err(|e| HandlerError::InvalidParams(format!("relatedTo: {e}")))?,
            _ => Vec::new(),
        };

        let pre_decision =
            match params_value.get("preDecision").or_else(|| params_value.get("pre_decision")) {
                Some(raw) if !raw.is_null() => Some(
                    serde_json::from_value::<PreDecisionProtocol>(raw.clone())
                        .map_err(|e| HandlerError::InvalidParams(format!("preDecision: {e}")))?,
                ),
                _ => None,
            };

        if !errors.is_empty() {
            return Err(HandlerError::InvalidParams(format!(
                "Validation failed: {}",
                errors.join("; ")
            )));
        }
        let (Some(category), Some(stakes)) = (category, stakes) else {
            return Err(HandlerError::InvalidParams(
                "Validation failed: category/stakes".to_string(),
            ));
        };

        Ok(Self {
            decision,
            confidence,
            category,
            stakes,
            context: params::get_str(params_value, &["context"]).map(str::to_string),
            pattern: params::get_str(params_value, &["pattern"]).map(str::to_string),
            reasons,
            kpi_indicators: params::get_str_list(params_value, &["kpiIndicators", "kpi_indicators"])
                .unwrap_or_default(),
            mental_state,
            review_in: params::get_str(params_value, &["reviewIn", "review_in"]).map(str::to_string),
            tags: params::get_str_list(params_value, &["tags"]).unwrap_or_default(),
            project: params::get_str(params_value, &["project"]).map(str::to_string),
            feature: params::get_str(params_value, &["feature"]).map(str::to_string),
            pr: params::get(params_value, &["pr"]).and_then(Value::as_i64),
            pre_decision,
            bridge,
            deliberation,
            related_to,
            scope_agent_id: params::get_str(params_value, &["agentId", "agent_id"])
                .map(str::to_string),
            scope_decision_id: params::get_str(params_value, &["decisionId", "decision_id"])
                .map(str::to_string),
        })
    }
}

/// Renders an enum vocabulary for validation messages.
fn enum_list<'a>(labels: impl Iterator<Item = &'a str>) -> String {
    labels.collect::<Vec<_>>().join(" | ")
}

// ============================================================================
// SECTION: Record Handler
// ============================================================================

/// Handles `cstp.recordDecision`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] on validation failure and
/// [`HandlerError::RecordFailed`] when persistence fails.
pub async fn handle_record_decision(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let mut request = RecordRequest::from_params(params_value)?;
    let tracker_key = TrackerKey::compose(
        agent,
        request.scope_agent_id.as_deref(),
        request.scope_decision_id.as_deref(),
    );

    // Related decisions come out of the tracker before consume drains it.
    if request.related_to.is_empty() {
        request.related_to = state.tracker.extract_related(&tracker_key);
    }

    let (deliberation, auto_captured) =
        auto_attach_deliberation(&state.tracker, &tracker_key, request.deliberation.take());

    let (bridge, bridge_method) = if request.bridge.is_some() {
        (request.bridge.take(), BridgeMethod::None)
    } else {
        let source = BridgeSource {
            decision: &request.decision,
            context: request.context.as_deref(),
            pattern: request.pattern.as_deref(),
            reasons: &request.reasons,
        };
        resolve_bridge(state.bridge_mode, &source, state.llm_bridge.as_ref()).await
    };
    let bridge_auto = bridge.is_some() && bridge_method != BridgeMethod::None;

    let now = state.now();
    let record = DecisionRecord {
        id: DecisionId::generate(),
        summary: request.decision.clone(),
        decision: request.decision.clone(),
        category: request.category,
        confidence: request.confidence,
        stakes: request.stakes,
        status: DecisionStatus::Pending,
        date: format_rfc3339(now),
        context: request.context.clone(),
        pattern: request.pattern.clone(),
        tags: request.tags.clone(),
        project: request.project.clone(),
        feature: request.feature.clone(),
        pr: request.pr,
        kpi_indicators: request.kpi_indicators.clone(),
        mental_state: request.mental_state,
        review_by: request
            .review_in
            .as_deref()
            .and_then(|interval| resolve_review_interval(interval, now)),
        recorded_by: Some(agent.as_str().to_string()),
        reasons: request.reasons.clone(),
        pre_decision: request.pre_decision,
        related_to: request.related_to.clone(),
        bridge,
        deliberation,
        preserve: false,
        outcome: None,
        actual_result: None,
        lessons: None,
        affected_kpis: Vec::new(),
        reviewed_at: None,
        reviewed_by: None,
        extra: BTreeMap::new(),
    };

    let path = state
        .store
        .insert(&record)
        .map_err(|e| HandlerError::RecordFailed(format!("Failed to write decision file: {e}")))?;

    let indexed = index_record(state, &record, &path).await;

    // Consumed-history backfill and auto-link are fail-open post-actions.
    state
        .tracker
        .backfill_consumed(&tracker_key, record.id.short());

    let mut edges_created = 0usize;
    if let Ok(corpus) = state.store.load_all() {
        for edge in auto_link_candidates(&record, &corpus, format_rfc3339(now)) {
            if state.graph.link(edge).is_ok() {
                edges_created += 1;
            }
        }
    }

    // Record-context guardrail pass surfaces warnings without blocking.
    let mut record_context = serde_json::Map::new();
    record_context.insert("category".to_string(), json!(record.category.as_str()));
    record_context.insert("stakes".to_string(), json!(record.stakes.as_str()));
    record_context.insert("confidence".to_string(), json!(record.confidence));
    record_context.insert(
        "has_deliberation".to_string(),
        json!(record.deliberation.as_ref().is_some_and(Deliberation::has_content)),
    );
    if let Some(project) = &record.project {
        record_context.insert("project".to_string(), json!(project));
    }
    let evaluation = state.guardrails.evaluate(
        &record_context,
        agent.as_str(),
        &record.decision,
        state.audit.as_ref(),
        state.now_rfc3339(),
    );

    let mut response = json!({
        "success": true,
        "id": record.id.short(),
        "path": path,
        "indexed": indexed,
        "timestamp": record.date,
    });
    if edges_created > 0 {
        response["graphEdgesCreated"] = json!(edges_created);
    }
    if auto_captured {
        if let Some(deliberation) = &record.deliberation {
            response["deliberationAuto"] = json!(true);
            response["deliberationInputsCount"] = json!(deliberation.inputs.len());
        }
    }
    if bridge_auto {
        response["bridgeAuto"] = json!(true);
        response["bridgeMethod"] = json!(bridge_method.as_str());
    }
    if !record.related_to.is_empty() {
        response["relatedCount"] = json!(record.related_to.len());
    }
    if !evaluation.warnings.is_empty() {
        response["guardrailWarnings"] = json!(
            evaluation
                .warnings
                .iter()
                .map(|w| json!({ "guardrailId": w.guardrail_id, "message": w.message }))
                .collect::<Vec<_>>()
        );
    }
    Ok(response)
}

/// Embeds and upserts one record; failure degrades to `indexed=false`.
async fn index_record(state: &ServerState, record: &DecisionRecord, path: &str) -> bool {
    let Ok(embedding) = state.embeddings.embed(&record.embedding_text()).await else {
        return false;
    };
    let metadata = vector_metadata(record, path);
    state
        .vector
        .upsert(record.id.short(), &record.embedding_text(), &embedding, metadata)
        .await
        .is_ok()
}

/// Builds vector-store metadata for a record.
fn vector_metadata(record: &DecisionRecord, path: &str) -> Value {
    let mut metadata = serde_json::Map::new();
    metadata.insert("title".to_string(), json!(record.summary));
    metadata.insert("date".to_string(), json!(record.date.chars().take(10).collect::<String>()));
    metadata.insert("category".to_string(), json!(record.category.as_str()));
    metadata.insert("stakes".to_string(), json!(record.stakes.as_str()));
    metadata.insert("confidence".to_string(), json!(record.confidence));
    metadata.insert("status".to_string(), json!(record.status.as_str()));
    if let Some(outcome) = record.outcome {
        metadata.insert("outcome".to_string(), json!(outcome.as_str()));
    }
    if let Some(lessons) = &record.lessons {
        metadata.insert(
            "lessons".to_string(),
            json!(lessons.chars().take(500).collect::<String>()),
        );
    }
    if let Some(actual_result) = &record.actual_result {
        metadata.insert("actual_result".to_string(), json!(actual_result));
    }
    if !record.tags.is_empty() {
        metadata.insert("tags".to_string(), json!(record.tags.join(",")));
    }
    if let Some(pattern) = &record.pattern {
        metadata.insert("pattern".to_string(), json!(pattern));
    }
    if !record.reasons.is_empty() {
        let types: Vec<&str> = record
            .reasons
            .iter()
            .map(|r| r.reason_type.as_str())
            .collect();
        metadata.insert("reason_types".to_string(), json!(types.join(",")));
        if let Ok(reasons_json) = serde_json::to_string(&record.reasons) {
            metadata.insert("reasons_json".to_string(), json!(reasons_json));
        }
    }
    if let Some(bridge) = &record.bridge {
        if let Ok(bridge_json) = serde_json::to_string(bridge) {
            metadata.insert("bridge_json".to_string(), json!(bridge_json));
        }
    }
    if let Some(project) = &record.project {
        metadata.insert("project".to_string(), json!(project));
    }
    if let Some(feature) = &record.feature {
        metadata.insert("feature".to_string(), json!(feature));
    }
    if let Some(pr) = record.pr {
        metadata.insert("pr".to_string(), json!(pr));
    }
    if let Some(agent) = &record.recorded_by {
        metadata.insert("agent".to_string(), json!(agent));
    }
    metadata.insert("path".to_string(), json!(path));
    Value::Object(metadata)
}

// ============================================================================
// SECTION: Review Handler
// ============================================================================

/// Handles `cstp.reviewDecision`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] on validation failure,
/// [`HandlerError::NotFound`] for unknown ids, and
/// [`HandlerError::ReviewFailed`] when the rewrite fails.
pub async fn handle_review_decision(
    state: &ServerState,
    params_value: &Value,
    reviewer: &AgentId,
) -> Result<Value, HandlerError> {
    let id = params::get_str(params_value, &["id", "decisionId", "decision_id"])
        .ok_or_else(|| HandlerError::InvalidParams("id: required field".to_string()))?;
    let outcome_label = params::get_str(params_value, &["outcome"])
        .ok_or_else(|| HandlerError::InvalidParams("outcome: required field".to_string()))?;
    let outcome = Outcome::parse(outcome_label).ok_or_else(|| {
        HandlerError::InvalidParams(format!(
            "outcome: must be one of {}",
            enum_list(Outcome::ALL.iter().map(|o| o.as_str()))
        ))
    })?;

    let mut record = match state.store.get(id) {
        Ok(record) => record,
        Err(StoreError::NotFound(_)) => {
            return Err(HandlerError::NotFound(format!("Decision not found: {id}")));
        }
        Err(error) => return Err(HandlerError::ReviewFailed(error.to_string())),
    };

    record.status = DecisionStatus::Reviewed;
    record.outcome = Some(outcome);
    record.actual_result = params::get_str(params_value, &["actualResult", "actual_result"])
        .map(str::to_string)
        .or(record.actual_result);
    record.lessons = params::get_str(params_value, &["lessons"])
        .map(str::to_string)
        .or(record.lessons);
    if let Some(kpis) = params::get_str_list(params_value, &["affectedKpis", "affected_kpis"]) {
        record.affected_kpis = kpis;
    }
    record.reviewed_at = Some(state.now_rfc3339());
    record.reviewed_by = Some(reviewer.as_str().to_string());

    let path = state
        .store
        .rewrite(&record)
        .map_err(|e| HandlerError::ReviewFailed(e.to_string()))?;

    // Refresh the vector document so lessons and outcome become searchable.
    // Index failure stays non-fatal.
    let _ = index_record(state, &record, &path).await;

    // Post-review breaker feedback is fail-open.
    let breaker_context = BreakerContext {
        category: Some(record.category.as_str().to_string()),
        stakes: Some(record.stakes.as_str().to_string()),
        agent_id: record.recorded_by.clone(),
        tags: record.tags.clone(),
    };
    let _ = state.breakers.record_outcome(&breaker_context, outcome);

    let level = determine_level(&record, state.now());
    Ok(json!({
        "success": true,
        "id": record.id.short(),
        "status": record.status.as_str(),
        "outcome": outcome.as_str(),
        "reviewedAt": record.reviewed_at,
        "reviewedBy": record.reviewed_by,
        "compactionLevel": level.as_str(),
    }))
}

// ============================================================================
// SECTION: Get, Update, and Thought Handlers
// ============================================================================

/// Handles `cstp.getDecision`.
///
/// # Errors
///
/// Returns [`HandlerError::NotFound`] for unknown ids.
pub fn handle_get_decision(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let id = params::get_str(params_value, &["id", "decisionId", "decision_id"])
        .ok_or_else(|| HandlerError::InvalidParams("id: required field".to_string()))?;
    let record = match state.store.get(id) {
        Ok(record) => record,
        Err(StoreError::NotFound(_) | StoreError::AmbiguousId(_)) => {
            return Err(HandlerError::NotFound(format!("Decision not found: {id}")));
        }
        Err(error) => return Err(HandlerError::internal("StoreError", error)),
    };

    let key = TrackerKey::compose(agent, None, None);
    state
        .tracker
        .track_lookup(&key, record.id.short(), &record.summary);

    let decision = serde_json::to_value(&record)
        .map_err(|e| HandlerError::internal("SerializeError", e))?;
    Ok(json!({
        "found": true,
        "decision": to_camel_value(decision),
    }))
}

/// Updatable keys for `cstp.updateDecision`, camelCase to record field.
const UPDATE_KEYS: &[(&str, &str)] = &[
    ("tags", "tags"),
    ("pattern", "pattern"),
    ("context", "context"),
    ("project", "project"),
    ("feature", "feature"),
    ("pr", "pr"),
    ("kpiIndicators", "kpi_indicators"),
    ("kpi_indicators", "kpi_indicators"),
    ("mentalState", "mental_state"),
    ("mental_state", "mental_state"),
    ("reviewBy", "review_by"),
    ("review_by", "review_by"),
];

/// Handles `cstp.updateDecision`.
///
/// Only the allowed keys shallow-merge; anything else is rejected.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for missing or disallowed keys
/// and [`HandlerError::NotFound`] for unknown ids.
pub fn handle_update_decision(
    state: &ServerState,
    params_value: &Value,
) -> Result<Value, HandlerError> {
    let id = params::get_str(params_value, &["id", "decisionId", "decision_id"])
        .ok_or_else(|| HandlerError::InvalidParams("id: required field".to_string()))?;
    let Some(updates) = params_value.get("updates").and_then(Value::as_object) else {
        return Err(HandlerError::InvalidParams(
            "updates: required field".to_string(),
        ));
    };
    if updates.is_empty() {
        return Err(HandlerError::InvalidParams(
            "updates: required field".to_string(),
        ));
    }

    let disallowed: Vec<&String> = updates
        .keys()
        .filter(|key| !UPDATE_KEYS.iter().any(|(allowed, _)| allowed == &key.as_str()))
        .collect();
    if !disallowed.is_empty() {
        return Err(HandlerError::InvalidParams(format!(
            "updates: keys not allowed: {}",
            disallowed
                .iter()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    let mut record = match state.store.get(id) {
        Ok(record) => record,
        Err(StoreError::NotFound(_) | StoreError::AmbiguousId(_)) => {
            return Err(HandlerError::NotFound(format!("Decision not found: {id}")));
        }
        Err(error) => return Err(HandlerError::internal("StoreError", error)),
    };

    let mut applied: Vec<&str> = Vec::new();
    for (key, value) in updates {
        let Some((_, field)) = UPDATE_KEYS
            .iter()
            .find(|(allowed, _)| *allowed == key.as_str())
        else {
            continue;
        };
        apply_update(&mut record, field, value)?;
        applied.push(field);
    }

    state
        .store
        .rewrite(&record)
        .map_err(|e| HandlerError::internal("StoreError", e))?;
    Ok(json!({
        "success": true,
        "id": record.id.short(),
        "updated": applied,
    }))
}

/// Applies one update field.
fn apply_update(
    record: &mut DecisionRecord,
    field: &str,
    value: &Value,
) -> Result<(), HandlerError> {
    match field {
        "tags" => {
            record.tags = serde_json::from_value(value.clone())
                .map_err(|e| HandlerError::InvalidParams(format!("updates.tags: {e}")))?;
        }
        "pattern" => record.pattern = value.as_str().map(str::to_string),
        "context" => record.context = value.as_str().map(str::to_string),
        "project" => record.project = value.as_str().map(str::to_string),
        "feature" => record.feature = value.as_str().map(str::to_string),
        "pr" => record.pr = value.as_i64(),
        "kpi_indicators" => {
            record.kpi_indicators = serde_json::from_value(value.clone())
                .map_err(|e| HandlerError::InvalidParams(format!("updates.kpiIndicators: {e}")))?;
        }
        "mental_state" => {
            record.mental_state = match value.as_str() {
                Some(label) => Some(MentalState::parse(label).ok_or_else(|| {
                    HandlerError::InvalidParams("updates.mentalState: unknown value".to_string())
                })?),
                None => None,
            };
        }
        "review_by" => record.review_by = value.as_str().map(str::to_string),
        _ => {}
    }
    Ok(())
}

/// Handles `cstp.recordThought`.
///
/// Legacy post-decision mode (bare `id` without scoping params) appends a
/// step to the stored deliberation; otherwise the thought accumulates in
/// the tracker under the composite scope key.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] for missing text and
/// [`HandlerError::NotFound`] for unknown legacy ids.
pub fn handle_record_thought(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let text = params::get_str(params_value, &["text", "thought"])
        .ok_or_else(|| HandlerError::InvalidParams("text: required field".to_string()))?;
    if text.trim().is_empty() {
        return Err(HandlerError::InvalidParams("text: required field".to_string()));
    }
    let scope_agent = params::get_str(params_value, &["agentId", "agent_id"]);
    let scope_decision = params::get_str(params_value, &["decisionId", "decision_id"]);
    let legacy_id = params::get_str(params_value, &["id"]);

    if let Some(id) = legacy_id {
        if scope_agent.is_none() && scope_decision.is_none() {
            let mut record = match state.store.get(id) {
                Ok(record) => record,
                Err(StoreError::NotFound(_) | StoreError::AmbiguousId(_)) => {
                    return Err(HandlerError::NotFound(format!("Decision not found: {id}")));
                }
                Err(error) => return Err(HandlerError::internal("StoreError", error)),
            };
            let mut deliberation = record.deliberation.take().unwrap_or_default();
            let step = deliberation.append_thought(text, Some(state.now_rfc3339()));
            record.deliberation = Some(deliberation);
            state
                .store
                .rewrite(&record)
                .map_err(|e| HandlerError::internal("StoreError", e))?;
            return Ok(json!({
                "success": true,
                "mode": "post-decision",
                "decisionId": record.id.short(),
                "stepNumber": step,
            }));
        }
    }

    let key = TrackerKey::compose(agent, scope_agent, scope_decision);
    let input_id = state.tracker.track_reasoning(&key, text);
    Ok(json!({
        "success": true,
        "mode": "pre-decision",
        "trackerKey": key.as_str(),
        "inputId": input_id,
        "agentId": scope_agent.unwrap_or(agent.as_str()),
    }))
}
