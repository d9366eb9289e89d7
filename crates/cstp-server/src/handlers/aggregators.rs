// crates/cstp-server/src/handlers/aggregators.rs
// ============================================================================
// Module: Aggregator Handlers
// Description: cstp.preAction and cstp.getSessionContext.
// Purpose: Compose retrieval, guardrails, breakers, and analytics in one call.
// Dependencies: crate::handlers, crate::state, cstp-core, serde_json
// ============================================================================

//! ## Overview
//! `preAction` runs, in order, retrieval with the action description as
//! the query, guardrail evaluation, the circuit-breaker check, and a
//! calibration lookup; when everything passes and `autoRecord` is set it
//! records the decision too. `getSessionContext` assembles the agent
//! profile, optional relevant decisions, active guardrails, per-category
//! calibration, the legacy ready queue, and confirmed patterns, and can
//! render the whole thing as Markdown for system-prompt injection.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use cstp_core::AgentId;
use cstp_core::DecisionRecord;
use cstp_core::Outcome;
use cstp_core::Priority;
use cstp_core::analytics::calculate_calibration;
use cstp_core::analytics::ready::ReadyActionType;
use cstp_core::analytics::ready::ReadyRequest;
use cstp_core::analytics::ready::ready_actions;
use serde_json::Value;
use serde_json::json;

use crate::handlers::decisions::handle_record_decision;
use crate::handlers::guardrails::breaker_context_from;
use crate::handlers::guardrails::render_check_response;
use crate::jsonrpc::HandlerError;
use crate::params;
use crate::state::ServerState;
use crate::wire::DecisionSummary;

// ============================================================================
// SECTION: Pre-Action
// ============================================================================

/// Default relevant-decision limit for pre-action.
const PRE_ACTION_LIMIT: usize = 5;

/// Handles `cstp.preAction`.
///
/// # Errors
///
/// Returns [`HandlerError::InvalidParams`] when the action block is
/// missing; downstream degradations are folded into the response.
pub async fn handle_pre_action(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let Some(action) = params_value.get("action").and_then(Value::as_object) else {
        return Err(HandlerError::InvalidParams(
            "action: required field".to_string(),
        ));
    };
    let description = action
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if description.trim().is_empty() {
        return Err(HandlerError::InvalidParams(
            "action.description: required field".to_string(),
        ));
    }
    let include_detail =
        params::get_bool(params_value, &["includeDetail", "include_detail"]).unwrap_or(false);
    let auto_record =
        params::get_bool(params_value, &["autoRecord", "auto_record"]).unwrap_or(false);
    let limit = params::get_usize(params_value, &["limit"]).unwrap_or(PRE_ACTION_LIMIT);

    // 1. Retrieval: the action description is the query. Degrades to empty.
    let query_params = json!({
        "query": description,
        "limit": limit,
        "includeDetail": include_detail,
    });
    let relevant = match crate::handlers::query::handle_query_decisions(
        state,
        &query_params,
        agent,
    )
    .await
    {
        Ok(result) => result.get("decisions").cloned().unwrap_or_else(|| json!([])),
        Err(_) => json!([]),
    };

    // 2 + 3. Guardrails, then the breaker gate.
    let mut context = serde_json::Map::new();
    for key in ["category", "stakes", "confidence"] {
        if let Some(value) = action.get(key) {
            context.insert(key.to_string(), value.clone());
        }
    }
    if let Some(tags) = action.get("tags") {
        context.insert("tags".to_string(), tags.clone());
    }
    if let Some(extra) = action.get("context").and_then(Value::as_object) {
        for (key, value) in extra {
            context.insert(key.clone(), value.clone());
        }
    }
    let evaluation = state.guardrails.evaluate(
        &context,
        agent.as_str(),
        &description,
        state.audit.as_ref(),
        state.now_rfc3339(),
    );
    let breaker_results = state
        .breakers
        .check(&breaker_context_from(&context))
        .map_err(|e| HandlerError::GuardrailEvalFailed(e.to_string()))?;
    let gate = render_check_response(state, &evaluation, &breaker_results);
    let allowed = gate["allowed"].as_bool().unwrap_or(true);

    // 4. Calibration snapshot scoped to the action's category when given.
    let calibration = {
        let corpus = state
            .store
            .load_all()
            .unwrap_or_default();
        let category = action.get("category").and_then(Value::as_str);
        let scoped: Vec<DecisionRecord> = match category {
            Some(category) => corpus
                .iter()
                .filter(|record| record.category.as_str() == category)
                .cloned()
                .collect(),
            None => corpus,
        };
        calculate_calibration(&scoped).map_or(Value::Null, |stats| {
            json!({
                "reviewedDecisions": stats.reviewed_decisions,
                "accuracy": stats.accuracy,
                "brierScore": stats.brier_score,
                "avgConfidence": stats.avg_confidence,
                "interpretation": stats.interpretation.as_str(),
            })
        })
    };

    // 5. Optional auto-record once every gate passed.
    let mut decision_id = Value::Null;
    if allowed && auto_record {
        let mut record_params = serde_json::Map::new();
        record_params.insert("decision".to_string(), json!(description));
        for key in ["category", "stakes", "confidence", "tags", "context"] {
            if let Some(value) = action.get(key) {
                record_params.insert(key.to_string(), value.clone());
            }
        }
        if let Ok(recorded) =
            handle_record_decision(state, &Value::Object(record_params), agent).await
        {
            decision_id = recorded.get("id").cloned().unwrap_or(Value::Null);
        }
    }

    Ok(json!({
        "allowed": allowed,
        "relevantDecisions": relevant,
        "violations": gate["violations"],
        "warnings": gate["warnings"],
        "calibration": calibration,
        "decisionId": decision_id,
        "agent": state.config.agent.name,
    }))
}

// ============================================================================
// SECTION: Session Context
// ============================================================================

/// Sections selectable via `include`.
const ALL_SECTIONS: [&str; 5] = ["decisions", "guardrails", "calibration", "ready", "patterns"];

/// Handles `cstp.getSessionContext`.
///
/// # Errors
///
/// Returns [`HandlerError`] on store failure.
pub async fn handle_get_session_context(
    state: &ServerState,
    params_value: &Value,
    agent: &AgentId,
) -> Result<Value, HandlerError> {
    let include: Vec<String> = params::get_str_list(params_value, &["include"])
        .unwrap_or_else(|| ALL_SECTIONS.iter().map(|s| (*s).to_string()).collect());
    let wants = |section: &str| include.iter().any(|s| s == section);
    let task_description =
        params::get_str(params_value, &["taskDescription", "task_description"]);
    let decisions_limit =
        params::get_usize(params_value, &["decisionsLimit", "decisions_limit"]).unwrap_or(5);
    let ready_limit = params::get_usize(params_value, &["readyLimit", "ready_limit"]).unwrap_or(5);
    let markdown_format =
        params::get_str(params_value, &["format"]) == Some("markdown");

    let corpus = state
        .store
        .load_all()
        .map_err(|e| HandlerError::internal("StoreError", e))?;

    let profile = build_agent_profile(&corpus);

    // Relevant decisions degrade to empty on retrieval failure.
    let mut relevant: Vec<DecisionSummary> = Vec::new();
    if wants("decisions") {
        if let Some(task) = task_description {
            if !task.trim().is_empty() {
                let query_params = json!({ "query": task, "limit": decisions_limit });
                if let Ok(result) =
                    crate::handlers::query::handle_query_decisions(state, &query_params, agent)
                        .await
                {
                    if let Some(decisions) = result.get("decisions").and_then(Value::as_array) {
                        for decision in decisions {
                            if let Ok(summary) =
                                serde_json::from_value::<DecisionSummary>(decision.clone())
                            {
                                relevant.push(summary);
                            }
                        }
                    }
                }
            }
        }
    }

    let active_guardrails: Vec<Value> = if wants("guardrails") {
        state
            .guardrails
            .guardrails()
            .iter()
            .map(|g| {
                json!({
                    "id": g.id,
                    "description": g.description,
                    "action": g.action.as_str(),
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let calibration_by_category: BTreeMap<String, Value> = if wants("calibration") {
        build_calibration_by_category(&corpus)
    } else {
        BTreeMap::new()
    };

    let ready_queue: Vec<Value> = if wants("ready") {
        build_ready_queue(state, &corpus, ready_limit)
    } else {
        Vec::new()
    };

    let confirmed_patterns: Vec<Value> = if wants("patterns") {
        extract_confirmed_patterns(&corpus)
    } else {
        Vec::new()
    };

    let mut response = json!({
        "agentProfile": profile,
        "relevantDecisions": relevant,
        "activeGuardrails": active_guardrails,
        "calibrationByCategory": calibration_by_category,
        "readyQueue": ready_queue,
        "confirmedPatterns": confirmed_patterns,
    });
    if markdown_format {
        response["markdown"] = json!(render_markdown(&response, agent.as_str()));
    }
    Ok(response)
}

/// Builds the agent profile block.
fn build_agent_profile(corpus: &[DecisionRecord]) -> Value {
    let total = corpus.len();
    let reviewed: Vec<&DecisionRecord> = corpus.iter().filter(|d| d.is_reviewed()).collect();
    let active_since = corpus
        .iter()
        .map(|d| d.date.chars().take(10).collect::<String>())
        .min();

    let mut profile = json!({
        "totalDecisions": total,
        "reviewed": reviewed.len(),
        "activeSince": active_since,
    });

    let reviewed_records: Vec<DecisionRecord> =
        reviewed.iter().map(|record| (*record).clone()).collect();
    if let Some(stats) = calculate_calibration(&reviewed_records) {
        profile["overallAccuracy"] = json!(stats.accuracy);
        profile["brierScore"] = json!(stats.brier_score);
        profile["tendency"] = json!(stats.interpretation.as_str());
    }

    // Strongest/weakest category needs at least 3 reviewed decisions each.
    let mut per_category: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in &reviewed {
        let entry = per_category.entry(record.category.as_str()).or_insert((0, 0));
        entry.1 += 1;
        if record.outcome == Some(Outcome::Success) {
            entry.0 += 1;
        }
    }
    #[allow(clippy::cast_precision_loss, reason = "counts are small")]
    let viable: Vec<(&str, f64)> = per_category
        .iter()
        .filter(|(_, (_, total))| *total >= 3)
        .map(|(category, (successes, total))| (*category, *successes as f64 / *total as f64))
        .collect();
    if let Some((strongest, _)) = viable
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    {
        profile["strongestCategory"] = json!(strongest);
    }
    if let Some((weakest, _)) = viable
        .iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    {
        profile["weakestCategory"] = json!(weakest);
    }

    profile
}

/// Per-category calibration blocks.
fn build_calibration_by_category(corpus: &[DecisionRecord]) -> BTreeMap<String, Value> {
    let mut by_category: BTreeMap<String, Vec<DecisionRecord>> = BTreeMap::new();
    for record in corpus.iter().filter(|d| d.is_reviewed()) {
        by_category
            .entry(record.category.as_str().to_string())
            .or_default()
            .push(record.clone());
    }
    by_category
        .into_iter()
        .filter_map(|(category, records)| {
            calculate_calibration(&records).map(|stats| {
                (
                    category,
                    json!({
                        "reviewedDecisions": stats.reviewed_decisions,
                        "accuracy": stats.accuracy,
                        "brierScore": stats.brier_score,
                        "interpretation": stats.interpretation.as_str(),
                    }),
                )
            })
        })
        .collect()
}

/// Legacy ready queue: overdue reviews and stale pending only.
fn build_ready_queue(state: &ServerState, corpus: &[DecisionRecord], limit: usize) -> Vec<Value> {
    let request = ReadyRequest {
        min_priority: Priority::Low,
        action_types: vec![ReadyActionType::ReviewOutcome, ReadyActionType::StalePending],
        category: None,
        limit,
    };
    let response = ready_actions(corpus, &request, state.now());
    response
        .actions
        .iter()
        .map(|action| {
            let reason = match action.action_type {
                ReadyActionType::ReviewOutcome => "overdue_review",
                _ => "stale_pending",
            };
            json!({
                "id": action.decision_id.clone().unwrap_or_default(),
                "title": action.title.clone().unwrap_or_else(|| "Untitled".to_string()),
                "reason": reason,
                "date": action.date.clone().unwrap_or_default(),
                "detail": action.detail.clone().unwrap_or_default(),
            })
        })
        .collect()
}

/// Patterns appearing in two or more decisions.
fn extract_confirmed_patterns(corpus: &[DecisionRecord]) -> Vec<Value> {
    let mut data: BTreeMap<&str, (Vec<String>, std::collections::BTreeSet<&str>)> = BTreeMap::new();
    for record in corpus {
        let Some(pattern) = record.pattern.as_deref() else {
            continue;
        };
        let entry = data.entry(pattern).or_default();
        entry.0.push(record.id.short().to_string());
        entry.1.insert(record.category.as_str());
    }
    let mut confirmed: Vec<Value> = data
        .into_iter()
        .filter(|(_, (ids, _))| ids.len() >= 2)
        .map(|(pattern, (ids, categories))| {
            json!({
                "pattern": pattern,
                "count": ids.len(),
                "categories": categories.into_iter().collect::<Vec<_>>(),
                "exampleIds": ids.into_iter().take(5).collect::<Vec<_>>(),
            })
        })
        .collect();
    confirmed.sort_by_key(|value| std::cmp::Reverse(value["count"].as_u64().unwrap_or(0)));
    confirmed
}

/// Markdown rendering for system-prompt injection.
fn render_markdown(response: &Value, agent: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("## CSTP Decision Context ({agent})"));
    lines.push(String::new());

    lines.push("### Profile".to_string());
    let profile = &response["agentProfile"];
    lines.push(format!(
        "- **Decisions:** {} total, {} reviewed",
        profile["totalDecisions"], profile["reviewed"]
    ));
    if let Some(accuracy) = profile["overallAccuracy"].as_f64() {
        lines.push(format!(
            "- **Accuracy:** {:.0}% | **Brier:** {} | **Tendency:** {}",
            accuracy * 100.0,
            profile["brierScore"],
            profile["tendency"].as_str().unwrap_or("unknown")
        ));
    }
    if let Some(strongest) = profile["strongestCategory"].as_str() {
        lines.push(format!(
            "- **Strongest:** {strongest} | **Weakest:** {}",
            profile["weakestCategory"].as_str().unwrap_or(strongest)
        ));
    }
    lines.push(String::new());

    if let Some(guardrails) = response["activeGuardrails"].as_array() {
        if !guardrails.is_empty() {
            lines.push("### Guardrails".to_string());
            for guardrail in guardrails {
                lines.push(format!(
                    "- [{}] {}",
                    guardrail["action"].as_str().unwrap_or("warn"),
                    guardrail["description"]
                        .as_str()
                        .filter(|d| !d.is_empty())
                        .or_else(|| guardrail["id"].as_str())
                        .unwrap_or_default()
                ));
            }
            lines.push(String::new());
        }
    }

    if let Some(calibration) = response["calibrationByCategory"].as_object() {
        if !calibration.is_empty() {
            lines.push("### Calibration".to_string());
            lines.push("| Category | Accuracy | Brier | Decisions |".to_string());
            lines.push("|----------|----------|-------|-----------|".to_string());
            for (category, stats) in calibration {
                lines.push(format!(
                    "| {category} | {} | {} | {} |",
                    stats["accuracy"], stats["brierScore"], stats["reviewedDecisions"]
                ));
            }
            lines.push(String::new());
        }
    }

    if let Some(ready) = response["readyQueue"].as_array() {
        if !ready.is_empty() {
            lines.push(format!("### Pending Actions ({})", ready.len()));
            for item in ready {
                let tag = if item["reason"] == "overdue_review" {
                    "OVERDUE"
                } else {
                    "STALE"
                };
                lines.push(format!(
                    "- [{tag}] {}: {} ({})",
                    item["id"].as_str().unwrap_or_default(),
                    item["title"].as_str().unwrap_or_default(),
                    item["detail"].as_str().unwrap_or_default()
                ));
            }
            lines.push(String::new());
        }
    }

    if let Some(patterns) = response["confirmedPatterns"].as_array() {
        if !patterns.is_empty() {
            lines.push("### Confirmed Patterns".to_string());
            for pattern in patterns {
                let categories: Vec<&str> = pattern["categories"]
                    .as_array()
                    .map(|items| items.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                lines.push(format!(
                    "- {} ({}x, {})",
                    pattern["pattern"].as_str().unwrap_or_default(),
                    pattern["count"],
                    categories.join(", ")
                ));
            }
            lines.push(String::new());
        }
    }

    if let Some(decisions) = response["relevantDecisions"].as_array() {
        if !decisions.is_empty() {
            lines.push("### Relevant Decisions".to_string());
            for decision in decisions {
                lines.push(format!(
                    "- [{}] {} ({}, {})",
                    decision["confidence"],
                    decision["title"].as_str().unwrap_or_default(),
                    decision["category"].as_str().unwrap_or_default(),
                    decision["outcome"].as_str().unwrap_or("pending")
                ));
            }
            lines.push(String::new());
        }
    }

    lines.push("### Protocol".to_string());
    lines.push("Use `preAction` before any significant decision.".to_string());
    lines.push(String::new());
    lines.join("\n")
}
