// crates/cstp-server/tests/dispatch.rs
// ============================================================================
// Module: Dispatch Integration Tests
// Description: End-to-end method flows over in-memory backends.
// Purpose: Exercise record/review/query/compaction/drift through dispatch.
// Dependencies: cstp-config, cstp-core, cstp-server, serde_json, tokio
// ============================================================================

//! End-to-end flows through the method dispatcher with memory stores: the
//! record-review lifecycle, hybrid retrieval, tracker splicing, compaction
//! shaping, drift detection, and the error surface.

use cstp_config::Config;
use cstp_core::AgentId;
use cstp_core::Category;
use cstp_core::DecisionId;
use cstp_core::DecisionRecord;
use cstp_core::DecisionStatus;
use cstp_core::Outcome;
use cstp_core::Stakes;
use cstp_core::TrackerKey;
use cstp_server::ServerState;
use cstp_server::dispatch_method;
use serde_json::Value;
use serde_json::json;

/// Test agent identity.
fn agent() -> AgentId {
    AgentId::new("claude")
}

/// Fresh in-memory server state.
#[allow(clippy::unwrap_used, reason = "memory wiring cannot fail in tests")]
fn state() -> ServerState {
    ServerState::for_tests(Config::default()).unwrap()
}

/// Unwraps a successful dispatch result.
fn result_of(response: cstp_server::JsonRpcResponse) -> Value {
    let error = response
        .error
        .map(|e| format!("{} ({})", e.code, e.message));
    assert_eq!(error, None);
    response.result.unwrap_or(Value::Null)
}

/// Inserts a reviewed record dated `date` directly into the store.
fn seed_reviewed(
    state: &ServerState,
    id: &str,
    date: &str,
    confidence: f64,
    outcome: Outcome,
) -> DecisionRecord {
    let record = DecisionRecord {
        id: DecisionId::new(id),
        summary: format!("decision {id}"),
        decision: format!("decision {id}"),
        category: Category::Architecture,
        confidence,
        stakes: Stakes::Medium,
        status: DecisionStatus::Reviewed,
        date: date.to_string(),
        context: None,
        pattern: None,
        tags: Vec::new(),
        project: None,
        feature: None,
        pr: None,
        kpi_indicators: Vec::new(),
        mental_state: None,
        review_by: None,
        recorded_by: Some("claude".to_string()),
        reasons: Vec::new(),
        pre_decision: None,
        related_to: Vec::new(),
        bridge: None,
        deliberation: None,
        preserve: false,
        outcome: Some(outcome),
        actual_result: None,
        lessons: None,
        affected_kpis: Vec::new(),
        reviewed_at: None,
        reviewed_by: None,
        extra: std::collections::BTreeMap::new(),
    };
    #[allow(clippy::unwrap_used, reason = "memory insert cannot fail in tests")]
    state.store.insert(&record).unwrap();
    record
}

#[tokio::test]
async fn record_get_review_get_round_trip() {
    let state = state();
    let agent = agent();

    let recorded = result_of(
        dispatch_method(
            &state,
            "cstp.recordDecision",
            json!({
                "decision": "Use X",
                "confidence": 0.85,
                "category": "architecture",
                "stakes": "high",
            }),
            &agent,
        )
        .await,
    );
    assert_eq!(recorded["success"], json!(true));
    assert_eq!(recorded["indexed"], json!(true));
    let id = recorded["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(id.len(), 8);

    let fetched = result_of(
        dispatch_method(&state, "cstp.getDecision", json!({ "id": id }), &agent).await,
    );
    assert_eq!(fetched["decision"]["status"], json!("pending"));
    assert_eq!(fetched["decision"]["recordedBy"], json!("claude"));

    let reviewed = result_of(
        dispatch_method(
            &state,
            "cstp.reviewDecision",
            json!({ "id": id, "outcome": "success", "lessons": "Trust X" }),
            &agent,
        )
        .await,
    );
    assert_eq!(reviewed["status"], json!("reviewed"));
    assert_eq!(reviewed["outcome"], json!("success"));
    assert_eq!(reviewed["compactionLevel"], json!("full"));

    let fetched = result_of(
        dispatch_method(&state, "cstp.getDecision", json!({ "id": id }), &agent).await,
    );
    assert_eq!(fetched["decision"]["status"], json!("reviewed"));
    assert_eq!(fetched["decision"]["outcome"], json!("success"));
    assert_eq!(fetched["decision"]["lessons"], json!("Trust X"));
}

#[tokio::test]
async fn hybrid_query_ranks_keyword_match_first() {
    let state = state();
    let agent = agent();

    for text in [
        "Implemented CSRF protection",
        "OAuth login flow",
        "General security improvements",
    ] {
        let recorded = result_of(
            dispatch_method(
                &state,
                "cstp.recordDecision",
                json!({ "decision": text, "confidence": 0.8, "category": "security" }),
                &agent,
            )
            .await,
        );
        assert_eq!(recorded["indexed"], json!(true));
    }

    let result = result_of(
        dispatch_method(
            &state,
            "cstp.queryDecisions",
            json!({ "query": "CSRF", "retrievalMode": "hybrid", "hybridWeight": 0.7 }),
            &agent,
        )
        .await,
    );
    assert_eq!(result["retrievalMode"], json!("hybrid"));
    let decisions = result["decisions"].as_array().cloned().unwrap_or_default();
    assert!(!decisions.is_empty());
    assert!(
        decisions[0]["title"]
            .as_str()
            .unwrap_or_default()
            .contains("CSRF")
    );

    let top_id = decisions[0]["id"].as_str().unwrap_or_default();
    let scores = &result["scores"][top_id];
    assert!(scores["keyword"].as_f64().unwrap_or(0.0) > 0.0);
    assert!(scores["combined"].as_f64().unwrap_or(0.0) > 0.0);
}

#[tokio::test]
async fn empty_query_lists_newest_first() {
    let state = state();
    let agent = agent();
    seed_reviewed(&state, "aaaa0001", "2026-01-01T00:00:00Z", 0.8, Outcome::Success);
    seed_reviewed(&state, "aaaa0002", "2026-02-01T00:00:00Z", 0.8, Outcome::Success);

    let result = result_of(
        dispatch_method(&state, "cstp.queryDecisions", json!({ "query": "" }), &agent).await,
    );
    assert_eq!(result["retrievalMode"], json!("list"));
    let decisions = result["decisions"].as_array().cloned().unwrap_or_default();
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0]["id"], json!("aaaa0002"));
}

#[tokio::test]
async fn tracker_merge_splices_auto_inputs_after_manual_steps() {
    let state = state();
    let agent = agent();

    // Capture a query and a guardrail check under the transport key.
    let _ = dispatch_method(
        &state,
        "cstp.queryDecisions",
        json!({ "query": "prior art" }),
        &agent,
    )
    .await;
    let _ = dispatch_method(
        &state,
        "cstp.checkGuardrails",
        json!({ "action": { "description": "deploy", "category": "process", "stakes": "low", "confidence": 0.9 } }),
        &agent,
    )
    .await;

    let recorded = result_of(
        dispatch_method(
            &state,
            "cstp.recordDecision",
            json!({
                "decision": "Adopt the boring option",
                "confidence": 0.7,
                "category": "process",
                "deliberation": {
                    "inputs": [{ "id": "manual", "text": "manual input", "source": "client" }],
                    "steps": [{ "step": 1, "thought": "manual step", "inputs_used": ["manual"] }],
                },
            }),
            &agent,
        )
        .await,
    );
    assert_eq!(recorded["deliberationAuto"], json!(true));
    assert_eq!(recorded["deliberationInputsCount"], json!(3));

    let id = recorded["id"].as_str().unwrap_or_default();
    let fetched = result_of(
        dispatch_method(&state, "cstp.getDecision", json!({ "id": id }), &agent).await,
    );
    let deliberation = &fetched["decision"]["deliberation"];
    assert_eq!(
        deliberation["inputs"].as_array().map(Vec::len),
        Some(3)
    );
    let steps = deliberation["steps"].as_array().cloned().unwrap_or_default();
    assert!(steps.len() >= 3);
    assert_eq!(steps[0]["thought"], json!("manual step"));
    assert_eq!(steps[1]["step"], json!(2));
}

#[tokio::test]
async fn compaction_levels_follow_age_and_preserve() {
    let state = state();
    let agent = agent();
    // Ages relative to now: the engine reads the wall clock, so seed with
    // dates derived from today.
    let now = time::OffsetDateTime::now_utc();
    let day = |offset: i64| {
        cstp_core::core::time::format_date(now - time::Duration::days(offset))
    };
    seed_reviewed(&state, "aaaa0003", &day(3), 0.8, Outcome::Success);
    seed_reviewed(&state, "aaaa0010", &day(10), 0.8, Outcome::Success);
    seed_reviewed(&state, "aaaa0050", &day(50), 0.8, Outcome::Success);
    seed_reviewed(&state, "aaaa0100", &day(100), 0.8, Outcome::Success);

    let report = result_of(dispatch_method(&state, "cstp.compact", json!({}), &agent).await);
    assert_eq!(report["levels"]["full"], json!(1));
    assert_eq!(report["levels"]["summary"], json!(1));
    assert_eq!(report["levels"]["digest"], json!(1));
    assert_eq!(report["levels"]["wisdom"], json!(1));

    // Wisdom-age decisions never appear individually.
    let page = result_of(
        dispatch_method(&state, "cstp.getCompacted", json!({ "limit": 10 }), &agent).await,
    );
    let ids: Vec<&str> = page["decisions"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|d| d["id"].as_str())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    assert!(!ids.contains(&"aaaa0100"));

    // preserve forces full.
    let preserved = result_of(
        dispatch_method(
            &state,
            "cstp.setPreserve",
            json!({ "id": "aaaa0100", "preserve": true }),
            &agent,
        )
        .await,
    );
    assert_eq!(preserved["success"], json!(true));
    // Setting preserve twice has the same effect as once.
    let _ = result_of(
        dispatch_method(
            &state,
            "cstp.setPreserve",
            json!({ "id": "aaaa0100", "preserve": true }),
            &agent,
        )
        .await,
    );
    let report = result_of(dispatch_method(&state, "cstp.compact", json!({}), &agent).await);
    assert_eq!(report["levels"]["wisdom"], json!(0));
    assert_eq!(report["levels"]["full"], json!(2));
    assert_eq!(report["preserved"], json!(1));
}

#[tokio::test]
async fn drift_detection_flags_brier_degradation() {
    let state = state();
    let agent = agent();
    let now = time::OffsetDateTime::now_utc();
    let day = |offset: i64| {
        cstp_core::core::time::format_date(now - time::Duration::days(offset))
    };
    // Historical window: 30 good calls. Recent window: 10 misses.
    for i in 0..30 {
        seed_reviewed(&state, &format!("bb{i:02}0000"), &day(60), 0.8, Outcome::Success);
    }
    for i in 0..10 {
        seed_reviewed(&state, &format!("cc{i:02}0000"), &day(5), 0.8, Outcome::Failure);
    }

    let report = result_of(
        dispatch_method(
            &state,
            "cstp.checkDrift",
            json!({ "thresholdBrier": 0.20, "thresholdAccuracy": 0.15 }),
            &agent,
        )
        .await,
    );
    assert_eq!(report["driftDetected"], json!(true));
    let alerts = report["alerts"].as_array().cloned().unwrap_or_default();
    let brier = alerts
        .iter()
        .find(|a| a["type"] == json!("brier_degradation"));
    assert!(brier.is_some_and(|a| a["severity"] == json!("error")));
}

#[tokio::test]
async fn ready_surfaces_overdue_reviews_through_dispatch() {
    let state = state();
    let agent = agent();
    let now = time::OffsetDateTime::now_utc();
    let mut record = seed_reviewed(&state, "dddd0001", "2026-01-01T00:00:00Z", 0.8, Outcome::Success);
    record.status = DecisionStatus::Pending;
    record.outcome = None;
    record.stakes = Stakes::Critical;
    record.review_by = Some(cstp_core::core::time::format_date(
        now - time::Duration::days(10),
    ));
    #[allow(clippy::unwrap_used, reason = "memory rewrite cannot fail in tests")]
    state.store.rewrite(&record).unwrap();

    let response = result_of(dispatch_method(&state, "cstp.ready", json!({}), &agent).await);
    let actions = response["actions"].as_array().cloned().unwrap_or_default();
    assert!(!actions.is_empty());
    assert_eq!(actions[0]["type"], json!("review_outcome"));
    assert_eq!(actions[0]["priority"], json!("high"));
}

#[tokio::test]
async fn unknown_method_lists_available_methods() {
    let state = state();
    let response =
        dispatch_method(&state, "cstp.noSuchMethod", json!({}), &agent()).await;
    let error = response.error.unwrap_or(cstp_server::jsonrpc::JsonRpcError {
        code: 0,
        message: String::new(),
        data: None,
    });
    assert_eq!(error.code, -32_601);
    let available = error.data.unwrap_or_default();
    let methods = available["available"].as_array().cloned().unwrap_or_default();
    assert_eq!(methods.len(), 29);
}

#[tokio::test]
async fn validation_errors_name_the_fields() {
    let state = state();
    let response = dispatch_method(
        &state,
        "cstp.recordDecision",
        json!({ "decision": "", "confidence": 3.0, "category": "databases" }),
        &agent(),
    )
    .await;
    let Some(error) = response.error else {
        return assert!(response.error.is_some());
    };
    assert_eq!(error.code, -32_602);
    assert!(error.message.contains("decision:"));
    assert!(error.message.contains("confidence:"));
    assert!(error.message.contains("category:"));
}

#[tokio::test]
async fn not_found_uses_the_dedicated_code() {
    let state = state();
    let response = dispatch_method(
        &state,
        "cstp.getDecision",
        json!({ "id": "ffffffff" }),
        &agent(),
    )
    .await;
    let Some(error) = response.error else {
        return assert!(response.error.is_some());
    };
    assert_eq!(error.code, -32_007);
}

#[tokio::test]
async fn session_context_renders_markdown_sections() {
    let state = state();
    let agent = agent();
    for i in 0..4 {
        let mut record = seed_reviewed(
            &state,
            &format!("ee{i:02}0000"),
            "2026-01-15T00:00:00Z",
            0.8,
            Outcome::Success,
        );
        record.pattern = Some("prefer boring tech".to_string());
        #[allow(clippy::unwrap_used, reason = "memory rewrite cannot fail in tests")]
        state.store.rewrite(&record).unwrap();
    }

    let context = result_of(
        dispatch_method(
            &state,
            "cstp.getSessionContext",
            json!({ "format": "markdown" }),
            &agent,
        )
        .await,
    );
    assert_eq!(context["agentProfile"]["totalDecisions"], json!(4));
    assert_eq!(context["agentProfile"]["reviewed"], json!(4));
    let markdown = context["markdown"].as_str().unwrap_or_default();
    assert!(markdown.contains("### Profile"));
    assert!(markdown.contains("### Confirmed Patterns"));
    assert!(markdown.contains("### Protocol"));
}

#[tokio::test]
async fn pre_action_blocks_on_tripped_breaker() {
    let state = state();
    let agent = agent();

    // Trip the dynamic global breaker through failed reviews.
    #[allow(clippy::unwrap_used, reason = "breaker setup cannot fail in tests")]
    state.breakers.ensure_breaker("global").unwrap();
    for i in 0..5 {
        seed_reviewed(
            &state,
            &format!("ff{i:02}0000"),
            "2026-02-01T00:00:00Z",
            0.8,
            Outcome::Success,
        );
        let context = cstp_core::breaker::BreakerContext::default();
        #[allow(clippy::unwrap_used, reason = "breaker setup cannot fail in tests")]
        state
            .breakers
            .record_outcome(&context, Outcome::Failure)
            .unwrap();
    }

    let result = result_of(
        dispatch_method(
            &state,
            "cstp.preAction",
            json!({
                "action": { "description": "risky deploy", "category": "process", "stakes": "high", "confidence": 0.9 },
                "autoRecord": true,
            }),
            &agent,
        )
        .await,
    );
    assert_eq!(result["allowed"], json!(false));
    let violations = result["violations"].as_array().cloned().unwrap_or_default();
    assert!(violations.iter().any(|v| v["type"] == json!("circuit_breaker")));
    // Blocked actions are never auto-recorded.
    assert_eq!(result["decisionId"], Value::Null);
}

#[tokio::test]
async fn record_thought_accumulates_and_appends() {
    let state = state();
    let agent = agent();

    // Pre-decision mode accumulates under the composite key.
    let tracked = result_of(
        dispatch_method(
            &state,
            "cstp.recordThought",
            json!({ "text": "weighing options", "agentId": "planner" }),
            &agent,
        )
        .await,
    );
    assert_eq!(tracked["mode"], json!("pre-decision"));
    assert_eq!(tracked["trackerKey"], json!("agent:planner"));
    let key = TrackerKey::new("agent:planner");
    assert_eq!(state.tracker.get_inputs(&key).len(), 1);

    // Legacy post-decision mode appends to the stored trace.
    let recorded = result_of(
        dispatch_method(
            &state,
            "cstp.recordDecision",
            json!({ "decision": "Pick the simple path", "confidence": 0.6, "category": "process" }),
            &agent,
        )
        .await,
    );
    let id = recorded["id"].as_str().unwrap_or_default();
    let appended = result_of(
        dispatch_method(
            &state,
            "cstp.recordThought",
            json!({ "id": id, "text": "second thoughts" }),
            &agent,
        )
        .await,
    );
    assert_eq!(appended["mode"], json!("post-decision"));
    assert!(appended["stepNumber"].as_u64().unwrap_or(0) >= 1);
}

#[tokio::test]
async fn stats_and_list_cover_the_storage_surface() {
    let state = state();
    let agent = agent();
    seed_reviewed(&state, "aaaa0001", "2026-01-01T00:00:00Z", 0.8, Outcome::Success);
    seed_reviewed(&state, "aaaa0002", "2026-01-02T00:00:00Z", 0.8, Outcome::Failure);

    let listed = result_of(
        dispatch_method(&state, "cstp.listDecisions", json!({ "limit": 1 }), &agent).await,
    );
    assert_eq!(listed["total"], json!(2));
    assert_eq!(listed["decisions"].as_array().map(Vec::len), Some(1));

    let stats = result_of(dispatch_method(&state, "cstp.getStats", json!({}), &agent).await);
    assert_eq!(stats["total"], json!(2));
    assert_eq!(stats["byCategory"]["architecture"], json!(2));
}

#[tokio::test]
async fn graph_link_and_traverse_through_dispatch() {
    let state = state();
    let agent = agent();
    seed_reviewed(&state, "aaaa0001", "2026-01-01T00:00:00Z", 0.8, Outcome::Success);
    seed_reviewed(&state, "aaaa0002", "2026-01-02T00:00:00Z", 0.8, Outcome::Success);

    let linked = result_of(
        dispatch_method(
            &state,
            "cstp.linkDecisions",
            json!({ "sourceId": "aaaa0002", "targetId": "aaaa0001", "edgeType": "supersedes" }),
            &agent,
        )
        .await,
    );
    assert_eq!(linked["success"], json!(true));

    let graph = result_of(
        dispatch_method(
            &state,
            "cstp.getGraph",
            json!({ "nodeId": "aaaa0002", "depth": 1, "direction": "out" }),
            &agent,
        )
        .await,
    );
    let nodes = graph["nodes"].as_array().cloned().unwrap_or_default();
    assert_eq!(nodes.len(), 2);

    let unknown_edge = dispatch_method(
        &state,
        "cstp.linkDecisions",
        json!({ "sourceId": "aaaa0002", "targetId": "aaaa0001", "edgeType": "causes" }),
        &agent,
    )
    .await;
    assert!(unknown_edge.error.is_some_and(|e| e.code == -32_602));
}
