// crates/cstp-core/src/tracker.rs
// ============================================================================
// Module: Deliberation Tracker
// Description: Scope-keyed capture of queries, guardrail checks, and reasoning.
// Purpose: Auto-build deliberation traces for recorded decisions, zero client
//          changes required.
// Dependencies: crate::core, rand, serde, serde_json, time
// ============================================================================

//! ## Overview
//! The tracker accumulates inputs per scope key from capture points across
//! the dispatcher. All capture operations are fail-open: lock failures are
//! swallowed so the primary API flow never degrades. Two TTLs apply
//! independently: inputs older than `input_ttl` are filtered at read and
//! consume time (age equal to the TTL is already expired), and sessions
//! idle for `session_ttl` are evicted and recorded as expired. Consumed and
//! expired sessions leave a bounded audit trail in a ring buffer.
//!
//! Ordering: capture preserves per-key append order, and `consume` is
//! atomic with respect to concurrent captures; an input arriving during a
//! consume either lands in the consumed batch or starts a new session.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use time::OffsetDateTime;

use crate::core::decision::Deliberation;
use crate::core::decision::DeliberationInput;
use crate::core::decision::DeliberationStep;
use crate::core::decision::RelatedDecision;
use crate::core::enums::ReasonType;
use crate::core::identifiers::TrackerKey;
use crate::core::time::format_rfc3339;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default TTL for individual inputs, seconds.
pub const DEFAULT_INPUT_TTL_SECS: u64 = 300;
/// Default TTL for idle sessions, seconds.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 1_800;
/// Default consumed-history ring capacity.
pub const DEFAULT_CONSUMED_HISTORY: usize = 50;
/// Probability of inline expired-session cleanup per capture.
const CLEANUP_PROBABILITY: f64 = 0.02;
/// Maximum items retained in a consumed-record input summary.
const SUMMARY_MAX_ITEMS: usize = 10;
/// Maximum characters per summarized input text.
const SUMMARY_MAX_CHARS: usize = 80;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Wall-clock source for the tracker (injectable for tests).
pub trait TrackerClock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> OffsetDateTime;
}

/// System UTC clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrackerClock;

impl TrackerClock for SystemTrackerClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

// ============================================================================
// SECTION: Tracked Inputs
// ============================================================================

/// Kind of a tracked input.
///
/// # Invariants
/// - Variants are stable for serialization and step synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    /// Similarity query.
    Query,
    /// Guardrail check.
    Guardrail,
    /// Free-form reasoning step.
    Reasoning,
    /// Decision lookup.
    Lookup,
    /// Statistics read.
    Stats,
}

impl InputType {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Guardrail => "guardrail",
            Self::Reasoning => "reasoning",
            Self::Lookup => "lookup",
            Self::Stats => "stats",
        }
    }

    /// Short id prefix for inputs of this type.
    const fn id_prefix(self) -> &'static str {
        match self {
            Self::Query => "q",
            Self::Guardrail => "g",
            Self::Reasoning => "r",
            Self::Lookup => "l",
            Self::Stats => "s",
        }
    }

    /// Deliberation step type synthesized from this input type.
    const fn step_type(self) -> ReasonType {
        match self {
            Self::Guardrail => ReasonType::Constraint,
            Self::Stats => ReasonType::Empirical,
            Self::Query | Self::Reasoning | Self::Lookup => ReasonType::Analysis,
        }
    }
}

/// A single tracked input.
///
/// # Invariants
/// - `id` is unique within the session.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedInput {
    /// Short input id with a type prefix.
    pub id: String,
    /// Input kind.
    pub input_type: InputType,
    /// Human-readable capture text.
    pub text: String,
    /// Source label, e.g. `cstp:queryDecisions`.
    pub source: String,
    /// Capture moment.
    pub timestamp: OffsetDateTime,
    /// Raw structured capture data.
    pub raw: Value,
}

/// Accumulated inputs for one scope key.
#[derive(Debug, Clone)]
struct TrackerSession {
    /// Inputs in append order.
    inputs: Vec<TrackedInput>,
    /// Session creation moment.
    created_at: OffsetDateTime,
    /// Last capture moment.
    last_activity: OffsetDateTime,
}

// ============================================================================
// SECTION: Consumed History
// ============================================================================

/// Terminal status of a tracker session.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumedStatus {
    /// Session was consumed into a decision.
    Consumed,
    /// Session expired without being consumed.
    Expired,
}

/// Audit record for a consumed or expired session.
///
/// # Invariants
/// - `inputs_summary` holds at most ten items of at most eighty characters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumedRecord {
    /// Scope key of the session.
    pub key: String,
    /// RFC 3339 moment the session ended.
    pub consumed_at: String,
    /// Number of inputs in the session at the end.
    pub input_count: usize,
    /// Agent component parsed from the key, when present.
    pub agent_id: Option<String>,
    /// Decision component parsed from the key, when present.
    pub decision_id: Option<String>,
    /// Terminal status.
    pub status: ConsumedStatus,
    /// Truncated input texts.
    pub inputs_summary: Vec<String>,
    /// Decision id backfilled after a successful record.
    pub recorded_decision_id: Option<String>,
}

// ============================================================================
// SECTION: Debug Snapshot
// ============================================================================

/// Snapshot of one active session for the debug surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Scope key.
    pub key: String,
    /// Number of non-expired inputs.
    pub input_count: usize,
    /// Session creation moment, RFC 3339.
    pub created_at: String,
    /// Last activity moment, RFC 3339.
    pub last_activity: String,
    /// Per-input snapshots.
    pub inputs: Vec<InputSnapshot>,
}

/// Snapshot of one tracked input.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSnapshot {
    /// Input id.
    pub id: String,
    /// Input kind label.
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Age in seconds at snapshot time.
    pub age_seconds: i64,
    /// Truncated input text.
    pub text: String,
}

/// Full debug view of the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerDebug {
    /// Active sessions, optionally filtered by key.
    pub sessions: Vec<SessionSnapshot>,
    /// Total active sessions before filtering.
    pub session_count: usize,
    /// Consumed ring, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed: Option<Vec<ConsumedRecord>>,
}

// ============================================================================
// SECTION: Tracker
// ============================================================================

/// Tracker configuration.
///
/// # Invariants
/// - TTLs are positive; zero disables nothing and is rejected at config load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    /// TTL for individual inputs, seconds.
    pub input_ttl_secs: u64,
    /// TTL for idle sessions, seconds.
    pub session_ttl_secs: u64,
    /// Consumed ring capacity.
    pub consumed_history_size: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            input_ttl_secs: DEFAULT_INPUT_TTL_SECS,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            consumed_history_size: DEFAULT_CONSUMED_HISTORY,
        }
    }
}

/// Internal mutable tracker state.
#[derive(Debug, Default)]
struct TrackerState {
    /// Active sessions by key.
    sessions: BTreeMap<String, TrackerSession>,
    /// Consumed/expired session ring.
    consumed: VecDeque<ConsumedRecord>,
}

/// Process-wide deliberation tracker.
///
/// Shared across dispatcher entry points and protected by one mutex. Every
/// public operation is fail-open where the spec requires capture never to
/// disturb the primary flow.
pub struct DeliberationTracker {
    /// Mutable session and ring state.
    state: Mutex<TrackerState>,
    /// TTL and capacity configuration.
    config: TrackerConfig,
    /// Wall clock.
    clock: Box<dyn TrackerClock>,
}

impl std::fmt::Debug for DeliberationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliberationTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeliberationTracker {
    /// Creates a tracker with the system clock.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemTrackerClock))
    }

    /// Creates a tracker with an injected clock.
    #[must_use]
    pub fn with_clock(config: TrackerConfig, clock: Box<dyn TrackerClock>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            config,
            clock,
        }
    }

    // ------------------------------------------------------------------
    // Capture operations (fail-open)
    // ------------------------------------------------------------------

    /// Registers a raw input under a key. Fail-open.
    pub fn track(&self, key: &TrackerKey, input: TrackedInput) {
        let now = self.clock.now();
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if rand::thread_rng().gen_bool(CLEANUP_PROBABILITY) {
            Self::cleanup_locked(
                &mut state,
                now,
                self.config.session_ttl_secs,
                self.config.consumed_history_size,
            );
        }
        let session = state
            .sessions
            .entry(key.as_str().to_string())
            .or_insert_with(|| TrackerSession {
                inputs: Vec::new(),
                created_at: now,
                last_activity: now,
            });
        session.inputs.push(input);
        session.last_activity = now;
    }

    /// Tracks a similarity query with its top results. Fail-open.
    pub fn track_query(
        &self,
        key: &TrackerKey,
        query: &str,
        result_count: usize,
        retrieval_mode: &str,
        top_results: &[Value],
    ) {
        let now = self.clock.now();
        self.track(
            key,
            TrackedInput {
                id: fresh_id(InputType::Query),
                input_type: InputType::Query,
                text: format!(
                    "Queried '{}': {result_count} results ({retrieval_mode})",
                    truncate(query, 50)
                ),
                source: "cstp:queryDecisions".to_string(),
                timestamp: now,
                raw: json!({
                    "query": query,
                    "result_count": result_count,
                    "retrieval_mode": retrieval_mode,
                    "top_results": top_results.iter().take(5).collect::<Vec<_>>(),
                }),
            },
        );
    }

    /// Tracks a guardrail check. Fail-open.
    pub fn track_guardrail(
        &self,
        key: &TrackerKey,
        description: &str,
        allowed: bool,
        violation_count: usize,
    ) {
        let now = self.clock.now();
        let status = if allowed {
            "allowed".to_string()
        } else {
            format!("blocked ({violation_count} violations)")
        };
        self.track(
            key,
            TrackedInput {
                id: fresh_id(InputType::Guardrail),
                input_type: InputType::Guardrail,
                text: format!("Checked '{}': {status}", truncate(description, 50)),
                source: "cstp:checkGuardrails".to_string(),
                timestamp: now,
                raw: json!({
                    "description": description,
                    "allowed": allowed,
                    "violation_count": violation_count,
                }),
            },
        );
    }

    /// Tracks a decision lookup. Fail-open.
    pub fn track_lookup(&self, key: &TrackerKey, decision_id: &str, title: &str) {
        let now = self.clock.now();
        self.track(
            key,
            TrackedInput {
                id: fresh_id(InputType::Lookup),
                input_type: InputType::Lookup,
                text: format!("Retrieved decision {decision_id}: {}", truncate(title, 50)),
                source: "cstp:getDecision".to_string(),
                timestamp: now,
                raw: json!({ "decision_id": decision_id, "title": title }),
            },
        );
    }

    /// Tracks a reason-stats read. Fail-open.
    pub fn track_stats(
        &self,
        key: &TrackerKey,
        total_decisions: usize,
        reason_type_count: usize,
        diversity: Option<f64>,
    ) {
        let now = self.clock.now();
        let diversity_str =
            diversity.map_or_else(String::new, |d| format!(", diversity={d:.2}"));
        self.track(
            key,
            TrackedInput {
                id: fresh_id(InputType::Stats),
                input_type: InputType::Stats,
                text: format!(
                    "Reviewed reason stats: {reason_type_count} types, {total_decisions} decisions{diversity_str}"
                ),
                source: "cstp:getReasonStats".to_string(),
                timestamp: now,
                raw: json!({
                    "total_decisions": total_decisions,
                    "reason_type_count": reason_type_count,
                    "diversity": diversity,
                }),
            },
        );
    }

    /// Tracks a free-form reasoning step. Fail-open.
    ///
    /// Returns the tracked input id for acknowledgment.
    pub fn track_reasoning(&self, key: &TrackerKey, text: &str) -> String {
        let now = self.clock.now();
        let id = fresh_id(InputType::Reasoning);
        self.track(
            key,
            TrackedInput {
                id: id.clone(),
                input_type: InputType::Reasoning,
                text: text.to_string(),
                source: "cstp:recordThought".to_string(),
                timestamp: now,
                raw: json!({ "text": text }),
            },
        );
        id
    }

    // ------------------------------------------------------------------
    // Read and consume
    // ------------------------------------------------------------------

    /// Peeks at non-expired inputs without consuming the session.
    #[must_use]
    pub fn get_inputs(&self, key: &TrackerKey) -> Vec<TrackedInput> {
        let now = self.clock.now();
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        state.sessions.get(key.as_str()).map_or_else(Vec::new, |session| {
            session
                .inputs
                .iter()
                .filter(|i| !self.input_expired(i, now))
                .cloned()
                .collect()
        })
    }

    /// Extracts related decisions from tracked query results without
    /// consuming the session.
    ///
    /// Deduplicates by id and sorts by distance ascending.
    #[must_use]
    pub fn extract_related(&self, key: &TrackerKey) -> Vec<RelatedDecision> {
        let mut seen: BTreeMap<String, RelatedDecision> = BTreeMap::new();
        for input in self.get_inputs(key) {
            if input.input_type != InputType::Query {
                continue;
            }
            let Some(top_results) = input.raw.get("top_results").and_then(Value::as_array) else {
                continue;
            };
            for result in top_results {
                let Some(id) = result.get("id").and_then(Value::as_str) else {
                    continue;
                };
                if id.is_empty() || seen.contains_key(id) {
                    continue;
                }
                seen.insert(
                    id.to_string(),
                    RelatedDecision {
                        id: id.to_string(),
                        summary: result
                            .get("summary")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        distance: result
                            .get("distance")
                            .and_then(Value::as_f64)
                            .unwrap_or(0.0),
                    },
                );
            }
        }
        let mut related: Vec<RelatedDecision> = seen.into_values().collect();
        related.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        related
    }

    /// Consumes a session into a deliberation and records it in the ring.
    ///
    /// Returns `None` when nothing non-expired was tracked under the key.
    #[must_use]
    pub fn consume(&self, key: &TrackerKey) -> Option<Deliberation> {
        let now = self.clock.now();
        let session = {
            let Ok(mut state) = self.state.lock() else {
                return None;
            };
            let session = state.sessions.remove(key.as_str())?;
            let record = Self::consumed_record(key.as_str(), &session, now, ConsumedStatus::Consumed);
            Self::push_consumed(&mut state, record, self.config.consumed_history_size);
            session
        };

        let valid: Vec<TrackedInput> = session
            .inputs
            .into_iter()
            .filter(|i| !self.input_expired(i, now))
            .collect();
        if valid.is_empty() {
            return None;
        }
        Some(build_deliberation(&valid))
    }

    /// Attaches a recorded decision id to the most recent unfilled
    /// consumed record for the key. Idempotent.
    pub fn backfill_consumed(&self, key: &TrackerKey, decision_id: &str) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        for record in state.consumed.iter_mut().rev() {
            if record.key == key.as_str() && record.recorded_decision_id.is_none() {
                record.recorded_decision_id = Some(decision_id.to_string());
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Cleanup and debug
    // ------------------------------------------------------------------

    /// Evicts idle sessions, recording them as expired.
    ///
    /// Returns the number of sessions evicted.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        Self::cleanup_locked(
            &mut state,
            now,
            self.config.session_ttl_secs,
            self.config.consumed_history_size,
        )
    }

    /// Number of active sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    /// Debug snapshot of active sessions and, optionally, the consumed ring.
    ///
    /// Also runs a deterministic cleanup of expired sessions first.
    #[must_use]
    pub fn debug_sessions(&self, key: Option<&str>, include_consumed: bool) -> TrackerDebug {
        let now = self.clock.now();
        let Ok(mut state) = self.state.lock() else {
            return TrackerDebug {
                sessions: Vec::new(),
                session_count: 0,
                consumed: include_consumed.then(Vec::new),
            };
        };
        Self::cleanup_locked(
            &mut state,
            now,
            self.config.session_ttl_secs,
            self.config.consumed_history_size,
        );

        let session_count = state.sessions.len();
        let sessions = state
            .sessions
            .iter()
            .filter(|(session_key, _)| key.is_none_or(|k| k == session_key.as_str()))
            .map(|(session_key, session)| SessionSnapshot {
                key: session_key.clone(),
                input_count: session
                    .inputs
                    .iter()
                    .filter(|i| !self.input_expired(i, now))
                    .count(),
                created_at: format_rfc3339(session.created_at),
                last_activity: format_rfc3339(session.last_activity),
                inputs: session
                    .inputs
                    .iter()
                    .map(|input| InputSnapshot {
                        id: input.id.clone(),
                        input_type: input.input_type,
                        age_seconds: (now - input.timestamp).whole_seconds(),
                        text: truncate(&input.text, SUMMARY_MAX_CHARS),
                    })
                    .collect(),
            })
            .collect();

        TrackerDebug {
            sessions,
            session_count,
            consumed: include_consumed.then(|| state.consumed.iter().cloned().collect()),
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    /// Whether an input has outlived the input TTL (age == TTL is expired).
    fn input_expired(&self, input: &TrackedInput, now: OffsetDateTime) -> bool {
        let age = now - input.timestamp;
        age.whole_seconds() >= i64::try_from(self.config.input_ttl_secs).unwrap_or(i64::MAX)
    }

    /// Evicts idle sessions under the lock; returns the eviction count.
    fn cleanup_locked(
        state: &mut TrackerState,
        now: OffsetDateTime,
        session_ttl_secs: u64,
        history_size: usize,
    ) -> usize {
        let ttl = i64::try_from(session_ttl_secs).unwrap_or(i64::MAX);
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, s)| (now - s.last_activity).whole_seconds() >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            if let Some(session) = state.sessions.remove(key) {
                let record = Self::consumed_record(key, &session, now, ConsumedStatus::Expired);
                Self::push_consumed(state, record, history_size);
            }
        }
        expired.len()
    }

    /// Builds a consumed-ring record for a finished session.
    fn consumed_record(
        key: &str,
        session: &TrackerSession,
        now: OffsetDateTime,
        status: ConsumedStatus,
    ) -> ConsumedRecord {
        let tracker_key = TrackerKey::new(key);
        ConsumedRecord {
            key: key.to_string(),
            consumed_at: format_rfc3339(now),
            input_count: session.inputs.len(),
            agent_id: tracker_key.agent_component().map(str::to_string),
            decision_id: tracker_key.decision_component().map(str::to_string),
            status,
            inputs_summary: session
                .inputs
                .iter()
                .take(SUMMARY_MAX_ITEMS)
                .map(|i| truncate(&i.text, SUMMARY_MAX_CHARS))
                .collect(),
            recorded_decision_id: None,
        }
    }

    /// Pushes to the bounded consumed ring.
    fn push_consumed(state: &mut TrackerState, record: ConsumedRecord, capacity: usize) {
        state.consumed.push_back(record);
        while state.consumed.len() > capacity {
            state.consumed.pop_front();
        }
    }
}

// ============================================================================
// SECTION: Deliberation Synthesis
// ============================================================================

/// Builds a deliberation from tracked inputs, one synthesized step each.
fn build_deliberation(inputs: &[TrackedInput]) -> Deliberation {
    let delib_inputs: Vec<DeliberationInput> = inputs
        .iter()
        .map(|input| DeliberationInput {
            id: input.id.clone(),
            text: input.text.clone(),
            source: input.source.clone(),
            timestamp: Some(format_rfc3339(input.timestamp)),
        })
        .collect();

    let steps: Vec<DeliberationStep> = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| DeliberationStep {
            step: u32::try_from(index + 1).unwrap_or(u32::MAX),
            thought: input.text.clone(),
            inputs_used: vec![input.id.clone()],
            timestamp: Some(format_rfc3339(input.timestamp)),
            duration_ms: None,
            step_type: Some(input.input_type.step_type()),
            conclusion: false,
        })
        .collect();

    let total_duration_ms = match (inputs.first(), inputs.last()) {
        (Some(first), Some(last)) if inputs.len() >= 2 => {
            let span = last.timestamp - first.timestamp;
            u64::try_from(span.whole_milliseconds()).ok()
        }
        _ => None,
    };

    Deliberation {
        inputs: delib_inputs,
        steps,
        total_duration_ms,
        convergence_point: None,
    }
}

/// Consumes tracked inputs and merges them with an explicit deliberation.
///
/// Returns the resulting deliberation and whether auto-capture contributed.
#[must_use]
pub fn auto_attach_deliberation(
    tracker: &DeliberationTracker,
    key: &TrackerKey,
    explicit: Option<Deliberation>,
) -> (Option<Deliberation>, bool) {
    let Some(auto) = tracker.consume(key) else {
        return (explicit, false);
    };
    match explicit {
        Some(mut deliberation) if deliberation.has_content() => {
            deliberation.merge_auto(auto);
            (Some(deliberation), true)
        }
        _ => (Some(auto), true),
    }
}

/// Generates a fresh prefixed input id.
fn fresh_id(input_type: InputType) -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!(
        "{}-{:02x}{:02x}{:02x}{:02x}",
        input_type.id_prefix(),
        bytes[0],
        bytes[1],
        bytes[2],
        bytes[3]
    )
}

/// Truncates a string to `max` characters.
fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use time::OffsetDateTime;
    use time::macros::datetime;

    use crate::core::decision::Deliberation;
    use crate::core::identifiers::AgentId;
    use crate::core::identifiers::TrackerKey;

    use super::ConsumedStatus;
    use super::DeliberationTracker;
    use super::TrackerClock;
    use super::TrackerConfig;
    use super::auto_attach_deliberation;

    /// Manually advanced wall clock.
    struct ManualClock {
        /// Current moment.
        now: Arc<Mutex<OffsetDateTime>>,
    }

    impl TrackerClock for ManualClock {
        fn now(&self) -> OffsetDateTime {
            self.now.lock().map(|n| *n).unwrap_or(OffsetDateTime::UNIX_EPOCH)
        }
    }

    fn tracker_at(start: OffsetDateTime) -> (DeliberationTracker, Arc<Mutex<OffsetDateTime>>) {
        let handle = Arc::new(Mutex::new(start));
        let clock = ManualClock {
            now: Arc::clone(&handle),
        };
        (
            DeliberationTracker::with_clock(TrackerConfig::default(), Box::new(clock)),
            handle,
        )
    }

    fn advance(handle: &Arc<Mutex<OffsetDateTime>>, seconds: i64) {
        if let Ok(mut now) = handle.lock() {
            *now += time::Duration::seconds(seconds);
        }
    }

    const START: OffsetDateTime = datetime!(2026-02-15 12:00:00 UTC);

    fn key() -> TrackerKey {
        TrackerKey::compose(&AgentId::new("claude"), None, None)
    }

    #[test]
    fn consume_returns_inputs_in_append_order() {
        let (tracker, _) = tracker_at(START);
        let key = key();
        tracker.track_query(&key, "caching strategy", 3, "semantic", &[]);
        tracker.track_guardrail(&key, "deploy cache", true, 0);
        tracker.track_reasoning(&key, "cache invalidation is the risk");

        let deliberation = tracker.consume(&key);
        let Some(deliberation) = deliberation else {
            return assert!(deliberation.is_some());
        };
        assert_eq!(deliberation.inputs.len(), 3);
        assert!(deliberation.inputs[0].id.starts_with("q-"));
        assert!(deliberation.inputs[1].id.starts_with("g-"));
        assert!(deliberation.inputs[2].id.starts_with("r-"));
        assert_eq!(deliberation.steps.len(), 3);
        assert_eq!(deliberation.steps[2].step, 3);

        // Session is gone after consume.
        assert!(tracker.consume(&key).is_none());
    }

    #[test]
    fn input_at_exact_ttl_is_excluded() {
        let (tracker, handle) = tracker_at(START);
        let key = key();
        tracker.track_reasoning(&key, "early thought");
        advance(&handle, 300);
        tracker.track_reasoning(&key, "late thought");

        let deliberation = tracker.consume(&key);
        let Some(deliberation) = deliberation else {
            return assert!(deliberation.is_some());
        };
        assert_eq!(deliberation.inputs.len(), 1);
        assert_eq!(deliberation.inputs[0].text, "late thought");
    }

    #[test]
    fn total_duration_spans_first_to_last_input() {
        let (tracker, handle) = tracker_at(START);
        let key = key();
        tracker.track_reasoning(&key, "first");
        advance(&handle, 2);
        tracker.track_reasoning(&key, "second");

        let deliberation = tracker.consume(&key);
        let Some(deliberation) = deliberation else {
            return assert!(deliberation.is_some());
        };
        assert_eq!(deliberation.total_duration_ms, Some(2_000));
    }

    #[test]
    fn explicit_deliberation_merges_and_renumbers() {
        let (tracker, _) = tracker_at(START);
        let key = key();
        tracker.track_query(&key, "q1", 1, "semantic", &[]);
        tracker.track_guardrail(&key, "g1", true, 0);

        let mut explicit = Deliberation::default();
        explicit.inputs.push(crate::core::decision::DeliberationInput {
            id: "manual".to_string(),
            text: "manual input".to_string(),
            source: "client".to_string(),
            timestamp: None,
        });
        let _ = explicit.append_thought("manual step", None);

        let (merged, auto) = auto_attach_deliberation(&tracker, &key, Some(explicit));
        assert!(auto);
        let Some(merged) = merged else {
            return assert!(merged.is_some());
        };
        assert_eq!(merged.inputs.len(), 3);
        assert!(merged.steps.len() >= 2);
        assert_eq!(merged.steps[0].step, 1);
        assert_eq!(merged.steps[1].step, 2);
    }

    #[test]
    fn session_ttl_evicts_and_records_expired() {
        let (tracker, handle) = tracker_at(START);
        let key = key();
        tracker.track_reasoning(&key, "will expire");
        advance(&handle, 1_800);

        let evicted = tracker.cleanup_expired();
        assert_eq!(evicted, 1);
        assert_eq!(tracker.session_count(), 0);

        let debug = tracker.debug_sessions(None, true);
        let consumed = debug.consumed.unwrap_or_default();
        assert_eq!(consumed.len(), 1);
        assert_eq!(consumed[0].status, ConsumedStatus::Expired);
        assert_eq!(consumed[0].input_count, 1);
    }

    #[test]
    fn backfill_sets_only_the_first_unfilled_record() {
        let (tracker, _) = tracker_at(START);
        let key = key();
        tracker.track_reasoning(&key, "one");
        let _ = tracker.consume(&key);
        tracker.track_reasoning(&key, "two");
        let _ = tracker.consume(&key);

        tracker.backfill_consumed(&key, "deadbeef");
        tracker.backfill_consumed(&key, "cafebabe");

        let debug = tracker.debug_sessions(None, true);
        let consumed = debug.consumed.unwrap_or_default();
        assert_eq!(consumed.len(), 2);
        // Most recent unfilled record is filled first; idempotent second call
        // fills the remaining one.
        assert_eq!(consumed[1].recorded_decision_id.as_deref(), Some("deadbeef"));
        assert_eq!(consumed[0].recorded_decision_id.as_deref(), Some("cafebabe"));
    }

    #[test]
    fn consumed_ring_is_bounded() {
        let config = TrackerConfig {
            consumed_history_size: 3,
            ..TrackerConfig::default()
        };
        let handle = Arc::new(Mutex::new(START));
        let tracker = DeliberationTracker::with_clock(
            config,
            Box::new(ManualClock {
                now: Arc::clone(&handle),
            }),
        );
        for i in 0..5 {
            let key = TrackerKey::new(format!("agent:a{i}"));
            tracker.track_reasoning(&key, "x");
            let _ = tracker.consume(&key);
        }
        let debug = tracker.debug_sessions(None, true);
        assert_eq!(debug.consumed.unwrap_or_default().len(), 3);
    }

    #[test]
    fn extract_related_dedupes_and_sorts_by_distance() {
        let (tracker, _) = tracker_at(START);
        let key = key();
        tracker.track_query(
            &key,
            "q",
            2,
            "semantic",
            &[
                serde_json::json!({ "id": "bbbb1111", "summary": "far", "distance": 0.8 }),
                serde_json::json!({ "id": "aaaa2222", "summary": "near", "distance": 0.2 }),
            ],
        );
        tracker.track_query(
            &key,
            "q2",
            1,
            "semantic",
            &[serde_json::json!({ "id": "aaaa2222", "summary": "near again", "distance": 0.3 })],
        );

        let related = tracker.extract_related(&key);
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].id, "aaaa2222");
        assert!((related[0].distance - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn debug_filters_by_key_and_reports_ages() {
        let (tracker, handle) = tracker_at(START);
        let key_a = TrackerKey::new("agent:a");
        let key_b = TrackerKey::new("agent:b");
        tracker.track_reasoning(&key_a, "thought a");
        tracker.track_reasoning(&key_b, "thought b");
        advance(&handle, 10);

        let debug = tracker.debug_sessions(Some("agent:a"), false);
        assert_eq!(debug.session_count, 2);
        assert_eq!(debug.sessions.len(), 1);
        assert_eq!(debug.sessions[0].inputs[0].age_seconds, 10);
        assert!(debug.consumed.is_none());
    }
}
