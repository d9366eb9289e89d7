// crates/cstp-core/src/core/decision.rs
// ============================================================================
// Module: CSTP Decision Records
// Description: The decision record and its owned sub-entities.
// Purpose: Model the persisted decision document with explicit optionality.
// Dependencies: crate::core::{enums, identifiers}, serde
// ============================================================================

//! ## Overview
//! A decision record is the central entity: it owns its reasons, its
//! deliberation trace, and its optional bridge-definition. Every optional
//! attribute is an explicit `Option` field so the on-disk YAML round-trips
//! without loss; fields unknown to this version are preserved in `extra`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::core::enums::Category;
use crate::core::enums::DecisionStatus;
use crate::core::enums::MentalState;
use crate::core::enums::Outcome;
use crate::core::enums::ReasonType;
use crate::core::enums::Stakes;
use crate::core::identifiers::DecisionId;

// ============================================================================
// SECTION: Reasons
// ============================================================================

/// A reason supporting a decision.
///
/// # Invariants
/// - `strength` is within `[0, 1]`; validation happens at the request boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    /// Reasoning type.
    #[serde(rename = "type")]
    pub reason_type: ReasonType,
    /// Free-form reason text.
    pub text: String,
    /// Strength of the reason in `[0, 1]`.
    #[serde(default = "default_strength")]
    pub strength: f64,
}

/// Default reason strength used when the client omits it.
const fn default_strength() -> f64 {
    0.8
}

// ============================================================================
// SECTION: Bridge Definitions
// ============================================================================

/// Abstract structure/function pair attached to a decision.
///
/// # Invariants
/// - Serialization round-trips to an equal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BridgeDefinition {
    /// What the decision looks like as an abstract pattern.
    pub structure: String,
    /// What problem the abstract pattern solves.
    pub function: String,
    /// Constraints the decision enforces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enforcement: Vec<String>,
    /// Failure modes the decision prevents.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prevention: Vec<String>,
    /// Conditions the decision tolerates.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerance: Vec<String>,
}

impl BridgeDefinition {
    /// Whether either face of the bridge carries content.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.structure.trim().is_empty() || !self.function.trim().is_empty()
    }
}

/// Method used to derive a bridge-definition.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeMethod {
    /// Rule-based abstraction only.
    Rule,
    /// Language-model abstraction only.
    Llm,
    /// Language-model abstraction with a rule-based comparison run.
    Both,
    /// No bridge could be derived.
    None,
}

impl BridgeMethod {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rule => "rule",
            Self::Llm => "llm",
            Self::Both => "both",
            Self::None => "none",
        }
    }
}

// ============================================================================
// SECTION: Deliberation Traces
// ============================================================================

/// One captured input that informed a decision.
///
/// # Invariants
/// - `id` is unique within the owning trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliberationInput {
    /// Input identifier referenced by steps.
    pub id: String,
    /// Human-readable input text.
    pub text: String,
    /// Source label, e.g. `cstp:queryDecisions`.
    pub source: String,
    /// RFC 3339 capture timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// One reasoning step in a deliberation trace.
///
/// # Invariants
/// - Every id in `inputs_used` exists in the owning trace's input list.
/// - `step` numbers are unique and ascending within a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliberationStep {
    /// Ordinal step number, 1-based.
    pub step: u32,
    /// Thought text for this step.
    pub thought: String,
    /// Input ids this step used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs_used: Vec<String>,
    /// RFC 3339 step timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Step duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Optional reasoning type of the step.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub step_type: Option<ReasonType>,
    /// Whether this step concluded the deliberation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub conclusion: bool,
}

/// Serde helper skipping `false` booleans.
#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde skip_serializing_if signature")]
const fn is_false(value: &bool) -> bool {
    !*value
}

/// A deliberation trace: parallel ordered inputs and steps.
///
/// # Invariants
/// - Every input id referenced from a step exists in `inputs`.
/// - `total_duration_ms` spans first to last input when two or more exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Deliberation {
    /// Captured inputs in append order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<DeliberationInput>,
    /// Reasoning steps in ordinal order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<DeliberationStep>,
    /// Total duration from first to last input, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration_ms: Option<u64>,
    /// Step number at which the deliberation converged, if identified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convergence_point: Option<u32>,
}

impl Deliberation {
    /// Whether the trace carries any inputs or steps.
    #[must_use]
    pub fn has_content(&self) -> bool {
        !self.inputs.is_empty() || !self.steps.is_empty()
    }

    /// Validates that every step references only known input ids.
    ///
    /// Returns the unknown ids in reference order, empty when consistent.
    #[must_use]
    pub fn unknown_input_refs(&self) -> Vec<String> {
        let known: BTreeSet<&str> = self.inputs.iter().map(|i| i.id.as_str()).collect();
        let mut unknown = Vec::new();
        for step in &self.steps {
            for id in &step.inputs_used {
                if !known.contains(id.as_str()) && !unknown.contains(id) {
                    unknown.push(id.clone());
                }
            }
        }
        unknown
    }

    /// Merges an auto-captured trace into this explicit trace.
    ///
    /// Auto inputs are appended when their id is not already present; auto
    /// steps are renumbered to follow the existing steps.
    pub fn merge_auto(&mut self, auto: Self) {
        let existing: BTreeSet<String> = self.inputs.iter().map(|i| i.id.clone()).collect();
        for input in auto.inputs {
            if !existing.contains(&input.id) {
                self.inputs.push(input);
            }
        }
        let max_step = self.steps.iter().map(|s| s.step).max().unwrap_or(0);
        for mut step in auto.steps {
            step.step += max_step;
            self.steps.push(step);
        }
        if self.total_duration_ms.is_none() {
            self.total_duration_ms = auto.total_duration_ms;
        }
    }

    /// Appends a free-form thought as the next step.
    ///
    /// Returns the assigned step number.
    pub fn append_thought(&mut self, text: impl Into<String>, timestamp: Option<String>) -> u32 {
        let next = self.steps.iter().map(|s| s.step).max().unwrap_or(0) + 1;
        self.steps.push(DeliberationStep {
            step: next,
            thought: text.into(),
            inputs_used: Vec::new(),
            timestamp,
            duration_ms: None,
            step_type: None,
            conclusion: false,
        });
        next
    }
}

// ============================================================================
// SECTION: Pre-Decision Protocol
// ============================================================================

/// Record of the pre-decision protocol having been followed.
///
/// # Invariants
/// - Flags describe what the client actually ran, not what it should have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PreDecisionProtocol {
    /// Whether a similarity query was run first.
    #[serde(default, alias = "queryRun")]
    pub query_run: bool,
    /// How many similar decisions the query found.
    #[serde(default, alias = "similarFound")]
    pub similar_found: u32,
    /// Whether guardrails were checked.
    #[serde(default, alias = "guardrailsChecked")]
    pub guardrails_checked: bool,
    /// Whether guardrails passed.
    #[serde(default, alias = "guardrailsPassed")]
    pub guardrails_passed: bool,
}

// ============================================================================
// SECTION: Related Decisions
// ============================================================================

/// Reference to a similar prior decision surfaced during deliberation.
///
/// # Invariants
/// - `distance` is the vector distance at capture time (closer is smaller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedDecision {
    /// Related decision identifier.
    pub id: String,
    /// Short summary of the related decision.
    #[serde(default)]
    pub summary: String,
    /// Vector distance at capture time.
    #[serde(default)]
    pub distance: f64,
}

// ============================================================================
// SECTION: Decision Record
// ============================================================================

/// The persisted decision document.
///
/// # Invariants
/// - `id` matches the 8-hex identifier embedded in the file name.
/// - Reviews mutate only `status`, `outcome`, `actual_result`, `lessons`,
///   `affected_kpis`, `reviewed_at`, and `reviewed_by`.
/// - Raw records are never deleted; compaction shapes query output only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Decision identifier (8 hex chars).
    pub id: DecisionId,
    /// Human summary (mirrors `decision` on creation).
    pub summary: String,
    /// Free-form decision text.
    pub decision: String,
    /// Decision category.
    pub category: Category,
    /// Stated confidence in `[0, 1]`.
    pub confidence: f64,
    /// Stakes level.
    pub stakes: Stakes,
    /// Lifecycle status.
    pub status: DecisionStatus,
    /// RFC 3339 creation timestamp.
    pub date: String,
    /// Optional free-form context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Optional abstract pattern name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Tags for filtering and auto-linking.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Project linkage (`owner/repo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Feature linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Pull-request linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<i64>,
    /// KPI indicators the decision should move.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kpi_indicators: Vec<String>,
    /// Mental state at decision time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mental_state: Option<MentalState>,
    /// Date by which the outcome should be reviewed (`YYYY-MM-DD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_by: Option<String>,
    /// Agent that recorded the decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded_by: Option<String>,
    /// Ordered reasons supporting the decision.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<Reason>,
    /// Pre-decision protocol record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_decision: Option<PreDecisionProtocol>,
    /// Similar decisions surfaced during deliberation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_to: Vec<RelatedDecision>,
    /// Bridge-definition for cross-domain similarity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BridgeDefinition>,
    /// Deliberation trace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliberation: Option<Deliberation>,
    /// Immunity to compaction.
    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve: bool,
    /// Review outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// What actually happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_result: Option<String>,
    /// Lessons learned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lessons: Option<String>,
    /// KPIs the outcome affected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub affected_kpis: Vec<String>,
    /// RFC 3339 review timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
    /// Reviewer agent id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    /// Fields from newer or foreign writers, preserved verbatim on rewrite.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl DecisionRecord {
    /// Numeric outcome value when reviewed.
    #[must_use]
    pub fn outcome_value(&self) -> Option<f64> {
        self.outcome.map(Outcome::value)
    }

    /// Whether the record has been reviewed with an outcome.
    #[must_use]
    pub fn is_reviewed(&self) -> bool {
        self.status == DecisionStatus::Reviewed && self.outcome.is_some()
    }

    /// Distinct reason types used by this decision.
    #[must_use]
    pub fn reason_types(&self) -> BTreeSet<ReasonType> {
        self.reasons.iter().map(|r| r.reason_type).collect()
    }

    /// Builds the embedding document for this record.
    ///
    /// Combines decision, context, category, reasons, tags, bridge faces,
    /// and review outcome fields when present.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![format!("Decision: {}", self.decision)];
        if let Some(context) = &self.context {
            parts.push(format!("Context: {context}"));
        }
        parts.push(format!("Category: {}", self.category));
        if !self.reasons.is_empty() {
            let reasons: Vec<&str> = self.reasons.iter().map(|r| r.text.as_str()).collect();
            parts.push(format!("Reasons: {}", reasons.join(" | ")));
        }
        if !self.tags.is_empty() {
            parts.push(format!("Tags: {}", self.tags.join(", ")));
        }
        if let Some(bridge) = &self.bridge {
            if !bridge.structure.is_empty() {
                parts.push(format!("Structure: {}", bridge.structure));
            }
            if !bridge.function.is_empty() {
                parts.push(format!("Function: {}", bridge.function));
            }
        }
        if let Some(outcome) = self.outcome {
            parts.push(format!("Outcome: {outcome}"));
        }
        if let Some(lessons) = &self.lessons {
            parts.push(format!("Lessons: {lessons}"));
        }
        parts.join("\n")
    }

    /// Builds the text indexed for keyword search.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        let mut parts = vec![self.summary.clone(), self.decision.clone()];
        if let Some(context) = &self.context {
            parts.push(context.clone());
        }
        parts.push(self.category.as_str().to_string());
        parts.extend(self.tags.iter().cloned());
        for reason in &self.reasons {
            parts.push(reason.text.clone());
            parts.push(reason.reason_type.as_str().to_string());
        }
        parts.join(" ")
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::BridgeDefinition;
    use super::Deliberation;
    use super::DeliberationInput;
    use super::DeliberationStep;

    fn input(id: &str) -> DeliberationInput {
        DeliberationInput {
            id: id.to_string(),
            text: format!("input {id}"),
            source: "test".to_string(),
            timestamp: None,
        }
    }

    fn step(number: u32, uses: &[&str]) -> DeliberationStep {
        DeliberationStep {
            step: number,
            thought: format!("step {number}"),
            inputs_used: uses.iter().map(|s| (*s).to_string()).collect(),
            timestamp: None,
            duration_ms: None,
            step_type: None,
            conclusion: false,
        }
    }

    #[test]
    fn bridge_round_trips_through_serde() -> Result<(), serde_json::Error> {
        let bridge = BridgeDefinition {
            structure: "Replaced a component with another".to_string(),
            function: "Reduces coupling".to_string(),
            enforcement: vec!["single owner".to_string()],
            prevention: vec!["split-brain writes".to_string()],
            tolerance: vec!["stale reads".to_string()],
        };
        let value = serde_json::to_value(&bridge)?;
        let back: BridgeDefinition = serde_json::from_value(value)?;
        assert_eq!(back, bridge);
        Ok(())
    }

    #[test]
    fn unknown_input_refs_reports_missing_ids() {
        let trace = Deliberation {
            inputs: vec![input("a"), input("b")],
            steps: vec![step(1, &["a"]), step(2, &["b", "ghost"])],
            total_duration_ms: None,
            convergence_point: None,
        };
        assert_eq!(trace.unknown_input_refs(), vec!["ghost".to_string()]);
    }

    #[test]
    fn merge_auto_renumbers_steps_and_dedupes_inputs() {
        let mut explicit = Deliberation {
            inputs: vec![input("manual")],
            steps: vec![step(1, &["manual"])],
            total_duration_ms: None,
            convergence_point: None,
        };
        let auto = Deliberation {
            inputs: vec![input("manual"), input("q-1")],
            steps: vec![step(1, &["q-1"])],
            total_duration_ms: Some(1200),
            convergence_point: None,
        };
        explicit.merge_auto(auto);
        assert_eq!(explicit.inputs.len(), 2);
        assert_eq!(explicit.steps.len(), 2);
        assert_eq!(explicit.steps[1].step, 2);
        assert_eq!(explicit.total_duration_ms, Some(1200));
    }

    #[test]
    fn append_thought_assigns_next_step_number() {
        let mut trace = Deliberation::default();
        assert_eq!(trace.append_thought("first", None), 1);
        assert_eq!(trace.append_thought("second", None), 2);
        assert_eq!(trace.steps.len(), 2);
    }
}
