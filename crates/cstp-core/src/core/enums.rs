// crates/cstp-core/src/core/enums.rs
// ============================================================================
// Module: CSTP Domain Enumerations
// Description: Closed vocabularies for decisions, reasons, outcomes, and gates.
// Purpose: Provide stable wire forms and validation for categorical fields.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every categorical decision attribute is a closed enum with a stable
//! snake_case wire form. Validation of client input happens by parsing into
//! these enums; invalid members surface as field-naming validation errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Decision Attributes
// ============================================================================

/// Decision category.
///
/// # Invariants
/// - Variants are stable for serialization and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Architectural decisions.
    Architecture,
    /// Process and workflow decisions.
    Process,
    /// Integration decisions.
    Integration,
    /// Tooling decisions.
    Tooling,
    /// Security decisions.
    Security,
}

impl Category {
    /// All categories, in canonical order.
    pub const ALL: [Self; 5] = [
        Self::Architecture,
        Self::Process,
        Self::Integration,
        Self::Tooling,
        Self::Security,
    ];

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Process => "process",
            Self::Integration => "integration",
            Self::Tooling => "tooling",
            Self::Security => "security",
        }
    }

    /// Parses a wire label into a category.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stakes level of a decision.
///
/// # Invariants
/// - Ordering reflects escalation: low < medium < high < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stakes {
    /// Low stakes.
    Low,
    /// Medium stakes.
    Medium,
    /// High stakes.
    High,
    /// Critical stakes.
    Critical,
}

impl Stakes {
    /// All stakes levels, in escalation order.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parses a wire label into a stakes level.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }
}

impl fmt::Display for Stakes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision lifecycle status.
///
/// # Invariants
/// - A decision is created `pending` and transitions once to `reviewed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Awaiting an outcome review.
    Pending,
    /// Reviewed with a recorded outcome.
    Reviewed,
}

impl DecisionStatus {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reviewed => "reviewed",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reviewed decision outcome.
///
/// # Invariants
/// - Variants are stable; numeric outcome values are defined by
///   [`Outcome::value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The decision worked as expected.
    Success,
    /// The decision partially worked.
    Partial,
    /// The decision failed.
    Failure,
    /// The decision was abandoned before resolution.
    Abandoned,
}

impl Outcome {
    /// All outcomes, in canonical order.
    pub const ALL: [Self; 4] = [Self::Success, Self::Partial, Self::Failure, Self::Abandoned];

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failure => "failure",
            Self::Abandoned => "abandoned",
        }
    }

    /// Parses a wire label into an outcome.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.as_str() == value)
    }

    /// Numeric outcome value used by accuracy and Brier arithmetic.
    ///
    /// success = 1.0, partial = 0.5, failure = abandoned = 0.0.
    #[must_use]
    pub const fn value(self) -> f64 {
        match self {
            Self::Success => 1.0,
            Self::Partial => 0.5,
            Self::Failure | Self::Abandoned => 0.0,
        }
    }

    /// Whether the outcome counts as a failure for circuit breakers.
    #[must_use]
    pub const fn is_breaker_failure(self) -> bool {
        matches!(self, Self::Failure | Self::Abandoned)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reasoning type backing a decision reason.
///
/// # Invariants
/// - The set is the canonical reason-type vocabulary; never-used types are
///   reported by reason statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonType {
    /// First-principles analysis.
    Analysis,
    /// Recognized pattern from prior work.
    Pattern,
    /// Authoritative source or precedent.
    Authority,
    /// Gut feeling.
    Intuition,
    /// Empirical measurement.
    Empirical,
    /// Analogy to a similar situation.
    Analogy,
    /// Elimination of alternatives.
    Elimination,
    /// External constraint.
    Constraint,
}

impl ReasonType {
    /// All reason types, in canonical order.
    pub const ALL: [Self; 8] = [
        Self::Analysis,
        Self::Pattern,
        Self::Authority,
        Self::Intuition,
        Self::Empirical,
        Self::Analogy,
        Self::Elimination,
        Self::Constraint,
    ];

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Pattern => "pattern",
            Self::Authority => "authority",
            Self::Intuition => "intuition",
            Self::Empirical => "empirical",
            Self::Analogy => "analogy",
            Self::Elimination => "elimination",
            Self::Constraint => "constraint",
        }
    }

    /// Parses a wire label into a reason type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == value)
    }
}

impl fmt::Display for ReasonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mental state at decision time.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentalState {
    /// Careful, deliberate reasoning.
    Deliberate,
    /// Reacting under time pressure.
    Reactive,
    /// Exploring options without commitment.
    Exploratory,
    /// Habitual, low-attention choice.
    Habitual,
    /// Pressured by external forces.
    Pressured,
}

impl MentalState {
    /// All mental states, in canonical order.
    pub const ALL: [Self; 5] = [
        Self::Deliberate,
        Self::Reactive,
        Self::Exploratory,
        Self::Habitual,
        Self::Pressured,
    ];

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deliberate => "deliberate",
            Self::Reactive => "reactive",
            Self::Exploratory => "exploratory",
            Self::Habitual => "habitual",
            Self::Pressured => "pressured",
        }
    }

    /// Parses a wire label into a mental state.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == value)
    }
}

// ============================================================================
// SECTION: Graph Edges
// ============================================================================

/// Typed directional relation between two decisions.
///
/// # Invariants
/// - Variants are stable for serialization; cycles across edges are legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Source supersedes target.
    Supersedes,
    /// Source is related to target.
    RelatedTo,
    /// Source duplicates target.
    Duplicates,
    /// Source reverses target.
    Reverses,
    /// Source extends target.
    Extends,
    /// Source contradicts target.
    Contradicts,
    /// Source requires target.
    Requires,
}

impl EdgeType {
    /// All edge types, in canonical order.
    pub const ALL: [Self; 7] = [
        Self::Supersedes,
        Self::RelatedTo,
        Self::Duplicates,
        Self::Reverses,
        Self::Extends,
        Self::Contradicts,
        Self::Requires,
    ];

    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Supersedes => "supersedes",
            Self::RelatedTo => "related_to",
            Self::Duplicates => "duplicates",
            Self::Reverses => "reverses",
            Self::Extends => "extends",
            Self::Contradicts => "contradicts",
            Self::Requires => "requires",
        }
    }

    /// Parses a wire label into an edge type.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == value)
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge traversal direction.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Follow outgoing edges only.
    Out,
    /// Follow incoming edges only.
    In,
    /// Follow edges in both directions.
    #[default]
    Both,
}

impl Direction {
    /// Parses a wire label into a direction.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "out" => Some(Self::Out),
            "in" => Some(Self::In),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Retrieval and Compaction
// ============================================================================

/// Retrieval mode for decision queries.
///
/// # Invariants
/// - Invalid modes silently fall back to [`RetrievalMode::Semantic`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Embedding similarity search.
    #[default]
    Semantic,
    /// BM25 keyword search.
    Keyword,
    /// Weighted fusion of semantic and keyword scores.
    Hybrid,
    /// List-all mode for empty queries.
    List,
}

impl RetrievalMode {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Hybrid => "hybrid",
            Self::List => "list",
        }
    }

    /// Parses a wire label, falling back to semantic for unknown values.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "keyword" => Self::Keyword,
            "hybrid" => Self::Hybrid,
            _ => Self::Semantic,
        }
    }
}

/// Which face of a bridge-definition to bias a semantic query toward.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeSide {
    /// Bias toward the structural face.
    Structure,
    /// Bias toward the functional face.
    Function,
}

impl BridgeSide {
    /// Parses a wire label into a bridge side.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "structure" => Some(Self::Structure),
            "function" => Some(Self::Function),
            _ => None,
        }
    }

    /// Prefix prepended to the embedding query for directional search.
    #[must_use]
    pub const fn query_prefix(self) -> &'static str {
        match self {
            Self::Structure => "Structure: ",
            Self::Function => "Function: ",
        }
    }
}

/// Compaction level derived from decision age and status.
///
/// # Invariants
/// - Ordering follows age: full < summary < digest < wisdom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompactionLevel {
    /// Every field is returned.
    #[default]
    Full,
    /// Decision, outcome, pattern, and confidence fields only.
    Summary,
    /// Decision plus a one-line summary.
    Digest,
    /// Never returned individually; contributes to aggregates only.
    Wisdom,
}

impl CompactionLevel {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Summary => "summary",
            Self::Digest => "digest",
            Self::Wisdom => "wisdom",
        }
    }

    /// Parses a wire label into a level.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Self::Full),
            "summary" => Some(Self::Summary),
            "digest" => Some(Self::Digest),
            "wisdom" => Some(Self::Wisdom),
            _ => None,
        }
    }
}

impl fmt::Display for CompactionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Guardrails and Priorities
// ============================================================================

/// Guardrail enforcement action.
///
/// # Invariants
/// - `block` failures make the aggregate evaluation disallowed; `warn` does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailAction {
    /// Surface a warning without blocking.
    #[default]
    Warn,
    /// Block the action.
    Block,
}

impl GuardrailAction {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Block => "block",
        }
    }
}

/// Priority of a ready-queue action.
///
/// # Invariants
/// - Ordering reflects urgency: low < medium < high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low priority.
    #[default]
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl Priority {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses a wire label into a priority.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Numeric rank used by ready-queue ordering.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::Category;
    use super::Outcome;
    use super::ReasonType;
    use super::RetrievalMode;

    #[test]
    fn category_round_trips_through_labels() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.as_str()), Some(category));
        }
        assert_eq!(Category::parse("databases"), None);
    }

    #[test]
    fn outcome_values_follow_the_fixed_mapping() {
        assert!((Outcome::Success.value() - 1.0).abs() < f64::EPSILON);
        assert!((Outcome::Partial.value() - 0.5).abs() < f64::EPSILON);
        assert!(Outcome::Failure.value().abs() < f64::EPSILON);
        assert!(Outcome::Abandoned.value().abs() < f64::EPSILON);
        assert!(Outcome::Abandoned.is_breaker_failure());
        assert!(!Outcome::Partial.is_breaker_failure());
    }

    #[test]
    fn unknown_retrieval_mode_falls_back_to_semantic() {
        assert_eq!(RetrievalMode::parse_lenient("vector"), RetrievalMode::Semantic);
        assert_eq!(RetrievalMode::parse_lenient("hybrid"), RetrievalMode::Hybrid);
    }

    #[test]
    fn reason_type_vocabulary_is_complete() {
        assert_eq!(ReasonType::ALL.len(), 8);
        assert_eq!(ReasonType::parse("empirical"), Some(ReasonType::Empirical));
        assert_eq!(ReasonType::parse("vibes"), None);
    }
}
