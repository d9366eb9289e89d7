// crates/cstp-core/src/guardrails.rs
// ============================================================================
// Module: Guardrail Evaluator
// Description: Declarative YAML guardrails evaluated against action contexts.
// Purpose: Produce warn/block verdicts with rendered messages and audit entries.
// Dependencies: crate::interfaces, serde, serde_json, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! A guardrail is parsed from YAML into conditions (`condition_<field>`),
//! requirements (`requires_<field>`), an optional scope list, an action
//! (warn or block), and a message template supporting `{field}` substitution
//! from the evaluation context. A guardrail with conditions but no
//! requirements is a pure violation when its conditions match. Every
//! evaluation emits a structured audit entry.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::enums::GuardrailAction;
use crate::interfaces::AuditEvent;
use crate::interfaces::AuditSink;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Guardrail loading errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum GuardrailError {
    /// A guardrail file failed to parse.
    #[error("guardrail file parse error: {0}")]
    Parse(String),
    /// Guardrail directory I/O failure.
    #[error("guardrail io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Conditions
// ============================================================================

/// Comparison operator for guardrail conditions.
///
/// # Invariants
/// - Variants are stable for serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Greater than.
    Gt,
    /// Less than or equal.
    Lte,
    /// Greater than or equal.
    Gte,
}

/// One applicability condition on a context field.
///
/// # Invariants
/// - A missing context field never satisfies a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailCondition {
    /// Context field name.
    pub field: String,
    /// Comparison operator.
    pub op: ConditionOp,
    /// Expected value.
    pub value: Value,
}

impl GuardrailCondition {
    /// Evaluates the condition against a context.
    #[must_use]
    pub fn evaluate(&self, context: &Map<String, Value>) -> bool {
        let Some(actual) = context.get(&self.field) else {
            return false;
        };
        match self.op {
            ConditionOp::Eq => json_eq(actual, &self.value),
            ConditionOp::Ne => !json_eq(actual, &self.value),
            ConditionOp::Lt => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_lt()),
            ConditionOp::Gt => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_gt()),
            ConditionOp::Lte => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_le()),
            ConditionOp::Gte => numeric_cmp(actual, &self.value).is_some_and(|o| o.is_ge()),
        }
    }
}

/// Loose equality that compares numbers numerically.
fn json_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return (x - y).abs() < f64::EPSILON;
    }
    a == b
}

/// Numeric comparison; `None` when either side is non-numeric.
fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    let x = as_f64(a)?;
    let y = as_f64(b)?;
    x.partial_cmp(&y)
}

/// Coerces a JSON value to a float (numbers and numeric strings).
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// SECTION: Requirements
// ============================================================================

/// One requirement that must hold for the action to pass.
///
/// `expected` may be a literal or a comparator string like `">= 0.5"`.
///
/// # Invariants
/// - A missing context field fails the requirement with a `Missing` message.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailRequirement {
    /// Context field name.
    pub field: String,
    /// Expected literal or comparator string.
    pub expected: Value,
}

impl GuardrailRequirement {
    /// Checks the requirement against a context.
    ///
    /// Returns `(passed, failure_message)`; the message is empty on success.
    #[must_use]
    pub fn check(&self, context: &Map<String, Value>) -> (bool, String) {
        let Some(actual) = context.get(&self.field) else {
            return (false, format!("Missing: {}", self.field));
        };

        let passed = match &self.expected {
            Value::Bool(expected) => actual.as_bool() == Some(*expected),
            Value::String(expected) if starts_with_comparator(expected) => {
                check_comparator(expected, actual)
            }
            expected => json_eq(actual, expected),
        };

        if passed {
            (true, String::new())
        } else {
            (
                false,
                format!(
                    "{}: expected {}, got {}",
                    self.field,
                    render_value(&self.expected),
                    render_value(actual)
                ),
            )
        }
    }
}

/// Whether a string begins with a comparison operator.
fn starts_with_comparator(value: &str) -> bool {
    let trimmed = value.trim_start();
    trimmed.starts_with(">=")
        || trimmed.starts_with("<=")
        || trimmed.starts_with('>')
        || trimmed.starts_with('<')
}

/// Evaluates a comparator string like `">= 0.5"` against a value.
fn check_comparator(expected: &str, actual: &Value) -> bool {
    let trimmed = expected.trim();
    let (op, rest) = if let Some(rest) = trimmed.strip_prefix(">=") {
        (ConditionOp::Gte, rest)
    } else if let Some(rest) = trimmed.strip_prefix("<=") {
        (ConditionOp::Lte, rest)
    } else if let Some(rest) = trimmed.strip_prefix('>') {
        (ConditionOp::Gt, rest)
    } else if let Some(rest) = trimmed.strip_prefix('<') {
        (ConditionOp::Lt, rest)
    } else {
        return false;
    };
    let Ok(threshold) = rest.trim().parse::<f64>() else {
        return false;
    };
    let Some(value) = as_f64(actual) else {
        return false;
    };
    match op {
        ConditionOp::Gte => value >= threshold,
        ConditionOp::Lte => value <= threshold,
        ConditionOp::Gt => value > threshold,
        ConditionOp::Lt => value < threshold,
        ConditionOp::Eq | ConditionOp::Ne => false,
    }
}

/// Renders a JSON value for failure messages without quoting strings.
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Guardrail Definition
// ============================================================================

/// A declarative guardrail.
///
/// # Invariants
/// - `id` is unique across loaded files; later duplicates are dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Guardrail {
    /// Guardrail identifier.
    pub id: String,
    /// Human-readable description.
    pub description: String,
    /// Applicability conditions.
    pub conditions: Vec<GuardrailCondition>,
    /// Requirements checked when the guardrail applies.
    pub requirements: Vec<GuardrailRequirement>,
    /// Project scope restriction; empty means all projects.
    pub scope: Vec<String>,
    /// Enforcement action.
    pub action: GuardrailAction,
    /// Message template with `{field}` placeholders.
    pub message: String,
}

impl Guardrail {
    /// Whether the guardrail applies to the context (scope and conditions).
    #[must_use]
    pub fn applies_to(&self, context: &Map<String, Value>) -> bool {
        if !self.scope.is_empty() {
            let project = context
                .get("project")
                .or_else(|| context.get("scope"))
                .and_then(Value::as_str);
            if let Some(project) = project {
                if !project.is_empty() && !self.scope.iter().any(|s| s == project) {
                    return false;
                }
            }
        }
        self.conditions.iter().all(|c| c.evaluate(context))
    }

    /// Evaluates the guardrail, returning a failure when it fires.
    ///
    /// `None` means the guardrail did not apply or all requirements passed.
    #[must_use]
    pub fn evaluate(&self, context: &Map<String, Value>) -> Option<GuardrailResult> {
        if !self.applies_to(context) {
            return None;
        }

        if self.requirements.is_empty() {
            // Condition match with no requirements is itself a violation.
            let message = self.render_message(context, &[]);
            return Some(self.result(message));
        }

        let mut failed: Vec<String> = Vec::new();
        for requirement in &self.requirements {
            let (passed, message) = requirement.check(context);
            if !passed {
                failed.push(message);
            }
        }
        if failed.is_empty() {
            return None;
        }
        let message = self.render_message(context, &failed);
        Some(self.result(message))
    }

    /// Renders the message template with `{field}` substitution.
    fn render_message(&self, context: &Map<String, Value>, failed: &[String]) -> String {
        let mut message = if self.message.is_empty() {
            if failed.is_empty() {
                format!("Guardrail {} triggered", self.id)
            } else {
                format!("{}: {}", self.id, failed.join("; "))
            }
        } else {
            self.message.clone()
        };
        for (key, value) in context {
            message = message.replace(&format!("{{{key}}}"), &render_value(value));
        }
        message
    }

    /// Builds the failure result for this guardrail.
    fn result(&self, message: String) -> GuardrailResult {
        GuardrailResult {
            guardrail_id: self.id.clone(),
            name: if self.description.is_empty() {
                self.id.clone()
            } else {
                self.description.clone()
            },
            message,
            action: self.action,
        }
    }
}

// ============================================================================
// SECTION: Evaluation Results
// ============================================================================

/// One fired guardrail.
///
/// # Invariants
/// - `action` determines whether the aggregate evaluation is blocked.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailResult {
    /// Guardrail identifier.
    pub guardrail_id: String,
    /// Guardrail description or id.
    pub name: String,
    /// Rendered failure message.
    pub message: String,
    /// Enforcement action.
    pub action: GuardrailAction,
}

/// Aggregate of a full guardrail evaluation.
///
/// # Invariants
/// - `allowed` is false exactly when at least one `block` result fired.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    /// Whether no blocking guardrail fired.
    pub allowed: bool,
    /// Blocking failures.
    pub violations: Vec<GuardrailResult>,
    /// Non-blocking failures.
    pub warnings: Vec<GuardrailResult>,
    /// Number of guardrails evaluated.
    pub evaluated: usize,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Loaded guardrail set with evaluation and audit.
#[derive(Debug, Default)]
pub struct GuardrailRegistry {
    /// Guardrails in load order, deduplicated by id.
    guardrails: Vec<Guardrail>,
}

impl GuardrailRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from pre-parsed guardrails, deduplicating by id.
    #[must_use]
    pub fn from_guardrails(guardrails: Vec<Guardrail>) -> Self {
        let mut seen: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        let mut unique = Vec::with_capacity(guardrails.len());
        for guardrail in guardrails {
            if seen.insert(guardrail.id.clone()) {
                unique.push(guardrail);
            }
        }
        Self { guardrails: unique }
    }

    /// Parses one YAML document of guardrail definitions.
    ///
    /// The document may be a list or a single mapping.
    ///
    /// # Errors
    ///
    /// Returns [`GuardrailError::Parse`] when the YAML is malformed.
    pub fn parse_yaml(content: &str) -> Result<Vec<Guardrail>, GuardrailError> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| GuardrailError::Parse(e.to_string()))?;
        let items = match value {
            serde_yaml::Value::Sequence(items) => items,
            serde_yaml::Value::Null => Vec::new(),
            single => vec![single],
        };
        let mut guardrails = Vec::with_capacity(items.len());
        for item in items {
            if let serde_yaml::Value::Mapping(mapping) = item {
                guardrails.push(parse_guardrail(&mapping)?);
            }
        }
        Ok(guardrails)
    }

    /// Guardrails currently loaded, in order.
    #[must_use]
    pub fn guardrails(&self) -> &[Guardrail] {
        &self.guardrails
    }

    /// Evaluates every guardrail against a context and audits the check.
    #[must_use]
    pub fn evaluate(
        &self,
        context: &Map<String, Value>,
        requesting_agent: &str,
        action_description: &str,
        audit: &dyn AuditSink,
        timestamp: String,
    ) -> EvaluationResult {
        let mut violations: Vec<GuardrailResult> = Vec::new();
        let mut warnings: Vec<GuardrailResult> = Vec::new();

        for guardrail in &self.guardrails {
            if let Some(result) = guardrail.evaluate(context) {
                match result.action {
                    GuardrailAction::Block => violations.push(result),
                    GuardrailAction::Warn => warnings.push(result),
                }
            }
        }

        let allowed = violations.is_empty();
        audit.record(AuditEvent {
            timestamp,
            event: "guardrail_check".to_string(),
            detail: json!({
                "requesting_agent": requesting_agent,
                "action": action_description,
                "allowed": allowed,
                "violations": violations.iter().map(|v| v.guardrail_id.clone()).collect::<Vec<_>>(),
                "evaluated": self.guardrails.len(),
            }),
        });

        EvaluationResult {
            allowed,
            violations,
            warnings,
            evaluated: self.guardrails.len(),
        }
    }
}

/// Parses one guardrail mapping.
fn parse_guardrail(mapping: &serde_yaml::Mapping) -> Result<Guardrail, GuardrailError> {
    let mut id = "unknown".to_string();
    let mut description = String::new();
    let mut conditions = Vec::new();
    let mut requirements = Vec::new();
    let mut scope = Vec::new();
    let mut action = GuardrailAction::Warn;
    let mut message = String::new();

    for (key, value) in mapping {
        let Some(key) = key.as_str() else { continue };
        match key {
            "id" => id = yaml_to_string(value),
            "description" => description = yaml_to_string(value),
            "action" => {
                action = if yaml_to_string(value) == "block" {
                    GuardrailAction::Block
                } else {
                    GuardrailAction::Warn
                };
            }
            "message" => message = yaml_to_string(value),
            "scope" => scope = yaml_to_string_list(value),
            _ => {
                if let Some(field) = key.strip_prefix("condition_") {
                    conditions.push(parse_condition(field, value)?);
                } else if let Some(field) = key.strip_prefix("requires_") {
                    requirements.push(GuardrailRequirement {
                        field: field.to_string(),
                        expected: yaml_to_json(value)?,
                    });
                }
            }
        }
    }

    Ok(Guardrail {
        id,
        description,
        conditions,
        requirements,
        scope,
        action,
        message,
    })
}

/// Parses a condition value, recognizing comparator prefixes.
fn parse_condition(field: &str, value: &serde_yaml::Value) -> Result<GuardrailCondition, GuardrailError> {
    if let Some(text) = value.as_str() {
        let trimmed = text.trim();
        let parsed = [
            (">=", ConditionOp::Gte),
            ("<=", ConditionOp::Lte),
            ("==", ConditionOp::Eq),
            ("!=", ConditionOp::Ne),
            (">", ConditionOp::Gt),
            ("<", ConditionOp::Lt),
        ]
        .iter()
        .find_map(|(prefix, op)| trimmed.strip_prefix(prefix).map(|rest| (*op, rest.trim())));
        if let Some((op, rest)) = parsed {
            let value = rest
                .parse::<f64>()
                .ok()
                .and_then(|n| serde_json::Number::from_f64(n).map(Value::Number))
                .unwrap_or_else(|| Value::String(rest.to_string()));
            return Ok(GuardrailCondition {
                field: field.to_string(),
                op,
                value,
            });
        }
    }
    Ok(GuardrailCondition {
        field: field.to_string(),
        op: ConditionOp::Eq,
        value: yaml_to_json(value)?,
    })
}

/// Converts a YAML scalar to its string rendering.
fn yaml_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Converts a YAML value to a string list (scalar becomes a singleton).
fn yaml_to_string_list(value: &serde_yaml::Value) -> Vec<String> {
    match value {
        serde_yaml::Value::Sequence(items) => items.iter().map(yaml_to_string).collect(),
        other => vec![yaml_to_string(other)],
    }
}

/// Converts a YAML value to JSON.
fn yaml_to_json(value: &serde_yaml::Value) -> Result<Value, GuardrailError> {
    serde_json::to_value(value).map_err(|e| GuardrailError::Parse(e.to_string()))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use serde_json::Value;
    use serde_json::json;

    use crate::core::enums::GuardrailAction;
    use crate::interfaces::NoopAuditSink;

    use super::GuardrailRegistry;

    fn context(entries: &[(&str, Value)]) -> Map<String, Value> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    const RULES: &str = r"
- id: high-stakes-confidence
  description: High stakes decisions need confidence
  condition_stakes: high
  requires_confidence: '>= 0.7'
  action: block
  message: 'Confidence {confidence} too low for {stakes} stakes'
- id: security-review
  description: Security changes warn without review
  condition_category: security
  requires_reviewed: true
  action: warn
- id: no-critical-friday
  description: Critical decisions on Fridays are a violation
  condition_stakes: critical
  condition_weekday: friday
  action: block
";

    #[test]
    fn requirement_failure_blocks_and_renders_template() -> Result<(), super::GuardrailError> {
        let registry = GuardrailRegistry::from_guardrails(GuardrailRegistry::parse_yaml(RULES)?);
        let ctx = context(&[
            ("stakes", json!("high")),
            ("confidence", json!(0.5)),
            ("category", json!("process")),
        ]);
        let result = registry.evaluate(&ctx, "claude", "deploy", &NoopAuditSink, String::new());
        assert!(!result.allowed);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].message, "Confidence 0.5 too low for high stakes");
        assert_eq!(result.evaluated, 3);
        Ok(())
    }

    #[test]
    fn passing_requirements_allow_the_action() -> Result<(), super::GuardrailError> {
        let registry = GuardrailRegistry::from_guardrails(GuardrailRegistry::parse_yaml(RULES)?);
        let ctx = context(&[("stakes", json!("high")), ("confidence", json!(0.9))]);
        let result = registry.evaluate(&ctx, "claude", "deploy", &NoopAuditSink, String::new());
        assert!(result.allowed);
        assert!(result.violations.is_empty());
        Ok(())
    }

    #[test]
    fn missing_requirement_field_warns() -> Result<(), super::GuardrailError> {
        let registry = GuardrailRegistry::from_guardrails(GuardrailRegistry::parse_yaml(RULES)?);
        let ctx = context(&[("category", json!("security"))]);
        let result = registry.evaluate(&ctx, "claude", "patch", &NoopAuditSink, String::new());
        assert!(result.allowed);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].action, GuardrailAction::Warn);
        assert!(result.warnings[0].message.contains("Missing: reviewed"));
        Ok(())
    }

    #[test]
    fn conditions_without_requirements_are_pure_violations() -> Result<(), super::GuardrailError> {
        let registry = GuardrailRegistry::from_guardrails(GuardrailRegistry::parse_yaml(RULES)?);
        let ctx = context(&[("stakes", json!("critical")), ("weekday", json!("friday"))]);
        let result = registry.evaluate(&ctx, "claude", "release", &NoopAuditSink, String::new());
        assert!(!result.allowed);
        assert_eq!(result.violations[0].guardrail_id, "no-critical-friday");
        Ok(())
    }

    #[test]
    fn scope_restricts_to_listed_projects() -> Result<(), super::GuardrailError> {
        let scoped = "
- id: repo-only
  description: Applies to one repo
  scope: [acme/api]
  condition_stakes: low
  action: block
";
        let registry = GuardrailRegistry::from_guardrails(GuardrailRegistry::parse_yaml(scoped)?);
        let outside = context(&[("stakes", json!("low")), ("project", json!("acme/web"))]);
        assert!(registry.evaluate(&outside, "a", "x", &NoopAuditSink, String::new()).allowed);

        let inside = context(&[("stakes", json!("low")), ("project", json!("acme/api"))]);
        assert!(!registry.evaluate(&inside, "a", "x", &NoopAuditSink, String::new()).allowed);
        Ok(())
    }

    #[test]
    fn duplicate_ids_are_dropped() -> Result<(), super::GuardrailError> {
        let duplicated = "
- id: same
  condition_stakes: low
  action: warn
- id: same
  condition_stakes: high
  action: block
";
        let registry =
            GuardrailRegistry::from_guardrails(GuardrailRegistry::parse_yaml(duplicated)?);
        assert_eq!(registry.guardrails().len(), 1);
        Ok(())
    }
}
