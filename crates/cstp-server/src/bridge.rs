// crates/cstp-server/src/bridge.rs
// ============================================================================
// Module: Bridge Resolution
// Description: Rule-based abstraction and the rule/LLM resolution chain.
// Purpose: Derive a bridge-definition for records that arrive without one.
// Dependencies: cstp-core, cstp-providers
// ============================================================================

//! ## Overview
//! When a record carries no bridge, the server derives one. The rule-based
//! abstractor strips specifics (numbers, versions, dates, file paths,
//! CamelCase names) and generalizes operational verbs; the LLM path asks
//! an external model with a 10-second deadline. Mode `both` prefers the
//! LLM result and keeps rule-based as fallback. The engine records which
//! of rule / llm / both / none produced the bridge; failure at every stage
//! is a non-error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::BridgeDefinition;
use cstp_core::BridgeMethod;
use cstp_core::Reason;
use cstp_core::ReasonType;
use cstp_providers::BridgePromptFields;
use cstp_providers::LlmBridge;

// ============================================================================
// SECTION: Mode
// ============================================================================

/// Bridge extraction mode.
///
/// # Invariants
/// - Unknown mode strings fall back to `Rule`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeMode {
    /// Rule-based abstraction only.
    #[default]
    Rule,
    /// LLM abstraction only.
    Llm,
    /// LLM primary with rule-based fallback.
    Both,
}

impl BridgeMode {
    /// Parses a mode label leniently.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "llm" => Self::Llm,
            "both" => Self::Both,
            _ => Self::Rule,
        }
    }
}

// ============================================================================
// SECTION: Inputs
// ============================================================================

/// Fields the abstractors read from a record request.
#[derive(Debug, Clone, Default)]
pub struct BridgeSource<'a> {
    /// Decision text.
    pub decision: &'a str,
    /// Optional context.
    pub context: Option<&'a str>,
    /// Optional pattern (already abstract).
    pub pattern: Option<&'a str>,
    /// Reasons supporting the decision.
    pub reasons: &'a [Reason],
}

// ============================================================================
// SECTION: Rule-Based Abstraction
// ============================================================================

/// Minimum useful length for an abstracted fragment.
const MIN_FRAGMENT_LEN: usize = 10;

/// Verb generalizations applied after stripping.
const VERB_GENERALIZATIONS: &[(&str, &str)] = &[
    ("increased", "adjusted"),
    ("decreased", "adjusted"),
    ("changed", "modified"),
    ("switched", "replaced"),
    ("migrated", "transitioned"),
    ("upgraded", "updated"),
    ("downgraded", "reverted"),
    ("fixed", "corrected"),
    ("patched", "corrected"),
    ("deployed", "released"),
    ("shipped", "released"),
    ("merged", "integrated"),
    ("added", "introduced"),
    ("removed", "eliminated"),
    ("deleted", "eliminated"),
    ("refactored", "restructured"),
    ("extracted", "separated"),
    ("moved", "relocated"),
    ("renamed", "relabeled"),
];

/// Strips specifics from text, leaving the abstract shape.
///
/// Order matters: composite patterns (PR references, sized quantities,
/// versions, dates) go before the bare-number sweep.
#[must_use]
pub fn strip_specifics(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut tokens = text.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        // "PR #123" / "PR 123" collapses to "a PR".
        if token.eq_ignore_ascii_case("pr") {
            if let Some(next) = tokens.peek() {
                if next.starts_with('#') || next.chars().all(|c| c.is_ascii_digit()) {
                    let _ = tokens.next();
                    words.push("a PR".to_string());
                    continue;
                }
            }
        }
        words.push(strip_token(token));
    }
    let joined = words.join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips one token to its abstract form.
fn strip_token(token: &str) -> String {
    let trimmed = token.trim_end_matches(['.', ',', ';', ':', '!', '?']);
    let suffix = &token[trimmed.len()..];

    // Issue references vanish.
    if trimmed.starts_with('#') && trimmed.len() > 1 && trimmed[1..].chars().all(|c| c.is_ascii_digit()) {
        return String::new();
    }
    // Dates become a placeholder.
    if is_date_like(trimmed) {
        return format!("DATE{suffix}");
    }
    // Versions normalize.
    if is_version_like(trimmed) {
        return format!("vX.Y{suffix}");
    }
    // Sized or timed quantities normalize.
    if let Some(unit) = quantity_unit(trimmed) {
        return format!("N {unit}{suffix}");
    }
    // Bare numbers normalize.
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return format!("N{suffix}");
    }
    // File paths become a placeholder.
    if trimmed.contains('/') && trimmed.contains('.') && !trimmed.contains("://") {
        return format!("a file{suffix}");
    }
    // CamelCase component names become a placeholder.
    if is_camel_case(trimmed) {
        return format!("a component{suffix}");
    }
    // Backticked spans become a placeholder.
    if trimmed.starts_with('`') && trimmed.ends_with('`') && trimmed.len() > 2 {
        return format!("a component{suffix}");
    }
    token.to_string()
}

/// `YYYY-MM-DD`.
fn is_date_like(token: &str) -> bool {
    let bytes = token.as_bytes();
    token.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && token
            .chars()
            .enumerate()
            .all(|(i, c)| matches!(i, 4 | 7) || c.is_ascii_digit())
}

/// `1.2`, `v1.2.3`.
fn is_version_like(token: &str) -> bool {
    let body = token.strip_prefix('v').unwrap_or(token);
    let mut dots = 0;
    let mut digits = 0;
    for ch in body.chars() {
        if ch == '.' {
            dots += 1;
        } else if ch.is_ascii_digit() {
            digits += 1;
        } else {
            return false;
        }
    }
    dots >= 1 && digits >= 2
}

/// Unit placeholder for time and size quantities like `30s` or `512MB`.
fn quantity_unit(token: &str) -> Option<&'static str> {
    let digits_end = token.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    if digits_end == 0 {
        return None;
    }
    match &token[digits_end..] {
        "s" | "ms" | "seconds" | "minutes" | "hours" => Some("time-units"),
        "MB" | "GB" | "KB" | "bytes" => Some("size-units"),
        _ => None,
    }
}

/// Multi-hump CamelCase identifiers.
fn is_camel_case(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_uppercase() {
        return false;
    }
    let rest: Vec<char> = chars.collect();
    let has_lower = rest.iter().any(char::is_ascii_lowercase);
    let has_inner_upper = rest.iter().any(char::is_ascii_uppercase);
    has_lower && has_inner_upper && rest.iter().all(|c| c.is_ascii_alphanumeric())
}

/// Replaces operational verbs with their generalizations.
#[must_use]
pub fn generalize_verbs(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let trimmed = word.trim_end_matches(['.', ',', ';', ':', '!', '?']);
            let lower = trimmed.to_lowercase();
            let trailing = &word[trimmed.len()..];
            VERB_GENERALIZATIONS
                .iter()
                .find(|(from, _)| *from == lower)
                .map_or_else(
                    || word.to_string(),
                    |(_, to)| {
                        let replacement = if word.starts_with(char::is_uppercase) {
                            let mut chars = to.chars();
                            chars.next().map_or_else(String::new, |c| {
                                c.to_uppercase().collect::<String>() + chars.as_str()
                            })
                        } else {
                            (*to).to_string()
                        };
                        format!("{replacement}{trailing}")
                    },
                )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Rule-based bridge abstraction.
///
/// Structure comes from the abstracted decision text; function prefers the
/// pattern field, then the best analysis/constraint/pattern reason, then
/// the first context sentence.
#[must_use]
pub fn rule_based_bridge(source: &BridgeSource<'_>) -> Option<BridgeDefinition> {
    let mut structure = String::new();
    if !source.decision.is_empty() {
        let abstracted = generalize_verbs(&strip_specifics(source.decision));
        if abstracted.len() > MIN_FRAGMENT_LEN {
            structure = abstracted;
        }
    }

    let mut function = String::new();
    if let Some(pattern) = source.pattern {
        if !pattern.is_empty() {
            function = pattern.to_string();
        }
    }
    if function.is_empty() {
        for reason in source.reasons {
            if matches!(
                reason.reason_type,
                ReasonType::Analysis | ReasonType::Constraint | ReasonType::Pattern
            ) {
                let candidate = strip_specifics(&reason.text);
                if candidate.len() > MIN_FRAGMENT_LEN {
                    function = generalize_verbs(&candidate);
                    break;
                }
            }
        }
    }
    if function.is_empty() {
        if let Some(context) = source.context {
            if let Some(sentence) = context.split(['.', '!']).next() {
                let candidate = strip_specifics(sentence);
                if candidate.len() > MIN_FRAGMENT_LEN {
                    function = generalize_verbs(&candidate);
                }
            }
        }
    }

    if structure.is_empty() && function.is_empty() {
        return None;
    }
    Some(BridgeDefinition {
        structure: if structure.is_empty() {
            function.clone()
        } else {
            structure.clone()
        },
        function: if function.is_empty() { structure } else { function },
        enforcement: Vec::new(),
        prevention: Vec::new(),
        tolerance: Vec::new(),
    })
}

// ============================================================================
// SECTION: Resolution Chain
// ============================================================================

/// Resolves a bridge per the configured mode.
///
/// Returns the derived bridge and the method that produced it. Every
/// failure path is a non-error resolving to `(None, BridgeMethod::None)`.
pub async fn resolve_bridge(
    mode: BridgeMode,
    source: &BridgeSource<'_>,
    llm: &dyn LlmBridge,
) -> (Option<BridgeDefinition>, BridgeMethod) {
    match mode {
        BridgeMode::Rule => rule_based_bridge(source)
            .map_or((None, BridgeMethod::None), |b| (Some(b), BridgeMethod::Rule)),
        BridgeMode::Llm => {
            let fields = prompt_fields(source);
            llm.extract(&fields)
                .await
                .map_or((None, BridgeMethod::None), |b| (Some(b), BridgeMethod::Llm))
        }
        BridgeMode::Both => {
            let fields = prompt_fields(source);
            match llm.extract(&fields).await {
                Some(bridge) => (Some(bridge), BridgeMethod::Both),
                None => rule_based_bridge(source)
                    .map_or((None, BridgeMethod::None), |b| (Some(b), BridgeMethod::Rule)),
            }
        }
    }
}

/// Renders prompt fields for the LLM path.
fn prompt_fields(source: &BridgeSource<'_>) -> BridgePromptFields {
    BridgePromptFields {
        decision: source.decision.to_string(),
        context: source.context.unwrap_or_default().to_string(),
        reasons: source
            .reasons
            .iter()
            .map(|r| format!("{}: {}", r.reason_type, r.text))
            .collect::<Vec<_>>()
            .join(" | "),
        pattern: source.pattern.unwrap_or_default().to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::BridgeMethod;
    use cstp_core::Reason;
    use cstp_core::ReasonType;
    use cstp_providers::DisabledLlmBridge;

    use super::BridgeMode;
    use super::BridgeSource;
    use super::generalize_verbs;
    use super::resolve_bridge;
    use super::rule_based_bridge;
    use super::strip_specifics;

    #[test]
    fn stripping_removes_numbers_versions_and_names() {
        assert_eq!(
            strip_specifics("Upgraded RedisCache to v2.4.1 in PR #512"),
            "Upgraded a component to vX.Y in a PR"
        );
        assert_eq!(strip_specifics("timeout of 30s and 512MB"), "timeout of N time-units and N size-units");
        assert_eq!(strip_specifics("released on 2026-01-15"), "released on DATE");
        assert_eq!(strip_specifics("edited src/main.rs today"), "edited a file today");
    }

    #[test]
    fn verbs_generalize_preserving_case() {
        assert_eq!(
            generalize_verbs("Switched the queue, then fixed retries."),
            "Replaced the queue, then corrected retries."
        );
    }

    #[test]
    fn rule_bridge_uses_pattern_for_function() {
        let reasons = vec![Reason {
            reason_type: ReasonType::Analysis,
            text: "reduces cross-service coupling".to_string(),
            strength: 0.9,
        }];
        let source = BridgeSource {
            decision: "Migrated OrderService to EventBus in PR #42",
            context: None,
            pattern: Some("event-driven decoupling"),
            reasons: &reasons,
        };
        let bridge = rule_based_bridge(&source);
        let Some(bridge) = bridge else {
            return assert!(bridge.is_some());
        };
        assert_eq!(bridge.function, "event-driven decoupling");
        assert!(bridge.structure.contains("a component"));
        assert!(!bridge.structure.contains("OrderService"));
    }

    #[test]
    fn empty_source_yields_no_bridge() {
        let source = BridgeSource {
            decision: "",
            context: None,
            pattern: None,
            reasons: &[],
        };
        assert!(rule_based_bridge(&source).is_none());
    }

    #[tokio::test]
    async fn both_mode_falls_back_to_rule_when_llm_declines() {
        let reasons = Vec::new();
        let source = BridgeSource {
            decision: "Replaced the session store with a managed cache",
            context: None,
            pattern: None,
            reasons: &reasons,
        };
        let (bridge, method) = resolve_bridge(BridgeMode::Both, &source, &DisabledLlmBridge).await;
        assert!(bridge.is_some());
        assert_eq!(method, BridgeMethod::Rule);

        let (none, method) = resolve_bridge(BridgeMode::Llm, &source, &DisabledLlmBridge).await;
        assert!(none.is_none());
        assert_eq!(method, BridgeMethod::None);
    }
}
