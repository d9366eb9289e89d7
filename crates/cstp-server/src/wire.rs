// crates/cstp-server/src/wire.rs
// ============================================================================
// Module: Wire Shapes
// Description: camelCase response structures shared across handlers.
// Purpose: One summary shape for query, pre-action, and session context.
// Dependencies: cstp-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Responses emit camelCase regardless of the request's convention. The
//! decision summary is built either from a loaded record (preferred; the
//! YAML corpus is the source of truth) or from vector-store metadata when
//! the corpus no longer carries the indexed id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cstp_core::DecisionRecord;
use cstp_core::core::decision::BridgeDefinition;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Summary
// ============================================================================

/// Per-result detail options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryOptions {
    /// Include reason texts.
    pub include_reasons: bool,
    /// Include lessons and actual-result detail.
    pub include_detail: bool,
}

/// Summary of one decision in query-style results.
///
/// # Invariants
/// - `distance` is the retrieval distance (0 in list mode).
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct DecisionSummary {
    /// Short decision id.
    pub id: String,
    /// Truncated title.
    pub title: String,
    /// Category label.
    pub category: String,
    /// Stated confidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Stakes label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakes: Option<String>,
    /// Status label.
    pub status: String,
    /// Outcome label when reviewed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    /// Creation date (`YYYY-MM-DD`).
    pub date: String,
    /// Retrieval distance.
    pub distance: f64,
    /// Reason texts when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasons: Option<Vec<String>>,
    /// Tags when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Pattern when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Lessons when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lessons: Option<String>,
    /// Actual result when detail is requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_result: Option<String>,
    /// Bridge faces when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<Value>,
    /// Compaction level annotation when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compaction_level: Option<String>,
}

/// Maximum title length in summaries.
const TITLE_MAX: usize = 50;

impl DecisionSummary {
    /// Builds a summary from a loaded record.
    #[must_use]
    pub fn from_record(record: &DecisionRecord, distance: f64, options: SummaryOptions) -> Self {
        let title_source = if record.summary.is_empty() {
            &record.decision
        } else {
            &record.summary
        };
        Self {
            id: record.id.short().to_string(),
            title: title_source.chars().take(TITLE_MAX).collect(),
            category: record.category.as_str().to_string(),
            confidence: Some(record.confidence),
            stakes: Some(record.stakes.as_str().to_string()),
            status: record.status.as_str().to_string(),
            outcome: record.outcome.map(|o| o.as_str().to_string()),
            date: record.date.chars().take(10).collect(),
            distance,
            reasons: options.include_reasons.then(|| {
                record
                    .reasons
                    .iter()
                    .map(|r| r.text.clone())
                    .collect::<Vec<String>>()
            }),
            tags: (!record.tags.is_empty()).then(|| record.tags.clone()),
            pattern: record.pattern.clone(),
            lessons: record.lessons.clone(),
            actual_result: options
                .include_detail
                .then(|| record.actual_result.clone())
                .flatten(),
            bridge: record.bridge.as_ref().and_then(bridge_faces),
            compaction_level: None,
        }
    }

    /// Builds a summary from vector-store metadata.
    #[must_use]
    pub fn from_metadata(id: &str, metadata: &Value, distance: f64) -> Self {
        let short_id: String = id.chars().take(8).collect();
        Self {
            id: short_id,
            title: metadata
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or("Untitled")
                .chars()
                .take(TITLE_MAX)
                .collect(),
            category: metadata
                .get("category")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            confidence: metadata.get("confidence").and_then(Value::as_f64),
            stakes: metadata
                .get("stakes")
                .and_then(Value::as_str)
                .map(str::to_string),
            status: metadata
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            outcome: metadata
                .get("outcome")
                .and_then(Value::as_str)
                .map(str::to_string),
            date: metadata
                .get("date")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .chars()
                .take(10)
                .collect(),
            distance,
            reasons: None,
            tags: None,
            pattern: metadata
                .get("pattern")
                .and_then(Value::as_str)
                .map(str::to_string),
            lessons: metadata
                .get("lessons")
                .and_then(Value::as_str)
                .map(str::to_string),
            actual_result: None,
            bridge: None,
            compaction_level: None,
        }
    }
}

// ============================================================================
// SECTION: Key Normalization
// ============================================================================

/// Recursively renames object keys from snake_case to camelCase.
///
/// Applied to full-record dumps so responses emit camelCase while the
/// on-disk YAML stays snake_case.
#[must_use]
pub fn to_camel_value(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, inner)| (snake_to_camel(&key), to_camel_value(inner)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(to_camel_value).collect()),
        other => other,
    }
}

/// Converts one snake_case key to camelCase; other shapes pass through.
fn snake_to_camel(key: &str) -> String {
    if !key.contains('_') {
        return key.to_string();
    }
    let mut result = String::with_capacity(key.len());
    let mut upper_next = false;
    for (index, ch) in key.chars().enumerate() {
        if ch == '_' && index > 0 {
            upper_next = true;
        } else if upper_next {
            result.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            result.push(ch);
        }
    }
    result
}

/// Extracts the structure/function faces of a bridge for summaries.
fn bridge_faces(bridge: &BridgeDefinition) -> Option<Value> {
    if !bridge.has_content() {
        return None;
    }
    let mut faces = serde_json::Map::new();
    if !bridge.structure.is_empty() {
        faces.insert("structure".to_string(), Value::String(bridge.structure.clone()));
    }
    if !bridge.function.is_empty() {
        faces.insert("function".to_string(), Value::String(bridge.function.clone()));
    }
    Some(Value::Object(faces))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::Category;
    use cstp_core::DecisionId;
    use cstp_core::DecisionRecord;
    use cstp_core::DecisionStatus;
    use cstp_core::Reason;
    use cstp_core::ReasonType;
    use cstp_core::Stakes;
    use serde_json::json;

    use super::DecisionSummary;
    use super::SummaryOptions;

    fn record() -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new("abcd1234"),
            summary: "Use boring tech for the cache layer".to_string(),
            decision: "Use boring tech for the cache layer".to_string(),
            category: Category::Architecture,
            confidence: 0.85,
            stakes: Stakes::High,
            status: DecisionStatus::Pending,
            date: "2026-02-15T10:00:00Z".to_string(),
            context: None,
            pattern: Some("boring-tech".to_string()),
            tags: vec!["caching".to_string()],
            project: None,
            feature: None,
            pr: None,
            kpi_indicators: Vec::new(),
            mental_state: None,
            review_by: None,
            recorded_by: None,
            reasons: vec![Reason {
                reason_type: ReasonType::Pattern,
                text: "worked three times before".to_string(),
                strength: 0.9,
            }],
            pre_decision: None,
            related_to: Vec::new(),
            bridge: None,
            deliberation: None,
            preserve: false,
            outcome: None,
            actual_result: Some("held up".to_string()),
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn record_summary_respects_options() {
        let bare = DecisionSummary::from_record(&record(), 0.2, SummaryOptions::default());
        assert_eq!(bare.id, "abcd1234");
        assert!(bare.reasons.is_none());
        assert!(bare.actual_result.is_none());
        assert_eq!(bare.date, "2026-02-15");

        let full = DecisionSummary::from_record(
            &record(),
            0.2,
            SummaryOptions {
                include_reasons: true,
                include_detail: true,
            },
        );
        assert_eq!(full.reasons.as_deref().map(<[String]>::len), Some(1));
        assert_eq!(full.actual_result.as_deref(), Some("held up"));
    }

    #[test]
    fn metadata_summary_parses_core_fields() {
        let metadata = json!({
            "title": "Indexed decision",
            "category": "security",
            "confidence": 0.7,
            "status": "reviewed",
            "outcome": "success",
            "date": "2026-01-10",
        });
        let summary = DecisionSummary::from_metadata("abcd1234ffff", &metadata, 0.3);
        assert_eq!(summary.id, "abcd1234");
        assert_eq!(summary.category, "security");
        assert_eq!(summary.outcome.as_deref(), Some("success"));
    }

    #[test]
    fn camel_conversion_recurses_and_keeps_leading_underscores() {
        let value = json!({
            "actual_result": "ok",
            "nested": { "kpi_indicators": ["a"], "already": 1 },
            "list": [{ "review_by": "2026-01-01" }],
        });
        let converted = super::to_camel_value(value);
        assert!(converted.get("actualResult").is_some());
        assert!(converted["nested"].get("kpiIndicators").is_some());
        assert!(converted["list"][0].get("reviewBy").is_some());
    }

    #[test]
    fn summary_serializes_camel_case() -> Result<(), serde_json::Error> {
        let mut summary = DecisionSummary::from_record(&record(), 0.0, SummaryOptions::default());
        summary.compaction_level = Some("full".to_string());
        let value = serde_json::to_value(&summary)?;
        assert!(value.get("compactionLevel").is_some());
        assert!(value.get("compaction_level").is_none());
        Ok(())
    }
}
