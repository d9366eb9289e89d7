// crates/cstp-core/src/retrieval/filter.rs
// ============================================================================
// Module: Query Filters
// Description: Decision query filter taxonomy and where-clause assembly.
// Purpose: Translate request filters into vector-store where clauses and
//          corpus predicates.
// Dependencies: crate::core, serde, serde_json
// ============================================================================

//! ## Overview
//! Every retrieval surface shares one filter taxonomy: category, confidence
//! bounds, stakes, status, project/feature/PR linkage, outcome presence, and
//! tags. The semantic path compiles filters into the vector store's where
//! clause language; the keyword and list paths evaluate the same filters
//! directly against loaded records.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::core::decision::DecisionRecord;
use crate::core::enums::DecisionStatus;

// ============================================================================
// SECTION: Filter Model
// ============================================================================

/// Filters shared by the retrieval surfaces.
///
/// # Invariants
/// - Confidence bounds are inclusive; defaults cover the full range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilters {
    /// Category filter (wire label).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Minimum confidence, inclusive.
    #[serde(default, alias = "minConfidence")]
    pub min_confidence: f64,
    /// Maximum confidence, inclusive.
    #[serde(default = "default_max_confidence", alias = "maxConfidence")]
    pub max_confidence: f64,
    /// Stakes filter (wire labels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stakes: Option<Vec<String>>,
    /// Status filter (wire labels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<String>>,
    /// Project filter (`owner/repo`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Feature filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Pull-request filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr: Option<i64>,
    /// Restrict to reviewed (`true`) or pending (`false`) decisions.
    #[serde(default, alias = "hasOutcome", skip_serializing_if = "Option::is_none")]
    pub has_outcome: Option<bool>,
    /// Tag filter; a record matches when it carries any listed tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Default upper confidence bound.
const fn default_max_confidence() -> f64 {
    1.0
}

impl Default for QueryFilters {
    fn default() -> Self {
        Self {
            category: None,
            min_confidence: 0.0,
            max_confidence: 1.0,
            stakes: None,
            status: None,
            project: None,
            feature: None,
            pr: None,
            has_outcome: None,
            tags: None,
        }
    }
}

impl QueryFilters {
    /// Cache key fragment derived from the dimensions that shape the corpus.
    #[must_use]
    pub fn cache_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}:{}:{}",
            self.category.as_deref().unwrap_or(""),
            self.project.as_deref().unwrap_or("")
        )
    }

    /// Compiles the filters into a vector-store where clause.
    ///
    /// Returns `None` when no filter is active. Multiple conditions are
    /// combined under `$and`; the tag filter expands to a `$contains`
    /// disjunction under `$or`.
    #[must_use]
    pub fn to_where_clause(&self) -> Option<Value> {
        let mut clauses: Vec<Value> = Vec::new();

        if let Some(category) = &self.category {
            clauses.push(json!({ "category": category }));
        }
        if self.min_confidence > 0.0 {
            clauses.push(json!({ "confidence": { "$gte": self.min_confidence } }));
        }
        if self.max_confidence < 1.0 {
            clauses.push(json!({ "confidence": { "$lte": self.max_confidence } }));
        }
        if let Some(stakes) = &self.stakes {
            if !stakes.is_empty() {
                clauses.push(json!({ "stakes": { "$in": stakes } }));
            }
        }
        match self.has_outcome {
            Some(true) => clauses.push(json!({ "status": "reviewed" })),
            Some(false) => clauses.push(json!({ "status": "pending" })),
            None => {
                if let Some(status) = &self.status {
                    if !status.is_empty() {
                        clauses.push(json!({ "status": { "$in": status } }));
                    }
                }
            }
        }
        if let Some(project) = &self.project {
            clauses.push(json!({ "project": project }));
        }
        if let Some(feature) = &self.feature {
            clauses.push(json!({ "feature": feature }));
        }
        if let Some(pr) = self.pr {
            clauses.push(json!({ "pr": pr }));
        }
        if let Some(tags) = &self.tags {
            let tag_clauses: Vec<Value> = tags
                .iter()
                .map(|tag| json!({ "tags": { "$contains": tag } }))
                .collect();
            match tag_clauses.len() {
                0 => {}
                1 => clauses.extend(tag_clauses),
                _ => clauses.push(json!({ "$or": tag_clauses })),
            }
        }

        match clauses.len() {
            0 => None,
            1 => clauses.into_iter().next(),
            _ => Some(json!({ "$and": clauses })),
        }
    }

    /// Evaluates the filters directly against a loaded record.
    #[must_use]
    pub fn matches(&self, record: &DecisionRecord) -> bool {
        if let Some(category) = &self.category {
            if record.category.as_str() != category {
                return false;
            }
        }
        if record.confidence < self.min_confidence || record.confidence > self.max_confidence {
            return false;
        }
        if let Some(stakes) = &self.stakes {
            if !stakes.is_empty() && !stakes.iter().any(|s| s == record.stakes.as_str()) {
                return false;
            }
        }
        match self.has_outcome {
            Some(true) if record.status != DecisionStatus::Reviewed => return false,
            Some(false) if record.status != DecisionStatus::Pending => return false,
            _ => {
                if let Some(status) = &self.status {
                    if !status.is_empty() && !status.iter().any(|s| s == record.status.as_str()) {
                        return false;
                    }
                }
            }
        }
        if let Some(project) = &self.project {
            if record.project.as_deref() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(feature) = &self.feature {
            if record.feature.as_deref() != Some(feature.as_str()) {
                return false;
            }
        }
        if let Some(pr) = self.pr {
            if record.pr != Some(pr) {
                return false;
            }
        }
        if let Some(tags) = &self.tags {
            if !tags.is_empty() && !tags.iter().any(|tag| record.tags.contains(tag)) {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::QueryFilters;

    #[test]
    fn empty_filters_compile_to_no_clause() {
        let filters = QueryFilters {
            max_confidence: 1.0,
            ..QueryFilters::default()
        };
        assert_eq!(filters.to_where_clause(), None);
    }

    #[test]
    fn single_filter_compiles_without_and() {
        let filters = QueryFilters {
            category: Some("security".to_string()),
            max_confidence: 1.0,
            ..QueryFilters::default()
        };
        assert_eq!(filters.to_where_clause(), Some(json!({ "category": "security" })));
    }

    #[test]
    fn combined_filters_nest_under_and() {
        let filters = QueryFilters {
            category: Some("security".to_string()),
            min_confidence: 0.5,
            max_confidence: 1.0,
            stakes: Some(vec!["high".to_string(), "critical".to_string()]),
            tags: Some(vec!["auth".to_string(), "csrf".to_string()]),
            ..QueryFilters::default()
        };
        let clause = filters.to_where_clause();
        let Some(clause) = clause else {
            unreachable!("filters produce a clause");
        };
        let and = clause.get("$and").and_then(|v| v.as_array());
        let Some(and) = and else {
            unreachable!("multiple filters nest under $and");
        };
        assert_eq!(and.len(), 4);
        assert!(and.iter().any(|c| c.get("$or").is_some()));
    }

    #[test]
    fn has_outcome_overrides_status_list() {
        let filters = QueryFilters {
            status: Some(vec!["pending".to_string()]),
            has_outcome: Some(true),
            max_confidence: 1.0,
            ..QueryFilters::default()
        };
        assert_eq!(filters.to_where_clause(), Some(json!({ "status": "reviewed" })));
    }

    #[test]
    fn filters_deserialize_both_naming_conventions() -> Result<(), serde_json::Error> {
        let camel: QueryFilters =
            serde_json::from_value(json!({ "minConfidence": 0.3, "hasOutcome": true }))?;
        assert!((camel.min_confidence - 0.3).abs() < f64::EPSILON);
        assert_eq!(camel.has_outcome, Some(true));

        let snake: QueryFilters =
            serde_json::from_value(json!({ "min_confidence": 0.4, "has_outcome": false }))?;
        assert!((snake.min_confidence - 0.4).abs() < f64::EPSILON);
        assert_eq!(snake.has_outcome, Some(false));
        Ok(())
    }
}
