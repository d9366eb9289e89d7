// crates/cstp-core/src/compaction.rs
// ============================================================================
// Module: Compaction Engine
// Description: Age-based shaping of decision query output and wisdom aggregates.
// Purpose: Level decisions by age and distill old reviewed corpora into wisdom.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Compaction never rewrites raw records; it shapes what queries return.
//! The level follows age: under 7 days full, 7-30 summary, 30-90 digest,
//! 90 and beyond wisdom. Preserved and pending decisions are always full.
//! Wisdom-age reviewed decisions are never returned individually; they feed
//! the per-category wisdom aggregates.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Serialize;
use time::OffsetDateTime;

use crate::core::decision::DecisionRecord;
use crate::core::enums::CompactionLevel;
use crate::core::enums::DecisionStatus;
use crate::core::enums::Outcome;
use crate::core::time::age_days;

// ============================================================================
// SECTION: Thresholds
// ============================================================================

/// Age in days below which a decision stays full.
pub const FULL_MAX_DAYS: i64 = 7;
/// Age in days below which a decision is a summary.
pub const SUMMARY_MAX_DAYS: i64 = 30;
/// Age in days below which a decision is a digest; beyond is wisdom.
pub const DIGEST_MAX_DAYS: i64 = 90;
/// Maximum length of a digest one-line summary.
const ONE_LINE_MAX: usize = 80;

// ============================================================================
// SECTION: Level Determination
// ============================================================================

/// Determines the compaction level for a decision.
///
/// Preserved or pending decisions force `full` regardless of age; an
/// unparseable date also yields `full`.
#[must_use]
pub fn determine_level(record: &DecisionRecord, now: OffsetDateTime) -> CompactionLevel {
    if record.preserve || record.status != DecisionStatus::Reviewed {
        return CompactionLevel::Full;
    }
    let Some(age) = age_days(&record.date, now) else {
        return CompactionLevel::Full;
    };
    if age < FULL_MAX_DAYS {
        CompactionLevel::Full
    } else if age < SUMMARY_MAX_DAYS {
        CompactionLevel::Summary
    } else if age < DIGEST_MAX_DAYS {
        CompactionLevel::Digest
    } else {
        CompactionLevel::Wisdom
    }
}

/// Fixed mapping from outcome to observed confidence.
#[must_use]
pub fn actual_confidence(outcome: Option<Outcome>) -> Option<f64> {
    outcome.map(Outcome::value)
}

// ============================================================================
// SECTION: Shaped Output
// ============================================================================

/// A decision shaped at a compaction level.
///
/// # Invariants
/// - Fields beyond the level's shape are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CompactedDecision {
    /// Short decision id.
    pub id: String,
    /// Level this record was shaped at.
    pub level: CompactionLevel,
    /// Decision text.
    pub decision: String,
    /// Category label.
    pub category: String,
    /// Creation date (`YYYY-MM-DD`).
    pub date: String,
    /// Whether the record carries the preserve flag.
    pub preserved: bool,
    /// One-line summary (digest level).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_line: Option<String>,
    /// Review outcome (summary and full).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Stated confidence (summary and full).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Observed confidence from the outcome (summary and full).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_confidence: Option<f64>,
    /// Pattern (summary and full).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Stakes label (summary and full).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stakes: Option<String>,
    /// Context (full only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Reasons (full only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasons: Option<serde_json::Value>,
    /// Tags (full only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Bridge (full only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<serde_json::Value>,
    /// Deliberation (full only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deliberation: Option<serde_json::Value>,
}

/// Shapes one decision at the given level.
#[must_use]
pub fn compact_decision(record: &DecisionRecord, level: CompactionLevel) -> CompactedDecision {
    let base = CompactedDecision {
        id: record.id.short().to_string(),
        level,
        decision: if record.summary.is_empty() {
            record.decision.clone()
        } else {
            record.summary.clone()
        },
        category: record.category.as_str().to_string(),
        date: record.date.chars().take(10).collect(),
        preserved: record.preserve,
        ..CompactedDecision::default()
    };

    match level {
        CompactionLevel::Digest => CompactedDecision {
            one_line: Some(one_line(&base.decision)),
            ..base
        },
        CompactionLevel::Summary => CompactedDecision {
            outcome: record.outcome,
            confidence: Some(record.confidence),
            actual_confidence: actual_confidence(record.outcome),
            pattern: record.pattern.clone(),
            stakes: Some(record.stakes.as_str().to_string()),
            ..base
        },
        CompactionLevel::Full | CompactionLevel::Wisdom => CompactedDecision {
            level: CompactionLevel::Full,
            outcome: record.outcome,
            confidence: Some(record.confidence),
            actual_confidence: actual_confidence(record.outcome),
            pattern: record.pattern.clone(),
            stakes: Some(record.stakes.as_str().to_string()),
            context: record.context.clone(),
            reasons: serde_json::to_value(&record.reasons).ok().filter(|v| {
                v.as_array().is_some_and(|a| !a.is_empty())
            }),
            tags: if record.tags.is_empty() {
                None
            } else {
                Some(record.tags.clone())
            },
            bridge: record
                .bridge
                .as_ref()
                .and_then(|b| serde_json::to_value(b).ok()),
            deliberation: record
                .deliberation
                .as_ref()
                .and_then(|d| serde_json::to_value(d).ok()),
            ..base
        },
    }
}

/// Truncates text to an 80-character one-liner with an ellipsis.
fn one_line(text: &str) -> String {
    if text.chars().count() <= ONE_LINE_MAX {
        return text.to_string();
    }
    let truncated: String = text.chars().take(ONE_LINE_MAX - 3).collect();
    format!("{truncated}...")
}

// ============================================================================
// SECTION: Compaction Report
// ============================================================================

/// Per-level counts from a compaction walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    /// Decisions at full level.
    pub full: usize,
    /// Decisions at summary level.
    pub summary: usize,
    /// Decisions at digest level.
    pub digest: usize,
    /// Decisions at wisdom level.
    pub wisdom: usize,
}

impl LevelCounts {
    /// Increments the counter for a level.
    pub const fn bump(&mut self, level: CompactionLevel) {
        match level {
            CompactionLevel::Full => self.full += 1,
            CompactionLevel::Summary => self.summary += 1,
            CompactionLevel::Digest => self.digest += 1,
            CompactionLevel::Wisdom => self.wisdom += 1,
        }
    }

    /// Total across all levels.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.full + self.summary + self.digest + self.wisdom
    }
}

/// Result of a compaction walk; raw files are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Decisions leveled.
    pub compacted: usize,
    /// Decisions carrying the preserve flag.
    pub preserved: usize,
    /// Per-level counts.
    pub levels: LevelCounts,
}

/// Walks the corpus and reports counts per level.
#[must_use]
pub fn run_compaction(
    decisions: &[DecisionRecord],
    category: Option<&str>,
    now: OffsetDateTime,
) -> CompactionReport {
    let mut report = CompactionReport::default();
    for record in decisions {
        if let Some(category) = category {
            if record.category.as_str() != category {
                continue;
            }
        }
        if record.preserve {
            report.preserved += 1;
        }
        report.levels.bump(determine_level(record, now));
    }
    report.compacted = report.levels.total();
    report
}

/// Options for shaping compacted query output.
#[derive(Debug, Clone, Default)]
pub struct CompactedQuery {
    /// Category filter (wire label).
    pub category: Option<String>,
    /// Force a single level instead of the derived one.
    pub level: Option<CompactionLevel>,
    /// Maximum results after sorting.
    pub limit: usize,
    /// Include preserved decisions.
    pub include_preserved: bool,
}

/// Page of shaped decisions plus level counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompactedPage {
    /// Shaped decisions, newest first.
    pub decisions: Vec<CompactedDecision>,
    /// Number of decisions returned.
    pub total: usize,
    /// Level counts across the walked corpus.
    pub levels: LevelCounts,
}

/// Shapes matching decisions at their levels.
///
/// Wisdom-level items are excluded unless a level is explicitly forced;
/// preserved items are excluded unless requested.
#[must_use]
pub fn get_compacted(
    decisions: &[DecisionRecord],
    query: &CompactedQuery,
    now: OffsetDateTime,
) -> CompactedPage {
    let mut levels = LevelCounts::default();
    let mut shaped: Vec<CompactedDecision> = Vec::new();

    for record in decisions {
        if let Some(category) = &query.category {
            if record.category.as_str() != category {
                continue;
            }
        }
        let level = determine_level(record, now);

        if record.preserve && !query.include_preserved {
            continue;
        }
        if let Some(forced) = query.level {
            if level != forced && !(record.preserve && forced == CompactionLevel::Full) {
                continue;
            }
        } else if level == CompactionLevel::Wisdom {
            levels.bump(level);
            continue;
        }

        levels.bump(level);
        shaped.push(compact_decision(record, query.level.unwrap_or(level)));
    }

    shaped.sort_by(|a, b| b.date.cmp(&a.date));
    if query.limit > 0 {
        shaped.truncate(query.limit);
    }
    CompactedPage {
        total: shaped.len(),
        decisions: shaped,
        levels,
    }
}

// ============================================================================
// SECTION: Wisdom
// ============================================================================

/// A distilled principle within a wisdom entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WisdomPrinciple {
    /// Pattern text.
    pub text: String,
    /// Number of decisions confirming the pattern.
    pub confirmations: usize,
    /// Up to three example decision ids.
    pub example_ids: Vec<String>,
}

/// Category-level aggregate over wisdom-age reviewed decisions.
///
/// # Invariants
/// - Entries exist only for categories with at least `min_decisions`
///   wisdom-age reviewed decisions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WisdomEntry {
    /// Category label.
    pub category: String,
    /// Number of contributing decisions.
    pub decisions: usize,
    /// Success rate over outcomes with success counted fully.
    pub success_rate: Option<f64>,
    /// Top patterns with at least two confirmations.
    pub key_principles: Vec<WisdomPrinciple>,
    /// Pattern with the highest failure-or-partial count.
    pub common_failure_mode: Option<String>,
    /// Mean stated confidence.
    pub avg_confidence: Option<f64>,
    /// Mean squared error of confidence versus outcome value.
    pub brier_score: Option<f64>,
}

/// Builds per-category wisdom entries from the corpus.
#[must_use]
pub fn build_wisdom(
    decisions: &[DecisionRecord],
    min_decisions: usize,
    category_filter: Option<&str>,
    now: OffsetDateTime,
) -> Vec<WisdomEntry> {
    let mut by_category: BTreeMap<String, Vec<&DecisionRecord>> = BTreeMap::new();
    for record in decisions {
        if !record.is_reviewed() {
            continue;
        }
        let category = record.category.as_str();
        if let Some(filter) = category_filter {
            if category != filter {
                continue;
            }
        }
        if determine_level(record, now) != CompactionLevel::Wisdom {
            continue;
        }
        by_category
            .entry(category.to_string())
            .or_default()
            .push(record);
    }

    let mut entries = Vec::new();
    for (category, records) in by_category {
        if records.len() < min_decisions {
            continue;
        }

        let outcomes: Vec<Outcome> = records.iter().filter_map(|r| r.outcome).collect();
        let success_rate = if outcomes.is_empty() {
            None
        } else {
            let successes = outcomes.iter().filter(|o| **o == Outcome::Success).count();
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let rate = successes as f64 / outcomes.len() as f64;
            Some(round3(rate))
        };

        let mut pattern_examples: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut failure_patterns: BTreeMap<String, usize> = BTreeMap::new();
        for record in &records {
            if let Some(pattern) = &record.pattern {
                pattern_examples
                    .entry(pattern.clone())
                    .or_default()
                    .push(record.id.short().to_string());
                if matches!(record.outcome, Some(Outcome::Failure | Outcome::Partial)) {
                    *failure_patterns.entry(pattern.clone()).or_insert(0) += 1;
                }
            }
        }

        let mut principles: Vec<WisdomPrinciple> = pattern_examples
            .into_iter()
            .filter(|(_, ids)| ids.len() >= 2)
            .map(|(text, ids)| WisdomPrinciple {
                text,
                confirmations: ids.len(),
                example_ids: ids.into_iter().take(3).collect(),
            })
            .collect();
        principles.sort_by(|a, b| b.confirmations.cmp(&a.confirmations).then(a.text.cmp(&b.text)));
        principles.truncate(5);

        let common_failure_mode = failure_patterns
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(pattern, _)| pattern);

        let confidences: Vec<f64> = records.iter().map(|r| r.confidence).collect();
        let avg_confidence = if confidences.is_empty() {
            None
        } else {
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let mean = confidences.iter().sum::<f64>() / confidences.len() as f64;
            Some(round3(mean))
        };

        let brier_pairs: Vec<(f64, f64)> = records
            .iter()
            .filter_map(|r| r.outcome.map(|o| (r.confidence, o.value())))
            .collect();
        let brier_score = if brier_pairs.is_empty() {
            None
        } else {
            let sum: f64 = brier_pairs.iter().map(|(c, a)| (c - a) * (c - a)).sum();
            #[allow(clippy::cast_precision_loss, reason = "counts are small")]
            let mean = sum / brier_pairs.len() as f64;
            Some(round4(mean))
        };

        entries.push(WisdomEntry {
            category,
            decisions: records.len(),
            success_rate,
            key_principles: principles,
            common_failure_mode,
            avg_confidence,
            brier_score,
        });
    }
    entries
}

/// Rounds to three decimal places.
fn round3(value: f64) -> f64 {
    (value * 1_000.0).round() / 1_000.0
}

/// Rounds to four decimal places.
fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use crate::core::decision::DecisionRecord;
    use crate::core::enums::Category;
    use crate::core::enums::CompactionLevel;
    use crate::core::enums::DecisionStatus;
    use crate::core::enums::Outcome;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;

    use super::CompactedQuery;
    use super::build_wisdom;
    use super::compact_decision;
    use super::determine_level;
    use super::get_compacted;
    use super::run_compaction;

    fn reviewed(id: &str, date: &str, outcome: Outcome) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new(id),
            summary: format!("decision {id}"),
            decision: format!("decision {id}"),
            category: Category::Architecture,
            confidence: 0.8,
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
            recorded_by: None,
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
        }
    }

    const NOW: time::OffsetDateTime = datetime!(2026-02-15 12:00:00 UTC);

    #[test]
    fn levels_follow_the_age_table() {
        let day3 = reviewed("a1", "2026-02-12", Outcome::Success);
        let day10 = reviewed("a2", "2026-02-05", Outcome::Success);
        let day50 = reviewed("a3", "2025-12-27", Outcome::Success);
        let day100 = reviewed("a4", "2025-11-07", Outcome::Success);

        assert_eq!(determine_level(&day3, NOW), CompactionLevel::Full);
        assert_eq!(determine_level(&day10, NOW), CompactionLevel::Summary);
        assert_eq!(determine_level(&day50, NOW), CompactionLevel::Digest);
        assert_eq!(determine_level(&day100, NOW), CompactionLevel::Wisdom);
    }

    #[test]
    fn preserve_and_pending_force_full() {
        let mut old = reviewed("a4", "2025-11-07", Outcome::Success);
        old.preserve = true;
        assert_eq!(determine_level(&old, NOW), CompactionLevel::Full);

        let mut pending = reviewed("a5", "2025-11-07", Outcome::Success);
        pending.status = DecisionStatus::Pending;
        pending.outcome = None;
        assert_eq!(determine_level(&pending, NOW), CompactionLevel::Full);
    }

    #[test]
    fn digest_shape_truncates_to_one_line() {
        let mut record = reviewed("a3", "2025-12-27", Outcome::Partial);
        record.summary = "x".repeat(120);
        let shaped = compact_decision(&record, CompactionLevel::Digest);
        let one_line = shaped.one_line.unwrap_or_default();
        assert_eq!(one_line.chars().count(), 80);
        assert!(one_line.ends_with("..."));
        assert!(shaped.outcome.is_none());
    }

    #[test]
    fn summary_shape_maps_actual_confidence() {
        let record = reviewed("a2", "2026-02-05", Outcome::Partial);
        let shaped = compact_decision(&record, CompactionLevel::Summary);
        assert_eq!(shaped.actual_confidence, Some(0.5));
        assert!(shaped.context.is_none());
    }

    #[test]
    fn compaction_report_counts_without_rewriting() {
        let corpus = vec![
            reviewed("a1", "2026-02-12", Outcome::Success),
            reviewed("a2", "2026-02-05", Outcome::Success),
            reviewed("a4", "2025-11-07", Outcome::Success),
        ];
        let report = run_compaction(&corpus, None, NOW);
        assert_eq!(report.compacted, 3);
        assert_eq!(report.levels.full, 1);
        assert_eq!(report.levels.summary, 1);
        assert_eq!(report.levels.wisdom, 1);
    }

    #[test]
    fn wisdom_level_hits_are_excluded_from_compacted_pages() {
        let corpus = vec![
            reviewed("a1", "2026-02-12", Outcome::Success),
            reviewed("a4", "2025-11-07", Outcome::Success),
        ];
        let page = get_compacted(
            &corpus,
            &CompactedQuery {
                limit: 10,
                ..CompactedQuery::default()
            },
            NOW,
        );
        assert_eq!(page.total, 1);
        assert_eq!(page.decisions[0].id, "a1");
        assert_eq!(page.levels.wisdom, 1);
    }

    #[test]
    fn wisdom_aggregates_require_min_decisions_and_rank_patterns() {
        let mut corpus: Vec<DecisionRecord> = (0..6)
            .map(|i| {
                let mut r = reviewed(
                    &format!("b{i}00000"),
                    "2025-10-01",
                    if i < 4 { Outcome::Success } else { Outcome::Failure },
                );
                r.pattern = Some(if i < 3 {
                    "prefer boring tech".to_string()
                } else {
                    "big rewrite".to_string()
                });
                r
            })
            .collect();
        corpus.push(reviewed("c0000000", "2025-10-01", Outcome::Success));

        let entries = build_wisdom(&corpus, 5, None, NOW);
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.decisions, 7);
        assert_eq!(entry.key_principles[0].text, "prefer boring tech");
        assert_eq!(entry.key_principles[0].confirmations, 3);
        assert!(entry.key_principles[0].example_ids.len() <= 3);
        assert_eq!(entry.common_failure_mode.as_deref(), Some("big rewrite"));
        assert!(entry.brier_score.is_some());

        let too_few = build_wisdom(&corpus, 10, None, NOW);
        assert!(too_few.is_empty());
    }
}
