// crates/cstp-store/src/memory_store.rs
// ============================================================================
// Module: In-Memory Decision Store
// Description: Map-backed DecisionStore for tests and the memory backend.
// Purpose: Full store contract without a filesystem.
// Dependencies: cstp-core
// ============================================================================

//! ## Overview
//! The memory backend keeps records in a mutex-guarded map and reuses the
//! same list-query and stats evaluation as the YAML store, so behavior
//! matches across backends.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use cstp_core::DecisionRecord;
use cstp_core::interfaces::CorpusStats;
use cstp_core::interfaces::DecisionStore;
use cstp_core::interfaces::ListPage;
use cstp_core::interfaces::ListQuery;
use cstp_core::interfaces::StatsQuery;
use cstp_core::interfaces::StoreError;
use cstp_core::interfaces::id_matches;

use crate::yaml_store::aggregate_stats;
use crate::yaml_store::apply_list_query;

// ============================================================================
// SECTION: Store
// ============================================================================

/// In-memory decision store.
#[derive(Debug, Default)]
pub struct MemoryDecisionStore {
    /// Records keyed by full id.
    records: Mutex<BTreeMap<String, DecisionRecord>>,
}

impl MemoryDecisionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks the record map.
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, DecisionRecord>>, StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Io("memory store poisoned".to_string()))
    }
}

impl DecisionStore for MemoryDecisionStore {
    fn insert(&self, record: &DecisionRecord) -> Result<String, StoreError> {
        let mut records = self.lock()?;
        records.insert(record.id.as_str().to_string(), record.clone());
        Ok(format!("memory://{}", record.id))
    }

    fn rewrite(&self, record: &DecisionRecord) -> Result<String, StoreError> {
        let mut records = self.lock()?;
        if !records.contains_key(record.id.as_str()) {
            return Err(StoreError::NotFound(record.id.as_str().to_string()));
        }
        records.insert(record.id.as_str().to_string(), record.clone());
        Ok(format!("memory://{}", record.id))
    }

    fn get(&self, id: &str) -> Result<DecisionRecord, StoreError> {
        let records = self.lock()?;
        let matches: Vec<&DecisionRecord> = records
            .values()
            .filter(|record| id_matches(&record.id, id))
            .collect();
        match matches.len() {
            0 => Err(StoreError::NotFound(id.to_string())),
            1 => matches
                .first()
                .map(|record| (*record).clone())
                .ok_or_else(|| StoreError::NotFound(id.to_string())),
            _ => Err(StoreError::AmbiguousId(id.to_string())),
        }
    }

    fn load_all(&self) -> Result<Vec<DecisionRecord>, StoreError> {
        Ok(self.lock()?.values().cloned().collect())
    }

    fn list(&self, query: &ListQuery) -> Result<ListPage, StoreError> {
        Ok(apply_list_query(self.load_all()?, query))
    }

    fn stats(&self, query: &StatsQuery) -> Result<CorpusStats, StoreError> {
        Ok(aggregate_stats(&self.load_all()?, query))
    }
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
    use cstp_core::Stakes;
    use cstp_core::interfaces::DecisionStore;
    use cstp_core::interfaces::StoreError;

    use super::MemoryDecisionStore;

    fn record(id: &str) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new(id),
            summary: "s".to_string(),
            decision: "d".to_string(),
            category: Category::Process,
            confidence: 0.5,
            stakes: Stakes::Low,
            status: DecisionStatus::Pending,
            date: "2026-01-01T00:00:00Z".to_string(),
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
            outcome: None,
            actual_result: None,
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    #[test]
    fn rewrite_requires_existing_record() {
        let store = MemoryDecisionStore::new();
        assert!(matches!(
            store.rewrite(&record("abcd1234")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn get_supports_prefixes() -> Result<(), StoreError> {
        let store = MemoryDecisionStore::new();
        store.insert(&record("abcd1234"))?;
        assert_eq!(store.get("abcd")?.id.as_str(), "abcd1234");
        Ok(())
    }
}
