// crates/cstp-store/src/yaml_store.rs
// ============================================================================
// Module: YAML Decision Store
// Description: Decision corpus persisted as one YAML file per decision.
// Purpose: Atomic writes, id-or-prefix lookup, structured listing and stats.
// Dependencies: cstp-core, serde_yaml, tempfile
// ============================================================================

//! ## Overview
//! Decisions live under `{root}/YYYY/MM/YYYY-MM-DD-decision-{id}.yaml`.
//! Every write goes to a tempfile in the destination directory, is synced,
//! and renamed over the target so readers observe either the old or the new
//! version, never a partial file. Unparseable corpus files are skipped on
//! load; the raw corpus is the source of truth over the vector index.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use cstp_core::DecisionRecord;
use cstp_core::interfaces::CorpusStats;
use cstp_core::interfaces::DecisionStore;
use cstp_core::interfaces::ListPage;
use cstp_core::interfaces::ListQuery;
use cstp_core::interfaces::StatsQuery;
use cstp_core::interfaces::StoreError;
use cstp_core::interfaces::id_matches;

// ============================================================================
// SECTION: Store
// ============================================================================

/// YAML-file decision store.
#[derive(Debug, Clone)]
pub struct YamlDecisionStore {
    /// Corpus root directory.
    root: PathBuf,
}

impl YamlDecisionStore {
    /// Creates a store rooted at a directory (created lazily on write).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Corpus root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Computes the storage path for a record from its id and date.
    fn path_for(&self, record: &DecisionRecord) -> Result<PathBuf, StoreError> {
        let date: String = record.date.chars().take(10).collect();
        let mut parts = date.split('-');
        let (Some(year), Some(month)) = (parts.next(), parts.next()) else {
            return Err(StoreError::Invalid(format!(
                "decision {} has unusable date '{}'",
                record.id, record.date
            )));
        };
        Ok(self
            .root
            .join(year)
            .join(month)
            .join(format!("{date}-decision-{}.yaml", record.id.short())))
    }

    /// Atomic write: tempfile in the target directory, sync, rename.
    fn write_atomic(path: &Path, record: &DecisionRecord) -> Result<(), StoreError> {
        let Some(dir) = path.parent() else {
            return Err(StoreError::Io(format!(
                "path has no parent: {}",
                path.display()
            )));
        };
        std::fs::create_dir_all(dir).map_err(|e| StoreError::Io(e.to_string()))?;

        let content =
            serde_yaml::to_string(record).map_err(|e| StoreError::Invalid(e.to_string()))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(e.to_string()))?;
        // persist() renames over the target; the tempfile is removed on failure.
        tmp.persist(path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Walks the corpus, yielding `(path, record)` for parseable files.
    fn walk(&self) -> Result<Vec<(PathBuf, DecisionRecord)>, StoreError> {
        let mut found = Vec::new();
        if !self.root.exists() {
            return Ok(found);
        }
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::Io(e.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !name.contains("-decision-") || !name.ends_with(".yaml") {
                    continue;
                }
                // Unparseable files are skipped, never fatal.
                let Ok(content) = std::fs::read_to_string(&path) else {
                    continue;
                };
                let Ok(record) = serde_yaml::from_str::<DecisionRecord>(&content) else {
                    continue;
                };
                found.push((path, record));
            }
        }
        Ok(found)
    }

    /// Finds one record by id or unique prefix, with its path.
    fn find(&self, id: &str) -> Result<(PathBuf, DecisionRecord), StoreError> {
        let matches: Vec<(PathBuf, DecisionRecord)> = self
            .walk()?
            .into_iter()
            .filter(|(_, record)| id_matches(&record.id, id))
            .collect();
        match matches.len() {
            0 => Err(StoreError::NotFound(id.to_string())),
            1 => matches
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::NotFound(id.to_string())),
            _ => Err(StoreError::AmbiguousId(id.to_string())),
        }
    }
}

impl DecisionStore for YamlDecisionStore {
    fn insert(&self, record: &DecisionRecord) -> Result<String, StoreError> {
        let path = self.path_for(record)?;
        Self::write_atomic(&path, record)?;
        Ok(path.display().to_string())
    }

    fn rewrite(&self, record: &DecisionRecord) -> Result<String, StoreError> {
        let (path, _) = self.find(record.id.as_str())?;
        Self::write_atomic(&path, record)?;
        Ok(path.display().to_string())
    }

    fn get(&self, id: &str) -> Result<DecisionRecord, StoreError> {
        self.find(id).map(|(_, record)| record)
    }

    fn load_all(&self) -> Result<Vec<DecisionRecord>, StoreError> {
        Ok(self.walk()?.into_iter().map(|(_, record)| record).collect())
    }

    fn list(&self, query: &ListQuery) -> Result<ListPage, StoreError> {
        let records = self.load_all()?;
        Ok(apply_list_query(records, query))
    }

    fn stats(&self, query: &StatsQuery) -> Result<CorpusStats, StoreError> {
        let records = self.load_all()?;
        Ok(aggregate_stats(&records, query))
    }
}

// ============================================================================
// SECTION: List Query Evaluation
// ============================================================================

/// Filters, sorts, and paginates records for a list query.
#[must_use]
pub fn apply_list_query(records: Vec<DecisionRecord>, query: &ListQuery) -> ListPage {
    let mut matching: Vec<DecisionRecord> = records
        .into_iter()
        .filter(|record| list_query_matches(record, query))
        .collect();

    let descending = query.order.as_deref() != Some("asc");
    match query.sort.as_deref() {
        Some("confidence") => {
            matching.sort_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        Some("category") => matching.sort_by(|a, b| a.category.cmp(&b.category)),
        _ => matching.sort_by(|a, b| a.date.cmp(&b.date)),
    }
    if descending {
        matching.reverse();
    }

    let total = matching.len();
    let page: Vec<DecisionRecord> = matching
        .into_iter()
        .skip(query.offset)
        .take(if query.limit == 0 { usize::MAX } else { query.limit })
        .collect();
    ListPage {
        decisions: page,
        total,
    }
}

/// Whether a record matches the list query filters.
fn list_query_matches(record: &DecisionRecord, query: &ListQuery) -> bool {
    if let Some(category) = &query.category {
        if record.category.as_str() != category {
            return false;
        }
    }
    if let Some(stakes) = &query.stakes {
        if record.stakes.as_str() != stakes {
            return false;
        }
    }
    if let Some(status) = &query.status {
        if record.status.as_str() != status {
            return false;
        }
    }
    if let Some(agent) = &query.agent {
        if record.recorded_by.as_deref() != Some(agent.as_str()) {
            return false;
        }
    }
    if !query.tags.is_empty() && !query.tags.iter().all(|tag| record.tags.contains(tag)) {
        return false;
    }
    if let Some(project) = &query.project {
        if record.project.as_deref() != Some(project.as_str()) {
            return false;
        }
    }
    let date: String = record.date.chars().take(10).collect();
    if let Some(from) = &query.date_from {
        if date.as_str() < from.as_str() {
            return false;
        }
    }
    if let Some(to) = &query.date_to {
        if date.as_str() > to.as_str() {
            return false;
        }
    }
    if let Some(search) = &query.search {
        let needle = search.to_lowercase();
        let haystack =
            format!("{} {}", record.summary, record.decision).to_lowercase();
        if !haystack.contains(&needle) {
            return false;
        }
    }
    true
}

// ============================================================================
// SECTION: Stats Aggregation
// ============================================================================

/// Aggregates corpus statistics for a stats query.
#[must_use]
pub fn aggregate_stats(records: &[DecisionRecord], query: &StatsQuery) -> CorpusStats {
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_stakes: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_agent: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_day: BTreeMap<String, usize> = BTreeMap::new();
    let mut tag_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut total = 0usize;
    let mut recent_activity = 0usize;

    let week_ago = cstp_core::core::time::format_date(
        time::OffsetDateTime::now_utc() - time::Duration::days(7),
    );

    for record in records {
        let date: String = record.date.chars().take(10).collect();
        if let Some(from) = &query.date_from {
            if date.as_str() < from.as_str() {
                continue;
            }
        }
        if let Some(to) = &query.date_to {
            if date.as_str() > to.as_str() {
                continue;
            }
        }
        if let Some(project) = &query.project {
            if record.project.as_deref() != Some(project.as_str()) {
                continue;
            }
        }

        total += 1;
        *by_category
            .entry(record.category.as_str().to_string())
            .or_insert(0) += 1;
        *by_stakes
            .entry(record.stakes.as_str().to_string())
            .or_insert(0) += 1;
        *by_status
            .entry(record.status.as_str().to_string())
            .or_insert(0) += 1;
        if let Some(agent) = &record.recorded_by {
            *by_agent.entry(agent.clone()).or_insert(0) += 1;
        }
        *by_day.entry(date.clone()).or_insert(0) += 1;
        for tag in &record.tags {
            *tag_counts.entry(tag.clone()).or_insert(0) += 1;
        }
        if date.as_str() >= week_ago.as_str() {
            recent_activity += 1;
        }
    }

    let mut top_tags: Vec<(String, usize)> = tag_counts.into_iter().collect();
    top_tags.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    top_tags.truncate(10);

    CorpusStats {
        total,
        by_category: by_category.into_iter().collect(),
        by_stakes: by_stakes.into_iter().collect(),
        by_status: by_status.into_iter().collect(),
        by_agent: by_agent.into_iter().collect(),
        by_day: by_day.into_iter().collect(),
        top_tags,
        recent_activity,
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
    use cstp_core::Outcome;
    use cstp_core::Stakes;
    use cstp_core::interfaces::DecisionStore;
    use cstp_core::interfaces::ListQuery;
    use cstp_core::interfaces::StatsQuery;
    use cstp_core::interfaces::StoreError;

    use super::YamlDecisionStore;

    fn record(id: &str, date: &str) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new(id),
            summary: format!("decision {id}"),
            decision: format!("decision {id}"),
            category: Category::Architecture,
            confidence: 0.8,
            stakes: Stakes::Medium,
            status: DecisionStatus::Pending,
            date: date.to_string(),
            context: None,
            pattern: None,
            tags: vec!["caching".to_string()],
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
            outcome: None,
            actual_result: None,
            lessons: None,
            affected_kpis: Vec::new(),
            reviewed_at: None,
            reviewed_by: None,
            extra: std::collections::BTreeMap::new(),
        }
    }

    fn temp_store() -> Result<(tempfile::TempDir, YamlDecisionStore), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let store = YamlDecisionStore::new(dir.path().join("decisions"));
        Ok((dir, store))
    }

    #[test]
    fn insert_places_records_in_dated_directories() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, store) = temp_store()?;
        let path = store.insert(&record("abcd1234", "2026-02-15T10:00:00Z"))?;
        assert!(path.ends_with("2026-02-15-decision-abcd1234.yaml"));
        assert!(
            dir.path()
                .join("decisions/2026/02/2026-02-15-decision-abcd1234.yaml")
                .exists()
        );
        Ok(())
    }

    #[test]
    fn round_trip_preserves_every_field() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, store) = temp_store()?;
        let mut original = record("abcd1234", "2026-02-15T10:00:00Z");
        original.context = Some("went with the boring option".to_string());
        original.pr = Some(42);
        original.preserve = true;
        store.insert(&original)?;

        let loaded = store.get("abcd1234")?;
        assert_eq!(loaded, original);
        Ok(())
    }

    #[test]
    fn prefix_lookup_and_ambiguity() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, store) = temp_store()?;
        store.insert(&record("abcd1234", "2026-02-15T10:00:00Z"))?;
        store.insert(&record("abff5678", "2026-02-14T10:00:00Z"))?;

        assert_eq!(store.get("abcd")?.id.as_str(), "abcd1234");
        assert!(matches!(store.get("ab"), Err(StoreError::AmbiguousId(_))));
        assert!(matches!(store.get("zzzz"), Err(StoreError::NotFound(_))));
        Ok(())
    }

    #[test]
    fn rewrite_updates_in_place() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, store) = temp_store()?;
        let mut rec = record("abcd1234", "2026-02-15T10:00:00Z");
        store.insert(&rec)?;

        rec.status = DecisionStatus::Reviewed;
        rec.outcome = Some(Outcome::Success);
        rec.lessons = Some("Trust X".to_string());
        store.rewrite(&rec)?;

        let loaded = store.get("abcd1234")?;
        assert_eq!(loaded.status, DecisionStatus::Reviewed);
        assert_eq!(loaded.outcome, Some(Outcome::Success));
        assert_eq!(loaded.lessons.as_deref(), Some("Trust X"));
        assert_eq!(store.load_all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn unparseable_files_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let (dir, store) = temp_store()?;
        store.insert(&record("abcd1234", "2026-02-15T10:00:00Z"))?;
        let junk_dir = dir.path().join("decisions/2026/02");
        std::fs::write(junk_dir.join("2026-02-15-decision-zzzzzzzz.yaml"), ": : :")?;

        assert_eq!(store.load_all()?.len(), 1);
        Ok(())
    }

    #[test]
    fn list_filters_sorts_and_paginates() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, store) = temp_store()?;
        store.insert(&record("aaaa0001", "2026-02-10T10:00:00Z"))?;
        store.insert(&record("aaaa0002", "2026-02-12T10:00:00Z"))?;
        store.insert(&record("aaaa0003", "2026-02-14T10:00:00Z"))?;

        let page = store.list(&ListQuery {
            limit: 2,
            offset: 0,
            ..ListQuery::default()
        })?;
        assert_eq!(page.total, 3);
        assert_eq!(page.decisions.len(), 2);
        assert_eq!(page.decisions[0].id.as_str(), "aaaa0003");

        let searched = store.list(&ListQuery {
            limit: 10,
            search: Some("AAAA0002".to_string()),
            ..ListQuery::default()
        })?;
        assert_eq!(searched.total, 1);
        Ok(())
    }

    #[test]
    fn stats_aggregate_counts() -> Result<(), Box<dyn std::error::Error>> {
        let (_dir, store) = temp_store()?;
        store.insert(&record("aaaa0001", "2026-02-10T10:00:00Z"))?;
        store.insert(&record("aaaa0002", "2026-02-12T10:00:00Z"))?;

        let stats = store.stats(&StatsQuery::default())?;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_category, vec![("architecture".to_string(), 2)]);
        assert_eq!(stats.by_agent, vec![("claude".to_string(), 2)]);
        assert_eq!(stats.top_tags, vec![("caching".to_string(), 2)]);
        Ok(())
    }
}
