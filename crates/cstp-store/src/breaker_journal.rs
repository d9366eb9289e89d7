// crates/cstp-store/src/breaker_journal.rs
// ============================================================================
// Module: Breaker JSONL Journal
// Description: Append-only circuit-breaker state log with full rewrites.
// Purpose: Crash recovery for breaker state; last record per scope wins.
// Dependencies: cstp-core, serde_json, tempfile
// ============================================================================

//! ## Overview
//! Every breaker state change appends one JSON line; manual resets and
//! stale evictions rewrite the whole file atomically. Replay keeps the
//! last record per scope and skips invalid lines.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use cstp_core::interfaces::BreakerJournal;
use cstp_core::interfaces::BreakerJournalRecord;
use cstp_core::interfaces::JournalError;

// ============================================================================
// SECTION: Journal
// ============================================================================

/// File-backed breaker journal.
#[derive(Debug, Clone)]
pub struct FileBreakerJournal {
    /// JSONL file path.
    path: PathBuf,
}

impl FileBreakerJournal {
    /// Creates a journal at a path (parent directories created on write).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ensures the parent directory exists.
    fn ensure_parent(&self) -> Result<(), JournalError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| JournalError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

impl BreakerJournal for FileBreakerJournal {
    fn append(&self, record: &BreakerJournalRecord) -> Result<(), JournalError> {
        self.ensure_parent()?;
        let line =
            serde_json::to_string(record).map_err(|e| JournalError::Io(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| JournalError::Io(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| JournalError::Io(e.to_string()))?;
        Ok(())
    }

    fn rewrite(&self, records: &[BreakerJournalRecord]) -> Result<(), JournalError> {
        self.ensure_parent()?;
        let Some(dir) = self.path.parent() else {
            return Err(JournalError::Io(format!(
                "journal path has no parent: {}",
                self.path.display()
            )));
        };
        let mut tmp =
            tempfile::NamedTempFile::new_in(dir).map_err(|e| JournalError::Io(e.to_string()))?;
        for record in records {
            let line =
                serde_json::to_string(record).map_err(|e| JournalError::Io(e.to_string()))?;
            writeln!(tmp, "{line}").map_err(|e| JournalError::Io(e.to_string()))?;
        }
        tmp.as_file()
            .sync_all()
            .map_err(|e| JournalError::Io(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| JournalError::Io(e.to_string()))?;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<BreakerJournalRecord>, JournalError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| JournalError::Io(e.to_string()))?;
        let mut latest: BTreeMap<String, BreakerJournalRecord> = BTreeMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            // Invalid lines are skipped; the journal is append-only and may
            // carry a torn final line after a crash.
            if let Ok(record) = serde_json::from_str::<BreakerJournalRecord>(trimmed) {
                latest.insert(record.scope.clone(), record);
            }
        }
        Ok(latest.into_values().collect())
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::interfaces::BreakerJournal;
    use cstp_core::interfaces::BreakerJournalRecord;

    use super::FileBreakerJournal;

    fn record(scope: &str, state: &str) -> BreakerJournalRecord {
        BreakerJournalRecord {
            scope: scope.to_string(),
            state: state.to_string(),
            failures: vec![1_700_000_000_000],
            opened_at: None,
            probe_in_flight: false,
            last_notification: None,
            last_activity: 1_700_000_000_000,
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn replay_keeps_last_record_per_scope() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let journal = FileBreakerJournal::new(dir.path().join("data/breakers.jsonl"));

        journal.append(&record("global", "closed"))?;
        journal.append(&record("global", "open"))?;
        journal.append(&record("category:security", "closed"))?;

        let replayed = journal.replay()?;
        assert_eq!(replayed.len(), 2);
        let global = replayed.iter().find(|r| r.scope == "global");
        assert_eq!(global.map(|r| r.state.as_str()), Some("open"));
        Ok(())
    }

    #[test]
    fn invalid_lines_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("breakers.jsonl");
        let journal = FileBreakerJournal::new(&path);
        journal.append(&record("global", "closed"))?;
        std::fs::write(
            &path,
            format!(
                "{}\nnot json at all\n",
                serde_json::to_string(&record("global", "open"))?
            ),
        )?;

        let replayed = journal.replay()?;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].state, "open");
        Ok(())
    }

    #[test]
    fn rewrite_replaces_the_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let journal = FileBreakerJournal::new(dir.path().join("breakers.jsonl"));
        journal.append(&record("global", "open"))?;
        journal.append(&record("stale", "closed"))?;

        journal.rewrite(&[record("global", "closed")])?;
        let replayed = journal.replay()?;
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].scope, "global");
        Ok(())
    }

    #[test]
    fn missing_file_replays_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let journal = FileBreakerJournal::new(dir.path().join("absent.jsonl"));
        assert!(journal.replay()?.is_empty());
        Ok(())
    }
}
