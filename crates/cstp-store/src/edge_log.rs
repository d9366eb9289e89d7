// crates/cstp-store/src/edge_log.rs
// ============================================================================
// Module: Edge JSONL Log
// Description: Append-only graph edge log.
// Purpose: Durable storage for decision-graph edges, replayed at startup.
// Dependencies: cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Graph edges append as JSON lines. The in-memory graph replays the log at
//! startup keying by `(source, target, type)`; invalid lines are skipped.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;

use cstp_core::graph::EdgeLog;
use cstp_core::graph::EdgeRecord;
use cstp_core::graph::GraphError;

// ============================================================================
// SECTION: Log
// ============================================================================

/// File-backed edge log.
#[derive(Debug, Clone)]
pub struct FileEdgeLog {
    /// JSONL file path.
    path: PathBuf,
}

impl FileEdgeLog {
    /// Creates a log at a path (parent directories created on write).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl EdgeLog for FileEdgeLog {
    fn append(&self, edge: &EdgeRecord) -> Result<(), GraphError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GraphError::Log(e.to_string()))?;
        }
        let line = serde_json::to_string(edge).map_err(|e| GraphError::Log(e.to_string()))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| GraphError::Log(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| GraphError::Log(e.to_string()))?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<EdgeRecord>, GraphError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| GraphError::Log(e.to_string()))?;
        let mut edges = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok(edge) = serde_json::from_str::<EdgeRecord>(trimmed) {
                edges.push(edge);
            }
        }
        Ok(edges)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::EdgeType;
    use cstp_core::graph::EdgeLog;
    use cstp_core::graph::EdgeRecord;

    use super::FileEdgeLog;

    #[test]
    fn edges_round_trip_through_the_log() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let log = FileEdgeLog::new(dir.path().join("data/edges.jsonl"));
        let edge = EdgeRecord {
            source: "aaaa1111".to_string(),
            target: "bbbb2222".to_string(),
            edge_type: EdgeType::Supersedes,
            weight: Some(0.9),
            context: Some("replaces prior approach".to_string()),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            created_by: "claude".to_string(),
        };
        log.append(&edge)?;

        let loaded = log.load()?;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0], edge);
        Ok(())
    }

    #[test]
    fn missing_log_loads_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let log = FileEdgeLog::new(dir.path().join("absent.jsonl"));
        assert!(log.load()?.is_empty());
        Ok(())
    }
}
