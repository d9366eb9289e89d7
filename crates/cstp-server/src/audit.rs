// crates/cstp-server/src/audit.rs
// ============================================================================
// Module: Audit Sink Implementations
// Description: JSONL file audit sink for guardrail and breaker events.
// Purpose: Durable structured observability without a hard logging dependency.
// Dependencies: cstp-core, serde_json
// ============================================================================

//! ## Overview
//! Audit events (guardrail checks, breaker transitions, fail-open
//! degradations) append as JSON lines. The sink never fails its caller:
//! write errors are swallowed, matching the contract that observability
//! must not disturb the primary flow. Deployments wanting metrics instead
//! plug their own [`cstp_core::AuditSink`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use cstp_core::AuditEvent;
use cstp_core::AuditSink;

// ============================================================================
// SECTION: File Sink
// ============================================================================

/// JSONL file audit sink.
#[derive(Debug)]
pub struct FileAuditSink {
    /// Log file path, guarded for whole-line writes.
    path: Mutex<PathBuf>,
}

impl FileAuditSink {
    /// Creates a sink writing to a path (parents created on first write).
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Mutex::new(path.into()),
        }
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) {
        let Ok(path) = self.path.lock() else {
            return;
        };
        let Ok(line) = serde_json::to_string(&event) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&*path)
        else {
            return;
        };
        let _ = writeln!(file, "{line}");
    }
}

// ============================================================================
// SECTION: Memory Sink
// ============================================================================

/// In-memory audit sink for tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    /// Recorded events in order.
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::AuditEvent;
    use cstp_core::AuditSink;
    use serde_json::json;

    use super::FileAuditSink;
    use super::MemoryAuditSink;

    #[test]
    fn file_sink_appends_json_lines() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("audit/events.jsonl");
        let sink = FileAuditSink::new(&path);
        sink.record(AuditEvent {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            event: "guardrail_check".to_string(),
            detail: json!({ "allowed": true }),
        });
        sink.record(AuditEvent {
            timestamp: "2026-01-01T00:00:01Z".to_string(),
            event: "circuit_breaker_tripped".to_string(),
            detail: json!({ "scope": "global" }),
        });

        let content = std::fs::read_to_string(&path)?;
        assert_eq!(content.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap_or(""))?;
        assert_eq!(first["event"], "guardrail_check");
        Ok(())
    }

    #[test]
    fn memory_sink_captures_events() {
        let sink = MemoryAuditSink::new();
        sink.record(AuditEvent {
            timestamp: String::new(),
            event: "test".to_string(),
            detail: json!({}),
        });
        assert_eq!(sink.events().len(), 1);
    }
}
