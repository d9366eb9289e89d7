// crates/cstp-core/src/interfaces/mod.rs
// ============================================================================
// Module: CSTP Interfaces
// Description: Backend-agnostic interfaces for storage, vectors, embeddings, and audit.
// Purpose: Define the contract surfaces used by the CSTP runtime.
// Dependencies: crate::core, async-trait, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how CSTP integrates with external systems without
//! embedding backend-specific details. The vector store and embedding
//! provider are asynchronous (network-backed); the decision store, breaker
//! journal, and audit sink are synchronous filesystem-or-memory concerns.
//! Implementations consume untrusted data and must fail closed on
//! corruption; transient backend failures are recovered by callers where a
//! degraded mode exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::decision::DecisionRecord;
use crate::core::identifiers::DecisionId;

// ============================================================================
// SECTION: Decision Store
// ============================================================================

/// Decision store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; `NotFound` is
///   distinguished from I/O failure so the dispatcher can map it to the
///   dedicated error code.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Decision not found by id or prefix.
    #[error("decision not found: {0}")]
    NotFound(String),
    /// An id prefix matched more than one decision.
    #[error("ambiguous decision id prefix: {0}")]
    AmbiguousId(String),
    /// Store I/O error.
    #[error("decision store io error: {0}")]
    Io(String),
    /// Stored document failed to parse.
    #[error("decision store invalid data: {0}")]
    Invalid(String),
}

/// Structured list query over the decision corpus.
///
/// # Invariants
/// - `limit` and `offset` paginate after filtering and sorting.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Maximum records to return.
    pub limit: usize,
    /// Records to skip before returning.
    pub offset: usize,
    /// Category filter (wire label).
    pub category: Option<String>,
    /// Stakes filter (wire label).
    pub stakes: Option<String>,
    /// Status filter (wire label).
    pub status: Option<String>,
    /// Recording agent filter.
    pub agent: Option<String>,
    /// Tags filter; a record matches when it carries all listed tags.
    pub tags: Vec<String>,
    /// Project filter.
    pub project: Option<String>,
    /// Inclusive lower date bound (`YYYY-MM-DD`).
    pub date_from: Option<String>,
    /// Inclusive upper date bound (`YYYY-MM-DD`).
    pub date_to: Option<String>,
    /// Case-insensitive substring search over summary and decision text.
    pub search: Option<String>,
    /// Sort field: `date`, `confidence`, or `category`.
    pub sort: Option<String>,
    /// Sort order: `asc` or `desc` (default `desc`).
    pub order: Option<String>,
}

/// Page of list results with the pre-pagination total.
#[derive(Debug, Clone)]
pub struct ListPage {
    /// Matching records for the requested page.
    pub decisions: Vec<DecisionRecord>,
    /// Total matching records before pagination.
    pub total: usize,
}

/// Aggregated corpus statistics.
///
/// # Invariants
/// - Counts cover the records matching the stats query filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStats {
    /// Total matching decisions.
    pub total: usize,
    /// Counts by category label.
    pub by_category: Vec<(String, usize)>,
    /// Counts by stakes label.
    pub by_stakes: Vec<(String, usize)>,
    /// Counts by status label.
    pub by_status: Vec<(String, usize)>,
    /// Counts by recording agent.
    pub by_agent: Vec<(String, usize)>,
    /// Counts by creation day (`YYYY-MM-DD`).
    pub by_day: Vec<(String, usize)>,
    /// Most frequent tags with counts, descending.
    pub top_tags: Vec<(String, usize)>,
    /// Decisions recorded in the last 7 days.
    pub recent_activity: usize,
}

/// Filters for corpus statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsQuery {
    /// Inclusive lower date bound (`YYYY-MM-DD`).
    pub date_from: Option<String>,
    /// Inclusive upper date bound (`YYYY-MM-DD`).
    pub date_to: Option<String>,
    /// Project filter.
    pub project: Option<String>,
}

/// Structured storage over the decision corpus.
///
/// The YAML backend walks `decisions/YYYY/MM/*.yaml`; alternative backends
/// implement the same contract.
pub trait DecisionStore: Send + Sync {
    /// Persists a new decision atomically and returns its storage path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails; no partial file remains.
    fn insert(&self, record: &DecisionRecord) -> Result<String, StoreError>;

    /// Rewrites an existing decision atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record is unknown or the write fails.
    fn rewrite(&self, record: &DecisionRecord) -> Result<String, StoreError>;

    /// Loads a decision by full id or unique 8-char prefix.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when nothing matches and
    /// [`StoreError::AmbiguousId`] when a prefix matches more than one record.
    fn get(&self, id: &str) -> Result<DecisionRecord, StoreError>;

    /// Loads the whole corpus, skipping unparseable files.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only on directory-level I/O failure.
    fn load_all(&self) -> Result<Vec<DecisionRecord>, StoreError>;

    /// Lists decisions with filtering, sorting, and pagination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn list(&self, query: &ListQuery) -> Result<ListPage, StoreError>;

    /// Aggregates corpus statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    fn stats(&self, query: &StatsQuery) -> Result<CorpusStats, StoreError>;
}

// ============================================================================
// SECTION: Vector Store
// ============================================================================

/// Vector store errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum VectorError {
    /// Backend call failed.
    #[error("vector store error: {0}")]
    Backend(String),
    /// Collection is missing and could not be created.
    #[error("vector collection unavailable: {0}")]
    CollectionUnavailable(String),
}

/// Single result from vector similarity search.
///
/// # Invariants
/// - Results are ordered by ascending `distance` (closer is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorResult {
    /// Document identifier.
    pub id: String,
    /// Document text content.
    pub document: String,
    /// Metadata recorded at upsert time.
    pub metadata: Value,
    /// Distance from the query embedding.
    pub distance: f64,
}

/// Abstract vector store for decision embeddings.
///
/// The `where` clause language supports exact match and the operators
/// `$gte, $lte, $gt, $lt, $ne, $in, $nin, $contains, $or, $and`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Initializes the connection and ensures the collection exists.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend is unreachable.
    async fn initialize(&self) -> Result<(), VectorError>;

    /// Inserts or updates a document with its embedding and metadata.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend rejects the write.
    async fn upsert(
        &self,
        doc_id: &str,
        document: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> Result<(), VectorError>;

    /// Finds similar documents by embedding vector.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend query fails.
    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        where_clause: Option<&Value>,
    ) -> Result<Vec<VectorResult>, VectorError>;

    /// Deletes documents by id.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend rejects the delete.
    async fn delete(&self, ids: &[String]) -> Result<(), VectorError>;

    /// Returns the total number of documents in the collection.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend is unreachable.
    async fn count(&self) -> Result<usize, VectorError>;

    /// Deletes and recreates the collection.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend rejects the reset.
    async fn reset(&self) -> Result<(), VectorError>;

    /// Returns the backend-specific collection identifier, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError`] when the backend is unreachable.
    async fn get_collection_id(&self) -> Result<Option<String>, VectorError>;
}

// ============================================================================
// SECTION: Embedding Provider
// ============================================================================

/// Embedding provider errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Provider call failed.
    #[error("embedding provider error: {0}")]
    Provider(String),
    /// Provider credentials are missing.
    #[error("embedding credentials missing: {0}")]
    CredentialsMissing(String),
}

/// Abstract embedding generation interface.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generates an embedding vector for a single text.
    ///
    /// Implementations truncate inputs exceeding [`Self::max_length`].
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] when generation fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generates embeddings for multiple texts, sequentially by default.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError`] on the first failing input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Embedding vector dimensionality.
    fn dimensions(&self) -> usize;

    /// Model identifier string.
    fn model_name(&self) -> &str;

    /// Maximum input length in characters before truncation.
    fn max_length(&self) -> usize {
        8_000
    }
}

// ============================================================================
// SECTION: Breaker Journal
// ============================================================================

/// Breaker journal errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Journal I/O error.
    #[error("breaker journal io error: {0}")]
    Io(String),
}

/// One persisted breaker snapshot line.
///
/// Timestamps are Unix milliseconds of wall-clock time; the `timestamp`
/// field additionally carries the RFC 3339 rendering for observability.
///
/// # Invariants
/// - The last record per scope wins on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerJournalRecord {
    /// Breaker scope string.
    pub scope: String,
    /// Breaker state wire label.
    pub state: String,
    /// Failure timestamps within the window, Unix milliseconds.
    pub failures: Vec<i64>,
    /// Moment the breaker opened, Unix milliseconds.
    pub opened_at: Option<i64>,
    /// Whether a half-open probe is in flight.
    pub probe_in_flight: bool,
    /// Last notification moment, Unix milliseconds.
    pub last_notification: Option<i64>,
    /// Last activity moment, Unix milliseconds.
    pub last_activity: i64,
    /// RFC 3339 wall-clock timestamp of the journal write.
    pub timestamp: String,
}

/// Append-only journal for circuit-breaker state changes.
pub trait BreakerJournal: Send + Sync {
    /// Appends one snapshot line.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] when the append fails.
    fn append(&self, record: &BreakerJournalRecord) -> Result<(), JournalError>;

    /// Rewrites the journal with the given snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] when the rewrite fails.
    fn rewrite(&self, records: &[BreakerJournalRecord]) -> Result<(), JournalError>;

    /// Replays the journal, returning the last record per scope.
    ///
    /// Invalid lines are skipped; a missing journal yields an empty replay.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError`] on unreadable storage.
    fn replay(&self) -> Result<Vec<BreakerJournalRecord>, JournalError>;
}

/// In-memory journal for tests and journal-less deployments.
#[derive(Debug, Default)]
pub struct MemoryBreakerJournal {
    /// Appended records in order.
    records: std::sync::Mutex<Vec<BreakerJournalRecord>>,
}

impl MemoryBreakerJournal {
    /// Creates an empty in-memory journal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of appended records, for assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the journal is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BreakerJournal for MemoryBreakerJournal {
    fn append(&self, record: &BreakerJournalRecord) -> Result<(), JournalError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| JournalError::Io("journal mutex poisoned".to_string()))?;
        records.push(record.clone());
        Ok(())
    }

    fn rewrite(&self, snapshot: &[BreakerJournalRecord]) -> Result<(), JournalError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| JournalError::Io("journal mutex poisoned".to_string()))?;
        *records = snapshot.to_vec();
        Ok(())
    }

    fn replay(&self) -> Result<Vec<BreakerJournalRecord>, JournalError> {
        let records = self
            .records
            .lock()
            .map_err(|_| JournalError::Io("journal mutex poisoned".to_string()))?;
        let mut latest: std::collections::BTreeMap<String, BreakerJournalRecord> =
            std::collections::BTreeMap::new();
        for record in records.iter() {
            latest.insert(record.scope.clone(), record.clone());
        }
        Ok(latest.into_values().collect())
    }
}

// ============================================================================
// SECTION: Audit Sink
// ============================================================================

/// Structured audit event emitted by gates and fail-open helpers.
///
/// # Invariants
/// - `event` is a stable label; `detail` carries event-specific fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// RFC 3339 wall-clock timestamp.
    pub timestamp: String,
    /// Stable event label, e.g. `guardrail_check`, `circuit_breaker_tripped`.
    pub event: String,
    /// Event-specific structured payload.
    pub detail: Value,
}

/// Audit sink for structured observability events.
///
/// Implementations must not leak secrets and must never fail the caller;
/// delivery errors are swallowed by the sink.
pub trait AuditSink: Send + Sync {
    /// Records one audit event.
    fn record(&self, event: AuditEvent);
}

/// No-op audit sink.
///
/// # Invariants
/// - Events are intentionally discarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

// ============================================================================
// SECTION: Identifier Helpers
// ============================================================================

/// Matches a candidate decision id against a full id or 8-char prefix.
#[must_use]
pub fn id_matches(candidate: &DecisionId, requested: &str) -> bool {
    candidate.as_str() == requested || candidate.as_str().starts_with(requested)
}
