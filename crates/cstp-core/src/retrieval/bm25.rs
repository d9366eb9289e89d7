// crates/cstp-core/src/retrieval/bm25.rs
// ============================================================================
// Module: BM25 Keyword Index
// Description: Okapi BM25 scoring over the decision corpus with a TTL cache.
// Purpose: Provide exact keyword matching to complement semantic search.
// Dependencies: crate::core::decision, std
// ============================================================================

//! ## Overview
//! Keyword retrieval tokenizes on word characters, lowercased, and scores
//! queries with Okapi BM25 against the whole corpus. Because the corpus is
//! loaded from disk, indexes are cached per filter-derived key and
//! invalidated when the document count changes or after a TTL.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use crate::core::decision::DecisionRecord;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// BM25 `k1` term-frequency saturation parameter.
const BM25_K1: f64 = 1.5;
/// BM25 `b` length-normalization parameter.
const BM25_B: f64 = 0.75;
/// Cache TTL for built indexes.
pub const INDEX_CACHE_TTL: Duration = Duration::from_secs(300);

// ============================================================================
// SECTION: Tokenization
// ============================================================================

/// Tokenizes text for indexing: `\w+` runs, lowercased.
///
/// Underscores count as word characters, preserving identifiers like
/// `snake_case` tokens; technical terms like CSRF survive as-is.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_alphanumeric() || ch == '_' {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

// ============================================================================
// SECTION: Index
// ============================================================================

/// Okapi BM25 index over a decision corpus snapshot.
///
/// # Invariants
/// - `doc_ids`, `term_frequencies`, and `doc_lengths` are parallel arrays.
#[derive(Debug)]
pub struct Bm25Index {
    /// Decision ids in corpus order.
    doc_ids: Vec<String>,
    /// Per-document term frequency maps.
    term_frequencies: Vec<HashMap<String, u32>>,
    /// Per-document token counts.
    doc_lengths: Vec<usize>,
    /// Average document length across the corpus.
    avg_doc_length: f64,
    /// Document frequency per term.
    doc_frequencies: HashMap<String, u32>,
}

impl Bm25Index {
    /// Builds an index from the decision corpus.
    #[must_use]
    pub fn from_decisions(decisions: &[DecisionRecord]) -> Self {
        let mut doc_ids = Vec::with_capacity(decisions.len());
        let mut term_frequencies = Vec::with_capacity(decisions.len());
        let mut doc_lengths = Vec::with_capacity(decisions.len());
        let mut doc_frequencies: HashMap<String, u32> = HashMap::new();

        for decision in decisions {
            let tokens = tokenize(&decision.searchable_text());
            let mut frequencies: HashMap<String, u32> = HashMap::new();
            for token in &tokens {
                *frequencies.entry(token.clone()).or_insert(0) += 1;
            }
            for term in frequencies.keys() {
                *doc_frequencies.entry(term.clone()).or_insert(0) += 1;
            }
            doc_ids.push(decision.id.as_str().to_string());
            doc_lengths.push(tokens.len());
            term_frequencies.push(frequencies);
        }

        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss, reason = "corpus sizes are small")]
            let total: f64 = doc_lengths.iter().map(|l| *l as f64).sum();
            #[allow(clippy::cast_precision_loss, reason = "corpus sizes are small")]
            let count = doc_lengths.len() as f64;
            total / count
        };

        Self {
            doc_ids,
            term_frequencies,
            doc_lengths,
            avg_doc_length,
            doc_frequencies,
        }
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.doc_ids.len()
    }

    /// Scores a query and returns the top-k `(doc_id, score)` pairs.
    ///
    /// Scores are descending; zero-score documents are omitted.
    #[must_use]
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        if self.doc_ids.is_empty() {
            return Vec::new();
        }
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(String, f64)> = Vec::new();
        for (index, doc_id) in self.doc_ids.iter().enumerate() {
            let score = self.score_document(index, &tokens);
            if score > 0.0 {
                scored.push((doc_id.clone(), score));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    /// Okapi BM25 score of one document against the query tokens.
    fn score_document(&self, index: usize, tokens: &[String]) -> f64 {
        #[allow(clippy::cast_precision_loss, reason = "corpus sizes are small")]
        let corpus_size = self.doc_ids.len() as f64;
        #[allow(clippy::cast_precision_loss, reason = "document lengths are small")]
        let doc_length = self.doc_lengths.get(index).copied().unwrap_or(0) as f64;
        let Some(frequencies) = self.term_frequencies.get(index) else {
            return 0.0;
        };

        let mut score = 0.0;
        for token in tokens {
            let term_frequency = f64::from(frequencies.get(token).copied().unwrap_or(0));
            if term_frequency == 0.0 {
                continue;
            }
            let doc_frequency = f64::from(self.doc_frequencies.get(token).copied().unwrap_or(0));
            let idf = ((corpus_size - doc_frequency + 0.5) / (doc_frequency + 0.5) + 1.0).ln();
            let length_norm = if self.avg_doc_length > 0.0 {
                1.0 - BM25_B + BM25_B * doc_length / self.avg_doc_length
            } else {
                1.0
            };
            score += idf * term_frequency * (BM25_K1 + 1.0)
                / (BM25_K1.mul_add(length_norm, term_frequency));
        }
        score
    }
}

// ============================================================================
// SECTION: Index Cache
// ============================================================================

/// One cached index with its build metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// The built index.
    index: Arc<Bm25Index>,
    /// Build time for TTL eviction.
    built_at: Instant,
    /// Document count at build time for invalidation.
    doc_count: usize,
}

/// Cache of BM25 indexes keyed by filter dimensions.
///
/// # Invariants
/// - Entries are invalidated when the corpus document count changes or the
///   TTL elapses.
#[derive(Debug)]
pub struct Bm25Cache {
    /// Cached entries keyed by the caller-supplied cache key.
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Cache TTL.
    ttl: Duration,
}

impl Bm25Cache {
    /// Creates a cache with the default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(INDEX_CACHE_TTL)
    }

    /// Creates a cache with a custom TTL (tests shorten it).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached index for `key`, rebuilding when stale.
    #[must_use]
    pub fn get_or_build(&self, key: &str, decisions: &[DecisionRecord]) -> Arc<Bm25Index> {
        let now = Instant::now();
        if let Ok(entries) = self.entries.lock() {
            if let Some(entry) = entries.get(key) {
                if now.duration_since(entry.built_at) < self.ttl
                    && entry.doc_count == decisions.len()
                {
                    return Arc::clone(&entry.index);
                }
            }
        }

        let index = Arc::new(Bm25Index::from_decisions(decisions));
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    index: Arc::clone(&index),
                    built_at: now,
                    doc_count: decisions.len(),
                },
            );
        }
        index
    }

    /// Drops one cached entry, or all entries when `key` is `None`.
    pub fn invalidate(&self, key: Option<&str>) {
        if let Ok(mut entries) = self.entries.lock() {
            match key {
                Some(key) => {
                    entries.remove(key);
                }
                None => entries.clear(),
            }
        }
    }
}

impl Default for Bm25Cache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::core::decision::DecisionRecord;
    use crate::core::enums::Category;
    use crate::core::enums::DecisionStatus;
    use crate::core::enums::Stakes;
    use crate::core::identifiers::DecisionId;

    use super::Bm25Cache;
    use super::Bm25Index;
    use super::tokenize;

    fn decision(id: &str, text: &str) -> DecisionRecord {
        DecisionRecord {
            id: DecisionId::new(id),
            summary: text.to_string(),
            decision: text.to_string(),
            category: Category::Security,
            confidence: 0.8,
            stakes: Stakes::Medium,
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
    fn tokenizer_lowercases_and_keeps_word_chars() {
        assert_eq!(
            tokenize("Implemented CSRF-protection in auth_middleware!"),
            vec!["implemented", "csrf", "protection", "in", "auth_middleware"]
        );
        assert!(tokenize("--- ***").is_empty());
    }

    #[test]
    fn exact_keyword_match_ranks_first() {
        let corpus = vec![
            decision("aaaaaaaa", "Implemented CSRF protection for form posts"),
            decision("bbbbbbbb", "OAuth login flow for the dashboard"),
            decision("cccccccc", "General security improvements"),
        ];
        let index = Bm25Index::from_decisions(&corpus);
        let results = index.search("CSRF", 10);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "aaaaaaaa");
        assert!(results[0].1 > 0.0);
    }

    #[test]
    fn empty_query_and_empty_corpus_return_nothing() {
        let index = Bm25Index::from_decisions(&[]);
        assert!(index.search("anything", 5).is_empty());

        let corpus = vec![decision("aaaaaaaa", "some text")];
        let index = Bm25Index::from_decisions(&corpus);
        assert!(index.search("   ", 5).is_empty());
    }

    #[test]
    fn cache_invalidates_on_doc_count_change() {
        let cache = Bm25Cache::with_ttl(Duration::from_secs(300));
        let corpus = vec![decision("aaaaaaaa", "first")];
        let first = cache.get_or_build("kw::", &corpus);
        assert_eq!(first.doc_count(), 1);

        let grown = vec![decision("aaaaaaaa", "first"), decision("bbbbbbbb", "second")];
        let rebuilt = cache.get_or_build("kw::", &grown);
        assert_eq!(rebuilt.doc_count(), 2);
    }

    #[test]
    fn cache_hits_within_ttl_for_same_corpus() {
        let cache = Bm25Cache::with_ttl(Duration::from_secs(300));
        let corpus = vec![decision("aaaaaaaa", "first")];
        let first = cache.get_or_build("kw::", &corpus);
        let second = cache.get_or_build("kw::", &corpus);
        assert!(std::sync::Arc::ptr_eq(&first, &second));
    }
}
