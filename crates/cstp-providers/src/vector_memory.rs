// crates/cstp-providers/src/vector_memory.rs
// ============================================================================
// Module: In-Memory Vector Store
// Description: Cosine-distance vector store with where-clause filtering.
// Purpose: Backend-free VectorStore for tests and development.
// Dependencies: cstp-core, serde_json
// ============================================================================

//! ## Overview
//! A map-backed vector store using cosine distance and the full where-
//! clause operator set: exact match, `$gte`, `$lte`, `$gt`, `$lt`, `$ne`,
//! `$in`, `$nin`, `$contains`, `$or`, `$and`. Suitable wherever the Chroma
//! backend is unavailable; the memory storage backend also uses it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use cstp_core::interfaces::VectorError;
use cstp_core::interfaces::VectorResult;
use cstp_core::interfaces::VectorStore;
use serde_json::Value;

// ============================================================================
// SECTION: Store
// ============================================================================

/// One stored document.
#[derive(Debug, Clone)]
struct StoredDoc {
    /// Document text.
    document: String,
    /// Embedding vector.
    embedding: Vec<f32>,
    /// Filterable metadata.
    metadata: Value,
}

/// In-memory vector store.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    /// Documents by id.
    docs: Mutex<BTreeMap<String, StoredDoc>>,
    /// Whether `initialize` (or `reset`) has run.
    initialized: AtomicBool,
}

impl MemoryVectorStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn initialize(&self) -> Result<(), VectorError> {
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn upsert(
        &self,
        doc_id: &str,
        document: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> Result<(), VectorError> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| VectorError::Backend("memory store poisoned".to_string()))?;
        docs.insert(
            doc_id.to_string(),
            StoredDoc {
                document: document.to_string(),
                embedding: embedding.to_vec(),
                metadata,
            },
        );
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        where_clause: Option<&Value>,
    ) -> Result<Vec<VectorResult>, VectorError> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| VectorError::Backend("memory store poisoned".to_string()))?;
        let mut results: Vec<VectorResult> = docs
            .iter()
            .filter(|(_, doc)| {
                where_clause.is_none_or(|clause| matches_where(&doc.metadata, clause))
            })
            .map(|(id, doc)| VectorResult {
                id: id.clone(),
                document: doc.document.clone(),
                metadata: doc.metadata.clone(),
                distance: cosine_distance(embedding, &doc.embedding),
            })
            .collect();
        results.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(n_results);
        Ok(results)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), VectorError> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| VectorError::Backend("memory store poisoned".to_string()))?;
        for id in ids {
            docs.remove(id);
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize, VectorError> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| VectorError::Backend("memory store poisoned".to_string()))?;
        Ok(docs.len())
    }

    async fn reset(&self) -> Result<(), VectorError> {
        let mut docs = self
            .docs
            .lock()
            .map_err(|_| VectorError::Backend("memory store poisoned".to_string()))?;
        docs.clear();
        self.initialized.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn get_collection_id(&self) -> Result<Option<String>, VectorError> {
        let docs = self
            .docs
            .lock()
            .map_err(|_| VectorError::Backend("memory store poisoned".to_string()))?;
        let exists = self.initialized.load(Ordering::Relaxed) || !docs.is_empty();
        Ok(exists.then(|| "memory-collection".to_string()))
    }
}

// ============================================================================
// SECTION: Distance
// ============================================================================

/// Cosine distance; mismatched or zero vectors read as maximally distant.
fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 1.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    f64::from(1.0 - dot / (norm_a * norm_b))
}

// ============================================================================
// SECTION: Where-Clause Evaluation
// ============================================================================

/// Evaluates a where clause against document metadata.
#[must_use]
pub fn matches_where(metadata: &Value, clause: &Value) -> bool {
    let Some(conditions) = clause.as_object() else {
        return false;
    };
    for (key, condition) in conditions {
        match key.as_str() {
            "$or" => {
                let Some(subclauses) = condition.as_array() else {
                    return false;
                };
                if subclauses.is_empty()
                    || !subclauses.iter().any(|sub| matches_where(metadata, sub))
                {
                    return false;
                }
            }
            "$and" => {
                let Some(subclauses) = condition.as_array() else {
                    return false;
                };
                if subclauses.is_empty()
                    || !subclauses.iter().all(|sub| matches_where(metadata, sub))
                {
                    return false;
                }
            }
            field => {
                let value = metadata.get(field);
                if let Some(operators) = condition.as_object() {
                    let is_operator_map = operators.keys().any(|k| k.starts_with('$'));
                    if is_operator_map {
                        for (op, target) in operators {
                            if !eval_operator(op, value, target) {
                                return false;
                            }
                        }
                        continue;
                    }
                }
                if value != Some(condition) {
                    return false;
                }
            }
        }
    }
    true
}

/// Evaluates one comparison operator.
///
/// A missing field fails every operator, `$nin` included.
fn eval_operator(op: &str, value: Option<&Value>, target: &Value) -> bool {
    let Some(value) = value else {
        return false;
    };
    match op {
        "$gte" => compare(value, target).is_some_and(|o| o.is_ge()),
        "$lte" => compare(value, target).is_some_and(|o| o.is_le()),
        "$gt" => compare(value, target).is_some_and(|o| o.is_gt()),
        "$lt" => compare(value, target).is_some_and(|o| o.is_lt()),
        "$ne" => value != target,
        "$in" => target.as_array().is_some_and(|items| items.contains(value)),
        "$nin" => target
            .as_array()
            .is_none_or(|items| !items.contains(value)),
        "$contains" => match value {
            Value::String(haystack) => target
                .as_str()
                .is_some_and(|needle| haystack.contains(needle)),
            Value::Array(items) => items.contains(target),
            _ => false,
        },
        _ => false,
    }
}

/// Orders two JSON values numerically or lexicographically.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::interfaces::VectorStore;
    use serde_json::json;

    use super::MemoryVectorStore;
    use super::matches_where;

    #[test]
    fn operators_cover_the_clause_language() {
        let meta = json!({
            "category": "security",
            "confidence": 0.8,
            "tags": ["auth", "csrf"],
            "status": "pending",
        });
        assert!(matches_where(&meta, &json!({ "category": "security" })));
        assert!(!matches_where(&meta, &json!({ "category": "process" })));
        assert!(matches_where(&meta, &json!({ "confidence": { "$gte": 0.5 } })));
        assert!(!matches_where(&meta, &json!({ "confidence": { "$gt": 0.8 } })));
        assert!(matches_where(&meta, &json!({ "confidence": { "$lte": 0.8 } })));
        assert!(matches_where(&meta, &json!({ "status": { "$ne": "reviewed" } })));
        assert!(matches_where(&meta, &json!({ "status": { "$in": ["pending", "reviewed"] } })));
        assert!(matches_where(&meta, &json!({ "status": { "$nin": ["reviewed"] } })));
        assert!(matches_where(&meta, &json!({ "tags": { "$contains": "csrf" } })));
        assert!(!matches_where(&meta, &json!({ "tags": { "$contains": "oauth" } })));
        assert!(matches_where(
            &meta,
            &json!({ "$or": [{ "category": "process" }, { "category": "security" }] })
        ));
        assert!(matches_where(
            &meta,
            &json!({ "$and": [{ "category": "security" }, { "confidence": { "$gte": 0.5 } }] })
        ));
        assert!(!matches_where(&meta, &json!({ "missing": { "$gte": 1 } })));
        assert!(!matches_where(&meta, &json!({ "missing": { "$nin": ["x"] } })));
    }

    #[tokio::test]
    async fn query_orders_by_ascending_distance() -> Result<(), cstp_core::VectorError> {
        let store = MemoryVectorStore::new();
        store
            .upsert("near", "near doc", &[1.0, 0.0], json!({}))
            .await?;
        store
            .upsert("far", "far doc", &[0.0, 1.0], json!({}))
            .await?;
        store
            .upsert("middle", "middle doc", &[0.7, 0.7], json!({}))
            .await?;

        let results = store.query(&[1.0, 0.0], 10, None).await?;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "near");
        assert_eq!(results[2].id, "far");
        Ok(())
    }

    #[tokio::test]
    async fn where_clause_filters_results() -> Result<(), cstp_core::VectorError> {
        let store = MemoryVectorStore::new();
        store
            .upsert("a", "a", &[1.0, 0.0], json!({ "category": "security" }))
            .await?;
        store
            .upsert("b", "b", &[1.0, 0.0], json!({ "category": "process" }))
            .await?;

        let clause = json!({ "category": "security" });
        let results = store.query(&[1.0, 0.0], 10, Some(&clause)).await?;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        Ok(())
    }

    #[tokio::test]
    async fn reset_and_count_round_trip() -> Result<(), cstp_core::VectorError> {
        let store = MemoryVectorStore::new();
        store.upsert("a", "a", &[1.0], json!({})).await?;
        assert_eq!(store.count().await?, 1);
        store.reset().await?;
        assert_eq!(store.count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn collection_id_requires_initialization_or_documents()
    -> Result<(), cstp_core::VectorError> {
        let store = MemoryVectorStore::new();
        assert_eq!(store.get_collection_id().await?, None);

        store.upsert("a", "a", &[1.0], json!({})).await?;
        assert_eq!(
            store.get_collection_id().await?.as_deref(),
            Some("memory-collection")
        );

        let initialized = MemoryVectorStore::new();
        initialized.initialize().await?;
        assert_eq!(
            initialized.get_collection_id().await?.as_deref(),
            Some("memory-collection")
        );
        Ok(())
    }
}
