// crates/cstp-providers/src/vector_chroma.rs
// ============================================================================
// Module: Chroma Vector Store
// Description: VectorStore over the Chroma HTTP v2 API.
// Purpose: Production vector backend for decision embeddings.
// Dependencies: cstp-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! Talks to a Chroma server through the v2 tenant/database API. The
//! collection id is resolved lazily and cached; `initialize` creates the
//! collection when it does not exist. All calls carry a 30-second deadline
//! and fail with [`VectorError`] so callers can degrade (a record succeeds
//! with `indexed=false` when the upsert fails).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cstp_core::interfaces::VectorError;
use cstp_core::interfaces::VectorResult;
use cstp_core::interfaces::VectorStore;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Deadline for Chroma API calls.
const CHROMA_TIMEOUT: Duration = Duration::from_secs(30);

/// Chroma connection configuration.
///
/// # Invariants
/// - `base_url` has no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromaConfig {
    /// Server base URL, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Tenant name.
    pub tenant: String,
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            tenant: "default_tenant".to_string(),
            database: "default_database".to_string(),
            collection: "decisions_gemini".to_string(),
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Chroma-backed vector store.
pub struct ChromaVectorStore {
    /// Connection configuration.
    config: ChromaConfig,
    /// HTTP client with the Chroma deadline applied.
    client: reqwest::Client,
    /// Cached collection id.
    collection_id: Mutex<Option<String>>,
}

impl std::fmt::Debug for ChromaVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChromaVectorStore")
            .field("base_url", &self.config.base_url)
            .field("collection", &self.config.collection)
            .finish_non_exhaustive()
    }
}

impl ChromaVectorStore {
    /// Creates a store for a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`VectorError::Backend`] when the HTTP client cannot be built.
    pub fn new(config: ChromaConfig) -> Result<Self, VectorError> {
        let client = reqwest::Client::builder()
            .timeout(CHROMA_TIMEOUT)
            .build()
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        Ok(Self {
            config,
            client,
            collection_id: Mutex::new(None),
        })
    }

    /// Database-scoped API root.
    fn api_base(&self) -> String {
        format!(
            "{}/api/v2/tenants/{}/databases/{}",
            self.config.base_url, self.config.tenant, self.config.database
        )
    }

    /// Resolves the collection id, creating the collection when asked.
    async fn resolve_collection(&self, create: bool) -> Result<Option<String>, VectorError> {
        if let Ok(cached) = self.collection_id.lock() {
            if let Some(id) = cached.as_ref() {
                return Ok(Some(id.clone()));
            }
        }

        let url = format!("{}/collections", self.api_base());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VectorError::Backend(format!(
                "collection list returned status {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        let collections = body.as_array().cloned().unwrap_or_default();
        let found = collections.iter().find_map(|c| {
            (c.get("name").and_then(Value::as_str) == Some(self.config.collection.as_str()))
                .then(|| c.get("id").and_then(Value::as_str).map(str::to_string))
                .flatten()
        });

        let id = match found {
            Some(id) => Some(id),
            None if create => {
                let response = self
                    .client
                    .post(&url)
                    .json(&json!({ "name": self.config.collection }))
                    .send()
                    .await
                    .map_err(|e| VectorError::Backend(e.to_string()))?;
                if !response.status().is_success() {
                    return Err(VectorError::CollectionUnavailable(format!(
                        "collection create returned status {}",
                        response.status()
                    )));
                }
                let created: Value = response
                    .json()
                    .await
                    .map_err(|e| VectorError::Backend(e.to_string()))?;
                created
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            }
            None => None,
        };

        if let Some(id) = &id {
            if let Ok(mut cached) = self.collection_id.lock() {
                *cached = Some(id.clone());
            }
        }
        Ok(id)
    }

    /// Posts a JSON payload to a collection endpoint.
    async fn post_collection(
        &self,
        collection_id: &str,
        action: &str,
        payload: &Value,
    ) -> Result<Value, VectorError> {
        let url = format!("{}/collections/{collection_id}/{action}", self.api_base());
        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VectorError::Backend(format!(
                "{action} returned status {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .or_else(|_| Ok(Value::Null))
    }
}

#[async_trait]
impl VectorStore for ChromaVectorStore {
    async fn initialize(&self) -> Result<(), VectorError> {
        self.resolve_collection(true).await?.map_or_else(
            || {
                Err(VectorError::CollectionUnavailable(
                    self.config.collection.clone(),
                ))
            },
            |_| Ok(()),
        )
    }

    async fn upsert(
        &self,
        doc_id: &str,
        document: &str,
        embedding: &[f32],
        metadata: Value,
    ) -> Result<(), VectorError> {
        let collection_id = self
            .resolve_collection(true)
            .await?
            .ok_or_else(|| VectorError::CollectionUnavailable(self.config.collection.clone()))?;
        let payload = json!({
            "ids": [doc_id],
            "documents": [document],
            "metadatas": [metadata],
            "embeddings": [embedding],
        });
        self.post_collection(&collection_id, "upsert", &payload)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        where_clause: Option<&Value>,
    ) -> Result<Vec<VectorResult>, VectorError> {
        let Some(collection_id) = self.resolve_collection(false).await? else {
            return Ok(Vec::new());
        };
        let mut payload = json!({
            "query_embeddings": [embedding],
            "n_results": n_results,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(clause) = where_clause {
            payload["where"] = clause.clone();
        }
        let body = self
            .post_collection(&collection_id, "query", &payload)
            .await?;

        let ids = nested_array(&body, "ids");
        let documents = nested_array(&body, "documents");
        let metadatas = nested_array(&body, "metadatas");
        let distances = nested_array(&body, "distances");

        let mut results = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            let Some(id) = id.as_str() else { continue };
            results.push(VectorResult {
                id: id.to_string(),
                document: documents
                    .get(index)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                metadata: metadatas.get(index).cloned().unwrap_or(Value::Null),
                distance: distances
                    .get(index)
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
            });
        }
        Ok(results)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), VectorError> {
        let Some(collection_id) = self.resolve_collection(false).await? else {
            return Ok(());
        };
        self.post_collection(&collection_id, "delete", &json!({ "ids": ids }))
            .await?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, VectorError> {
        let Some(collection_id) = self.resolve_collection(false).await? else {
            return Ok(0);
        };
        let url = format!("{}/collections/{collection_id}/count", self.api_base());
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        if !response.status().is_success() {
            return Err(VectorError::Backend(format!(
                "count returned status {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| VectorError::Backend(e.to_string()))?;
        usize::try_from(body.as_u64().unwrap_or(0))
            .map_err(|e| VectorError::Backend(e.to_string()))
    }

    async fn reset(&self) -> Result<(), VectorError> {
        if let Some(collection_id) = self.resolve_collection(false).await? {
            let url = format!("{}/collections/{collection_id}", self.api_base());
            let response = self
                .client
                .delete(&url)
                .send()
                .await
                .map_err(|e| VectorError::Backend(e.to_string()))?;
            if !response.status().is_success() {
                return Err(VectorError::Backend(format!(
                    "collection delete returned status {}",
                    response.status()
                )));
            }
        }
        if let Ok(mut cached) = self.collection_id.lock() {
            *cached = None;
        }
        self.resolve_collection(true).await?;
        Ok(())
    }

    async fn get_collection_id(&self) -> Result<Option<String>, VectorError> {
        self.resolve_collection(false).await
    }
}

/// Extracts the first nested array from a Chroma batched response field.
fn nested_array(body: &Value, field: &str) -> Vec<Value> {
    body.get(field)
        .and_then(Value::as_array)
        .and_then(|outer| outer.first())
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ChromaConfig;
    use super::nested_array;

    #[test]
    fn nested_arrays_unwrap_the_batch_dimension() {
        let body = json!({
            "ids": [["a", "b"]],
            "distances": [[0.1, 0.2]],
        });
        let ids = nested_array(&body, "ids");
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], json!("a"));
        assert!(nested_array(&body, "documents").is_empty());
    }

    #[test]
    fn default_config_targets_the_default_tenant() {
        let config = ChromaConfig::default();
        assert_eq!(config.tenant, "default_tenant");
        assert_eq!(config.collection, "decisions_gemini");
    }
}
