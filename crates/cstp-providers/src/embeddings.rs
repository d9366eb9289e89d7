// crates/cstp-providers/src/embeddings.rs
// ============================================================================
// Module: Embedding Providers
// Description: Gemini HTTP embeddings and a deterministic local provider.
// Purpose: Implement the EmbeddingProvider interface for production and tests.
// Dependencies: cstp-core, reqwest, serde_json, sha2
// ============================================================================

//! ## Overview
//! The Gemini provider calls the configured model's `embedContent`
//! endpoint (default `gemini-embedding-001`) with the API key in a header
//! and a 30-second deadline; inputs beyond the maximum length are
//! truncated before the call. The hash provider is a fully
//! local, deterministic fallback: it feature-hashes tokens into a fixed-
//! dimension vector, which keeps cosine distances meaningful for tests and
//! credential-less development.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use cstp_core::interfaces::EmbeddingError;
use cstp_core::interfaces::EmbeddingProvider;
use serde_json::Value;
use serde_json::json;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Deadline for embedding API calls.
const EMBED_TIMEOUT: Duration = Duration::from_secs(30);
/// Default Gemini embedding model identifier.
const DEFAULT_GEMINI_EMBED_MODEL: &str = "gemini-embedding-001";
/// Gemini embedding vector dimensionality.
const GEMINI_DIMENSIONS: usize = 768;
/// Hash provider vector dimensionality.
const HASH_DIMENSIONS: usize = 256;

// ============================================================================
// SECTION: Gemini Provider
// ============================================================================

/// Configuration for the Gemini embedding provider.
///
/// # Invariants
/// - `api_key` is never logged or echoed in errors.
#[derive(Debug, Clone)]
pub struct GeminiEmbeddingsConfig {
    /// API key sent via the `x-goog-api-key` header.
    pub api_key: String,
    /// Embedding model identifier.
    pub model: String,
    /// API base URL (overridable for tests).
    pub base_url: String,
}

impl GeminiEmbeddingsConfig {
    /// Creates a production configuration for an API key and the default
    /// embedding model.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_EMBED_MODEL.to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    /// Overrides the embedding model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Gemini embedding provider over HTTP.
#[derive(Debug)]
pub struct GeminiEmbeddings {
    /// Provider configuration.
    config: GeminiEmbeddingsConfig,
    /// Shared HTTP client with the embedding deadline applied.
    client: reqwest::Client,
}

impl GeminiEmbeddings {
    /// Creates a provider, validating that a key is present.
    ///
    /// # Errors
    ///
    /// Returns [`EmbeddingError::CredentialsMissing`] for an empty key and
    /// [`EmbeddingError::Provider`] when the HTTP client cannot be built.
    pub fn new(config: GeminiEmbeddingsConfig) -> Result<Self, EmbeddingError> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::CredentialsMissing(
                "gemini api key not configured".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let truncated: String = text.chars().take(self.max_length()).collect();
        let url = format!(
            "{}/models/{}:embedContent",
            self.config.base_url, self.config.model
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&json!({
                "content": { "parts": [{ "text": truncated }] },
            }))
            .send()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Provider(format!(
                "embedding api returned status {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Provider(e.to_string()))?;
        let values = body
            .get("embedding")
            .and_then(|e| e.get("values"))
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EmbeddingError::Provider("embedding response missing values".to_string())
            })?;
        #[allow(clippy::cast_possible_truncation, reason = "embedding components fit f32")]
        let vector: Vec<f32> = values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect();
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        GEMINI_DIMENSIONS
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// SECTION: Hash Provider
// ============================================================================

/// Deterministic local embedding provider.
///
/// Feature-hashes lowercased word tokens into a fixed-dimension vector and
/// L2-normalizes the result. Identical texts map to identical vectors and
/// token overlap produces smaller cosine distances, which is the property
/// retrieval tests rely on.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEmbeddings;

impl HashEmbeddings {
    /// Creates the provider.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let truncated: String = text.chars().take(self.max_length()).collect();
        let mut vector = vec![0.0f32; HASH_DIMENSIONS];
        for token in tokenize(&truncated) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = usize::from(digest[0]) << 8 | usize::from(digest[1]);
            let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket % HASH_DIMENSIONS] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for component in &mut vector {
                *component /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        HASH_DIMENSIONS
    }

    fn model_name(&self) -> &str {
        "hash-embeddings"
    }
}

/// Lowercased word tokens.
fn tokenize(text: &str) -> Vec<String> {
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
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use cstp_core::interfaces::EmbeddingProvider;

    use super::GeminiEmbeddings;
    use super::GeminiEmbeddingsConfig;
    use super::HashEmbeddings;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 { 0.0 } else { dot / (na * nb) }
    }

    #[tokio::test]
    async fn hash_embeddings_are_deterministic() -> Result<(), cstp_core::EmbeddingError> {
        let provider = HashEmbeddings::new();
        let a = provider.embed("CSRF protection for forms").await?;
        let b = provider.embed("CSRF protection for forms").await?;
        assert_eq!(a, b);
        assert_eq!(a.len(), provider.dimensions());
        Ok(())
    }

    #[tokio::test]
    async fn token_overlap_increases_similarity() -> Result<(), cstp_core::EmbeddingError> {
        let provider = HashEmbeddings::new();
        let csrf = provider.embed("Implemented CSRF protection").await?;
        let csrf_query = provider.embed("CSRF").await?;
        let oauth = provider.embed("OAuth login flow").await?;
        assert!(cosine(&csrf, &csrf_query) > cosine(&oauth, &csrf_query));
        Ok(())
    }

    #[test]
    fn gemini_requires_a_key() {
        let result = GeminiEmbeddings::new(GeminiEmbeddingsConfig::new(""));
        assert!(matches!(
            result,
            Err(cstp_core::EmbeddingError::CredentialsMissing(_))
        ));
    }

    #[test]
    fn gemini_model_defaults_and_overrides() -> Result<(), cstp_core::EmbeddingError> {
        let default = GeminiEmbeddings::new(GeminiEmbeddingsConfig::new("key"))?;
        assert_eq!(default.model_name(), "gemini-embedding-001");

        let overridden = GeminiEmbeddings::new(
            GeminiEmbeddingsConfig::new("key").with_model("text-embedding-004"),
        )?;
        assert_eq!(overridden.model_name(), "text-embedding-004");
        Ok(())
    }
}
