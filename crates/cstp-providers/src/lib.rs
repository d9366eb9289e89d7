// crates/cstp-providers/src/lib.rs
// ============================================================================
// Module: CSTP Providers
// Description: Embedding, vector-store, and LLM-bridge backends.
// Purpose: Concrete implementations of the cstp-core provider interfaces.
// Dependencies: async-trait, cstp-core, reqwest, serde_json, sha2
// ============================================================================

//! ## Overview
//! Backends for the abstract interfaces in `cstp-core`: the Gemini
//! embedding provider and a deterministic local fallback, an in-memory
//! vector store and the Chroma HTTP store, and the best-effort LLM bridge
//! client. Every network call carries an explicit deadline; transient
//! failures surface as typed errors the callers degrade on.

// ============================================================================
// SECTION: Modules
// ============================================================================

/// Embedding providers.
pub mod embeddings;
/// LLM bridge abstraction client.
pub mod llm_bridge;
/// Chroma HTTP vector store.
pub mod vector_chroma;
/// In-memory vector store.
pub mod vector_memory;

// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use embeddings::GeminiEmbeddings;
pub use embeddings::GeminiEmbeddingsConfig;
pub use embeddings::HashEmbeddings;
pub use llm_bridge::BridgePromptFields;
pub use llm_bridge::DisabledLlmBridge;
pub use llm_bridge::GeminiLlmBridge;
pub use llm_bridge::LlmBridge;
pub use llm_bridge::parse_bridge_reply;
pub use vector_chroma::ChromaConfig;
pub use vector_chroma::ChromaVectorStore;
pub use vector_memory::MemoryVectorStore;
pub use vector_memory::matches_where;
