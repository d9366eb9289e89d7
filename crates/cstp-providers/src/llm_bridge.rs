// crates/cstp-providers/src/llm_bridge.rs
// ============================================================================
// Module: LLM Bridge Client
// Description: Best-effort bridge abstraction via Gemini generateContent.
// Purpose: Produce genuine structure/function abstractions when credentials
//          and quota allow; absence is never an error.
// Dependencies: cstp-core, reqwest, serde_json
// ============================================================================

//! ## Overview
//! The language-model bridge is a best-effort external dependency with a
//! 10-second deadline. Missing credentials, timeouts, and safety-filtered
//! empty responses all yield `None`; callers fall back to the rule-based
//! abstractor and record which method was used.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use cstp_core::core::BridgeDefinition;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Deadline for LLM bridge calls.
const BRIDGE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default Gemini model for bridge abstraction.
const DEFAULT_BRIDGE_MODEL: &str = "gemini-2.0-flash";

/// Prompt template for bridge abstraction.
const BRIDGE_PROMPT: &str = "Given this decision record, generate an abstract bridge-definition.\n\n\
Decision: {decision}\nContext: {context}\nReasons: {reasons}\nPattern: {pattern}\n\n\
Generate TWO fields:\n\
1. STRUCTURE: What does this decision look like as an abstract pattern? Strip all specific names, numbers, and project details. Describe the recognizable form.\n\
2. FUNCTION: What problem does this abstract pattern solve? Why would someone use this approach?\n\n\
Keep each to 1-2 sentences. Be abstract - this should match similar decisions across different projects.\n\n\
Reply in this exact format:\nSTRUCTURE: <your answer>\nFUNCTION: <your answer>";

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Fields handed to the bridge abstractor.
#[derive(Debug, Clone, Default)]
pub struct BridgePromptFields {
    /// Decision text.
    pub decision: String,
    /// Optional context.
    pub context: String,
    /// Rendered `type: text` reason lines.
    pub reasons: String,
    /// Optional pattern.
    pub pattern: String,
}

/// Best-effort language-model bridge abstraction.
#[async_trait]
pub trait LlmBridge: Send + Sync {
    /// Attempts abstraction; `None` on any failure.
    async fn extract(&self, fields: &BridgePromptFields) -> Option<BridgeDefinition>;
}

/// Bridge client that always declines (no credentials configured).
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledLlmBridge;

#[async_trait]
impl LlmBridge for DisabledLlmBridge {
    async fn extract(&self, _fields: &BridgePromptFields) -> Option<BridgeDefinition> {
        None
    }
}

// ============================================================================
// SECTION: Gemini Client
// ============================================================================

/// Gemini generateContent bridge client.
#[derive(Debug)]
pub struct GeminiLlmBridge {
    /// API key sent via the `x-goog-api-key` header.
    api_key: String,
    /// Model identifier.
    model: String,
    /// API base URL (overridable for tests).
    base_url: String,
    /// HTTP client with the bridge deadline applied.
    client: Option<reqwest::Client>,
}

impl GeminiLlmBridge {
    /// Creates a client; an empty key produces a permanently declining one.
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        let api_key = api_key.into();
        let client = if api_key.trim().is_empty() {
            None
        } else {
            reqwest::Client::builder()
                .timeout(BRIDGE_TIMEOUT)
                .build()
                .ok()
        };
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_BRIDGE_MODEL.to_string()),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            client,
        }
    }
}

#[async_trait]
impl LlmBridge for GeminiLlmBridge {
    async fn extract(&self, fields: &BridgePromptFields) -> Option<BridgeDefinition> {
        let client = self.client.as_ref()?;
        let prompt = BRIDGE_PROMPT
            .replace("{decision}", &fields.decision)
            .replace("{context}", &fields.context)
            .replace(
                "{reasons}",
                if fields.reasons.is_empty() {
                    "none"
                } else {
                    &fields.reasons
                },
            )
            .replace(
                "{pattern}",
                if fields.pattern.is_empty() {
                    "none"
                } else {
                    &fields.pattern
                },
            );

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let response = client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }],
                "generationConfig": { "temperature": 0.3, "maxOutputTokens": 256 },
            }))
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: Value = response.json().await.ok()?;
        let text = body
            .get("candidates")?
            .as_array()?
            .first()?
            .get("content")?
            .get("parts")?
            .as_array()?
            .first()?
            .get("text")?
            .as_str()?;
        parse_bridge_reply(text)
    }
}

/// Parses the `STRUCTURE:`/`FUNCTION:` reply format.
#[must_use]
pub fn parse_bridge_reply(text: &str) -> Option<BridgeDefinition> {
    let mut structure = String::new();
    let mut function = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        let upper = trimmed.to_uppercase();
        if upper.starts_with("STRUCTURE:") {
            structure = trimmed
                .get("STRUCTURE:".len()..)
                .unwrap_or_default()
                .trim()
                .to_string();
        } else if upper.starts_with("FUNCTION:") {
            function = trimmed
                .get("FUNCTION:".len()..)
                .unwrap_or_default()
                .trim()
                .to_string();
        }
    }
    if structure.is_empty() && function.is_empty() {
        return None;
    }
    let resolved_structure = if structure.is_empty() {
        function.clone()
    } else {
        structure.clone()
    };
    let resolved_function = if function.is_empty() { structure } else { function };
    Some(BridgeDefinition {
        structure: resolved_structure,
        function: resolved_function,
        enforcement: Vec::new(),
        prevention: Vec::new(),
        tolerance: Vec::new(),
    })
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::BridgePromptFields;
    use super::DisabledLlmBridge;
    use super::GeminiLlmBridge;
    use super::LlmBridge;
    use super::parse_bridge_reply;

    #[test]
    fn reply_parsing_handles_both_fields() {
        let parsed = parse_bridge_reply(
            "STRUCTURE: Replaced a component with an equivalent.\nFUNCTION: Reduces maintenance burden.",
        );
        let Some(parsed) = parsed else {
            return assert!(parsed.is_some());
        };
        assert_eq!(parsed.structure, "Replaced a component with an equivalent.");
        assert_eq!(parsed.function, "Reduces maintenance burden.");
    }

    #[test]
    fn structure_falls_back_to_function() {
        let parsed = parse_bridge_reply("FUNCTION: Keeps deploys reversible.");
        let Some(parsed) = parsed else {
            return assert!(parsed.is_some());
        };
        assert_eq!(parsed.structure, "Keeps deploys reversible.");
    }

    #[test]
    fn empty_reply_parses_to_none() {
        assert!(parse_bridge_reply("I cannot help with that.").is_none());
    }

    #[tokio::test]
    async fn missing_credentials_decline_quietly() {
        let disabled = DisabledLlmBridge;
        assert!(disabled.extract(&BridgePromptFields::default()).await.is_none());

        let keyless = GeminiLlmBridge::new("", None);
        assert!(keyless.extract(&BridgePromptFields::default()).await.is_none());
    }
}
