//! LLM access for the WhatsApp engines, email generation, and enrichment.
//!
//! Callers depend on the `LlmProvider` trait; the concrete
//! OpenAI-compatible adapter lives in `openai`. Wire types stay private to
//! the provider module.

use async_trait::async_trait;
use thiserror::Error;

pub mod openai;

pub use openai::OpenAiProvider;

/// One turn of a chat exchange.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned unusable output: {0}")]
    BadOutput(String),

    #[error("No LLM provider is configured")]
    NotConfigured,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One round-trip: messages in, assistant text out.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Like `complete`, but asks the server to constrain the reply to a JSON
    /// schema. Callers still run the reply through `parse_json_response`
    /// since not every compatible server honors the constraint.
    async fn complete_json(
        &self,
        messages: &[ChatMessage],
        schema_name: &str,
        schema: &serde_json::Value,
    ) -> Result<String, LlmError>;
}

/// Parse a typed value out of a model reply.
///
/// Tries the raw text first, then the contents of a fenced code block, then
/// the outermost `{...}` span. Models wrap JSON in prose often enough that
/// all three are worth the attempt.
pub fn parse_json_response<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }
    if let Some(inner) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str(inner.trim()) {
            return Ok(value);
        }
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }
    let preview: String = trimmed.chars().take(200).collect();
    Err(LlmError::BadOutput(format!("expected JSON, got: {preview}")))
}

/// Contents of the first ``` fenced block, language tag stripped.
fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}
