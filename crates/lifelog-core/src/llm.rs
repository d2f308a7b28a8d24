//! Abstract LLM backend.
//!
//! The router uses a language model as its sole decision oracle, and
//! extensions use it for field extraction and query generation. Both go
//! through this trait; concrete backends (OpenAI-compatible HTTP, mock)
//! live in `lifelog-llm`, and tests substitute deterministic stubs.

use async_trait::async_trait;
use thiserror::Error;

/// LLM backend errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport or provider failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// The model returned text that does not contain a JSON object.
    #[error("unparseable response: {0}")]
    Unparseable(String),

    /// The call exceeded its deadline.
    #[error("llm call timed out")]
    Timeout,
}

/// A language model capable of text and JSON completion.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Generate a text completion for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;

    /// Generate a completion and parse it as a single JSON value.
    ///
    /// The default implementation runs [`generate`](Self::generate) and
    /// extracts the JSON payload, tolerating markdown code fences.
    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, LlmError> {
        let text = self.generate(prompt).await?;
        extract_json(&text)
    }
}

/// Extract a JSON value from model output.
///
/// Models frequently wrap JSON in ```json fences or prepend prose; this
/// strips fences and falls back to the outermost brace span.
pub fn extract_json(text: &str) -> Result<serde_json::Value, LlmError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    // Strip a markdown code fence if present.
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        if let Some(end) = rest.rfind("```") {
            let inner = rest[..end].trim();
            if let Ok(value) = serde_json::from_str(inner) {
                return Ok(value);
            }
        }
    }

    // Fall back to the outermost brace span.
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(LlmError::Unparseable(truncate(trimmed, 120)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
