//! Scripted mock backend.
//!
//! Returns queued responses in order and records every prompt it sees.
//! Used in tests and for offline smoke runs; an exhausted script surfaces
//! as a backend error, which exercises callers' decision-failure paths.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use lifelog_core::llm::{LlmBackend, LlmError};

/// Deterministic, scriptable LLM backend.
#[derive(Default)]
pub struct MockBackend {
    responses: Mutex<VecDeque<serde_json::Value>>,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next response.
    pub fn push_response(&self, response: serde_json::Value) {
        self.responses.lock().push_back(response);
    }

    /// Prompts seen so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of queued responses left.
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        self.generate_json(prompt).await.map(|v| v.to_string())
    }

    async fn generate_json(&self, prompt: &str) -> Result<serde_json::Value, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| LlmError::Backend("mock backend: no scripted response left".into()))
    }
}
