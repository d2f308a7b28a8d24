//! OpenAI-compatible chat completion backend.
//!
//! Works against any `/chat/completions` endpoint: OpenAI itself, or a
//! local Ollama instance through its OpenAI-compatible API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use lifelog_core::config::Config;
use lifelog_core::llm::{LlmBackend, LlmError};

/// HTTP backend for OpenAI-compatible providers.
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenAiBackend {
    /// Build a backend from resolved settings.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
        timeout_secs: u64,
    ) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Backend(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
        })
    }

    /// Build a backend from the runtime configuration.
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::new(
            config.llm_endpoint(),
            config.llm.api_key.clone(),
            config.llm_model(),
            config.llm.temperature,
            config.llm.timeout_secs,
        )
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
        });

        debug!(model = %self.model, prompt_len = prompt.len(), "llm request");

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Backend(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Backend(format!(
                "provider returned {}: {}",
                status, detail
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| LlmError::Backend(e.to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Unparseable("completion had no content".into()))
    }
}
