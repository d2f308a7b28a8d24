//! Backend construction from configuration.

use std::sync::Arc;

use lifelog_core::config::Config;
use lifelog_core::llm::{LlmBackend, LlmError};

use crate::backends::mock::MockBackend;
use crate::backends::openai::OpenAiBackend;

/// Build the configured LLM backend.
///
/// `openai` and `ollama` share the OpenAI-compatible HTTP backend and
/// differ only in resolved endpoint and model; `mock` is the scripted
/// backend for tests and offline runs.
pub fn create_backend(config: &Config) -> Result<Arc<dyn LlmBackend>, LlmError> {
    match config.llm.provider.as_str() {
        "mock" => Ok(Arc::new(MockBackend::new())),
        "openai" | "ollama" => Ok(Arc::new(OpenAiBackend::from_config(config)?)),
        other => Err(LlmError::Backend(format!(
            "unknown llm provider: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".to_string();
        assert!(create_backend(&config).is_err());
    }

    #[test]
    fn test_known_providers_build() {
        let mut config = Config::default();
        for provider in ["mock", "ollama", "openai"] {
            config.llm.provider = provider.to_string();
            assert!(create_backend(&config).is_ok(), "provider {}", provider);
        }
    }
}
