//! Runtime configuration.
//!
//! Defaults live here; every setting can be overridden through a
//! `LIFELOG_*` environment variable. The composition root builds a
//! [`Config`] once at startup and hands pieces to each component; nothing
//! reads the environment after that.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default endpoints for LLM providers.
pub mod endpoints {
    pub const OLLAMA: &str = "http://localhost:11434/v1";
    pub const OPENAI: &str = "https://api.openai.com/v1";
}

/// Default models.
pub mod models {
    pub const OLLAMA_DEFAULT: &str = "qwen3:4b";
    pub const OPENAI_DEFAULT: &str = "gpt-4o-mini";
}

/// Environment variable names.
pub mod env_vars {
    pub const DATABASE_PATH: &str = "LIFELOG_DATABASE";
    pub const EXTENSION_DIR: &str = "LIFELOG_EXTENSION_DIR";
    pub const LLM_PROVIDER: &str = "LIFELOG_LLM_PROVIDER";
    pub const LLM_ENDPOINT: &str = "LIFELOG_LLM_ENDPOINT";
    pub const LLM_API_KEY: &str = "LIFELOG_LLM_API_KEY";
    pub const LLM_MODEL: &str = "LIFELOG_LLM_MODEL";
    pub const LLM_TIMEOUT_SECS: &str = "LIFELOG_LLM_TIMEOUT_SECS";
    pub const WORKERS: &str = "LIFELOG_WORKERS";
    pub const DEDUP_WINDOW_SECS: &str = "LIFELOG_DEDUP_WINDOW_SECS";
}

/// LLM backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider key: "openai", "ollama", or "mock".
    pub provider: String,
    /// Endpoint override. Defaults to the provider's well-known endpoint.
    pub endpoint: Option<String>,
    /// API key, if the provider needs one.
    pub api_key: Option<String>,
    /// Model override. Defaults to the provider's default model.
    pub model: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Sampling temperature. Low by default: routing decisions should be
    /// stable.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            endpoint: None,
            api_key: None,
            model: None,
            timeout_secs: 60,
            temperature: 0.2,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// SQLite database path.
    pub database_path: PathBuf,
    /// Directory scanned for extension manifests.
    pub extension_dir: PathBuf,
    /// LLM backend settings.
    pub llm: LlmConfig,
    /// Dedup window in seconds.
    pub dedup_window_secs: u64,
    /// Dedup buffer capacity.
    pub dedup_max_size: usize,
    /// Dispatcher worker pool size.
    pub workers: usize,
    /// Deadline for the routing decision call, in seconds. 0 disables it.
    pub decision_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("lifelog.db"),
            extension_dir: PathBuf::from("extensions"),
            llm: LlmConfig::default(),
            dedup_window_secs: crate::dedup::DEFAULT_WINDOW_SECS,
            dedup_max_size: crate::dedup::DEFAULT_MAX_SIZE,
            workers: crate::dispatch::DEFAULT_WORKERS,
            decision_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Defaults overridden by `LIFELOG_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = env(env_vars::DATABASE_PATH) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(dir) = env(env_vars::EXTENSION_DIR) {
            config.extension_dir = PathBuf::from(dir);
        }
        if let Some(provider) = env(env_vars::LLM_PROVIDER) {
            config.llm.provider = provider;
        }
        if let Some(endpoint) = env(env_vars::LLM_ENDPOINT) {
            config.llm.endpoint = Some(endpoint);
        }
        if let Some(key) = env(env_vars::LLM_API_KEY) {
            config.llm.api_key = Some(key);
        }
        if let Some(model) = env(env_vars::LLM_MODEL) {
            config.llm.model = Some(model);
        }
        if let Some(secs) = env_parse(env_vars::LLM_TIMEOUT_SECS) {
            config.llm.timeout_secs = secs;
        }
        if let Some(workers) = env_parse(env_vars::WORKERS) {
            config.workers = workers;
        }
        if let Some(secs) = env_parse(env_vars::DEDUP_WINDOW_SECS) {
            config.dedup_window_secs = secs;
        }

        config
    }

    /// Resolved LLM endpoint for the configured provider.
    pub fn llm_endpoint(&self) -> &str {
        if let Some(endpoint) = &self.llm.endpoint {
            return endpoint;
        }
        match self.llm.provider.as_str() {
            "openai" => endpoints::OPENAI,
            _ => endpoints::OLLAMA,
        }
    }

    /// Resolved model for the configured provider.
    pub fn llm_model(&self) -> &str {
        if let Some(model) = &self.llm.model {
            return model;
        }
        match self.llm.provider.as_str() {
            "openai" => models::OPENAI_DEFAULT,
            _ => models::OLLAMA_DEFAULT,
        }
    }
}

fn env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env(name).and_then(|v| v.parse().ok())
}
