//! LLM backend implementations for Lifelog.
//!
//! Provides the OpenAI-compatible HTTP backend (which also covers Ollama's
//! compatible endpoint) and a scripted mock backend, plus a factory that
//! builds the right one from configuration.

mod backends;
mod factory;

pub use backends::mock::MockBackend;
pub use backends::openai::OpenAiBackend;
pub use factory::create_backend;
