//! Unified request/response types shared by all channels.
//!
//! Channel adapters (CLI, chat session) translate their native input into a
//! [`ChannelRequest`] and render a [`ChannelResponse`] back to the user.

use serde::{Deserialize, Serialize};

/// JSON object map used for free-form context, params, and metadata.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// The access channel a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// One-shot command-line invocation.
    Cli,
    /// Interactive chat session (webhook-style delivery, may retry).
    Chat,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Chat => write!(f, "chat"),
        }
    }
}

/// Unified inbound request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    /// User identity as the channel knows it.
    pub user_id: String,
    /// Raw natural-language input.
    pub input_text: String,
    /// Originating channel.
    pub channel: Channel,
    /// Free-form request context.
    #[serde(default)]
    pub context: JsonMap,
    /// Free-form channel metadata.
    #[serde(default)]
    pub metadata: JsonMap,
}

impl ChannelRequest {
    /// Create a request with empty context and metadata.
    pub fn new(user_id: impl Into<String>, input_text: impl Into<String>, channel: Channel) -> Self {
        Self {
            user_id: user_id.into(),
            input_text: input_text.into(),
            channel,
            context: JsonMap::new(),
            metadata: JsonMap::new(),
        }
    }
}

/// Unified outbound response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    /// Whether the request was handled successfully.
    pub success: bool,
    /// Human-readable message for the user.
    #[serde(default)]
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error text when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Response metadata. May carry a `markdown` rendering hint for rich
    /// display channels.
    #[serde(default)]
    pub metadata: JsonMap,
}

impl ChannelResponse {
    /// Successful response with a plain message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            error: None,
            metadata: JsonMap::new(),
        }
    }

    /// Failed response with an error description.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: String::new(),
            data: None,
            error: Some(error.into()),
            metadata: JsonMap::new(),
        }
    }

    /// Attach structured data.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
