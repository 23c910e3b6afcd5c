//! Provider trait: the abstraction over the model invocation client.
//!
//! A Provider knows how to send a conversation plus tool definitions to a
//! model and get exactly one assistant turn back. How that maps onto a
//! vendor's wire format is the implementation's business.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::{Message, ToolCallRequest};

/// Per-invocation generation settings. Immutable for the duration of one loop.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Provider identifier (e.g., "openrouter", "anthropic")
    #[serde(default)]
    pub provider: String,

    /// The model to use (e.g., "anthropic/claude-sonnet-4")
    #[serde(default)]
    pub model_name: String,

    /// API key for the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Opaque id handed to the tool executor on every call
    #[serde(default)]
    pub tool_context_id: String,

    /// Provider-specific knobs (temperature, max_tokens, ...)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra_params: serde_json::Map<String, serde_json::Value>,
}

impl GenerationConfig {
    pub fn new(provider: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    pub fn with_tool_context(mut self, id: impl Into<String>) -> Self {
        self.tool_context_id = id.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra_params.insert(key.into(), value);
        self
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("provider", &self.provider)
            .field("model_name", &self.model_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_endpoint", &self.api_endpoint)
            .field("tool_context_id", &self.tool_context_id)
            .field("extra_params", &self.extra_params)
            .finish()
    }
}

/// A tool definition sent to the model so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    #[serde(default)]
    pub description: String,

    /// JSON Schema describing the tool's parameters
    #[serde(default = "empty_schema")]
    pub parameters: serde_json::Value,
}

fn empty_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: empty_schema(),
        }
    }
}

/// What gets sent to the model on each turn.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The full conversation so far
    pub messages: Vec<Message>,

    /// Available tools the model can call
    pub tools: Vec<ToolDefinition>,

    /// Generation settings for this loop
    pub config: GenerationConfig,
}

/// One complete assistant turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Generated text (may be empty when the model only calls tools)
    #[serde(default)]
    pub text: String,

    /// Structured tool calls; `None` if the model emitted none at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,

    /// Token usage statistics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    #[serde(default)]
    pub model: String,
}

impl ProviderResponse {
    /// Plain-text turn with no tool-call structure.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Turn that requests the given tool calls.
    pub fn tool_calls(text: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Some(calls),
            ..Self::default()
        }
    }

    /// Turn this response into the assistant message that gets appended.
    pub fn into_message(self) -> Message {
        Message::Assistant {
            text: self.text,
            tool_calls: self.tool_calls,
        }
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The model invocation client.
///
/// Every backend implements this trait. The loop calls `complete()` once per
/// iteration (plus retries) without knowing which vendor sits behind it.
/// Implementations are stateless per call and shared across loops.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openrouter", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete assistant turn.
    async fn complete(&self, request: ProviderRequest) -> std::result::Result<ProviderResponse, ProviderError>;
}
