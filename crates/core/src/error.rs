//! Error types for the turnloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type.

use thiserror::Error;

use crate::message::Message;

/// The top-level error type for all turnloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Loop termination errors ---
    #[error("Tool loop failed: {0}")]
    Loop(#[from] LoopError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    /// The connection dropped while the request was in flight; whether the
    /// provider processed it is unknown.
    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    /// The provider answered, but the structured body was null or missing
    /// its required fields (e.g. `"choices": null`).
    #[error("Provider returned a null response: {0}")]
    NullResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Fallback parse failed for {tool_name}: {reason}")]
    ParseFailed { tool_name: String, reason: String },
}

/// A batch of tool calls stopped partway through.
///
/// `completed` holds the results of the calls that did finish, in request
/// order. Nothing is ever synthesized for the call that failed or the ones
/// after it.
#[derive(Debug, Clone, Error)]
#[error("{error} (after {} completed result(s))", completed.len())]
pub struct ToolBatchError {
    pub completed: Vec<Message>,
    #[source]
    pub error: ToolError,
}

impl ToolBatchError {
    /// A failure before any call in the batch produced a result.
    pub fn empty(error: ToolError) -> Self {
        Self {
            completed: Vec::new(),
            error,
        }
    }
}

impl From<ToolError> for ToolBatchError {
    fn from(error: ToolError) -> Self {
        Self::empty(error)
    }
}

/// Fatal outcomes of a tool loop.
///
/// Every variant except [`LoopError::InvalidRequest`] can only happen on
/// the first iteration: later iterations stop quietly and keep the history
/// they built.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Model returned an empty tool-call list on the first iteration")]
    NoToolCallOnFirstIteration,

    #[error("Tool execution on the first iteration returned no usable data")]
    EmptyToolResultOnFirstIteration,

    #[error("Tool execution failed on the first iteration: {0}")]
    ToolExecutionFailedOnFirstIteration(#[source] ToolError),

    #[error("Initial model request failed: {0}")]
    InitialRequestFailed(#[source] ProviderError),

    #[error("Provider kept returning null responses after {attempts} retries: {last}")]
    ProviderRetriesExhausted {
        attempts: u32,
        #[source]
        last: ProviderError,
    },

    #[error("Invalid loop request: {0}")]
    InvalidRequest(String),
}
