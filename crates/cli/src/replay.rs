//! Offline replay of a recorded session.
//!
//! A session file scripts everything outside the loop: the model's turns
//! (or its failures) in call order, and the text each tool answers with.
//! Replaying it runs the real loop, executor and fallback parsers against
//! that script, which makes loop behavior reproducible without a provider.
//!
//! ```json
//! {
//!   "messages": [{"role": "user", "text": "tidy chapter 2"}],
//!   "tools": [{"name": "search_scenes", "description": "Search scenes"}],
//!   "responses": [
//!     {"response": {"tool_calls": [{"id": "c1", "name": "search_scenes", "arguments": "{}"}]}},
//!     {"error": {"kind": "null_response"}},
//!     {"response": {"text": "Done."}}
//!   ],
//!   "tool_outputs": {"search_scenes": "{\"nodes\": [{\"id\": 4}]}"}
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use turnloop_agent::{LoopOutcome, LoopRequest, RetryPolicy, ToolLoop};
use turnloop_config::LoopSettings;
use turnloop_core::error::{LoopError, ProviderError, ToolError};
use turnloop_core::message::Message;
use turnloop_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
use turnloop_core::tool::{Tool, ToolOutput, ToolRegistry};
use turnloop_tools::{RegistryExecutor, default_parsers};

/// Output of a declared tool with no scripted answer.
pub const DEFAULT_TOOL_OUTPUT: &str = "ok";

/// A recorded session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    /// Initial history
    pub messages: Vec<Message>,

    /// Tools offered to the model
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    /// Model turns, one per call, retries included
    #[serde(default)]
    pub responses: Vec<ScriptedTurn>,

    /// Tool name -> result text
    #[serde(default)]
    pub tool_outputs: HashMap<String, String>,
}

impl Session {
    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let content = std::fs::read_to_string(path).map_err(|e| ReplayError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ReplayError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One scripted model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedTurn {
    Response(ProviderResponse),
    Error(ScriptedError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedError {
    pub kind: ScriptedErrorKind,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedErrorKind {
    NullResponse,
    ConnectionReset,
    StreamInterrupted,
    Timeout,
    Network,
    Authentication,
    Api,
}

impl From<&ScriptedError> for ProviderError {
    fn from(scripted: &ScriptedError) -> Self {
        let message = scripted.message.clone();
        match scripted.kind {
            ScriptedErrorKind::NullResponse => ProviderError::NullResponse(message),
            ScriptedErrorKind::ConnectionReset => ProviderError::ConnectionReset(message),
            ScriptedErrorKind::StreamInterrupted => ProviderError::StreamInterrupted(message),
            ScriptedErrorKind::Timeout => ProviderError::Timeout(message),
            ScriptedErrorKind::Network => ProviderError::Network(message),
            ScriptedErrorKind::Authentication => ProviderError::AuthenticationFailed(message),
            ScriptedErrorKind::Api => ProviderError::ApiError {
                status_code: 500,
                message,
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Failed to read session file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Invalid session file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Loop(#[from] LoopError),
}

impl From<ReplayError> for turnloop_core::Error {
    fn from(e: ReplayError) -> Self {
        match e {
            ReplayError::Read { .. } => turnloop_core::Error::Config {
                message: e.to_string(),
            },
            ReplayError::Parse(e) => turnloop_core::Error::Serialization(e),
            ReplayError::Loop(e) => turnloop_core::Error::Loop(e),
        }
    }
}

/// Plays back the scripted turns in order.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "replay"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let next = self
            .turns
            .lock()
            .map_err(|_| ProviderError::NotConfigured("replay script lock poisoned".into()))?
            .pop_front();

        match next {
            Some(ScriptedTurn::Response(response)) => Ok(response),
            Some(ScriptedTurn::Error(error)) => Err(ProviderError::from(&error)),
            None => Err(ProviderError::NotConfigured(
                "replay script has no more responses".into(),
            )),
        }
    }
}

/// A tool that always answers with the same text.
pub struct ScriptedTool {
    name: String,
    description: String,
    output: String,
}

impl ScriptedTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: "Scripted replay tool".into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _context_id: &str,
    ) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput::ok(self.output.clone()))
    }
}

/// Knobs the command line can turn.
#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Overrides `max_iterations` from the settings
    pub max_iterations: Option<u32>,
    /// Skip retry backoff and transport pauses
    pub no_delay: bool,
}

/// Run `session` through a tool loop configured by `settings`.
pub async fn replay(
    session: Session,
    settings: &LoopSettings,
    options: &ReplayOptions,
) -> Result<LoopOutcome, ReplayError> {
    let mut registry = ToolRegistry::new();
    for tool in &session.tools {
        let output = session
            .tool_outputs
            .get(&tool.name)
            .map(String::as_str)
            .unwrap_or(DEFAULT_TOOL_OUTPUT);
        registry.register(Box::new(ScriptedTool::new(&tool.name, output)));
    }
    // Scripted outputs for tools the model is not offered, e.g. sentinels
    for (name, output) in &session.tool_outputs {
        if registry.get(name).is_none() {
            registry.register(Box::new(ScriptedTool::new(name, output)));
        }
    }

    let executor = RegistryExecutor::new(Arc::new(registry))
        .with_timeout(Duration::from_secs(settings.tools.timeout_secs))
        .with_fail_fast(settings.tools.fail_fast);

    let mut retry = RetryPolicy::from_settings(&settings.retry);
    if options.no_delay {
        retry = retry
            .with_base_delay(Duration::ZERO)
            .with_transport_pause(Duration::ZERO);
    }

    let tool_loop = ToolLoop::from_settings(
        settings,
        Arc::new(ScriptedProvider::new(session.responses)),
        Arc::new(executor),
    )
    .with_retry_policy(retry)
    .with_fallback_parsers(Arc::new(default_parsers(&session.tools)));

    let max_iterations = options.max_iterations.unwrap_or(settings.max_iterations);
    let request = LoopRequest::new(
        session.messages,
        session.tools,
        settings.generation.to_generation_config(),
        max_iterations,
    );

    Ok(tool_loop.run(request).await?)
}
