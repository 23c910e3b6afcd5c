//! Shared scripted collaborators for loop tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use turnloop_core::error::{ProviderError, ToolBatchError, ToolError};
use turnloop_core::message::{Message, ToolCallRequest};
use turnloop_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use turnloop_core::tool::ToolExecutor;

/// A mock provider that plays back a script of responses and errors.
///
/// Each call to `complete` returns the next step in the script.
/// Panics if more calls are made than steps provided.
pub struct SequentialMockProvider {
    steps: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(steps: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            steps: Mutex::new(steps),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every step succeeds with the given responses.
    pub fn responses(responses: Vec<ProviderResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// History length seen by each call, in call order.
    pub fn history_lengths(&self) -> Vec<usize> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages.len())
            .collect()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let steps = self.steps.lock().unwrap();
        let index = requests.len();

        if index >= steps.len() {
            panic!(
                "SequentialMockProvider: no more steps (call #{}, have {})",
                index,
                steps.len()
            );
        }

        requests.push(request);
        steps[index].clone()
    }
}

/// A mock provider that never answers.
pub struct HangingProvider;

#[async_trait::async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending().await
    }
}

/// A tool executor that answers from a fixed table and records every call.
///
/// Tools without a table entry answer `"<name> ok"`. Tools marked failing
/// abort the batch, returning the results completed before them.
#[derive(Default)]
pub struct RecordingExecutor {
    outputs: HashMap<String, String>,
    failing: HashSet<String>,
    executed: Mutex<Vec<ToolCallRequest>>,
    contexts: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, tool: &str, output: &str) -> Self {
        self.outputs.insert(tool.to_string(), output.to_string());
        self
    }

    pub fn failing(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_string());
        self
    }

    pub fn executed_names(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn contexts(&self) -> Vec<String> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(
        &self,
        calls: &[ToolCallRequest],
        context_id: &str,
    ) -> Result<Vec<Message>, ToolBatchError> {
        self.contexts.lock().unwrap().push(context_id.to_string());
        let mut completed = Vec::new();
        for call in calls {
            if self.failing.contains(&call.name) {
                return Err(ToolBatchError {
                    completed,
                    error: ToolError::ExecutionFailed {
                        tool_name: call.name.clone(),
                        reason: "scripted failure".into(),
                    },
                });
            }
            self.executed.lock().unwrap().push(call.clone());
            let output = self
                .outputs
                .get(&call.name)
                .cloned()
                .unwrap_or_else(|| format!("{} ok", call.name));
            completed.push(Message::tool_result(&call.id, &call.name, output));
        }
        Ok(completed)
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        text: text.to_string(),
        tool_calls: None,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

/// Create a response with tool calls and optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<ToolCallRequest>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        tool_calls: Some(tool_calls),
        ..make_text_response(thought)
    }
}

/// Helper to create a tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest {
        id: format!("call_{}", name),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}
