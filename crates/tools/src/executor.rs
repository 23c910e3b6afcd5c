//! Registry-backed tool execution service.
//!
//! Calls run one at a time, in the order the model requested them, each
//! under its own timeout. A tool's own failure (an `Err`, a timeout, or an
//! output with `success: false`) is reported back to the model as an
//! `Error: ...` result unless fail-fast mode is on; an unknown tool name
//! always aborts the batch.
//!
//! Inline errors count as results, so without fail-fast the only batch
//! failure the loop sees is an unknown tool. Callers that want a failing
//! first-turn tool to fail the loop with
//! `LoopError::ToolExecutionFailedOnFirstIteration` should enable
//! [`RegistryExecutor::with_fail_fast`] (`tools.fail_fast` in the config).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use turnloop_core::error::{ToolBatchError, ToolError};
use turnloop_core::message::{Message, ToolCallRequest};
use turnloop_core::tool::{ToolExecutor, ToolRegistry};

/// Executes tool calls by looking them up in a [`ToolRegistry`].
pub struct RegistryExecutor {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    fail_fast: bool,
}

impl RegistryExecutor {
    /// Create an executor with the default timeout (120s).
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(120),
            fail_fast: false,
        }
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stop at the first failing call instead of reporting the error inline.
    pub fn with_fail_fast(mut self, enabled: bool) -> Self {
        self.fail_fast = enabled;
        self
    }

    async fn run_one(&self, call: &ToolCallRequest, context_id: &str) -> Result<String, ToolError> {
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| ToolError::NotFound(call.name.clone()))?;

        let arguments = match call.arguments_object() {
            Some(map) => serde_json::Value::Object(map),
            None => {
                warn!(tool = %call.name, call_id = %call.id, "Malformed tool arguments, passing empty object");
                serde_json::json!({})
            }
        };

        match tokio::time::timeout(self.timeout, tool.execute(arguments, context_id)).await {
            Ok(Ok(output)) if output.success => Ok(output.output),
            Ok(Ok(output)) => Err(ToolError::ExecutionFailed {
                tool_name: call.name.clone(),
                reason: output.output,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ToolError::Timeout {
                tool_name: call.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ToolExecutor for RegistryExecutor {
    async fn execute(
        &self,
        calls: &[ToolCallRequest],
        context_id: &str,
    ) -> Result<Vec<Message>, ToolBatchError> {
        let mut completed = Vec::with_capacity(calls.len());

        for call in calls {
            debug!(tool = %call.name, call_id = %call.id, "Executing tool call");

            match self.run_one(call, context_id).await {
                Ok(output) => {
                    completed.push(Message::tool_result(&call.id, &call.name, output));
                }
                Err(error @ ToolError::NotFound(_)) => {
                    warn!(tool = %call.name, "Model requested an unknown tool");
                    return Err(ToolBatchError { completed, error });
                }
                Err(error) if self.fail_fast => {
                    warn!(tool = %call.name, error = %error, "Tool failed, aborting batch");
                    return Err(ToolBatchError { completed, error });
                }
                Err(error) => {
                    warn!(tool = %call.name, error = %error, "Tool execution failed");
                    // Report error to the model so it can recover
                    completed.push(Message::tool_result(
                        &call.id,
                        &call.name,
                        format!("Error: {error}"),
                    ));
                }
            }
        }

        Ok(completed)
    }
}
