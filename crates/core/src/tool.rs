//! Tool traits: the abstraction over what the model can invoke.
//!
//! Two layers:
//! - [`Tool`] is a single capability with a name, schema and `execute`.
//! - [`ToolExecutor`] is the service the loop talks to: it takes all the
//!   calls of one assistant turn and returns their result messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ToolBatchError, ToolError};
use crate::message::{Message, ToolCallRequest};
use crate::provider::ToolDefinition;

/// The outcome of running a single tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content handed back to the model, or the failure reason
    pub output: String,
}

impl ToolOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    /// A run the tool itself reports as failed.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            output: reason.into(),
        }
    }
}

/// A single invocable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "search_scenes").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given arguments.
    ///
    /// `context_id` is the opaque execution context the loop was started with.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        context_id: &str,
    ) -> std::result::Result<ToolOutput, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get all tool definitions (for sending to the model), sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The tool execution service.
///
/// Runs every call of one assistant turn and returns one
/// [`Message::ToolResult`] per executed call, in request order.
/// On failure the results of the calls that did complete travel in
/// [`ToolBatchError::completed`]; a result is never invented for a call
/// that did not run.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        calls: &[ToolCallRequest],
        context_id: &str,
    ) -> std::result::Result<Vec<Message>, ToolBatchError>;
}
