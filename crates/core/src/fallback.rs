//! Fallback parsing: recovering tool calls the model wrote as prose.
//!
//! Some models answer the opening turn with text like
//! `I will call search_scenes with {"query": "harbor"}` instead of a
//! structured call. A [`FallbackParser`] recognizes one such shape for one
//! tool and turns it into arguments; a [`FallbackParserRegistry`] hands out
//! the parsers registered for a tool name.

use crate::error::ToolError;

/// A heuristic that can recognize an intended tool invocation in free text.
pub trait FallbackParser: Send + Sync {
    /// Short name for logs (e.g., "json_block").
    fn name(&self) -> &str;

    /// Cheap check: does this text look like something this parser handles?
    fn can_parse(&self, text: &str) -> bool;

    /// Extract the tool arguments from the text.
    fn parse_to_arguments(
        &self,
        text: &str,
    ) -> std::result::Result<serde_json::Map<String, serde_json::Value>, ToolError>;
}

/// Read-only lookup of fallback parsers by tool name.
///
/// Shared across concurrent loops, so implementations must not hand out
/// mutable state.
pub trait FallbackParserRegistry: Send + Sync {
    /// Parsers for `tool_name`, in the order they should be tried.
    fn parsers_for(&self, tool_name: &str) -> Vec<std::sync::Arc<dyn FallbackParser>>;
}
