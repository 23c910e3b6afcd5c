//! First-turn recovery of tool calls the model wrote as plain text.
//!
//! Single shot: the first offered tool with a parser that recognizes the
//! text wins, and only that parser's arguments are executed.

use tracing::{debug, info, warn};
use turnloop_core::fallback::FallbackParserRegistry;
use turnloop_core::message::{Message, ToolCallRequest};
use turnloop_core::provider::ToolDefinition;
use turnloop_core::tool::ToolExecutor;
use uuid::Uuid;

/// Prefix of call ids synthesized by fallback recovery.
pub const FALLBACK_CALL_PREFIX: &str = "fallback_";

/// A successful recovery.
#[derive(Debug, Clone)]
pub struct Recovered {
    pub tool_name: String,
    pub parser: String,
    pub call: ToolCallRequest,
    pub results: Vec<Message>,
}

pub struct FirstTurnFallback<'a> {
    parsers: &'a dyn FallbackParserRegistry,
    executor: &'a dyn ToolExecutor,
}

impl<'a> FirstTurnFallback<'a> {
    pub fn new(parsers: &'a dyn FallbackParserRegistry, executor: &'a dyn ToolExecutor) -> Self {
        Self { parsers, executor }
    }

    /// Try to turn `text` into one executed tool call.
    ///
    /// Returns `None` when no parser recognizes the text, when the matching
    /// parser cannot produce arguments, or when execution yields nothing.
    pub async fn recover(
        &self,
        text: &str,
        tools: &[ToolDefinition],
        context_id: &str,
    ) -> Option<Recovered> {
        if text.trim().is_empty() {
            return None;
        }

        let (tool_name, parser) = tools.iter().find_map(|tool| {
            self.parsers
                .parsers_for(&tool.name)
                .into_iter()
                .find(|p| p.can_parse(text))
                .map(|p| (tool.name.clone(), p))
        })?;

        let arguments = match parser.parse_to_arguments(text) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %tool_name, parser = parser.name(), error = %e, "Fallback parser matched but could not extract arguments");
                return None;
            }
        };

        let call = ToolCallRequest {
            id: format!("{FALLBACK_CALL_PREFIX}{}", Uuid::new_v4().simple()),
            name: tool_name.clone(),
            arguments: serde_json::Value::Object(arguments).to_string(),
        };
        debug!(tool = %tool_name, call_id = %call.id, "Executing fallback-derived tool call");

        let results = match self.executor.execute(std::slice::from_ref(&call), context_id).await {
            Ok(results) => results,
            Err(e) => {
                warn!(tool = %tool_name, error = %e, "Fallback tool execution failed");
                return None;
            }
        };
        if results.is_empty() {
            return None;
        }

        info!(tool = %tool_name, parser = parser.name(), "Recovered tool call from plain-text answer");
        Some(Recovered {
            tool_name,
            parser: parser.name().to_string(),
            call,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::RecordingExecutor;
    use std::sync::Arc;
    use turnloop_tools::{JsonBlockParser, NamedCallParser, StaticParserRegistry, default_parsers};

    fn tools() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::new("search_scenes", "Search scenes"),
            ToolDefinition::new("update_scene", "Update a scene"),
        ]
    }

    #[tokio::test]
    async fn recovers_named_call() {
        let parsers = default_parsers(&tools());
        let executor = RecordingExecutor::new().with_output("update_scene", "updated");
        let fallback = FirstTurnFallback::new(&parsers, &executor);

        let recovered = fallback
            .recover(r#"I will call update_scene with {"id": 3}"#, &tools(), "ctx")
            .await
            .unwrap();

        assert_eq!(recovered.tool_name, "update_scene");
        assert_eq!(recovered.parser, "named_call");
        assert!(recovered.call.id.starts_with(FALLBACK_CALL_PREFIX));
        assert_eq!(recovered.results[0].call_id(), Some(recovered.call.id.as_str()));
        assert_eq!(recovered.results[0].text(), "updated");
        assert_eq!(executor.executed_names(), ["update_scene"]);
    }

    #[tokio::test]
    async fn first_declared_tool_wins() {
        // Both tools accept any JSON block; declaration order decides.
        let parsers = StaticParserRegistry::new()
            .with("search_scenes", Arc::new(JsonBlockParser))
            .with("update_scene", Arc::new(JsonBlockParser));
        let executor = RecordingExecutor::new();
        let fallback = FirstTurnFallback::new(&parsers, &executor);

        let recovered = fallback
            .recover(r#"{"query": "harbor"}"#, &tools(), "ctx")
            .await
            .unwrap();
        assert_eq!(recovered.tool_name, "search_scenes");
        assert_eq!(executor.executed_names(), ["search_scenes"]);
    }

    #[tokio::test]
    async fn unrecognized_text_is_not_recovered() {
        let parsers = StaticParserRegistry::new()
            .with("update_scene", Arc::new(NamedCallParser::new("update_scene")));
        let executor = RecordingExecutor::new();
        let fallback = FirstTurnFallback::new(&parsers, &executor);

        assert!(fallback.recover("The scene looks fine.", &tools(), "ctx").await.is_none());
        assert!(fallback.recover("   ", &tools(), "ctx").await.is_none());
        assert!(executor.executed_names().is_empty());
    }

    #[tokio::test]
    async fn failed_execution_is_not_recovered() {
        let parsers = default_parsers(&tools());
        let executor = RecordingExecutor::new().failing("search_scenes");
        let fallback = FirstTurnFallback::new(&parsers, &executor);

        let recovered = fallback
            .recover(r#"search_scenes({"query": "x"})"#, &tools(), "ctx")
            .await;
        assert!(recovered.is_none());
    }
}
