//! Concrete collaborators for the turnloop engine.
//!
//! - [`RegistryExecutor`] runs tool calls against a [`ToolRegistry`]
//! - [`StaticParserRegistry`] serves fallback parsers per tool name
//! - [`NamedCallParser`] and [`JsonBlockParser`] are the built-in heuristics

pub mod executor;
pub mod parsers;

pub use executor::RegistryExecutor;
pub use parsers::{JsonBlockParser, NamedCallParser, StaticParserRegistry};

use std::sync::Arc;
use turnloop_core::provider::ToolDefinition;

/// Create a parser registry with the built-in heuristics.
///
/// Every tool gets a [`NamedCallParser`]. A bare [`JsonBlockParser`] is only
/// added when a single tool is offered, since a JSON object alone cannot
/// say which of several tools it was meant for.
pub fn default_parsers(tools: &[ToolDefinition]) -> StaticParserRegistry {
    let mut registry = StaticParserRegistry::new();
    for tool in tools {
        registry.register(&tool.name, Arc::new(NamedCallParser::new(&tool.name)));
    }
    if let [only] = tools {
        registry.register(&only.name, Arc::new(JsonBlockParser));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use turnloop_core::fallback::FallbackParserRegistry;

    fn parser_names(registry: &StaticParserRegistry, tool: &str) -> Vec<String> {
        registry
            .parsers_for(tool)
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    #[test]
    fn several_tools_get_named_call_only() {
        let tools = vec![
            ToolDefinition::new("search_scenes", "Search"),
            ToolDefinition::new("update_scene", "Update"),
        ];
        let registry = default_parsers(&tools);

        assert_eq!(parser_names(&registry, "search_scenes"), ["named_call"]);
        assert_eq!(parser_names(&registry, "update_scene"), ["named_call"]);
        assert!(registry.parsers_for("unknown").is_empty());
    }

    #[test]
    fn single_tool_also_accepts_bare_json() {
        let registry = default_parsers(&[ToolDefinition::new("search_scenes", "Search")]);
        assert_eq!(
            parser_names(&registry, "search_scenes"),
            ["named_call", "json_block"]
        );
    }
}
