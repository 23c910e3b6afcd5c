//! Fallback parsers for tool calls written as plain text.

use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use turnloop_core::error::ToolError;
use turnloop_core::fallback::{FallbackParser, FallbackParserRegistry};

type Arguments = serde_json::Map<String, serde_json::Value>;

/// Fixed, per-tool lists of fallback parsers.
///
/// Built once and then only read, so one instance can back any number of
/// concurrent loops.
#[derive(Default)]
pub struct StaticParserRegistry {
    parsers: HashMap<String, Vec<Arc<dyn FallbackParser>>>,
}

impl StaticParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parser to the list for `tool_name`.
    pub fn register(&mut self, tool_name: &str, parser: Arc<dyn FallbackParser>) {
        self.parsers
            .entry(tool_name.to_string())
            .or_default()
            .push(parser);
    }

    pub fn with(mut self, tool_name: &str, parser: Arc<dyn FallbackParser>) -> Self {
        self.register(tool_name, parser);
        self
    }
}

impl FallbackParserRegistry for StaticParserRegistry {
    fn parsers_for(&self, tool_name: &str) -> Vec<Arc<dyn FallbackParser>> {
        self.parsers.get(tool_name).cloned().unwrap_or_default()
    }
}

/// Recognizes the tool's name followed by a JSON object, as in
/// `search_scenes({"query": "harbor"})` or
/// `I will call search_scenes with {"query": "harbor"}`.
pub struct NamedCallParser {
    tool_name: String,
    pattern: Option<Regex>,
}

impl NamedCallParser {
    pub fn new(tool_name: &str) -> Self {
        let source = format!(
            r"(?i)\b{}\b(?:\s*(?:\(|with|using|args|arguments|parameters|:|=))*\s*\{{",
            regex_lite::escape(tool_name)
        );
        Self {
            tool_name: tool_name.to_string(),
            pattern: Regex::new(&source).ok(),
        }
    }

    fn find_arguments(&self, text: &str) -> Option<Arguments> {
        let pattern = self.pattern.as_ref()?;
        pattern
            .find_iter(text)
            .filter_map(|m| balanced_object(text, m.end() - 1))
            .find_map(parse_object)
    }
}

impl FallbackParser for NamedCallParser {
    fn name(&self) -> &str {
        "named_call"
    }

    fn can_parse(&self, text: &str) -> bool {
        self.find_arguments(text).is_some()
    }

    fn parse_to_arguments(&self, text: &str) -> Result<Arguments, ToolError> {
        self.find_arguments(text).ok_or_else(|| ToolError::ParseFailed {
            tool_name: self.tool_name.clone(),
            reason: "no JSON object follows the tool name".into(),
        })
    }
}

/// Takes the first JSON object in the text: a fenced code block if there
/// is one, otherwise the first balanced `{...}` that parses.
pub struct JsonBlockParser;

impl JsonBlockParser {
    fn find_arguments(text: &str) -> Option<Arguments> {
        fenced_blocks(text)
            .into_iter()
            .find_map(|block| parse_object(block.trim()))
            .or_else(|| {
                text.match_indices('{')
                    .filter_map(|(start, _)| balanced_object(text, start))
                    .find_map(parse_object)
            })
    }
}

impl FallbackParser for JsonBlockParser {
    fn name(&self) -> &str {
        "json_block"
    }

    fn can_parse(&self, text: &str) -> bool {
        Self::find_arguments(text).is_some()
    }

    fn parse_to_arguments(&self, text: &str) -> Result<Arguments, ToolError> {
        Self::find_arguments(text).ok_or_else(|| ToolError::ParseFailed {
            tool_name: String::new(),
            reason: "no JSON object found in text".into(),
        })
    }
}

fn parse_object(candidate: &str) -> Option<Arguments> {
    match serde_json::from_str(candidate) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Bodies of ``` fenced blocks, in order.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        // Skip the info string (e.g. "json") up to the end of the line
        let body_start = after.find('\n').map_or(after.len(), |i| i + 1);
        let body = &after[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        blocks.push(&body[..close]);
        rest = &body[close + 3..];
    }
    blocks
}

/// The `{...}` slice starting at byte `start`, honoring nesting and strings.
fn balanced_object(text: &str, start: usize) -> Option<&str> {
    if !text[start..].starts_with('{') {
        return None;
    }
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_call_with_prose() {
        let parser = NamedCallParser::new("search_scenes");
        let text = r#"I will call search_scenes with {"query": "harbor", "limit": 3} now."#;
        assert!(parser.can_parse(text));
        let args = parser.parse_to_arguments(text).unwrap();
        assert_eq!(args["query"], "harbor");
        assert_eq!(args["limit"], 3);
    }

    #[test]
    fn named_call_function_style() {
        let parser = NamedCallParser::new("update_scene");
        let args = parser
            .parse_to_arguments(r#"update_scene({"id": 7, "body": "a {brace} in text"})"#)
            .unwrap();
        assert_eq!(args["id"], 7);
        assert_eq!(args["body"], "a {brace} in text");
    }

    #[test]
    fn named_call_ignores_other_tools() {
        let parser = NamedCallParser::new("search");
        assert!(!parser.can_parse(r#"research_notes with {"q": 1}"#));
        assert!(!parser.can_parse("I will search for it later."));
        assert!(parser.parse_to_arguments("nothing here").is_err());
    }

    #[test]
    fn json_block_prefers_fenced_block() {
        let text = "Here you go {not json}\n```json\n{\"query\": \"castle\"}\n```\n";
        let args = JsonBlockParser.parse_to_arguments(text).unwrap();
        assert_eq!(args["query"], "castle");
    }

    #[test]
    fn json_block_finds_inline_object() {
        let text = r#"Arguments: {"a": {"b": "}"}} trailing"#;
        assert!(JsonBlockParser.can_parse(text));
        let args = JsonBlockParser.parse_to_arguments(text).unwrap();
        assert_eq!(args["a"]["b"], "}");
    }

    #[test]
    fn json_block_rejects_plain_text() {
        assert!(!JsonBlockParser.can_parse("Sure, the story is done."));
        assert!(!JsonBlockParser.can_parse("[1, 2, 3]"));
    }

    #[test]
    fn unbalanced_object_is_ignored() {
        assert_eq!(balanced_object(r#"{"a": 1"#, 0), None);
        assert_eq!(balanced_object(r#"x{"a": 1}"#, 1), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn registry_keeps_registration_order() {
        let registry = StaticParserRegistry::new()
            .with("t", Arc::new(JsonBlockParser))
            .with("t", Arc::new(NamedCallParser::new("t")));
        let names: Vec<_> = registry
            .parsers_for("t")
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["json_block", "named_call"]);
    }
}
