//! Deciding whether a tool result carries usable data.

use std::collections::HashMap;
use turnloop_config::EmptyResultSettings;

/// Pluggable "this result is empty" rule, consulted on the first iteration.
pub trait EmptyResultPredicate: Send + Sync {
    fn is_empty_result(&self, tool_name: &str, text: &str) -> bool;
}

/// Blank text, or text containing one of the configured markers.
///
/// Markers are compared with all whitespace stripped from both sides, so
/// `"nodes": [ ]` matches the marker `"nodes":[]`. Per-tool markers only
/// apply to results of that tool.
#[derive(Debug, Clone, Default)]
pub struct MarkerPredicate {
    markers: Vec<String>,
    per_tool: HashMap<String, Vec<String>>,
}

impl MarkerPredicate {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers.into_iter().map(|m| strip(m.as_ref())).collect(),
            per_tool: HashMap::new(),
        }
    }

    /// Add a marker that only applies to `tool_name`.
    pub fn with_tool_marker(mut self, tool_name: &str, marker: &str) -> Self {
        self.per_tool
            .entry(tool_name.to_string())
            .or_default()
            .push(strip(marker));
        self
    }

    pub fn from_settings(settings: &EmptyResultSettings) -> Self {
        let mut predicate = Self::new(&settings.markers);
        for (tool, markers) in &settings.per_tool {
            for marker in markers {
                predicate = predicate.with_tool_marker(tool, marker);
            }
        }
        predicate
    }
}

impl EmptyResultPredicate for MarkerPredicate {
    fn is_empty_result(&self, tool_name: &str, text: &str) -> bool {
        let compact = strip(text);
        if compact.is_empty() {
            return true;
        }
        let tool_markers = self.per_tool.get(tool_name).into_iter().flatten();
        self.markers
            .iter()
            .chain(tool_markers)
            .any(|marker| !marker.is_empty() && compact.contains(marker.as_str()))
    }
}

fn strip(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
