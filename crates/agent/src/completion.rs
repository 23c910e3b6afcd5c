//! Detection of "task is done" signals in an assistant turn.
//!
//! Three signals, all read off the requested tool calls:
//! - a terminating sentinel tool (loop stops, nothing is executed)
//! - a modification-complete tool (only that call runs, then the loop stops)
//! - `"complete": true` inside any call's arguments (loop stops after the
//!   turn's tools have run)

use std::collections::HashSet;
use turnloop_config::CompletionSettings;
use turnloop_core::message::ToolCallRequest;

/// Which completion signals one assistant turn carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSignals {
    /// A terminating sentinel was requested.
    pub generation_complete: bool,
    /// Index of the first modification-complete call, if any.
    pub modification_complete: Option<usize>,
    /// Some call declared `complete: true` in its arguments.
    pub inline_complete: bool,
}

/// Pure inspector over a turn's tool calls.
#[derive(Debug, Clone)]
pub struct CompletionDetector {
    terminating_tools: HashSet<String>,
    modification_complete_tools: HashSet<String>,
}

impl CompletionDetector {
    pub fn new<I, J, S, T>(terminating_tools: I, modification_complete_tools: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            terminating_tools: terminating_tools.into_iter().map(Into::into).collect(),
            modification_complete_tools: modification_complete_tools
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }

    pub fn from_settings(settings: &CompletionSettings) -> Self {
        Self::new(
            settings.terminating_tools.iter().cloned(),
            settings.modification_complete_tools.iter().cloned(),
        )
    }

    pub fn is_terminating(&self, tool_name: &str) -> bool {
        self.terminating_tools.contains(tool_name)
    }

    pub fn is_modification_complete(&self, tool_name: &str) -> bool {
        self.modification_complete_tools.contains(tool_name)
    }

    /// Inspect every call of one turn.
    pub fn inspect(&self, calls: &[ToolCallRequest]) -> CompletionSignals {
        CompletionSignals {
            generation_complete: calls.iter().any(|c| self.is_terminating(&c.name)),
            modification_complete: calls
                .iter()
                .position(|c| self.is_modification_complete(&c.name)),
            inline_complete: calls.iter().any(declares_complete),
        }
    }
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self::from_settings(&CompletionSettings::default())
    }
}

/// Whether the call's arguments carry `"complete": true`.
///
/// Well-formed arguments are checked as a JSON object (top-level boolean
/// only). Arguments that do not parse fall back to a substring match on
/// the whitespace-stripped text, so `{"complete" : true,` still counts.
pub fn declares_complete(call: &ToolCallRequest) -> bool {
    match call.arguments_object() {
        Some(args) => matches!(args.get("complete"), Some(serde_json::Value::Bool(true))),
        None => {
            let compact: String = call
                .arguments
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            compact.contains("\"complete\":true")
        }
    }
}
