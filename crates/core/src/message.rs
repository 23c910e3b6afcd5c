//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the loop:
//! caller seeds a history → model answers with an assistant turn →
//! tools answer the assistant's calls → repeat.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (one loop invocation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// A single message in a conversation.
///
/// Serialized with a `role` discriminator, e.g.
/// `{"role":"tool_result","call_id":"call_1","tool_name":"search","text":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        text: String,
    },
    User {
        text: String,
    },
    Assistant {
        #[serde(default)]
        text: String,
        /// `None` when the model emitted no tool-call structure at all;
        /// `Some(vec![])` when it emitted the structure with nothing in it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCallRequest>>,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        text: String,
    },
}

impl Message {
    /// Create a new system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    /// Create a new user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    /// Create an assistant message with no tool-call structure.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_calls: None,
        }
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_calls: Some(calls),
        }
    }

    /// Create a tool result message.
    pub fn tool_result(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            text: text.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::ToolResult { .. } => Role::Tool,
        }
    }

    /// The text content, whatever the variant.
    pub fn text(&self) -> &str {
        match self {
            Self::System { text }
            | Self::User { text }
            | Self::Assistant { text, .. }
            | Self::ToolResult { text, .. } => text,
        }
    }

    /// Tool calls of an assistant message. `None` for every other variant
    /// and for assistant messages without a tool-call structure.
    pub fn tool_calls(&self) -> Option<&[ToolCallRequest]> {
        match self {
            Self::Assistant {
                tool_calls: Some(calls),
                ..
            } => Some(calls),
            _ => None,
        }
    }

    /// The call id this message answers, if it is a tool result.
    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::ToolResult { call_id, .. } => Some(call_id),
            _ => None,
        }
    }
}

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Opaque ID, echoed back by the matching tool result
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a raw JSON string, exactly as the model produced them
    #[serde(default)]
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Parse the arguments as a JSON object.
    ///
    /// Returns `None` when the arguments are not valid JSON or not an object.
    /// An empty argument string is treated as `{}`.
    pub fn arguments_object(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        if self.arguments.trim().is_empty() {
            return Some(serde_json::Map::new());
        }
        match serde_json::from_str(&self.arguments) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// An append-only, ordered message history.
///
/// Messages can be pushed but never removed, replaced, or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::seeded(Vec::new())
    }

    /// Create a conversation that starts with the given messages.
    pub fn seeded(messages: Vec<Message>) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Add several messages, preserving their order.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.updated_at = Utc::now();
        self.messages.extend(messages);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Consume the conversation, returning its messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
