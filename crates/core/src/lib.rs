//! # turnloop core
//!
//! Domain types, collaborator traits, and error definitions for the turnloop
//! tool-calling engine. This crate has **no runtime dependencies** beyond
//! serde and tokio's sync primitives. It defines the domain model that the
//! orchestration loop and its collaborators implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the loop talks to is a trait here:
//! - [`Provider`]: sends a conversation to a model, gets one assistant turn back
//! - [`ToolExecutor`]: runs the tool calls of an assistant turn
//! - [`FallbackParserRegistry`]: recovers tool calls written as plain text
//!
//! Implementations live in their respective crates, so the loop can be
//! tested end to end with scripted stand-ins.

pub mod error;
pub mod event;
pub mod fallback;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, LoopError, ProviderError, Result, ToolBatchError, ToolError};
pub use event::{DomainEvent, EventBus};
pub use fallback::{FallbackParser, FallbackParserRegistry};
pub use message::{Conversation, ConversationId, Message, Role, ToolCallRequest};
pub use provider::{GenerationConfig, Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{Tool, ToolExecutor, ToolOutput, ToolRegistry};
