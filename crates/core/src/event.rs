//! Domain event system: observing a loop without coupling to it.
//!
//! The loop publishes an event whenever something interesting happens.
//! Observers subscribe and filter for what they care about.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A loop invocation began
    LoopStarted {
        conversation_id: String,
        model: String,
        max_iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// The model produced an assistant turn
    ResponseGenerated {
        conversation_id: String,
        iteration: u32,
        model: String,
        tool_calls: usize,
        tokens_used: u32,
        timestamp: DateTime<Utc>,
    },

    /// A batch of tool calls was executed
    ToolExecuted {
        conversation_id: String,
        tool_names: Vec<String>,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A model call is about to be retried after a backoff
    RetryScheduled {
        conversation_id: String,
        iteration: u32,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A first-turn text answer was recovered into a tool call
    FallbackApplied {
        conversation_id: String,
        tool_name: String,
        parser: String,
        timestamp: DateTime<Utc>,
    },

    /// A loop reached a terminal state
    LoopFinished {
        conversation_id: String,
        outcome: String,
        iterations: u32,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred (fatal or swallowed)
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
