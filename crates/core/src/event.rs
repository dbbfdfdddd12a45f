//! Domain event system — decoupled observation of research runs.
//!
//! Events are published when a run starts, a capability executes, a
//! generation call is retried, or a run ends. The gateway streams them to
//! log subscribers; nothing in the research path depends on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A research run was accepted
    ResearchStarted {
        run_id: String,
        query_preview: String,
        max_steps: u32,
        streaming: bool,
        timestamp: DateTime<Utc>,
    },

    /// A capability was executed
    ToolExecuted {
        run_id: String,
        tool_name: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A generation call failed and will be retried
    GenerationRetried {
        attempt: u32,
        error_kind: String,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A research run produced its answer
    ResearchCompleted {
        run_id: String,
        steps: u32,
        tool_calls: usize,
        sources: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
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
