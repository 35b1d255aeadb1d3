//! Typed event surface of the task orchestrator.
//!
//! Consumers call [`TaskOrchestrator::subscribe`](super::TaskOrchestrator::subscribe)
//! and receive every event on an unbounded channel, in emission order.
//! Disposing the orchestrator drops every sender, which closes the
//! receivers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::permission::PermissionRequest;
use crate::models::task::{TaskMessage, TaskProgress, TaskResult};
use crate::models::todo::TodoItem;

/// Category of a diagnostic event.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DebugKind {
    /// Raw process output.
    Stdout,
    /// Lifecycle information (command line, working directory, continuation).
    Info,
    /// Non-fatal protocol warning.
    Warning,
    /// A stream record that could not be parsed.
    ParseWarning,
    /// Process exit.
    Exit,
    /// Error record from the diagnostic log.
    LogError,
}

/// Diagnostic event payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DebugEntry {
    /// Category.
    pub kind: DebugKind,
    /// Human-readable text.
    pub message: String,
    /// Structured detail.
    pub data: Option<Value>,
}

/// Everything the orchestrator reports about a task.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum OrchestratorEvent {
    /// A transcript message, from the agent or synthesized from its tool calls.
    Message {
        /// Owning task.
        task_id: String,
        /// The message.
        message: TaskMessage,
    },
    /// The agent invoked a tool.
    ToolUse {
        /// Owning task.
        task_id: String,
        /// Tool name.
        tool: String,
        /// Tool arguments.
        input: Value,
    },
    /// A tool finished.
    ToolResult {
        /// Owning task.
        task_id: String,
        /// Raw tool output.
        output: String,
    },
    /// The agent is waiting on a user answer.
    PermissionRequest {
        /// The question.
        request: PermissionRequest,
    },
    /// Coarse progress notice.
    Progress {
        /// Owning task.
        task_id: String,
        /// Stage and text.
        progress: TaskProgress,
    },
    /// Terminal outcome. Emitted at most once per task.
    Complete {
        /// Owning task.
        task_id: String,
        /// Outcome.
        result: TaskResult,
    },
    /// Terminal process failure.
    Error {
        /// Owning task.
        task_id: String,
        /// Failure description.
        message: String,
    },
    /// Diagnostic detail.
    Debug {
        /// Owning task, when one is active.
        task_id: Option<String>,
        /// Payload.
        entry: DebugEntry,
    },
    /// The agent's todo list changed.
    TodoUpdate {
        /// Owning task.
        task_id: String,
        /// Full list.
        todos: Vec<TodoItem>,
    },
    /// The provider rejected the configured credentials.
    AuthError {
        /// Provider that failed.
        provider_id: String,
        /// Human-readable text.
        message: String,
    },
}

impl OrchestratorEvent {
    /// Whether this event ends the task.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<mpsc::UnboundedSender<OrchestratorEvent>>,
}

impl EventBus {
    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to every subscriber, forgetting closed ones.
    pub fn emit(&mut self, event: &OrchestratorEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Detach every subscriber.
    pub fn clear(&mut self) {
        self.subscribers.clear();
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether nobody is listening.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
