//! Todo items tracked while an agent works through its plan.

use serde::{Deserialize, Serialize};

/// Status of a single todo item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Not yet started.
    Pending,
    /// Currently being worked on.
    InProgress,
    /// Finished.
    Completed,
    /// Dropped by the agent.
    Cancelled,
}

impl TodoStatus {
    /// Whether the item still represents outstanding work.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

/// Relative importance of a todo item.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    /// High priority.
    High,
    /// Medium priority.
    #[default]
    Medium,
    /// Low priority.
    Low,
}

/// A single unit of outstanding work reported by the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TodoItem {
    /// Item identifier, unique within one list.
    pub id: String,
    /// Human-readable description.
    pub content: String,
    /// Current status.
    pub status: TodoStatus,
    /// Priority; `medium` when the agent omits it.
    #[serde(default)]
    pub priority: TodoPriority,
}

/// Derive an ordered todo list from plan steps.
///
/// The first step is marked in progress and the rest pending.
#[must_use]
pub fn todos_from_steps(steps: &[String]) -> Vec<TodoItem> {
    steps
        .iter()
        .enumerate()
        .map(|(index, step)| TodoItem {
            id: (index + 1).to_string(),
            content: step.clone(),
            status: if index == 0 {
                TodoStatus::InProgress
            } else {
                TodoStatus::Pending
            },
            priority: TodoPriority::Medium,
        })
        .collect()
}
