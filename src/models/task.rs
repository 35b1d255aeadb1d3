//! Task input, snapshot and result types.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attachment::Attachment;

/// Lifecycle status for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not yet handed to the agent.
    Pending,
    /// Waiting for another task to finish.
    Queued,
    /// Agent process running.
    Running,
    /// Blocked on a user answer.
    WaitingPermission,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
    /// Killed by the caller.
    Cancelled,
    /// Stopped by a soft interrupt.
    Interrupted,
}

/// Caller-supplied task description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskConfig {
    /// Instruction for the agent. Must not be empty.
    pub prompt: String,
    /// Task identifier; generated when absent.
    #[serde(default)]
    pub task_id: Option<String>,
    /// Prior agent session to resume.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Working directory for the agent process.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Tools the agent may use.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Extra text appended to the agent's system prompt.
    #[serde(default)]
    pub system_prompt_append: Option<String>,
    /// JSON schema the final answer must follow.
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    /// Model identifier.
    #[serde(default)]
    pub model_id: Option<String>,
    /// Files to materialize for the agent.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl TaskConfig {
    /// Minimal configuration for a prompt.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Role of a transcript message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Written by the agent.
    Assistant,
    /// Written by the user.
    User,
    /// Generated by the orchestrator.
    System,
}

/// One entry in the task transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskMessage {
    /// Message identifier.
    pub id: String,
    /// Author role.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// Receive timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Snapshot returned when a task starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Task identifier.
    pub id: String,
    /// Prompt handed to the agent.
    pub prompt: String,
    /// Current status.
    pub status: TaskStatus,
    /// Agent session, once known.
    pub session_id: Option<String>,
    /// Transcript so far.
    pub messages: Vec<TaskMessage>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Start timestamp.
    pub started_at: Option<DateTime<Utc>>,
}

/// Terminal outcome classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    /// Task finished.
    Success,
    /// Task failed.
    Error,
    /// Task stopped by a soft interrupt.
    Interrupted,
}

/// Terminal outcome of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskResult {
    /// Outcome classification.
    pub status: ResultStatus,
    /// Agent session the task ran in.
    pub session_id: Option<String>,
    /// Error text for failed tasks.
    pub error: Option<String>,
}

impl TaskResult {
    /// Successful outcome.
    #[must_use]
    pub fn success(session_id: Option<String>) -> Self {
        Self {
            status: ResultStatus::Success,
            session_id,
            error: None,
        }
    }

    /// Failed outcome carrying an error message.
    #[must_use]
    pub fn error(session_id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            status: ResultStatus::Error,
            session_id,
            error: Some(error.into()),
        }
    }

    /// Interrupted outcome.
    #[must_use]
    pub fn interrupted(session_id: Option<String>) -> Self {
        Self {
            status: ResultStatus::Interrupted,
            session_id,
            error: None,
        }
    }
}

/// Coarse progress stage reported to the user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStage {
    /// Task accepted.
    Starting,
    /// Agent process spawned.
    Loading,
    /// Agent connecting to its model.
    Connecting,
    /// Waiting for the model's first action.
    Waiting,
    /// Agent is running a tool.
    ToolUse,
    /// Task finished.
    Complete,
}

/// Progress notification payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TaskProgress {
    /// Stage reached.
    pub stage: ProgressStage,
    /// Human-readable text.
    pub message: String,
    /// Display name of the model, when known.
    pub model_name: Option<String>,
}

impl TaskProgress {
    /// Progress notice without a model name.
    #[must_use]
    pub fn new(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            model_name: None,
        }
    }
}
