//! Permission requests raised when the agent asks the user a question.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of interaction the request needs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Free-form or multiple-choice question.
    Question,
}

/// One selectable answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionOption {
    /// Short label shown to the user.
    pub label: String,
    /// Optional longer explanation.
    #[serde(default)]
    pub description: Option<String>,
}

/// A question the agent is waiting on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PermissionRequest {
    /// Request identifier.
    pub id: String,
    /// Task the request belongs to.
    pub task_id: String,
    /// Interaction kind.
    pub kind: PermissionKind,
    /// Question text.
    pub question: String,
    /// Optional short header.
    pub header: Option<String>,
    /// Selectable answers; empty for free-form questions.
    pub options: Vec<PermissionOption>,
    /// Whether more than one option may be picked.
    pub multi_select: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
