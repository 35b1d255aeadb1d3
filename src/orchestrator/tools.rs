//! Tool names with special meaning and their payloads.
//!
//! Tool names may arrive with an MCP server prefix (`tasks_start_task`), so
//! the designated tools match either exactly or by `_<name>` suffix.

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::models::ids;
use crate::models::permission::{PermissionKind, PermissionOption, PermissionRequest};
use crate::models::todo::{TodoItem, TodoPriority, TodoStatus};

/// Plan declaration tool.
pub const PLAN_TOOL: &str = "start_task";
/// Todo list tool.
pub const TODO_TOOL: &str = "todowrite";
/// Explicit completion tool.
pub const COMPLETE_TOOL: &str = "complete_task";
/// Question tool.
pub const QUESTION_TOOL: &str = "AskUserQuestion";

fn matches_tool(tool: &str, name: &str) -> bool {
    tool == name
        || tool
            .strip_suffix(name)
            .is_some_and(|prefix| prefix.ends_with('_'))
}

/// Whether `tool` declares the plan.
#[must_use]
pub fn is_plan_tool(tool: &str) -> bool {
    matches_tool(tool, PLAN_TOOL)
}

/// Whether `tool` writes the todo list.
#[must_use]
pub fn is_todo_tool(tool: &str) -> bool {
    matches_tool(tool, TODO_TOOL)
}

/// Whether `tool` declares completion.
#[must_use]
pub fn is_complete_tool(tool: &str) -> bool {
    matches_tool(tool, COMPLETE_TOOL)
}

/// Tools allowed before the plan is declared without a warning.
#[must_use]
pub fn is_exempt_before_plan(tool: &str) -> bool {
    is_plan_tool(tool) || is_todo_tool(tool)
}

/// Plan declaration payload.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Plan {
    /// Overall goal.
    #[serde(default)]
    pub goal: String,
    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<String>,
    /// How the result will be checked.
    #[serde(default)]
    pub verification: Vec<String>,
    /// Skills the agent intends to use.
    #[serde(default)]
    pub skills: Vec<String>,
    /// The agent's restatement of the request.
    #[serde(default)]
    pub original_request: Option<String>,
}

impl Plan {
    /// Parse a plan from tool input. `None` without a goal and steps.
    #[must_use]
    pub fn from_input(input: &Value) -> Option<Self> {
        let plan: Self = serde_json::from_value(input.clone()).ok()?;
        if plan.goal.trim().is_empty() || plan.steps.is_empty() {
            return None;
        }
        Some(plan)
    }

    /// Markdown rendering shown to the user.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("**Plan:**\n\n**Goal:** {}\n\n**Steps:**", self.goal);
        push_numbered(&mut out, &self.steps);
        if !self.verification.is_empty() {
            out.push_str("\n\n**Verification:**");
            push_numbered(&mut out, &self.verification);
        }
        if !self.skills.is_empty() {
            out.push_str("\n\n**Skills:** ");
            out.push_str(&self.skills.join(", "));
        }
        out
    }
}

fn push_numbered(out: &mut String, items: &[String]) {
    for (index, item) in items.iter().enumerate() {
        out.push_str(&format!("\n{}. {item}", index + 1));
    }
}

#[derive(Debug, Deserialize)]
struct TodoWire {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
}

/// Parse the todo tool's `todos` array. Unknown statuses become pending.
#[must_use]
pub fn parse_todos(input: &Value) -> Option<Vec<TodoItem>> {
    let raw: Vec<TodoWire> = serde_json::from_value(input.get("todos")?.clone()).ok()?;
    Some(
        raw.into_iter()
            .enumerate()
            .map(|(index, todo)| TodoItem {
                id: match todo.id {
                    Some(Value::String(s)) => s,
                    Some(Value::Number(n)) => n.to_string(),
                    _ => (index + 1).to_string(),
                },
                content: todo.content,
                status: match todo.status.as_deref() {
                    Some("in_progress") => TodoStatus::InProgress,
                    Some("completed") => TodoStatus::Completed,
                    Some("cancelled") => TodoStatus::Cancelled,
                    _ => TodoStatus::Pending,
                },
                priority: match todo.priority.as_deref() {
                    Some("high") => TodoPriority::High,
                    Some("low") => TodoPriority::Low,
                    _ => TodoPriority::Medium,
                },
            })
            .collect(),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionWire {
    #[serde(default)]
    question: String,
    #[serde(default)]
    header: Option<String>,
    #[serde(default)]
    options: Vec<PermissionOption>,
    #[serde(default)]
    multi_select: bool,
}

/// Turn the question tool's first question into a permission request.
#[must_use]
pub fn permission_from_question(task_id: &str, input: &Value) -> Option<PermissionRequest> {
    let first = input.get("questions")?.as_array()?.first()?.clone();
    let question: QuestionWire = serde_json::from_value(first).ok()?;
    Some(PermissionRequest {
        id: ids::request_id(),
        task_id: task_id.to_owned(),
        kind: PermissionKind::Question,
        question: question.question,
        header: question.header,
        options: question.options,
        multi_select: question.multi_select,
        created_at: Utc::now(),
    })
}
