//! Completion state machine.
//!
//! A task counts as done when either:
//!
//! - the agent called the complete-task tool with status `success` or
//!   `blocked` and no todo is still pending or in progress, or
//! - the agent never used a tool at all (a purely conversational answer).
//!
//! Anything else on a clean exit starts a continuation run with a nudge
//! prompt, up to `max_attempts` times. The next unresolved exit after that
//! is [`ExitAction::Exhausted`].

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::prompts;
use crate::models::todo::TodoItem;

/// Step-finish reasons that mean the model ended its turn on its own.
const NATURAL_STOP_REASONS: &[&str] = &["stop", "end_turn", "end-turn"];

/// Outcome of a `step_finish` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepAction {
    /// The task is finished.
    Complete,
    /// Keep going; the process exit will decide.
    Continue,
}

/// Outcome of a clean process exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitAction {
    /// The task is finished.
    Complete,
    /// Re-run the agent against the same session with `prompt`.
    StartContinuation {
        /// Nudge prompt for the continuation run.
        prompt: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// The continuation budget is spent.
    Exhausted {
        /// Error text for the terminal event.
        message: String,
    },
}

/// Status the agent reported through the complete-task tool.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// Work is done.
    #[default]
    Success,
    /// The agent cannot proceed without help.
    Blocked,
    /// Some work remains.
    Partial,
}

/// Parsed complete-task tool input.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CompletionSignal {
    /// Reported status.
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: CompletionStatus,
    /// What the agent did.
    #[serde(default)]
    pub summary: Option<String>,
    /// The agent's restatement of the request.
    #[serde(default)]
    pub original_request_summary: Option<String>,
    /// Work the agent says is left.
    #[serde(default)]
    pub remaining_work: Option<String>,
}

fn lenient_status<'de, D>(deserializer: D) -> std::result::Result<CompletionStatus, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("blocked") => CompletionStatus::Blocked,
        Some("partial") => CompletionStatus::Partial,
        _ => CompletionStatus::Success,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Working,
    ContinuationPending,
    Done,
}

/// Tracks the evidence needed to decide whether a task is finished.
#[derive(Debug, Clone)]
pub struct CompletionEnforcer {
    max_attempts: u32,
    todos: Vec<TodoItem>,
    tools_used: bool,
    signal: Option<CompletionSignal>,
    attempts: u32,
    phase: Phase,
}

impl CompletionEnforcer {
    /// Enforcer allowing up to `max_attempts` continuation runs.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            todos: Vec::new(),
            tools_used: false,
            signal: None,
            attempts: 0,
            phase: Phase::Working,
        }
    }

    /// Handle a `step_finish` reason.
    pub fn handle_step_finish(&mut self, reason: Option<&str>) -> StepAction {
        let natural = reason.is_some_and(|r| NATURAL_STOP_REASONS.contains(&r));
        if !natural {
            return StepAction::Continue;
        }
        if self.is_resolved() {
            debug!(reason, "step finish resolves task");
            self.phase = Phase::Done;
            StepAction::Complete
        } else {
            self.phase = Phase::ContinuationPending;
            StepAction::Continue
        }
    }

    /// Record a complete-task tool call from its raw input.
    pub fn handle_complete_task_detection(&mut self, input: &Value) {
        let signal = match serde_json::from_value::<CompletionSignal>(input.clone()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(%err, "unreadable complete_task input, treating as success");
                CompletionSignal::default()
            }
        };
        info!(status = ?signal.status, "complete_task detected");
        self.signal = Some(signal);
    }

    /// Replace the tracked todo list.
    pub fn update_todos(&mut self, todos: Vec<TodoItem>) {
        self.todos = todos;
    }

    /// Note that the agent used at least one tool.
    pub fn mark_tools_used(&mut self) {
        self.tools_used = true;
    }

    /// Decide what a clean exit without a prior completion means.
    pub fn handle_process_exit(&mut self, code: i32) -> ExitAction {
        if self.phase == Phase::Done || self.is_resolved() {
            debug!(code, "clean exit resolves task");
            self.phase = Phase::Done;
            return ExitAction::Complete;
        }

        if self.attempts >= self.max_attempts {
            warn!(attempts = self.attempts, "continuation budget exhausted");
            self.phase = Phase::Done;
            return ExitAction::Exhausted {
                message: prompts::exhausted(self.attempts),
            };
        }

        self.attempts += 1;
        self.phase = Phase::ContinuationPending;
        let prompt = self.continuation_prompt();
        info!(attempt = self.attempts, "starting continuation run");
        ExitAction::StartContinuation {
            prompt,
            attempt: self.attempts,
        }
    }

    /// Clear all evidence for a new task.
    pub fn reset(&mut self) {
        self.todos.clear();
        self.tools_used = false;
        self.signal = None;
        self.attempts = 0;
        self.phase = Phase::Working;
    }

    /// Todos still pending or in progress.
    #[must_use]
    pub fn open_todos(&self) -> Vec<&TodoItem> {
        self.todos.iter().filter(|t| t.status.is_open()).collect()
    }

    /// Tracked todo list.
    #[must_use]
    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    /// Whether a tool was used.
    #[must_use]
    pub fn tools_used(&self) -> bool {
        self.tools_used
    }

    /// Continuation runs started so far.
    #[must_use]
    pub fn continuation_attempts(&self) -> u32 {
        self.attempts
    }

    /// The recorded completion signal, if any.
    #[must_use]
    pub fn completion_signal(&self) -> Option<&CompletionSignal> {
        self.signal.as_ref()
    }

    /// Whether a continuation run is expected.
    #[must_use]
    pub fn is_continuation_pending(&self) -> bool {
        self.phase == Phase::ContinuationPending
    }

    fn is_resolved(&self) -> bool {
        match &self.signal {
            Some(signal) => match signal.status {
                CompletionStatus::Success | CompletionStatus::Blocked => {
                    self.open_todos().is_empty()
                }
                CompletionStatus::Partial => false,
            },
            None => !self.tools_used,
        }
    }

    fn continuation_prompt(&self) -> String {
        if let Some(signal) = &self.signal {
            if signal.status == CompletionStatus::Partial {
                return prompts::partial_completion(signal.remaining_work.as_deref());
            }
        }
        let open = self.open_todos();
        if open.is_empty() {
            prompts::missing_completion()
        } else {
            prompts::incomplete_todos(&open)
        }
    }
}

impl Default for CompletionEnforcer {
    fn default() -> Self {
        Self::new(3)
    }
}
