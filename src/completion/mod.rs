//! Decides whether a clean agent exit really finished the task.
//!
//! The agent may exit zero after only narrating a plan. The
//! [`enforcer::CompletionEnforcer`] tracks tool usage, the todo list and any
//! explicit completion call, and answers the orchestrator's questions with
//! actions instead of invoking callbacks, so the orchestrator stays the only
//! component that emits events or spawns processes.

pub mod enforcer;
pub mod prompts;

pub use enforcer::{CompletionEnforcer, CompletionSignal, CompletionStatus, ExitAction, StepAction};
