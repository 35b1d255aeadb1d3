//! Agent process orchestration.
//!
//! Covers the event surface, shell selection and quoting, pseudo-terminal
//! process launching, injected collaborators, designated tool names, and
//! the [`TaskOrchestrator`] state machine tying them together.

pub mod events;
pub mod hooks;
pub mod process;
pub mod shell;
pub mod task;
pub mod tools;

pub use events::{DebugEntry, DebugKind, OrchestratorEvent};
pub use task::{OrchestratorOptions, TaskOrchestrator};
