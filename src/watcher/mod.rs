//! Out-of-band error detection from the agent's diagnostic logs.
//!
//! Provider and authentication failures do not always show up on the
//! agent's output stream. [`log_watcher::LogWatcher`] tails the agent's log
//! directory and forwards every structured error record, classified by
//! [`classify::parse_log_line`], to the orchestrator.

pub mod classify;
pub mod log_watcher;

pub use classify::{LogError, LogErrorKind};
pub use log_watcher::{LogTail, LogWatcher};
