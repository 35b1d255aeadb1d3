//! Session-scoped temporary files for task attachments.
//!
//! Attachments arrive as base64 payloads; the agent process can only read
//! real files. [`store::TempFileStore`] writes them below a dedicated root in
//! the system temp directory, enforces per-file and per-session quotas, and
//! removes them on session cleanup or after they expire.

pub mod sanitize;
pub mod store;
pub mod sweep;

pub use store::{CleanupSummary, StoreLimits, TempFileInfo, TempFileStore, TempSessionInfo};
