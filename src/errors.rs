//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The caller used the API in a state that does not allow the call
    /// (disposed orchestrator, no active process, empty prompt).
    Usage(String),
    /// Attachment payload could not be decoded or written.
    Attachment(String),
    /// A per-file or per-session byte ceiling would be exceeded.
    Quota(String),
    /// Session identifier or file path failed validation against the store root.
    PathViolation(String),
    /// Pseudo-terminal or child process failure.
    Process(String),
    /// A record on the agent output stream could not be decoded.
    Protocol(String),
    /// The agent stopped without finishing its task.
    Completion(String),
    /// Diagnostic log tailing failure.
    Watcher(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Usage(msg) => write!(f, "usage: {msg}"),
            Self::Attachment(msg) => write!(f, "attachment: {msg}"),
            Self::Quota(msg) => write!(f, "quota: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Process(msg) => write!(f, "process: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Completion(msg) => write!(f, "completion: {msg}"),
            Self::Watcher(msg) => write!(f, "watcher: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<base64::DecodeError> for AppError {
    fn from(err: base64::DecodeError) -> Self {
        Self::Attachment(format!("invalid base64 payload: {err}"))
    }
}

impl From<notify::Error> for AppError {
    fn from(err: notify::Error) -> Self {
        Self::Watcher(err.to_string())
    }
}
