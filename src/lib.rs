#![forbid(unsafe_code)]

pub mod attachments;
pub mod completion;
pub mod config;
pub mod errors;
pub mod models;
pub mod orchestrator;
pub mod stream;
pub mod watcher;

pub use config::ConductorConfig;
pub use errors::{AppError, Result};
