//! Collaborators injected into the orchestrator.
//!
//! The orchestrator never hard-codes how the agent binary is found, which
//! environment it gets, or how its arguments are built. Callers provide
//! these through the traits below; the default implementations drive an
//! OpenCode-style CLI from [`ConductorConfig`](crate::config::ConductorConfig).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::attachments::TempFileInfo;
use crate::models::attachment::Attachment;
use crate::Result;

/// Environment variable carrying the task id into the agent process.
pub const TASK_ID_ENV: &str = "CONDUCTOR_TASK_ID";

/// Agent binary and its leading arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    /// Program name or path.
    pub program: String,
    /// Arguments placed before the per-task ones.
    pub args: Vec<String>,
}

/// Inputs to the argument builder for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliArgsRequest {
    /// Task being run.
    pub task_id: String,
    /// Prompt for this run.
    pub prompt: String,
    /// Agent session to continue.
    pub session_id: Option<String>,
    /// Selected model.
    pub model_id: Option<String>,
    /// Tools the agent may use.
    pub allowed_tools: Vec<String>,
    /// Extra system prompt text.
    pub system_prompt_append: Option<String>,
    /// JSON schema for the final answer.
    pub output_schema: Option<Value>,
    /// Original attachments.
    pub attachments: Vec<Attachment>,
    /// Attachments materialized on disk.
    pub temp_files: Vec<TempFileInfo>,
}

/// Finds the agent binary.
pub trait CommandResolver: Send + Sync {
    /// Resolve the program and its leading arguments.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`](crate::AppError::Config) if no agent binary is available.
    fn resolve(&self) -> Result<ResolvedCommand>;
}

/// Builds the agent's environment for a task.
pub trait EnvironmentBuilder: Send + Sync {
    /// Produce the complete environment for `task_id`.
    ///
    /// # Errors
    ///
    /// Implementations may fail if credentials or settings cannot be loaded.
    fn build<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>>> + Send + 'a>>;
}

/// Builds per-run agent arguments.
pub trait CliArgsBuilder: Send + Sync {
    /// Produce the arguments appended after the resolved command.
    ///
    /// # Errors
    ///
    /// Implementations may fail if the request cannot be expressed.
    fn build<'a>(
        &'a self,
        request: &'a CliArgsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;
}

/// Runs before every task start, e.g. to write provider settings.
pub trait BeforeStartHook: Send + Sync {
    /// Prepare for a task.
    ///
    /// # Errors
    ///
    /// An error aborts the task start.
    fn before_start(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Maps model ids to display names for progress messages.
pub trait ModelNameResolver: Send + Sync {
    /// Display name for `model_id`, if known.
    fn display_name(&self, model_id: &str) -> Option<String>;
}

/// Fixed program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticCommand {
    program: String,
    args: Vec<String>,
}

impl StaticCommand {
    /// Always resolve to `program args...`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl CommandResolver for StaticCommand {
    fn resolve(&self) -> Result<ResolvedCommand> {
        Ok(ResolvedCommand {
            program: self.program.clone(),
            args: self.args.clone(),
        })
    }
}

/// The host environment plus fixed extras and the task id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InheritedEnvironment {
    extra: HashMap<String, String>,
}

impl InheritedEnvironment {
    /// Inherit the host environment and add `extra` on top.
    #[must_use]
    pub fn new(extra: HashMap<String, String>) -> Self {
        Self { extra }
    }
}

impl EnvironmentBuilder for InheritedEnvironment {
    fn build<'a>(
        &'a self,
        task_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<HashMap<String, String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut env: HashMap<String, String> = std::env::vars().collect();
            env.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            env.insert(TASK_ID_ENV.into(), task_id.to_owned());
            Ok(env)
        })
    }
}

/// Arguments for an OpenCode-style `run` subcommand.
///
/// Produces `[--session <id>] [--model <id>] <prompt>`. Materialized
/// attachments are listed at the end of the prompt so the agent can open
/// them by path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenCodeArgs;

impl CliArgsBuilder for OpenCodeArgs {
    fn build<'a>(
        &'a self,
        request: &'a CliArgsRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut args = Vec::new();
            if let Some(ref session) = request.session_id {
                args.push("--session".into());
                args.push(session.clone());
            }
            if let Some(ref model) = request.model_id {
                args.push("--model".into());
                args.push(model.clone());
            }

            let mut prompt = request.prompt.clone();
            if let Some(ref extra) = request.system_prompt_append {
                prompt.push_str("\n\n");
                prompt.push_str(extra);
            }
            if !request.temp_files.is_empty() {
                prompt.push_str("\n\nAttached files:");
                for file in &request.temp_files {
                    prompt.push_str("\n- ");
                    prompt.push_str(&file.path.to_string_lossy());
                }
            }
            args.push(prompt);
            Ok(args)
        })
    }
}
