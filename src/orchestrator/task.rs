//! Task orchestrator.
//!
//! Supervises at most one agent process at a time. Output is fed through
//! the [`StreamParser`] strictly in receive order, and every record is
//! turned into [`OrchestratorEvent`]s for subscribers. Clean exits that
//! did not finish the task are handed to the [`CompletionEnforcer`], which
//! may ask for a continuation run against the same agent session.
//!
//! Each launched process gets a run number. Output and exit notifications
//! from a run that has since been superseded or disposed are dropped.

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::events::{DebugEntry, DebugKind, EventBus, OrchestratorEvent};
use super::hooks::{
    BeforeStartHook, CliArgsBuilder, CliArgsRequest, CommandResolver, EnvironmentBuilder,
    InheritedEnvironment, ModelNameResolver, OpenCodeArgs, StaticCommand,
};
use super::process::{
    LaunchSpec, ProcessEvent, ProcessHandle, ProcessLauncher, PtyLauncher, TerminalSize,
};
use super::shell::{build_shell_command, platform_shell, shell_args, Platform};
use super::tools::{
    is_complete_tool, is_exempt_before_plan, is_plan_tool, is_todo_tool, parse_todos,
    permission_from_question, Plan, QUESTION_TOOL,
};
use crate::attachments::{TempFileInfo, TempFileStore};
use crate::completion::{CompletionEnforcer, ExitAction, StepAction};
use crate::config::ConductorConfig;
use crate::models::ids;
use crate::models::task::{
    MessageRole, ProgressStage, Task, TaskConfig, TaskMessage, TaskProgress, TaskResult,
    TaskStatus,
};
use crate::models::todo::todos_from_steps;
use crate::stream::message::{TextPart, ToolUse};
use crate::stream::{ParserOutput, StreamMessage, StreamParser};
use crate::watcher::classify::user_message;
use crate::watcher::{LogError, LogWatcher};
use crate::{AppError, Result};

const DISPOSED: &str = "orchestrator has been disposed and cannot start new tasks";
const NO_PROCESS: &str = "no active process";
const INTERRUPT: &str = "\x03";
const BATCH_CONFIRM: &str = "Y\n";
const PACKAGE_JSON_PLACEHOLDER: &str =
    "{\n  \"name\": \"conductor-workspace\",\n  \"private\": true\n}\n";

/// Settings and collaborators for a [`TaskOrchestrator`].
#[derive(Clone)]
pub struct OrchestratorOptions {
    /// Target platform; decides shell and quoting.
    pub platform: Platform,
    /// Whether the host runs as an installed application.
    pub packaged: bool,
    /// Working directory of last resort.
    pub temp_path: PathBuf,
    /// Working directory used when the task supplies none.
    pub working_directory: Option<PathBuf>,
    /// Model used when the task supplies none.
    pub model_id: Option<String>,
    /// Finds the agent binary.
    pub command: Arc<dyn CommandResolver>,
    /// Builds the agent's environment.
    pub environment: Arc<dyn EnvironmentBuilder>,
    /// Builds per-run arguments.
    pub cli_args: Arc<dyn CliArgsBuilder>,
    /// Optional hook run before every start.
    pub before_start: Option<Arc<dyn BeforeStartHook>>,
    /// Optional model display-name lookup.
    pub model_names: Option<Arc<dyn ModelNameResolver>>,
    /// Delay before the "waiting" notice.
    pub waiting_notice: Duration,
    /// Delay before the batch-job confirmation after an interrupt.
    pub interrupt_confirm: Duration,
    /// Upper bound on draining output after exit.
    pub exit_drain: Duration,
    /// Continuation budget per task.
    pub max_continuation_attempts: u32,
    /// Diagnostic log directory; `None` disables the watcher.
    pub log_dir: Option<PathBuf>,
    /// Log watcher poll interval.
    pub log_poll_interval: Duration,
    /// Pseudo-terminal size.
    pub terminal_size: TerminalSize,
}

impl OrchestratorOptions {
    /// Options for the agent CLI described by `config`.
    #[must_use]
    pub fn from_config(config: &ConductorConfig) -> Self {
        Self {
            platform: config.platform(),
            packaged: config.agent.packaged,
            temp_path: config.agent.fallback_temp_path.clone(),
            working_directory: config.agent.working_directory.clone(),
            model_id: config.agent.model.clone(),
            command: Arc::new(StaticCommand::new(
                config.agent.command.clone(),
                config.agent.args.clone(),
            )),
            environment: Arc::new(InheritedEnvironment::default()),
            cli_args: Arc::new(OpenCodeArgs),
            before_start: None,
            model_names: None,
            waiting_notice: Duration::from_millis(config.timing.waiting_notice_ms),
            interrupt_confirm: Duration::from_millis(config.timing.interrupt_confirm_ms),
            exit_drain: Duration::from_millis(config.timing.exit_drain_ms),
            max_continuation_attempts: config.completion.max_continuation_attempts,
            log_dir: if config.log_watcher.enabled {
                config.log_watcher.resolved_log_dir()
            } else {
                None
            },
            log_poll_interval: Duration::from_millis(config.log_watcher.poll_interval_ms),
            terminal_size: TerminalSize::default(),
        }
    }
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self::from_config(&ConductorConfig::default())
    }
}

impl fmt::Debug for OrchestratorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorOptions")
            .field("platform", &self.platform)
            .field("packaged", &self.packaged)
            .field("temp_path", &self.temp_path)
            .field("working_directory", &self.working_directory)
            .field("model_id", &self.model_id)
            .field("max_continuation_attempts", &self.max_continuation_attempts)
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

struct TaskState {
    disposed: bool,
    events: EventBus,
    run_id: u64,
    task_id: Option<String>,
    session_id: Option<String>,
    model_id: Option<String>,
    working_directory: Option<PathBuf>,
    messages: Vec<TaskMessage>,
    completed: bool,
    interrupted: bool,
    received_first_tool: bool,
    plan_declared: bool,
    attachment_dir: Option<PathBuf>,
    // Every attachment session this instance created; cleaned on dispose.
    temp_sessions: Vec<String>,
    last_request: Option<CliArgsRequest>,
    process: Option<Arc<dyn ProcessHandle>>,
    parser: StreamParser,
    enforcer: CompletionEnforcer,
    waiting: Option<CancellationToken>,
    interrupt_confirm: Option<CancellationToken>,
}

impl TaskState {
    fn new(max_attempts: u32) -> Self {
        Self {
            disposed: false,
            events: EventBus::default(),
            run_id: 0,
            task_id: None,
            session_id: None,
            model_id: None,
            working_directory: None,
            messages: Vec::new(),
            completed: false,
            interrupted: false,
            received_first_tool: false,
            plan_declared: false,
            attachment_dir: None,
            temp_sessions: Vec::new(),
            last_request: None,
            process: None,
            parser: StreamParser::new(),
            enforcer: CompletionEnforcer::new(max_attempts),
            waiting: None,
            interrupt_confirm: None,
        }
    }

    fn current_task_id(&self) -> String {
        self.task_id.clone().unwrap_or_default()
    }

    fn emit(&mut self, event: OrchestratorEvent) {
        self.events.emit(&event);
    }

    fn debug(&mut self, kind: DebugKind, message: impl Into<String>, data: Option<Value>) {
        let task_id = self.task_id.clone();
        self.emit(OrchestratorEvent::Debug {
            task_id,
            entry: DebugEntry {
                kind,
                message: message.into(),
                data,
            },
        });
    }

    fn progress(&mut self, progress: TaskProgress) {
        let task_id = self.current_task_id();
        self.emit(OrchestratorEvent::Progress { task_id, progress });
    }

    fn push_message(&mut self, role: MessageRole, content: String) {
        let message = TaskMessage {
            id: ids::message_id(),
            role,
            content,
            timestamp: Utc::now(),
        };
        self.messages.push(message.clone());
        let task_id = self.current_task_id();
        self.emit(OrchestratorEvent::Message { task_id, message });
    }

    fn cancel_timers(&mut self) {
        if let Some(token) = self.waiting.take() {
            token.cancel();
        }
        if let Some(token) = self.interrupt_confirm.take() {
            token.cancel();
        }
    }

    fn kill_process(&mut self) {
        if let Some(process) = self.process.take() {
            if let Err(err) = process.kill() {
                warn!(%err, "failed to kill agent process");
            }
        }
    }

    /// Emit the single terminal event for the task; later calls are ignored.
    fn finish(&mut self, result: TaskResult) {
        if self.completed {
            return;
        }
        self.completed = true;
        self.cancel_timers();
        let task_id = self.current_task_id();
        info!(task_id, status = ?result.status, "task finished");
        self.emit(OrchestratorEvent::Complete { task_id, result });
    }

    fn begin_task(&mut self, task_id: &str, config: &TaskConfig, model_id: Option<String>) {
        self.cancel_timers();
        self.kill_process();
        self.run_id += 1;
        self.task_id = Some(task_id.to_owned());
        self.session_id.clone_from(&config.session_id);
        self.model_id = model_id;
        self.working_directory.clone_from(&config.working_directory);
        self.messages.clear();
        self.completed = false;
        self.interrupted = false;
        self.received_first_tool = false;
        self.plan_declared = false;
        self.attachment_dir = None;
        self.last_request = None;
        self.parser.reset();
        self.enforcer.reset();
    }

    fn ensure_current(&self, expected_run: u64) -> Result<()> {
        if self.disposed {
            return Err(AppError::Usage(DISPOSED.into()));
        }
        if self.run_id != expected_run {
            return Err(AppError::Usage(
                "task was superseded before its process started".into(),
            ));
        }
        Ok(())
    }
}

struct Inner {
    options: OrchestratorOptions,
    store: TempFileStore,
    launcher: Arc<dyn ProcessLauncher>,
    state: Mutex<TaskState>,
    watcher: Mutex<Option<LogWatcher>>,
    log_error_tx: mpsc::UnboundedSender<LogError>,
    log_error_rx: Mutex<Option<mpsc::UnboundedReceiver<LogError>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        state.cancel_timers();
        state.kill_process();
    }
}

/// Supervisor for one agent process at a time.
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct TaskOrchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOrchestrator")
            .field("options", &self.inner.options)
            .finish_non_exhaustive()
    }
}

impl TaskOrchestrator {
    /// Orchestrator launching agents over the native pseudo-terminal.
    #[must_use]
    pub fn new(options: OrchestratorOptions, store: TempFileStore) -> Self {
        Self::with_launcher(options, store, Arc::new(PtyLauncher))
    }

    /// Orchestrator using a custom process launcher.
    #[must_use]
    pub fn with_launcher(
        options: OrchestratorOptions,
        store: TempFileStore,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Self {
        let (log_error_tx, log_error_rx) = mpsc::unbounded_channel();
        let max_attempts = options.max_continuation_attempts;
        Self {
            inner: Arc::new(Inner {
                options,
                store,
                launcher,
                state: Mutex::new(TaskState::new(max_attempts)),
                watcher: Mutex::new(None),
                log_error_tx,
                log_error_rx: Mutex::new(Some(log_error_rx)),
            }),
        }
    }

    /// Receive every event emitted from now on.
    ///
    /// The receiver closes when the orchestrator is disposed.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<OrchestratorEvent> {
        self.inner.state.lock().await.events.subscribe()
    }

    /// Start a task, superseding any task still running.
    ///
    /// Returns as soon as the process is spawned; everything else arrives
    /// as events. Attachment failures are reported as a debug warning and
    /// the task runs without files.
    ///
    /// # Errors
    ///
    /// - `AppError::Usage` if the orchestrator was disposed or the prompt is empty.
    /// - Errors from the command resolver, environment or argument builders,
    ///   the before-start hook, or the process launcher.
    pub async fn start_task(&self, config: TaskConfig) -> Result<Task> {
        let task_id = config.task_id.clone().unwrap_or_else(ids::task_id);
        let span = info_span!("start_task", task_id = %task_id);
        self.start(config, task_id).instrument(span).await
    }

    /// Continue a prior agent session with a new prompt.
    ///
    /// # Errors
    ///
    /// Same as [`start_task`](Self::start_task).
    pub async fn resume_session(&self, session_id: &str, prompt: &str) -> Result<Task> {
        self.start_task(TaskConfig {
            session_id: Some(session_id.to_owned()),
            ..TaskConfig::new(prompt)
        })
        .await
    }

    /// Write `text` plus a newline to the running agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Usage` when no process is running, or
    /// `AppError::Process` if the write fails.
    pub async fn send_response(&self, text: &str) -> Result<()> {
        let state = self.inner.state.lock().await;
        let process = state
            .process
            .as_ref()
            .ok_or_else(|| AppError::Usage(NO_PROCESS.into()))?;
        process.write(&format!("{text}\n"))?;
        debug!("response sent to agent");
        Ok(())
    }

    /// Ask the agent to stop. The exit decides the outcome.
    ///
    /// On Windows the batch-job prompt is answered shortly afterwards. A
    /// no-op when nothing is running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the interrupt cannot be written.
    pub async fn interrupt_task(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let Some(process) = state.process.clone() else {
            info!("no active process to interrupt");
            return Ok(());
        };

        state.interrupted = true;
        process.write(INTERRUPT)?;
        info!("interrupt sent to agent");

        if self.inner.options.platform.is_windows() {
            if let Some(token) = state.interrupt_confirm.take() {
                token.cancel();
            }
            let token = CancellationToken::new();
            state.interrupt_confirm = Some(token.clone());
            tokio::spawn(confirm_interrupt(
                Arc::downgrade(&self.inner),
                state.run_id,
                self.inner.options.interrupt_confirm,
                token,
            ));
        }
        Ok(())
    }

    /// Kill the agent immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Usage` when no process is running, or
    /// `AppError::Process` if the kill fails.
    pub async fn cancel_task(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let process = state
            .process
            .take()
            .ok_or_else(|| AppError::Usage(NO_PROCESS.into()))?;
        state.cancel_timers();
        process.kill()?;
        info!(task_id = ?state.task_id, "agent process cancelled");
        Ok(())
    }

    /// Tear everything down. Safe to call more than once.
    ///
    /// Attachment cleanup runs in the background; subscribers are detached
    /// and see no further events.
    pub async fn dispose(&self) {
        if let Some(mut watcher) = self.inner.watcher.lock().await.take() {
            watcher.stop();
        }

        let mut state = self.inner.state.lock().await;
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.cancel_timers();
        state.kill_process();

        for session in std::mem::take(&mut state.temp_sessions) {
            let store = self.inner.store.clone();
            tokio::spawn(async move {
                if let Err(err) = store.cleanup_session(&session).await {
                    warn!(session, %err, "failed to clean up attachment session");
                }
            });
        }

        state.run_id += 1;
        state.task_id = None;
        state.session_id = None;
        state.messages.clear();
        state.attachment_dir = None;
        state.last_request = None;
        state.parser.reset();
        state.enforcer.reset();
        state.events.clear();
        info!("orchestrator disposed");
    }

    /// Active task id.
    pub async fn task_id(&self) -> Option<String> {
        self.inner.state.lock().await.task_id.clone()
    }

    /// Agent session id, once known.
    pub async fn session_id(&self) -> Option<String> {
        self.inner.state.lock().await.session_id.clone()
    }

    /// Whether an agent process is running.
    pub async fn is_running(&self) -> bool {
        self.inner.state.lock().await.process.is_some()
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub async fn is_disposed(&self) -> bool {
        self.inner.state.lock().await.disposed
    }

    /// Transcript of the current task.
    pub async fn messages(&self) -> Vec<TaskMessage> {
        self.inner.state.lock().await.messages.clone()
    }

    async fn start(&self, config: TaskConfig, task_id: String) -> Result<Task> {
        let inner = &self.inner;
        let model_id = config
            .model_id
            .clone()
            .or_else(|| inner.options.model_id.clone());

        let run_id = {
            let mut state = inner.state.lock().await;
            if state.disposed {
                return Err(AppError::Usage(DISPOSED.into()));
            }
            if config.prompt.trim().is_empty() {
                return Err(AppError::Usage("prompt must not be empty".into()));
            }
            state.begin_task(&task_id, &config, model_id.clone());
            state.progress(TaskProgress::new(ProgressStage::Starting, "Starting task..."));
            state.run_id
        };

        let temp_files = inner.materialize(&config, &task_id, run_id).await;
        inner.start_log_watcher().await;

        let request = CliArgsRequest {
            task_id: task_id.clone(),
            prompt: config.prompt.clone(),
            session_id: config.session_id.clone(),
            model_id,
            allowed_tools: config.allowed_tools.clone(),
            system_prompt_append: config.system_prompt_append.clone(),
            output_schema: config.output_schema.clone(),
            attachments: config.attachments.clone(),
            temp_files,
        };
        inner.state.lock().await.last_request = Some(request.clone());

        let launched = match inner.options.before_start {
            Some(ref hook) => match hook.before_start().await {
                Ok(()) => inner.spawn_run(request, run_id).await,
                Err(err) => Err(err),
            },
            None => inner.spawn_run(request, run_id).await,
        };

        if let Err(err) = launched {
            warn!(%err, "task failed to start");
            let mut state = inner.state.lock().await;
            if !state.disposed && state.run_id == run_id {
                state.task_id = None;
            }
            return Err(err);
        }

        let now = Utc::now();
        Ok(Task {
            id: task_id,
            prompt: config.prompt,
            status: TaskStatus::Running,
            session_id: config.session_id,
            messages: Vec::new(),
            created_at: now,
            started_at: Some(now),
        })
    }
}

impl Inner {
    async fn materialize(
        &self,
        config: &TaskConfig,
        task_id: &str,
        run_id: u64,
    ) -> Vec<TempFileInfo> {
        if config.attachments.is_empty() {
            return Vec::new();
        }

        let key = config
            .session_id
            .clone()
            .unwrap_or_else(|| task_id.to_owned());
        let result = self
            .store
            .create_temp_files_from_attachments(&key, &config.attachments)
            .await;

        let mut state = self.state.lock().await;
        if !state.temp_sessions.contains(&key) {
            state.temp_sessions.push(key.clone());
        }
        match result {
            Ok(files) => {
                if state.run_id == run_id && !files.is_empty() {
                    state.attachment_dir = Some(self.store.session_path(&key));
                }
                info!(session = %key, count = files.len(), "attachments materialized");
                state.debug(
                    DebugKind::Info,
                    format!("Materialized {} attachment(s)", files.len()),
                    Some(json!({ "session": key })),
                );
                files
            }
            Err(err) => {
                warn!(%err, "attachment materialization failed, continuing without files");
                state.debug(
                    DebugKind::Warning,
                    format!("Failed to materialize attachments: {err}"),
                    None,
                );
                Vec::new()
            }
        }
    }

    async fn start_log_watcher(self: &Arc<Self>) {
        let Some(ref dir) = self.options.log_dir else {
            return;
        };

        if let Some(errors) = self.log_error_rx.lock().await.take() {
            tokio::spawn(
                consume_log_errors(Arc::downgrade(self), errors)
                    .instrument(info_span!("log_errors")),
            );
        }

        let mut watcher = self.watcher.lock().await;
        watcher
            .get_or_insert_with(|| {
                LogWatcher::new(
                    dir.clone(),
                    self.options.log_poll_interval,
                    self.log_error_tx.clone(),
                )
            })
            .start()
            .await;
    }

    /// Launch one agent run. Boxed because exit handling re-enters it for
    /// continuation runs.
    fn spawn_run(
        self: &Arc<Self>,
        request: CliArgsRequest,
        expected_run: u64,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let resolved = self.options.command.resolve()?;
            let env = self.options.environment.build(&request.task_id).await?;
            let mut args = resolved.args.clone();
            args.extend(self.options.cli_args.build(&request).await?);

            let platform = self.options.platform;
            let command_line = build_shell_command(platform, &resolved.program, &args);
            let shell = platform_shell(platform, self.options.packaged);
            let shell_argv = shell_args(platform, command_line.clone());

            let cwd = {
                let state = self.state.lock().await;
                state.ensure_current(expected_run)?;
                state
                    .attachment_dir
                    .clone()
                    .or_else(|| state.working_directory.clone())
                    .or_else(|| self.options.working_directory.clone())
                    .unwrap_or_else(|| self.options.temp_path.clone())
            };
            if self.options.packaged && platform.is_windows() {
                ensure_package_json(&cwd).await;
            }

            let mut state = self.state.lock().await;
            state.ensure_current(expected_run)?;
            state.debug(
                DebugKind::Info,
                format!("Command: {command_line}"),
                Some(json!({ "shell": &shell, "args": &shell_argv })),
            );
            state.debug(
                DebugKind::Info,
                format!("Working directory: {}", cwd.display()),
                None,
            );

            let run_id = state.run_id + 1;
            let (tx, rx) = mpsc::unbounded_channel();
            let process = self.launcher.launch(
                LaunchSpec {
                    program: shell,
                    args: shell_argv,
                    cwd,
                    env,
                    size: self.options.terminal_size,
                },
                tx,
            )?;

            state.run_id = run_id;
            state.process = Some(process);
            state.parser.reset();
            state.progress(TaskProgress::new(ProgressStage::Loading, "Loading agent..."));

            let task_id = state.current_task_id();
            info!(task_id, run_id, "agent run started");
            tokio::spawn(
                pump(Arc::downgrade(self), run_id, rx, self.options.exit_drain)
                    .instrument(info_span!("agent_run", task_id = %task_id, run_id)),
            );
            Ok(())
        })
    }

    async fn handle_output(self: &Arc<Self>, run_id: u64, chunk: &str) {
        let mut state = self.state.lock().await;
        if state.disposed || state.run_id != run_id {
            debug!(run_id, "dropping output from stale run");
            return;
        }
        state.debug(DebugKind::Stdout, chunk, None);
        for output in state.parser.feed(chunk) {
            self.handle_parser_output(&mut state, output);
        }
    }

    fn handle_parser_output(self: &Arc<Self>, state: &mut TaskState, output: ParserOutput) {
        match output {
            ParserOutput::Message(message) => self.handle_message(state, message),
            ParserOutput::Warning(warning) => {
                state.debug(DebugKind::ParseWarning, warning, None);
            }
        }
    }

    fn handle_message(self: &Arc<Self>, state: &mut TaskState, message: StreamMessage) {
        if let Some(session) = message.session_id() {
            if state.session_id.as_deref() != Some(session) {
                debug!(session, "agent session id captured");
                state.session_id = Some(session.to_owned());
            }
        }

        match message {
            StreamMessage::StepStart(_) => {
                let model_name = state
                    .model_id
                    .as_deref()
                    .and_then(|id| self.options.model_names.as_ref()?.display_name(id));
                let notice = format!(
                    "Connecting to {}...",
                    model_name.as_deref().unwrap_or("AI")
                );
                state.progress(TaskProgress {
                    stage: ProgressStage::Connecting,
                    message: notice,
                    model_name,
                });
                self.arm_waiting_notice(state);
            }
            StreamMessage::Text(TextPart { text, .. }) => {
                if !text.trim().is_empty() {
                    state.push_message(MessageRole::Assistant, text);
                }
            }
            StreamMessage::ToolCall(call) => {
                Self::handle_tool(state, &call.tool, &call.input, None);
            }
            StreamMessage::ToolUse(tool_use) => {
                Self::handle_tool(state, &tool_use.tool, &tool_use.input, Some(&tool_use));
            }
            StreamMessage::ToolResult(result) => {
                let task_id = state.current_task_id();
                state.emit(OrchestratorEvent::ToolResult {
                    task_id,
                    output: result.output,
                });
            }
            StreamMessage::StepFinish(finish) => {
                if finish.reason.as_deref() == Some("error") {
                    let session = state.session_id.clone();
                    state.finish(TaskResult::error(session, "Task failed"));
                } else if state.enforcer.handle_step_finish(finish.reason.as_deref())
                    == StepAction::Complete
                {
                    let session = state.session_id.clone();
                    state.finish(TaskResult::success(session));
                }
            }
            StreamMessage::Error(error) => {
                warn!(name = ?error.name, message = %error.message, "agent reported an error");
                let session = state.session_id.clone();
                state.finish(TaskResult::error(session, error.message));
            }
            StreamMessage::Unknown(record) => {
                debug!(kind = %record.kind, "ignoring unknown stream record");
            }
        }
    }

    #[allow(clippy::too_many_lines)] // One arm per designated tool.
    fn handle_tool(state: &mut TaskState, tool: &str, input: &Value, tool_use: Option<&ToolUse>) {
        let task_id = state.current_task_id();

        if !state.received_first_tool {
            state.received_first_tool = true;
            if let Some(token) = state.waiting.take() {
                token.cancel();
            }
        }
        state.enforcer.mark_tools_used();

        if !is_plan_tool(tool) && !state.plan_declared && !is_exempt_before_plan(tool) {
            warn!(tool, "tool used before the plan was declared");
            state.debug(
                DebugKind::Warning,
                format!("Tool {tool} used before a plan was declared"),
                Some(json!({ "tool": tool })),
            );
        }

        state.emit(OrchestratorEvent::ToolUse {
            task_id: task_id.clone(),
            tool: tool.to_owned(),
            input: input.clone(),
        });
        state.progress(TaskProgress::new(
            ProgressStage::ToolUse,
            format!("Using {tool}"),
        ));

        if let Some(description) = input
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.trim().is_empty())
        {
            state.push_message(MessageRole::Assistant, description.to_owned());
        }

        if is_plan_tool(tool) {
            state.plan_declared = true;
            match Plan::from_input(input) {
                Some(plan) => {
                    state.push_message(MessageRole::Assistant, plan.render());
                    let todos = todos_from_steps(&plan.steps);
                    state.enforcer.update_todos(todos.clone());
                    state.emit(OrchestratorEvent::TodoUpdate {
                        task_id: task_id.clone(),
                        todos,
                    });
                }
                None => warn!(tool, "plan declaration without goal or steps"),
            }
        } else if is_todo_tool(tool) {
            match parse_todos(input) {
                Some(todos) => {
                    state.enforcer.update_todos(todos.clone());
                    state.emit(OrchestratorEvent::TodoUpdate {
                        task_id: task_id.clone(),
                        todos,
                    });
                }
                None => warn!(tool, "unreadable todo payload"),
            }
        } else if is_complete_tool(tool) {
            state.enforcer.handle_complete_task_detection(input);
        } else if tool == QUESTION_TOOL {
            match permission_from_question(&task_id, input) {
                Some(request) => state.emit(OrchestratorEvent::PermissionRequest { request }),
                None => warn!(tool, "question tool without a question"),
            }
        }

        if let Some(output) = tool_use
            .filter(|t| t.is_finished())
            .and_then(|t| t.output.clone())
        {
            state.emit(OrchestratorEvent::ToolResult { task_id, output });
        }
    }

    fn arm_waiting_notice(self: &Arc<Self>, state: &mut TaskState) {
        if let Some(token) = state.waiting.take() {
            token.cancel();
        }
        if state.received_first_tool {
            return;
        }

        let token = CancellationToken::new();
        state.waiting = Some(token.clone());
        let inner = Arc::downgrade(self);
        let run_id = state.run_id;
        let delay = self.options.waiting_notice;
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let Some(inner) = inner.upgrade() else { return };
                    let mut state = inner.state.lock().await;
                    if token.is_cancelled()
                        || state.disposed
                        || state.run_id != run_id
                        || state.received_first_tool
                        || state.completed
                    {
                        return;
                    }
                    state.progress(TaskProgress::new(
                        ProgressStage::Waiting,
                        "Waiting for response...",
                    ));
                }
            }
        });
    }

    #[allow(clippy::too_many_lines)] // Exit outcomes are checked in a fixed order.
    async fn handle_process_exit(self: &Arc<Self>, run_id: u64, code: i32) {
        let (request, expected_run) = {
            let mut state = self.state.lock().await;
            if state.disposed || state.run_id != run_id {
                debug!(run_id, code, "ignoring exit of stale run");
                return;
            }

            for output in state.parser.flush() {
                self.handle_parser_output(&mut state, output);
            }
            state.process = None;
            state.cancel_timers();
            state.debug(
                DebugKind::Exit,
                format!("Process exited with code {code}"),
                Some(json!({ "code": code })),
            );
            info!(run_id, code, "agent process exited");

            if state.completed {
                state.task_id = None;
                return;
            }

            let session = state.session_id.clone();
            if state.interrupted && code == 0 {
                state.finish(TaskResult::interrupted(session));
                state.task_id = None;
                return;
            }
            if code != 0 {
                state.completed = true;
                let task_id = state.current_task_id();
                state.emit(OrchestratorEvent::Error {
                    task_id,
                    message: format!("agent CLI exited with code {code}"),
                });
                state.task_id = None;
                return;
            }

            match state.enforcer.handle_process_exit(code) {
                ExitAction::Complete => {
                    state.finish(TaskResult::success(session));
                    state.task_id = None;
                    return;
                }
                ExitAction::Exhausted { message } => {
                    state.finish(TaskResult::error(session, message));
                    state.task_id = None;
                    return;
                }
                ExitAction::StartContinuation { prompt, attempt } => {
                    state.debug(
                        DebugKind::Info,
                        format!("Starting continuation attempt {attempt}"),
                        Some(json!({ "attempt": attempt })),
                    );
                    let mut request = state.last_request.clone().unwrap_or_else(|| {
                        CliArgsRequest {
                            task_id: state.current_task_id(),
                            model_id: state.model_id.clone(),
                            ..CliArgsRequest::default()
                        }
                    });
                    request.prompt = prompt;
                    request.session_id = session;
                    request.attachments.clear();
                    request.temp_files.clear();
                    (request, state.run_id)
                }
            }
        };

        if let Err(err) = self.spawn_run(request, expected_run).await {
            warn!(%err, "continuation run failed to start");
            let mut state = self.state.lock().await;
            if !state.disposed && state.run_id == expected_run {
                let session = state.session_id.clone();
                state.finish(TaskResult::error(
                    session,
                    format!("failed to complete: {err}"),
                ));
                state.task_id = None;
            }
        }
    }

    async fn handle_log_error(&self, error: LogError) {
        let mut state = self.state.lock().await;
        if state.disposed || state.task_id.is_none() || state.completed {
            debug!(name = %error.error_name, "log error outside an active task");
            return;
        }

        let message = user_message(&error);
        state.debug(
            DebugKind::LogError,
            message.clone(),
            serde_json::to_value(&error).ok(),
        );
        if error.is_auth_error() {
            if let Some(provider_id) = error.provider_id.clone() {
                state.emit(OrchestratorEvent::AuthError {
                    provider_id,
                    message: message.clone(),
                });
            }
        }

        let session = state.session_id.clone();
        state.finish(TaskResult::error(session, message));
        state.kill_process();
    }
}

async fn pump(
    inner: Weak<Inner>,
    run_id: u64,
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    drain: Duration,
) {
    let mut eof = false;
    let code = loop {
        match events.recv().await {
            Some(ProcessEvent::Output(chunk)) => {
                let Some(inner) = inner.upgrade() else { return };
                inner.handle_output(run_id, &chunk).await;
            }
            Some(ProcessEvent::Eof) => eof = true,
            Some(ProcessEvent::Exited(code)) => break code,
            None => {
                debug!(run_id, "process events closed without an exit status");
                break -1;
            }
        }
    };

    // Output may still be in flight after the exit notification.
    if !eof {
        let drained = tokio::time::timeout(drain, async {
            while let Some(event) = events.recv().await {
                match event {
                    ProcessEvent::Output(chunk) => {
                        if let Some(inner) = inner.upgrade() {
                            inner.handle_output(run_id, &chunk).await;
                        }
                    }
                    ProcessEvent::Eof => break,
                    ProcessEvent::Exited(_) => {}
                }
            }
        })
        .await;
        if drained.is_err() {
            debug!(run_id, "output drain timed out");
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_process_exit(run_id, code).await;
    }
}

async fn confirm_interrupt(
    inner: Weak<Inner>,
    run_id: u64,
    delay: Duration,
    token: CancellationToken,
) {
    tokio::select! {
        () = token.cancelled() => {}
        () = tokio::time::sleep(delay) => {
            let Some(inner) = inner.upgrade() else { return };
            let state = inner.state.lock().await;
            if token.is_cancelled() || state.run_id != run_id {
                return;
            }
            if let Some(ref process) = state.process {
                match process.write(BATCH_CONFIRM) {
                    Ok(()) => debug!("batch termination confirmed"),
                    Err(err) => warn!(%err, "failed to confirm batch termination"),
                }
            }
        }
    }
}

async fn consume_log_errors(inner: Weak<Inner>, mut errors: mpsc::UnboundedReceiver<LogError>) {
    while let Some(error) = errors.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        inner.handle_log_error(error).await;
    }
}

async fn ensure_package_json(dir: &Path) {
    let manifest = dir.join("package.json");
    if tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
        return;
    }
    match tokio::fs::write(&manifest, PACKAGE_JSON_PLACEHOLDER).await {
        Ok(()) => info!(path = %manifest.display(), "created workspace package.json"),
        Err(err) => {
            warn!(path = %manifest.display(), %err, "could not create workspace package.json");
        }
    }
}
