#![forbid(unsafe_code)]

//! `agent-conductor` — runs an agent CLI task and streams its events.
//!
//! Events are printed to stdout as one JSON object per line; logs go to
//! stderr.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::attachments::TempFileStore;
use agent_conductor::config::ConductorConfig;
use agent_conductor::models::attachment::{Attachment, AttachmentType};
use agent_conductor::models::task::{ResultStatus, TaskConfig};
use agent_conductor::orchestrator::{
    DebugKind, OrchestratorEvent, OrchestratorOptions, TaskOrchestrator,
};
use agent_conductor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "Agent CLI task orchestrator", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a task and print its events until it finishes.
    Run {
        /// Instruction for the agent.
        #[arg(long)]
        prompt: String,
        /// File to attach; may be repeated.
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
        /// Working directory for the agent.
        #[arg(long)]
        workdir: Option<PathBuf>,
        /// Model identifier.
        #[arg(long)]
        model: Option<String>,
        /// Also print raw terminal output events.
        #[arg(long)]
        raw: bool,
    },
    /// Continue a prior agent session.
    Resume {
        /// Agent session id.
        #[arg(long)]
        session: String,
        /// Instruction for the agent.
        #[arg(long)]
        prompt: String,
        /// Also print raw terminal output events.
        #[arg(long)]
        raw: bool,
    },
    /// Remove expired attachment sessions and print the counts.
    Sweep,
    /// List attachment sessions found on disk.
    Sessions,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = match args.config {
        Some(ref path) => ConductorConfig::load_from_path(path)?,
        None => ConductorConfig::default(),
    };
    info!("configuration loaded");

    let store = match config.attachments.base_dir {
        Some(ref dir) => TempFileStore::with_root(dir, config.attachments.limits()),
        None => TempFileStore::new(config.attachments.limits()),
    };

    match args.command {
        Command::Run {
            prompt,
            attachments,
            workdir,
            model,
            raw,
        } => {
            let task = TaskConfig {
                working_directory: workdir,
                model_id: model,
                attachments: read_attachments(&attachments).await?,
                ..TaskConfig::new(prompt)
            };
            drive(&config, store, task, raw).await
        }
        Command::Resume {
            session,
            prompt,
            raw,
        } => {
            let task = TaskConfig {
                session_id: Some(session),
                ..TaskConfig::new(prompt)
            };
            drive(&config, store, task, raw).await
        }
        Command::Sweep => {
            store.initialize().await?;
            let summary = store.cleanup_expired().await?;
            info!(
                sessions = summary.sessions_removed,
                files = summary.files_removed,
                "expiry sweep finished"
            );
            print_json(&summary)
        }
        Command::Sessions => {
            store.initialize().await?;
            for session in store.sessions().await {
                print_json(&session)?;
            }
            Ok(())
        }
    }
}

/// Run one task to completion, printing events and interrupting on Ctrl-C.
async fn drive(
    config: &ConductorConfig,
    store: TempFileStore,
    task: TaskConfig,
    raw: bool,
) -> Result<()> {
    let orchestrator =
        TaskOrchestrator::new(OrchestratorOptions::from_config(config), store.clone());
    let mut events = orchestrator.subscribe().await;
    let has_attachments = !task.attachments.is_empty();
    let session_key = task.session_id.clone();

    let started = orchestrator.start_task(task).await?;
    info!(task_id = %started.id, "task started");

    let interrupt = shutdown_signal();
    tokio::pin!(interrupt);
    let mut interrupted = false;
    let mut failure = None;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if raw || !is_raw_output(&event) {
                    print_json(&event)?;
                }
                match event {
                    OrchestratorEvent::Complete { result, .. } => {
                        if result.status == ResultStatus::Error {
                            failure = Some(result.error.unwrap_or_else(|| "task failed".into()));
                        }
                        break;
                    }
                    OrchestratorEvent::Error { message, .. } => {
                        failure = Some(message);
                        break;
                    }
                    _ => {}
                }
            }
            () = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!("interrupt requested");
                orchestrator.interrupt_task().await?;
            }
        }
    }

    orchestrator.dispose().await;
    if has_attachments {
        let key = session_key.unwrap_or(started.id);
        if let Err(err) = store.cleanup_session(&key).await {
            warn!(%err, "attachment cleanup failed");
        }
    }

    match failure {
        Some(message) => Err(AppError::Completion(message)),
        None => Ok(()),
    }
}

fn is_raw_output(event: &OrchestratorEvent) -> bool {
    matches!(
        event,
        OrchestratorEvent::Debug { entry, .. } if entry.kind == DebugKind::Stdout
    )
}

async fn read_attachments(paths: &[PathBuf]) -> Result<Vec<Attachment>> {
    let mut attachments = Vec::with_capacity(paths.len());
    for path in paths {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| AppError::Attachment(format!("cannot read {}: {err}", path.display())))?;
        let kind = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(AttachmentType::Document, AttachmentType::from_extension);
        let mut attachment =
            Attachment::new(kind, STANDARD.encode(&bytes)).with_size(bytes.len() as u64);
        if let Some(name) = file_name(path) {
            attachment = attachment.with_file_name(name);
        }
        attachments.push(attachment);
    }
    Ok(attachments)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

fn print_json(value: &impl Serialize) -> Result<()> {
    let line = serde_json::to_string(value)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
