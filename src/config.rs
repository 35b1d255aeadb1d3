//! Configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::attachments::store::StoreLimits;
use crate::orchestrator::shell::Platform;
use crate::{AppError, Result};

const MIB: u64 = 1024 * 1024;

/// How the external agent CLI is invoked.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent binary name or path.
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments placed before the per-task arguments.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    /// Model identifier passed to the agent when set.
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory used when a task supplies none.
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Last-resort working directory.
    #[serde(default = "default_fallback_temp_path")]
    pub fallback_temp_path: PathBuf,
    /// Whether the host runs as an installed, packaged application.
    #[serde(default)]
    pub packaged: bool,
    /// Platform override; the host platform when absent.
    #[serde(default)]
    pub platform: Option<Platform>,
}

fn default_command() -> String {
    "opencode".into()
}

fn default_args() -> Vec<String> {
    vec!["run".into(), "--format".into(), "json".into()]
}

fn default_fallback_temp_path() -> PathBuf {
    env::temp_dir()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_args(),
            model: None,
            working_directory: None,
            fallback_temp_path: default_fallback_temp_path(),
            packaged: false,
            platform: None,
        }
    }
}

/// Timer settings, in milliseconds.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimingConfig {
    /// Grace window after a step start before the "waiting" notice fires.
    #[serde(default = "default_waiting_notice_ms")]
    pub waiting_notice_ms: u64,
    /// Delay between the soft interrupt and the batch-job confirmation keystroke.
    #[serde(default = "default_interrupt_confirm_ms")]
    pub interrupt_confirm_ms: u64,
    /// How long trailing output is drained after the process exits.
    #[serde(default = "default_exit_drain_ms")]
    pub exit_drain_ms: u64,
}

fn default_waiting_notice_ms() -> u64 {
    500
}

fn default_interrupt_confirm_ms() -> u64 {
    100
}

fn default_exit_drain_ms() -> u64 {
    250
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            waiting_notice_ms: default_waiting_notice_ms(),
            interrupt_confirm_ms: default_interrupt_confirm_ms(),
            exit_drain_ms: default_exit_drain_ms(),
        }
    }
}

/// Continuation policy for clean exits that did not finish the task.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CompletionConfig {
    /// Maximum continuation runs before the task fails.
    #[serde(default = "default_max_continuation_attempts")]
    pub max_continuation_attempts: u32,
}

fn default_max_continuation_attempts() -> u32 {
    3
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            max_continuation_attempts: default_max_continuation_attempts(),
        }
    }
}

/// Temporary attachment store settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AttachmentConfig {
    /// Store root; `<temp>/conductor-attachments` when absent.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,
    /// Per-file ceiling in MiB.
    #[serde(default = "default_max_file_mb")]
    pub max_file_mb: u64,
    /// Per-session ceiling in MiB.
    #[serde(default = "default_max_session_mb")]
    pub max_session_mb: u64,
    /// Sessions idle for longer than this are swept.
    #[serde(default = "default_max_session_age_hours")]
    pub max_session_age_hours: u64,
    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_max_file_mb() -> u64 {
    100
}

fn default_max_session_mb() -> u64 {
    500
}

fn default_max_session_age_hours() -> u64 {
    24
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            base_dir: None,
            max_file_mb: default_max_file_mb(),
            max_session_mb: default_max_session_mb(),
            max_session_age_hours: default_max_session_age_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl AttachmentConfig {
    /// Convert the configured values into store limits.
    #[must_use]
    pub fn limits(&self) -> StoreLimits {
        StoreLimits {
            max_file_bytes: self.max_file_mb * MIB,
            max_session_bytes: self.max_session_mb * MIB,
            max_session_age: Duration::from_secs(self.max_session_age_hours * 3600),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

/// Out-of-band diagnostic log watcher settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogWatcherConfig {
    /// Whether the watcher runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Directory holding the agent's `*.log` files.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Poll fallback interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for LogWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: None,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LogWatcherConfig {
    /// Resolve the log directory, falling back to the agent's default data directory.
    ///
    /// Returns `None` when no directory is configured and neither
    /// `XDG_DATA_HOME` nor `HOME` is set.
    #[must_use]
    pub fn resolved_log_dir(&self) -> Option<PathBuf> {
        if let Some(ref dir) = self.log_dir {
            return Some(dir.clone());
        }
        if let Some(data) = env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(data).join("opencode").join("log"));
        }
        env::var_os("HOME")
            .filter(|v| !v.is_empty())
            .map(|home| {
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("opencode")
                    .join("log")
            })
    }
}

/// Top-level configuration parsed from `conductor.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConductorConfig {
    /// Agent invocation.
    #[serde(default)]
    pub agent: AgentConfig,
    /// Timer settings.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Continuation policy.
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Attachment store.
    #[serde(default)]
    pub attachments: AttachmentConfig,
    /// Diagnostic log watcher.
    #[serde(default)]
    pub log_watcher: LogWatcherConfig,
}

impl ConductorConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Platform the orchestrator targets.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.agent.platform.unwrap_or_else(Platform::current)
    }

    fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }

        if self.attachments.max_file_mb == 0 || self.attachments.max_session_mb == 0 {
            return Err(AppError::Config(
                "attachment quotas must be greater than zero".into(),
            ));
        }

        if self.attachments.max_file_mb > self.attachments.max_session_mb {
            return Err(AppError::Config(
                "attachments.max_file_mb must not exceed attachments.max_session_mb".into(),
            ));
        }

        if self.attachments.sweep_interval_secs == 0 {
            return Err(AppError::Config(
                "attachments.sweep_interval_secs must be greater than zero".into(),
            ));
        }

        if self.completion.max_continuation_attempts == 0 {
            return Err(AppError::Config(
                "completion.max_continuation_attempts must be greater than zero".into(),
            ));
        }

        if self.log_watcher.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "log_watcher.poll_interval_ms must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
