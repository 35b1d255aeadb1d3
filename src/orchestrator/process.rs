//! Agent process launching over a pseudo-terminal.
//!
//! The orchestrator talks to processes through [`ProcessLauncher`] and
//! [`ProcessHandle`] so tests can substitute a scripted process. The
//! production [`PtyLauncher`] spawns the shell on a `portable-pty` pair and
//! runs two threads per process:
//!
//! - a reader forwarding output as [`ProcessEvent::Output`], then
//!   [`ProcessEvent::Eof`];
//! - a waiter forwarding [`ProcessEvent::Exited`].
//!
//! The two may arrive in either order.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

const READ_BUFFER_BYTES: usize = 8192;

/// Terminal type advertised to the child.
pub const TERM_NAME: &str = "xterm-256color";

/// Pseudo-terminal dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    /// Columns. Wide enough that records are never wrapped.
    pub cols: u16,
    /// Rows.
    pub rows: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            cols: 32_000,
            rows: 30,
        }
    }
}

/// Everything needed to start one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Shell executable.
    pub program: String,
    /// Shell arguments, ending with the quoted command line.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Complete environment; nothing else is inherited.
    pub env: HashMap<String, String>,
    /// Terminal dimensions.
    pub size: TerminalSize,
}

/// Notifications from a running process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of terminal output.
    Output(String),
    /// The output stream closed.
    Eof,
    /// The process exited with this code.
    Exited(i32),
}

/// Control surface of a running process.
pub trait ProcessHandle: Send + Sync {
    /// Write raw input to the terminal.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if the terminal is closed.
    fn write(&self, data: &str) -> Result<()>;

    /// Kill the process immediately.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if the kill signal cannot be delivered.
    fn kill(&self) -> Result<()>;

    /// OS process id, when known.
    fn pid(&self) -> Option<u32>;
}

/// Starts processes and reports their events on a channel.
pub trait ProcessLauncher: Send + Sync {
    /// Start a process described by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Process`] if the process cannot be started.
    fn launch(
        &self,
        spec: LaunchSpec,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Arc<dyn ProcessHandle>>;
}

/// Launcher backed by the host's native pseudo-terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct PtyLauncher;

impl ProcessLauncher for PtyLauncher {
    fn launch(
        &self,
        spec: LaunchSpec,
        events: mpsc::UnboundedSender<ProcessEvent>,
    ) -> Result<Arc<dyn ProcessHandle>> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: spec.size.rows,
                cols: spec.size.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| AppError::Process(format!("failed to open pty: {err}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env_clear();
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        cmd.env("TERM", TERM_NAME);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|err| AppError::Process(format!("failed to spawn agent: {err}")))?;
        // Drop our copy of the slave so the reader sees EOF once the child exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| AppError::Process(format!("failed to open pty reader: {err}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| AppError::Process(format!("failed to open pty writer: {err}")))?;
        let killer = child.clone_killer();
        let pid = child.process_id();

        let output_tx = events.clone();
        std::thread::Builder::new()
            .name("pty-reader".into())
            .spawn(move || read_output(reader, &output_tx))
            .map_err(|err| AppError::Process(format!("failed to start pty reader: {err}")))?;

        std::thread::Builder::new()
            .name("pty-waiter".into())
            .spawn(move || {
                let code = match child.wait() {
                    Ok(status) => i32::try_from(status.exit_code()).unwrap_or(i32::MAX),
                    Err(err) => {
                        warn!(%err, "error waiting for agent process");
                        -1
                    }
                };
                debug!(code, "agent process exited");
                let _ = events.send(ProcessEvent::Exited(code));
            })
            .map_err(|err| AppError::Process(format!("failed to start pty waiter: {err}")))?;

        info!(pid, program = %spec.program, cwd = %spec.cwd.display(), "agent process spawned");
        Ok(Arc::new(PtyHandle {
            writer: Mutex::new(writer),
            killer: Mutex::new(killer),
            _master: Mutex::new(pair.master),
            pid,
        }))
    }
}

struct PtyHandle {
    writer: Mutex<Box<dyn Write + Send>>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    // Keeps the terminal open for the lifetime of the handle.
    _master: Mutex<Box<dyn MasterPty + Send>>,
    pid: Option<u32>,
}

impl ProcessHandle for PtyHandle {
    fn write(&self, data: &str) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AppError::Process("pty writer lock poisoned".into()))?;
        writer
            .write_all(data.as_bytes())
            .and_then(|()| writer.flush())
            .map_err(|err| AppError::Process(format!("failed to write to agent: {err}")))
    }

    fn kill(&self) -> Result<()> {
        #[cfg(unix)]
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            // The shell leads its own process group; take the agent down with it.
            match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) => return Ok(()),
                Err(err) => debug!(pid, %err, "killpg failed, falling back to child kill"),
            }
        }

        let mut killer = self
            .killer
            .lock()
            .map_err(|_| AppError::Process("pty killer lock poisoned".into()))?;
        match killer.kill() {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(AppError::Process(format!("failed to kill agent: {err}"))),
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

fn read_output(mut reader: Box<dyn Read + Send>, tx: &mpsc::UnboundedSender<ProcessEvent>) {
    let mut buf = [0u8; READ_BUFFER_BYTES];
    let mut carry: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                carry.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut carry);
                if !text.is_empty() && tx.send(ProcessEvent::Output(text)).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            // Linux reports EIO on the master once the child side closes.
            Err(err) => {
                debug!(%err, "pty read ended");
                break;
            }
        }
    }
    if !carry.is_empty() {
        let _ = tx.send(ProcessEvent::Output(
            String::from_utf8_lossy(&carry).into_owned(),
        ));
    }
    let _ = tx.send(ProcessEvent::Eof);
}

/// Take the longest valid UTF-8 prefix out of `carry`.
///
/// An incomplete multi-byte sequence at the end stays in `carry` for the next
/// read. Invalid bytes are replaced.
#[must_use]
pub fn take_utf8(carry: &mut Vec<u8>) -> String {
    match std::str::from_utf8(carry) {
        Ok(text) => {
            let text = text.to_owned();
            carry.clear();
            text
        }
        Err(err) if err.error_len().is_none() => {
            let tail = carry.split_off(err.valid_up_to());
            let text = String::from_utf8_lossy(carry).into_owned();
            *carry = tail;
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(carry).into_owned();
            carry.clear();
            text
        }
    }
}
