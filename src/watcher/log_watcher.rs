//! Tails `*.log` files in the agent's log directory.
//!
//! File offsets are recorded when the watcher starts, so only lines written
//! afterwards are inspected. Files created later are read from the
//! beginning; a file that shrinks is treated as rotated and re-read. Change
//! notifications come from `notify`, with a poll interval as a fallback for
//! filesystems that do not deliver events.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::classify::{parse_log_line, LogError};
use crate::Result;

const LOG_EXTENSION: &str = "log";

/// Read positions for every log file in a directory.
#[derive(Debug, Default)]
pub struct LogTail {
    offsets: HashMap<PathBuf, u64>,
    partial: HashMap<PathBuf, String>,
}

impl LogTail {
    /// Record the current length of every log file so only new lines are read.
    pub async fn baseline(dir: &Path) -> Self {
        let mut tail = Self::default();
        for path in log_files(dir) {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                tail.offsets.insert(path, meta.len());
            }
        }
        tail
    }

    /// Complete lines appended since the previous call.
    pub async fn read_new_lines(&mut self, dir: &Path) -> Vec<String> {
        let mut lines = Vec::new();
        for path in log_files(dir) {
            match self.read_file(&path).await {
                Ok(mut new) => lines.append(&mut new),
                Err(err) => debug!(path = %path.display(), %err, "cannot read log file"),
            }
        }
        lines
    }

    async fn read_file(&mut self, path: &Path) -> Result<Vec<String>> {
        let len = tokio::fs::metadata(path).await?.len();
        let mut offset = self.offsets.get(path).copied().unwrap_or(0);
        if len < offset {
            debug!(path = %path.display(), "log file shrank, reading from start");
            offset = 0;
            self.partial.remove(path);
        }
        if len == offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = Vec::new();
        file.take(len - offset).read_to_end(&mut buf).await?;
        self.offsets.insert(path.to_owned(), offset + buf.len() as u64);

        let mut text = self.partial.remove(path).unwrap_or_default();
        text.push_str(&String::from_utf8_lossy(&buf));

        let mut lines: Vec<String> = text.split('\n').map(str::to_owned).collect();
        if let Some(rest) = lines.pop().filter(|rest| !rest.is_empty()) {
            self.partial.insert(path.to_owned(), rest);
        }
        Ok(lines.into_iter().filter(|l| !l.trim().is_empty()).collect())
    }
}

fn log_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/*.{LOG_EXTENSION}",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths.filter_map(std::result::Result::ok).collect(),
        Err(err) => {
            warn!(%err, "invalid log glob pattern");
            Vec::new()
        }
    }
}

/// Background tailer forwarding error records through a channel.
#[derive(Debug)]
pub struct LogWatcher {
    log_dir: PathBuf,
    poll_interval: Duration,
    error_tx: mpsc::UnboundedSender<LogError>,
    cancel: Option<CancellationToken>,
}

impl LogWatcher {
    /// Create a watcher for `log_dir`. Nothing runs until [`start`](Self::start).
    #[must_use]
    pub fn new(
        log_dir: impl Into<PathBuf>,
        poll_interval: Duration,
        error_tx: mpsc::UnboundedSender<LogError>,
    ) -> Self {
        Self {
            log_dir: log_dir.into(),
            poll_interval,
            error_tx,
            cancel: None,
        }
    }

    /// Directory being watched.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Whether the background task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }

    /// Start tailing. A running watcher is restarted with a fresh baseline.
    ///
    /// Must be called from within a tokio runtime. A missing directory is
    /// not an error; it is picked up by the poll loop once it appears.
    pub async fn start(&mut self) {
        self.stop();

        let tail = LogTail::baseline(&self.log_dir).await;
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<()>();
        let watcher = self.create_fs_watcher(notify_tx);

        let cancel = CancellationToken::new();
        let span = info_span!("log_watcher", dir = %self.log_dir.display());
        tokio::spawn(
            run(
                self.log_dir.clone(),
                self.poll_interval,
                tail,
                watcher,
                notify_rx,
                self.error_tx.clone(),
                cancel.clone(),
            )
            .instrument(span),
        );
        self.cancel = Some(cancel);
        info!(dir = %self.log_dir.display(), "log watcher started");
    }

    /// Stop tailing. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
            debug!(dir = %self.log_dir.display(), "log watcher stopped");
        }
    }

    fn create_fs_watcher(
        &self,
        notify_tx: mpsc::UnboundedSender<()>,
    ) -> Option<notify::RecommendedWatcher> {
        let handler = move |result: std::result::Result<Event, notify::Error>| match result {
            Ok(event) if is_log_event(&event) => {
                let _ = notify_tx.send(());
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "log file watcher error"),
        };

        let mut watcher = match notify::recommended_watcher(handler) {
            Ok(watcher) => watcher,
            Err(err) => {
                warn!(%err, "cannot create log file watcher, polling only");
                return None;
            }
        };

        if !self.log_dir.is_dir() {
            info!(dir = %self.log_dir.display(), "log directory does not exist yet, polling only");
            return None;
        }
        if let Err(err) = watcher.watch(&self.log_dir, RecursiveMode::NonRecursive) {
            warn!(%err, "cannot watch log directory, polling only");
            return None;
        }
        Some(watcher)
    }
}

impl Drop for LogWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    dir: PathBuf,
    poll_interval: Duration,
    mut tail: LogTail,
    // Held so the OS watch stays registered while the task runs.
    _watcher: Option<notify::RecommendedWatcher>,
    mut notify_rx: mpsc::UnboundedReceiver<()>,
    error_tx: mpsc::UnboundedSender<LogError>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some(()) = notify_rx.recv() => {}
            _ = interval.tick() => {}
        }

        for line in tail.read_new_lines(&dir).await {
            if let Some(error) = parse_log_line(&line) {
                warn!(
                    kind = ?error.kind,
                    name = %error.error_name,
                    provider = ?error.provider_id,
                    "error record in agent log"
                );
                if error_tx.send(error).is_err() {
                    debug!("log error receiver dropped, stopping watcher");
                    return;
                }
            }
        }
    }
}

fn is_log_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == LOG_EXTENSION))
}
