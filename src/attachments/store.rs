//! Quota-enforced, session-partitioned temporary file store.
//!
//! One store instance is shared by every orchestrator in the process. Clone
//! it freely; clones share the same registry. Registries are keyed by the
//! sanitized session id, which is also the on-disk directory name, so
//! sessions recovered after a restart line up with live ones.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::sanitize::{
    collision_name, ensure_within, sanitize_file_name, sanitize_session_id, validate_session_id,
};
use super::sweep::spawn_expiry_task;
use crate::models::attachment::Attachment;
use crate::{AppError, Result};

/// Directory name of the store root under the system temp directory.
pub const BASE_DIR_NAME: &str = "conductor-attachments";

const MIB: u64 = 1024 * 1024;

/// Byte ceilings and timing for the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Largest single decoded file.
    pub max_file_bytes: u64,
    /// Largest total across one session.
    pub max_session_bytes: u64,
    /// Sessions idle for longer than this are swept.
    pub max_session_age: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 100 * MIB,
            max_session_bytes: 500 * MIB,
            max_session_age: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// A materialized attachment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TempFileInfo {
    /// Session the file belongs to.
    pub session_id: String,
    /// Name the attachment carried before sanitization.
    pub original_name: String,
    /// Absolute on-disk path.
    pub path: PathBuf,
    /// MIME type, when known.
    pub mime_type: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last lookup timestamp.
    pub last_accessed: DateTime<Utc>,
}

/// Quota and expiry bookkeeping for one session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TempSessionInfo {
    /// Session identifier (sanitized form).
    pub session_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last write or lookup.
    pub last_activity: DateTime<Utc>,
    /// Number of live files.
    pub file_count: usize,
    /// Sum of live file sizes.
    pub total_bytes: u64,
}

/// Counts returned by an expiry sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CleanupSummary {
    /// Sessions removed.
    pub sessions_removed: usize,
    /// Files removed.
    pub files_removed: usize,
}

#[derive(Debug)]
struct SessionEntry {
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    files: Vec<TempFileInfo>,
}

impl SessionEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_activity: now,
            files: Vec::new(),
        }
    }

    fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    fn info(&self, key: &str) -> TempSessionInfo {
        TempSessionInfo {
            session_id: key.to_owned(),
            created_at: self.created_at,
            last_activity: self.last_activity,
            file_count: self.files.len(),
            total_bytes: self.total_bytes(),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    initialized: bool,
    sessions: HashMap<String, SessionEntry>,
    sweep: Option<CancellationToken>,
}

/// Shared temporary attachment store.
#[derive(Debug, Clone)]
pub struct TempFileStore {
    root: PathBuf,
    limits: StoreLimits,
    state: Arc<Mutex<StoreState>>,
}

impl TempFileStore {
    /// Store rooted at `<system temp>/conductor-attachments`.
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self::with_root(std::env::temp_dir().join(BASE_DIR_NAME), limits)
    }

    /// Store rooted at an explicit directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>, limits: StoreLimits) -> Self {
        Self {
            root: root.into(),
            limits,
            state: Arc::new(Mutex::new(StoreState::default())),
        }
    }

    /// Root directory holding one subdirectory per session.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.root
    }

    /// Configured limits.
    #[must_use]
    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Directory a session's files are written to.
    #[must_use]
    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.root.join(sanitize_session_id(session_id))
    }

    /// Create the root, recover sessions left on disk, and start the expiry sweep.
    ///
    /// Idempotent. Corrupted session directories are removed during recovery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the root directory cannot be created.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        fs::create_dir_all(&self.root).await.map_err(|err| {
            AppError::Io(format!(
                "failed to create attachment root {}: {err}",
                self.root.display()
            ))
        })?;

        let span = info_span!("attachment_recovery", root = %self.root.display());
        let recovered = self.recover(&mut state.sessions).instrument(span).await;
        info!(sessions = recovered, "attachment store initialized");

        let cancel = CancellationToken::new();
        // The sweep holds a clone of the store; the token is its only owner link.
        drop(spawn_expiry_task(
            self.clone(),
            self.limits.sweep_interval,
            cancel.clone(),
        ));
        state.sweep = Some(cancel);
        state.initialized = true;
        Ok(())
    }

    async fn recover(&self, sessions: &mut HashMap<String, SessionEntry>) -> usize {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "cannot scan attachment root for recovery");
                return 0;
            }
        };

        let mut recovered = 0;
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "attachment recovery scan interrupted");
                    break;
                }
            };

            // Stray files at the root are not sessions; anything else must be
            // a real directory.
            let file_type = match entry.file_type().await {
                Ok(file_type) if file_type.is_file() => continue,
                Ok(file_type) => Some(file_type),
                Err(_) => None,
            };

            let key = entry.file_name().to_string_lossy().into_owned();
            let dir = entry.path();
            match recover_session(&key, &dir).await {
                Ok(session) => {
                    debug!(session_id = %key, files = session.files.len(), "recovered attachment session");
                    sessions.insert(key, session);
                    recovered += 1;
                }
                Err(err) => {
                    warn!(session_id = %key, %err, "removing unreadable attachment session");
                    let removed = if file_type.is_some_and(|t| t.is_dir()) {
                        fs::remove_dir_all(&dir).await
                    } else {
                        fs::remove_file(&dir).await
                    };
                    if let Err(err) = removed {
                        warn!(path = %dir.display(), %err, "failed to remove corrupted session entry");
                    }
                }
            }
        }
        recovered
    }

    /// Decode attachments and write them as files for `session_id`.
    ///
    /// Quotas are checked before each write. If any attachment fails, the
    /// files already written by this call are removed before the error is
    /// returned. The registry lock is only held to snapshot and to commit,
    /// so a large batch does not stall other sessions.
    ///
    /// # Errors
    ///
    /// - `AppError::PathViolation` for an invalid session id.
    /// - `AppError::Quota` when a file or the session total would exceed its ceiling.
    /// - `AppError::Attachment` for empty or undecodable payloads or failed writes.
    pub async fn create_temp_files_from_attachments(
        &self,
        session_id: &str,
        attachments: &[Attachment],
    ) -> Result<Vec<TempFileInfo>> {
        validate_session_id(session_id)?;
        self.initialize().await?;

        let key = sanitize_session_id(session_id);
        let session_dir = ensure_within(&self.root, &self.root.join(&key))?;

        let (had_session, existing, base_total) = {
            let state = self.state.lock().await;
            state.sessions.get(&key).map_or((false, Vec::new(), 0), |s| {
                (
                    true,
                    s.files.iter().map(|f| f.path.clone()).collect::<Vec<_>>(),
                    s.total_bytes(),
                )
            })
        };

        fs::create_dir_all(&session_dir).await.map_err(|err| {
            AppError::Attachment(format!("failed to create session directory: {err}"))
        })?;

        let mut running_total = base_total;
        let mut written: Vec<TempFileInfo> = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let taken: Vec<&Path> = existing
                .iter()
                .map(PathBuf::as_path)
                .chain(written.iter().map(|f| f.path.as_path()))
                .collect();
            match self
                .write_attachment(session_id, &session_dir, attachment, running_total, &taken)
                .await
            {
                Ok(info) => {
                    running_total += info.size;
                    written.push(info);
                }
                Err(err) => {
                    warn!(session_id, %err, "attachment batch failed, rolling back");
                    rollback(&written).await;
                    if !had_session {
                        remove_empty_dir(&session_dir).await;
                    }
                    return Err(err);
                }
            }
        }

        let mut state = self.state.lock().await;
        let committed = state.sessions.get(&key).map_or(0, SessionEntry::total_bytes);
        let batch: u64 = written.iter().map(|f| f.size).sum();
        if committed.saturating_add(batch) > self.limits.max_session_bytes {
            // Another batch for this session committed while we were writing.
            drop(state);
            warn!(session_id, "session quota exceeded at commit, rolling back");
            rollback(&written).await;
            return Err(self.session_quota_error());
        }

        let now = Utc::now();
        let entry = state
            .sessions
            .entry(key)
            .or_insert_with(|| SessionEntry::new(now));
        entry.files.extend(written.iter().cloned());
        entry.last_activity = now;
        let total_bytes = entry.total_bytes();
        drop(state);

        info!(
            session_id,
            files = written.len(),
            total_bytes,
            "attachments materialized"
        );
        Ok(written)
    }

    async fn write_attachment(
        &self,
        session_id: &str,
        session_dir: &Path,
        attachment: &Attachment,
        running_total: u64,
        taken: &[&Path],
    ) -> Result<TempFileInfo> {
        let payload = strip_data_url(&attachment.data);
        if payload.is_empty() {
            return Err(AppError::Attachment(
                "invalid attachment: missing data".into(),
            ));
        }
        let estimated = decoded_len(payload);
        self.check_quota(estimated, running_total)?;

        let bytes = STANDARD.decode(payload)?;
        let size = bytes.len() as u64;
        self.check_quota(size, running_total)?;

        let original_name = attachment
            .file_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| attachment.label.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| format!("attachment_{}", Utc::now().timestamp_millis()));
        let safe_name = sanitize_file_name(&original_name);

        let path = self
            .write_new_file(session_dir, &safe_name, taken, &bytes)
            .await?;

        let now = Utc::now();
        debug!(session_id, path = %path.display(), size, "temp file written");
        Ok(TempFileInfo {
            session_id: session_id.to_owned(),
            original_name,
            path,
            mime_type: attachment.mime_type.clone(),
            size,
            created_at: now,
            last_accessed: now,
        })
    }

    /// Write `bytes` under the first free collision name in `dir`.
    ///
    /// Files are opened with `create_new`, so a name claimed concurrently is
    /// skipped rather than overwritten.
    async fn write_new_file(
        &self,
        dir: &Path,
        name: &str,
        taken: &[&Path],
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let mut attempt: u32 = 0;
        loop {
            let path = ensure_within(&self.root, &dir.join(collision_name(name, attempt)))?;
            attempt += 1;

            if taken.contains(&path.as_path()) || fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }

            match create_new(&path, bytes).await {
                Ok(()) => return Ok(path),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => {
                    return Err(AppError::Attachment(format!(
                        "failed to write temp file: {err}"
                    )))
                }
            }
        }
    }

    fn check_quota(&self, size: u64, running_total: u64) -> Result<()> {
        if size > self.limits.max_file_bytes {
            return Err(AppError::Quota(format!(
                "file size exceeds maximum allowed size of {}",
                human_size(self.limits.max_file_bytes)
            )));
        }
        if running_total.saturating_add(size) > self.limits.max_session_bytes {
            return Err(self.session_quota_error());
        }
        Ok(())
    }

    fn session_quota_error(&self) -> AppError {
        AppError::Quota(format!(
            "session size would exceed maximum allowed size of {}",
            human_size(self.limits.max_session_bytes)
        ))
    }

    /// Files currently recorded for a session.
    pub async fn session_files(&self, session_id: &str) -> Vec<TempFileInfo> {
        let state = self.state.lock().await;
        state
            .sessions
            .get(&sanitize_session_id(session_id))
            .map(|s| s.files.clone())
            .unwrap_or_default()
    }

    /// Bookkeeping record for a session.
    pub async fn session_info(&self, session_id: &str) -> Option<TempSessionInfo> {
        let state = self.state.lock().await;
        let key = sanitize_session_id(session_id);
        state.sessions.get(&key).map(|s| s.info(&key))
    }

    /// All known sessions.
    pub async fn sessions(&self) -> Vec<TempSessionInfo> {
        let state = self.state.lock().await;
        let mut all: Vec<_> = state
            .sessions
            .iter()
            .map(|(key, s)| s.info(key))
            .collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }

    /// Sanitized ids of all known sessions, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut ids: Vec<String> = state.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Look up a file by path, refreshing its last-accessed time.
    pub async fn temp_file_info(&self, path: &Path) -> Option<TempFileInfo> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for session in state.sessions.values_mut() {
            if let Some(file) = session.files.iter_mut().find(|f| f.path == path) {
                file.last_accessed = now;
                let found = file.clone();
                session.last_activity = now;
                return Some(found);
            }
        }
        None
    }

    /// Delete every file of a session and its directory.
    ///
    /// Filesystem failures are logged, not returned. Safe to call for a
    /// session with no files.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PathViolation` for an invalid session id.
    pub async fn cleanup_session(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let key = sanitize_session_id(session_id);
        let mut state = self.state.lock().await;
        let entry = state.sessions.remove(&key);
        let files = remove_session_dir(&self.root.join(&key), entry).await;
        info!(session_id, files, "attachment session cleaned up");
        Ok(())
    }

    /// Remove sessions idle for longer than the configured maximum age.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the maximum age cannot be represented.
    pub async fn cleanup_expired(&self) -> Result<CleanupSummary> {
        let max_age = chrono::Duration::from_std(self.limits.max_session_age)
            .map_err(|err| AppError::Config(format!("invalid session age: {err}")))?;
        Ok(self.cleanup_expired_before(Utc::now() - max_age).await)
    }

    /// Remove sessions whose last activity is older than `cutoff`.
    pub async fn cleanup_expired_before(&self, cutoff: DateTime<Utc>) -> CleanupSummary {
        let mut state = self.state.lock().await;
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, s)| s.last_activity < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        let mut summary = CleanupSummary::default();
        for key in expired {
            let entry = state.sessions.remove(&key);
            summary.files_removed += remove_session_dir(&self.root.join(&key), entry).await;
            summary.sessions_removed += 1;
        }
        summary
    }

    /// Stop the sweep and remove every remaining session.
    ///
    /// Safe to call when nothing was ever created.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(cancel) = state.sweep.take() {
            cancel.cancel();
        }
        let sessions: Vec<(String, SessionEntry)> = state.sessions.drain().collect();
        for (key, entry) in sessions {
            remove_session_dir(&self.root.join(&key), Some(entry)).await;
        }
        state.initialized = false;
        info!("attachment store shut down");
    }
}

async fn recover_session(key: &str, dir: &Path) -> Result<SessionEntry> {
    let meta = fs::symlink_metadata(dir).await?;
    if !meta.is_dir() {
        return Err(AppError::Attachment(format!(
            "{} is not a session directory",
            dir.display()
        )));
    }

    let now = Utc::now();
    let mut session = SessionEntry::new(now);
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let created_at = meta
            .created()
            .or_else(|_| meta.modified())
            .map_or(now, DateTime::<Utc>::from);
        let last_accessed = meta.accessed().map_or(now, DateTime::<Utc>::from);
        session.files.push(TempFileInfo {
            session_id: key.to_owned(),
            original_name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.path(),
            mime_type: None,
            size: meta.len(),
            created_at,
            last_accessed,
        });
    }
    Ok(session)
}

async fn remove_session_dir(dir: &Path, entry: Option<SessionEntry>) -> usize {
    let mut removed = 0;
    if let Some(entry) = entry {
        for file in &entry.files {
            match fs::remove_file(&file.path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = %file.path.display(), %err, "failed to remove temp file"),
            }
        }
    }
    match fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %dir.display(), %err, "failed to remove session directory"),
    }
    removed
}

async fn create_new(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    let result = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;
    if result.is_err() {
        drop(file);
        if let Err(err) = fs::remove_file(path).await {
            warn!(path = %path.display(), %err, "failed to remove partial temp file");
        }
    }
    result
}

async fn remove_empty_dir(dir: &Path) {
    match fs::remove_dir(dir).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!(path = %dir.display(), %err, "failed to remove session directory after rollback"),
    }
}

async fn rollback(written: &[TempFileInfo]) {
    for file in written {
        if let Err(err) = fs::remove_file(&file.path).await {
            warn!(path = %file.path.display(), %err, "failed to roll back temp file");
        }
    }
}

/// Drop a `data:<mime>;base64,` prefix if the payload carries one.
fn strip_data_url(data: &str) -> &str {
    let trimmed = data.trim();
    if trimmed.starts_with("data:") {
        if let Some(idx) = trimmed.find(";base64,") {
            return &trimmed[idx + ";base64,".len()..];
        }
    }
    trimmed
}

/// Decoded byte length of a base64 payload, computed without decoding.
fn decoded_len(encoded: &str) -> u64 {
    let len = encoded.len() as u64;
    let padding = encoded.bytes().rev().take_while(|b| *b == b'=').count() as u64;
    let tail = match len % 4 {
        2 => 1,
        3 => 2,
        _ => 0,
    };
    (len / 4 * 3 + tail).saturating_sub(padding)
}

fn human_size(bytes: u64) -> String {
    if bytes >= MIB && bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        format!("{bytes} bytes")
    }
}
