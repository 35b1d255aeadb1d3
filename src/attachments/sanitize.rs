//! Session-id validation and file-name sanitization.
//!
//! Every path the store writes is derived from these helpers, so a session
//! directory is always a traversal-free name directly below the store root
//! and a file name never carries separators or reserved characters.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Longest accepted session identifier, in characters.
pub const MAX_NAME_LEN: usize = 255;

/// Longest file name the store writes, in UTF-8 bytes.
pub const MAX_FILE_NAME_BYTES: usize = 255;

/// Longer "extensions" are kept as part of the stem when a name is shortened.
const MAX_EXTENSION_BYTES: usize = 32;

/// Placeholder used when sanitization leaves nothing behind.
pub const FALLBACK_FILE_NAME: &str = "unnamed_file";

/// Reject session identifiers that are empty, too long, or carry traversal.
///
/// Runs before any filesystem call.
///
/// # Errors
///
/// Returns `AppError::PathViolation` with a message naming the failed rule.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(AppError::PathViolation(
            "session ID must not be empty".into(),
        ));
    }

    if session_id.chars().count() > MAX_NAME_LEN {
        return Err(AppError::PathViolation(format!(
            "session ID too long (max {MAX_NAME_LEN} characters)"
        )));
    }

    if session_id.contains("..") || session_id.contains('/') || session_id.contains('\\') {
        return Err(AppError::PathViolation(
            "invalid characters in session ID".into(),
        ));
    }

    Ok(())
}

/// Derive the on-disk directory name for a session.
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`.
#[must_use]
pub fn sanitize_session_id(session_id: &str) -> String {
    let cleaned: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "session".into()
    } else {
        cleaned
    }
}

/// Make a user-supplied file name safe to create inside a session directory.
///
/// Never fails: reserved and control characters become `_`, leading dots are
/// dropped, the stem is shortened so the whole name fits in
/// [`MAX_FILE_NAME_BYTES`], and an empty result falls back to
/// [`FALLBACK_FILE_NAME`].
#[must_use]
pub fn sanitize_file_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let capped = fit_name(replaced.trim_start_matches('.'), "");

    if capped.trim().is_empty() {
        FALLBACK_FILE_NAME.into()
    } else {
        capped
    }
}

/// Split a file name into stem and extension (extension includes the dot).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && name.len() - idx <= MAX_EXTENSION_BYTES => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Longest prefix of `s` that fits in `max` bytes and ends on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// `stem + suffix + ext`, with the stem cut so the result fits on disk.
fn fit_name(name: &str, suffix: &str) -> String {
    let (stem, ext) = split_extension(name);
    let budget = MAX_FILE_NAME_BYTES.saturating_sub(suffix.len() + ext.len());
    format!("{}{suffix}{ext}", truncate_bytes(stem, budget))
}

/// Candidate name for the `attempt`-th try: `name`, then `stem_1.ext`,
/// `stem_2.ext`, ...
///
/// Every candidate fits in [`MAX_FILE_NAME_BYTES`]; long stems are shortened
/// to make room for the counter.
#[must_use]
pub fn collision_name(name: &str, attempt: u32) -> String {
    if attempt == 0 {
        fit_name(name, "")
    } else {
        fit_name(name, &format!("_{attempt}"))
    }
}

/// Lexically normalize `candidate` and check that it stays under `root`.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if the path escapes the root.
pub fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(
                        "path attempts to escape attachment root".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }

    if !normalized.starts_with(root) || normalized == root {
        return Err(AppError::PathViolation(
            "path outside attachment root".into(),
        ));
    }

    Ok(normalized)
}
