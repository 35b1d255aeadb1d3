//! Unit tests for session-id validation and file-name sanitization.

use std::path::{Path, PathBuf};

use agent_conductor::attachments::sanitize::{
    collision_name, ensure_within, sanitize_file_name, sanitize_session_id, validate_session_id,
    FALLBACK_FILE_NAME, MAX_FILE_NAME_BYTES, MAX_NAME_LEN,
};
use agent_conductor::AppError;

// ── validate_session_id ─────────────────────────────────────

#[test]
fn plain_session_id_is_accepted() {
    assert!(validate_session_id("task_123-abc").is_ok());
}

#[test]
fn empty_session_id_is_rejected() {
    let err = validate_session_id("").unwrap_err();
    assert!(matches!(err, AppError::PathViolation(ref msg) if msg == "session ID must not be empty"));
}

#[test]
fn overlong_session_id_is_rejected() {
    let id = "a".repeat(MAX_NAME_LEN + 1);
    let err = validate_session_id(&id).unwrap_err();
    assert!(matches!(err, AppError::PathViolation(ref msg) if msg.contains("too long")));
}

#[test]
fn session_id_at_limit_is_accepted() {
    assert!(validate_session_id(&"a".repeat(MAX_NAME_LEN)).is_ok());
}

#[test]
fn traversal_in_session_id_is_rejected() {
    for id in ["../../etc", "a/b", "a\\b", "..", "x..y"] {
        let err = validate_session_id(id).unwrap_err();
        assert!(
            matches!(err, AppError::PathViolation(ref msg) if msg == "invalid characters in session ID"),
            "expected rejection for {id}"
        );
    }
}

// ── sanitize_session_id ─────────────────────────────────────

#[test]
fn session_id_keeps_safe_characters() {
    assert_eq!(sanitize_session_id("ses_01-AB"), "ses_01-AB");
}

#[test]
fn session_id_replaces_other_characters() {
    assert_eq!(sanitize_session_id("a b.c:d"), "a_b_c_d");
}

#[test]
fn empty_session_id_falls_back() {
    assert_eq!(sanitize_session_id(""), "session");
}

// ── sanitize_file_name ──────────────────────────────────────

#[test]
fn reserved_characters_are_replaced() {
    assert_eq!(sanitize_file_name("a<b>c:d\"e|f?g*h.txt"), "a_b_c_d_e_f_g_h.txt");
}

#[test]
fn separators_are_replaced() {
    assert_eq!(sanitize_file_name("../../etc/passwd"), "_.._etc_passwd");
}

#[test]
fn control_characters_are_replaced() {
    assert_eq!(sanitize_file_name("a\u{0}b\nc"), "a_b_c");
}

#[test]
fn leading_dots_are_dropped() {
    assert_eq!(sanitize_file_name("...hidden"), "hidden");
}

#[test]
fn long_names_are_capped() {
    let name = "x".repeat(400);
    assert_eq!(sanitize_file_name(&name).len(), MAX_FILE_NAME_BYTES);
}

#[test]
fn multibyte_names_are_capped_by_bytes_and_keep_extension() {
    let name = format!("{}.txt", "é".repeat(200));
    let safe = sanitize_file_name(&name);
    assert!(safe.len() <= MAX_FILE_NAME_BYTES, "{} bytes", safe.len());
    assert!(safe.ends_with(".txt"));
    assert!(safe.trim_end_matches(".txt").chars().all(|c| c == 'é'));
}

#[test]
fn overlong_extension_is_treated_as_stem() {
    let name = format!("a.{}", "b".repeat(300));
    let safe = sanitize_file_name(&name);
    assert_eq!(safe.len(), MAX_FILE_NAME_BYTES);
    assert!(safe.starts_with("a.b"));
}

#[test]
fn blank_names_fall_back() {
    assert_eq!(sanitize_file_name(""), FALLBACK_FILE_NAME);
    assert_eq!(sanitize_file_name("..."), FALLBACK_FILE_NAME);
    assert_eq!(sanitize_file_name("   "), FALLBACK_FILE_NAME);
}

#[test]
fn unicode_names_survive() {
    assert_eq!(sanitize_file_name("résumé.pdf"), "résumé.pdf");
}

// ── collision_name ──────────────────────────────────────────

#[test]
fn first_attempt_keeps_the_name() {
    assert_eq!(collision_name("file.txt", 0), "file.txt");
}

#[test]
fn counter_goes_before_extension() {
    assert_eq!(collision_name("file.txt", 1), "file_1.txt");
    assert_eq!(collision_name("file.txt", 2), "file_2.txt");
}

#[test]
fn counter_without_extension_is_appended() {
    assert_eq!(collision_name("README", 1), "README_1");
}

#[test]
fn counter_on_a_full_length_name_still_fits() {
    let name = format!("{}.txt", "a".repeat(251));
    assert_eq!(name.len(), MAX_FILE_NAME_BYTES);

    let second = collision_name(&name, 1);
    assert!(second.len() <= MAX_FILE_NAME_BYTES);
    assert!(second.ends_with("_1.txt"));

    let many = collision_name(&name, 12_345);
    assert!(many.len() <= MAX_FILE_NAME_BYTES);
    assert!(many.ends_with("_12345.txt"));
}

#[test]
fn counter_shortens_multibyte_stems_on_char_boundaries() {
    let name = format!("{}.md", "日".repeat(84));
    let next = collision_name(&name, 3);
    assert!(next.len() <= MAX_FILE_NAME_BYTES);
    assert!(next.ends_with("_3.md"));
    assert!(next.trim_end_matches("_3.md").chars().all(|c| c == '日'));
}

// ── ensure_within ───────────────────────────────────────────

#[test]
fn path_inside_root_is_normalized() {
    let root = Path::new("/tmp/store");
    let ok = ensure_within(root, &root.join("s1/./a.txt")).unwrap();
    assert_eq!(ok, PathBuf::from("/tmp/store/s1/a.txt"));
}

#[test]
fn path_escaping_root_is_rejected() {
    let root = Path::new("/tmp/store");
    let err = ensure_within(root, &root.join("s1/../../etc/passwd")).unwrap_err();
    assert!(matches!(err, AppError::PathViolation(_)));
}

#[test]
fn root_itself_is_rejected() {
    let root = Path::new("/tmp/store");
    let err = ensure_within(root, &root.join("s1/..")).unwrap_err();
    assert!(matches!(err, AppError::PathViolation(_)));
}
