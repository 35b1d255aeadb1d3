//! Unit tests for the temporary attachment store.
//!
//! Every test gets its own store root inside a `tempfile` directory so
//! quotas, recovery, and expiry never interfere across tests.

use std::time::Duration;

use agent_conductor::attachments::{StoreLimits, TempFileStore};
use agent_conductor::models::attachment::{Attachment, AttachmentType};
use agent_conductor::AppError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;

const MIB: usize = 1024 * 1024;

fn small_limits() -> StoreLimits {
    StoreLimits {
        max_file_bytes: MIB as u64,
        max_session_bytes: 3 * MIB as u64,
        max_session_age: Duration::from_secs(3600),
        sweep_interval: Duration::from_secs(3600),
    }
}

fn text_attachment(name: &str, body: &str) -> Attachment {
    Attachment::new(AttachmentType::Text, STANDARD.encode(body)).with_file_name(name)
}

fn sized_attachment(name: &str, bytes: usize) -> Attachment {
    Attachment::new(AttachmentType::Document, STANDARD.encode(vec![7u8; bytes])).with_file_name(name)
}

#[tokio::test]
async fn writes_decoded_files_into_session_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());

    let files = store
        .create_temp_files_from_attachments("task-1", &[text_attachment("notes.txt", "hello")])
        .await
        .expect("materialize");

    assert_eq!(files.len(), 1);
    let file = &files[0];
    assert_eq!(file.original_name, "notes.txt");
    assert_eq!(file.size, 5);
    assert_eq!(file.path, store.session_path("task-1").join("notes.txt"));
    assert!(file.path.starts_with(root.path()));
    let on_disk = tokio::fs::read_to_string(&file.path).await.expect("read back");
    assert_eq!(on_disk, "hello");
}

#[tokio::test]
async fn data_url_payloads_are_accepted() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let attachment = Attachment::new(
        AttachmentType::Text,
        format!("data:text/plain;base64,{}", STANDARD.encode("hi")),
    )
    .with_file_name("hi.txt");

    let files = store
        .create_temp_files_from_attachments("s", &[attachment])
        .await
        .expect("materialize");
    assert_eq!(files[0].size, 2);
}

#[tokio::test]
async fn name_falls_back_to_label_then_generated() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let labelled = Attachment::new(AttachmentType::Text, STANDARD.encode("a")).with_label("label.md");
    let anonymous = Attachment::new(AttachmentType::Text, STANDARD.encode("b"));

    let files = store
        .create_temp_files_from_attachments("s", &[labelled, anonymous])
        .await
        .expect("materialize");

    assert_eq!(files[0].original_name, "label.md");
    assert!(files[1].original_name.starts_with("attachment_"));
}

#[tokio::test]
async fn colliding_names_get_numeric_suffixes() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let batch = [
        text_attachment("file.txt", "one"),
        text_attachment("file.txt", "two"),
    ];

    let first = store
        .create_temp_files_from_attachments("s", &batch)
        .await
        .expect("first batch");
    let second = store
        .create_temp_files_from_attachments("s", &[text_attachment("file.txt", "three")])
        .await
        .expect("second batch");

    let dir = store.session_path("s");
    assert_eq!(first[0].path, dir.join("file.txt"));
    assert_eq!(first[1].path, dir.join("file_1.txt"));
    assert_eq!(second[0].path, dir.join("file_2.txt"));
    assert_eq!(store.session_files("s").await.len(), 3);
}

#[tokio::test]
async fn unsafe_file_names_are_sanitized() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());

    let files = store
        .create_temp_files_from_attachments("s", &[text_attachment("../../evil.sh", "x")])
        .await
        .expect("materialize");

    assert_eq!(files[0].original_name, "../../evil.sh");
    assert_eq!(files[0].path.parent(), Some(store.session_path("s").as_path()));
}

#[tokio::test]
async fn traversal_session_id_is_rejected_before_any_write() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());

    let err = store
        .create_temp_files_from_attachments("../../etc", &[text_attachment("a.txt", "x")])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::PathViolation(_)));
    assert!(store.session_ids().await.is_empty());
}

#[tokio::test]
async fn oversized_file_is_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());

    let err = store
        .create_temp_files_from_attachments("s", &[sized_attachment("big.bin", MIB + 1)])
        .await
        .unwrap_err();

    match err {
        AppError::Quota(msg) => {
            assert_eq!(msg, "file size exceeds maximum allowed size of 1MB");
        }
        other => panic!("expected quota error, got {other:?}"),
    }
}

#[tokio::test]
async fn session_quota_counts_existing_files() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());

    for name in ["a.bin", "b.bin", "c.bin"] {
        store
            .create_temp_files_from_attachments("s", &[sized_attachment(name, MIB)])
            .await
            .expect("within quota");
    }
    let err = store
        .create_temp_files_from_attachments("s", &[sized_attachment("d.bin", 1)])
        .await
        .unwrap_err();

    match err {
        AppError::Quota(msg) => {
            assert_eq!(msg, "session size would exceed maximum allowed size of 3MB");
        }
        other => panic!("expected quota error, got {other:?}"),
    }
    let info = store.session_info("s").await.expect("session info");
    assert_eq!(info.file_count, 3);
    assert_eq!(info.total_bytes, 3 * MIB as u64);
}

#[tokio::test]
async fn failed_batch_rolls_back_its_own_files() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());

    let err = store
        .create_temp_files_from_attachments(
            "s",
            &[
                text_attachment("ok.txt", "fine"),
                sized_attachment("big.bin", 2 * MIB),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Quota(_)));
    assert!(store.session_files("s").await.is_empty());
    assert!(!store.session_path("s").join("ok.txt").exists());
}

#[tokio::test]
async fn invalid_base64_is_an_attachment_error() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let broken = Attachment::new(AttachmentType::Text, "***not base64***").with_file_name("x.txt");

    let err = store
        .create_temp_files_from_attachments("s", &[broken])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Attachment(_)));
}

#[tokio::test]
async fn cleanup_session_removes_files_and_directory() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let files = store
        .create_temp_files_from_attachments("s", &[text_attachment("a.txt", "x")])
        .await
        .expect("materialize");

    store.cleanup_session("s").await.expect("cleanup");

    assert!(!files[0].path.exists());
    assert!(!store.session_path("s").exists());
    assert!(store.session_info("s").await.is_none());
    // Cleaning an unknown session is not an error.
    store.cleanup_session("s").await.expect("second cleanup");
}

#[tokio::test]
async fn cleanup_session_rejects_traversal() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let err = store.cleanup_session("../x").await.unwrap_err();
    assert!(matches!(err, AppError::PathViolation(_)));
}

#[tokio::test]
async fn expired_sessions_are_swept() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    store
        .create_temp_files_from_attachments(
            "old",
            &[text_attachment("a.txt", "x"), text_attachment("b.txt", "y")],
        )
        .await
        .expect("materialize old");
    let fresh = store
        .create_temp_files_from_attachments("fresh", &[text_attachment("c.txt", "z")])
        .await
        .expect("materialize fresh");

    let nothing = store
        .cleanup_expired_before(Utc::now() - chrono::Duration::hours(1))
        .await;
    assert_eq!(nothing.sessions_removed, 0);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let cutoff = Utc::now();
    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .temp_file_info(&fresh[0].path)
        .await
        .expect("fresh file is known");

    let summary = store.cleanup_expired_before(cutoff).await;
    assert_eq!(summary.sessions_removed, 1);
    assert_eq!(summary.files_removed, 2);
    assert!(!store.session_path("old").exists());
    assert!(store.session_info("old").await.is_none());

    assert!(fresh[0].path.exists());
    let kept = store.session_info("fresh").await.expect("fresh survives");
    assert_eq!(kept.file_count, 1);
    assert!(kept.last_activity > cutoff);
}

#[tokio::test]
async fn lookup_refreshes_last_accessed() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let files = store
        .create_temp_files_from_attachments("s", &[text_attachment("a.txt", "x")])
        .await
        .expect("materialize");

    tokio::time::sleep(Duration::from_millis(5)).await;
    let found = store.temp_file_info(&files[0].path).await.expect("known file");
    assert!(found.last_accessed > files[0].last_accessed);
    assert!(store.temp_file_info(&root.path().join("nope")).await.is_none());
}

#[tokio::test]
async fn initialize_recovers_existing_sessions() {
    let root = tempfile::tempdir().expect("tempdir");
    let session_dir = root.path().join("recovered");
    std::fs::create_dir_all(&session_dir).expect("mkdir");
    std::fs::write(session_dir.join("one.txt"), "1").expect("write");
    std::fs::write(session_dir.join("two.txt"), "22").expect("write");
    std::fs::write(root.path().join("stray-file"), "ignored").expect("write");

    let store = TempFileStore::with_root(root.path(), small_limits());
    store.initialize().await.expect("initialize");
    store.initialize().await.expect("initialize is idempotent");

    assert_eq!(store.session_ids().await, vec!["recovered".to_owned()]);
    let info = store.session_info("recovered").await.expect("session");
    assert_eq!(info.file_count, 2);
    assert_eq!(info.total_bytes, 3);

    let mut names: Vec<String> = store
        .session_files("recovered")
        .await
        .into_iter()
        .map(|f| f.original_name)
        .collect();
    names.sort();
    assert_eq!(names, ["one.txt", "two.txt"]);
}

#[cfg(unix)]
#[tokio::test]
async fn initialize_removes_entries_that_are_not_session_directories() {
    let root = tempfile::tempdir().expect("tempdir");
    let outside = tempfile::tempdir().expect("outside");
    let good = root.path().join("good");
    std::fs::create_dir_all(&good).expect("mkdir");
    std::fs::write(good.join("notes.txt"), "kept").expect("write");
    std::fs::write(outside.path().join("keep.txt"), "untouched").expect("write outside");

    let dangling = root.path().join("dangling");
    let escaped = root.path().join("escaped");
    std::os::unix::fs::symlink(root.path().join("missing"), &dangling).expect("dangling link");
    std::os::unix::fs::symlink(outside.path(), &escaped).expect("escaping link");

    let store = TempFileStore::with_root(root.path(), small_limits());
    store.initialize().await.expect("initialize");

    assert_eq!(store.session_ids().await, vec!["good".to_owned()]);
    assert_eq!(store.session_files("good").await.len(), 1);
    assert!(std::fs::symlink_metadata(&dangling).is_err());
    assert!(std::fs::symlink_metadata(&escaped).is_err());
    assert!(outside.path().join("keep.txt").exists());
    assert!(good.join("notes.txt").exists());
}

#[tokio::test]
async fn shutdown_removes_everything() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    for session in ["a", "b"] {
        store
            .create_temp_files_from_attachments(session, &[text_attachment("f.txt", "x")])
            .await
            .expect("materialize");
    }

    store.shutdown().await;

    assert!(store.sessions().await.is_empty());
    assert!(!store.session_path("a").exists());
    assert!(!store.session_path("b").exists());
}

#[tokio::test]
async fn session_keys_are_sanitized() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    store
        .create_temp_files_from_attachments("ses 1:x", &[text_attachment("f.txt", "x")])
        .await
        .expect("materialize");

    assert_eq!(store.session_ids().await, vec!["ses_1_x".to_owned()]);
    assert_eq!(store.session_files("ses 1:x").await.len(), 1);
}

#[tokio::test]
async fn empty_payload_is_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let empty = Attachment::new(AttachmentType::Text, "").with_file_name("empty.txt");

    let err = store
        .create_temp_files_from_attachments("s", &[text_attachment("ok.txt", "fine"), empty])
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Attachment(ref msg) if msg.contains("missing data")));
    assert!(store.session_files("s").await.is_empty());
    assert!(!store.session_path("s").join("ok.txt").exists());
    assert!(!store.session_path("s").join("empty.txt").exists());
}

#[tokio::test]
async fn full_length_name_written_twice_gets_a_fitting_suffix() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let name = format!("{}.txt", "a".repeat(251));

    let first = store
        .create_temp_files_from_attachments("s", &[text_attachment(&name, "one")])
        .await
        .expect("first write");
    let second = store
        .create_temp_files_from_attachments("s", &[text_attachment(&name, "two")])
        .await
        .expect("second write");

    let second_name = second[0]
        .path
        .file_name()
        .expect("file name")
        .to_string_lossy()
        .into_owned();
    assert!(second_name.len() <= 255);
    assert!(second_name.ends_with("_1.txt"));
    assert_ne!(first[0].path, second[0].path);
    assert_eq!(std::fs::read_to_string(&first[0].path).expect("first"), "one");
    assert_eq!(std::fs::read_to_string(&second[0].path).expect("second"), "two");
    assert_eq!(store.session_files("s").await.len(), 2);
}

#[tokio::test]
async fn multibyte_names_are_shortened_to_fit_on_disk() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let name = format!("{}.txt", "é".repeat(200));

    let files = store
        .create_temp_files_from_attachments("s", &[text_attachment(&name, "accent")])
        .await
        .expect("write");

    assert_eq!(files[0].original_name, name);
    let on_disk = files[0].path.file_name().expect("file name").to_string_lossy().into_owned();
    assert!(on_disk.len() <= 255);
    assert!(on_disk.ends_with(".txt"));
    assert_eq!(std::fs::read_to_string(&files[0].path).expect("read"), "accent");
}

#[tokio::test]
async fn existing_file_on_disk_is_never_overwritten() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    store.initialize().await.expect("initialize");
    let session_dir = store.session_path("s");
    std::fs::create_dir_all(&session_dir).expect("mkdir");
    std::fs::write(session_dir.join("report.txt"), "foreign").expect("write");

    let files = store
        .create_temp_files_from_attachments("s", &[text_attachment("report.txt", "ours")])
        .await
        .expect("write");

    assert_eq!(files[0].path, session_dir.join("report_1.txt"));
    assert_eq!(
        std::fs::read_to_string(session_dir.join("report.txt")).expect("read"),
        "foreign"
    );
}

#[tokio::test]
async fn concurrent_batches_for_one_session_pick_distinct_names() {
    let root = tempfile::tempdir().expect("tempdir");
    let store = TempFileStore::with_root(root.path(), small_limits());
    let first = [text_attachment("same.txt", "left")];
    let second = [text_attachment("same.txt", "right")];

    let (a, b) = tokio::join!(
        store.create_temp_files_from_attachments("s", &first),
        store.create_temp_files_from_attachments("s", &second),
    );
    let (a, b) = (a.expect("left batch"), b.expect("right batch"));

    assert_ne!(a[0].path, b[0].path);
    assert_eq!(std::fs::read_to_string(&a[0].path).expect("left"), "left");
    assert_eq!(std::fs::read_to_string(&b[0].path).expect("right"), "right");
    let info = store.session_info("s").await.expect("session");
    assert_eq!(info.file_count, 2);
    assert_eq!(info.total_bytes, 9);
}
