//! Unit tests for `AppError` display and conversions.

use agent_conductor::AppError;

#[test]
fn display_prefixes_category() {
    let cases = [
        (AppError::Config("x".into()), "config: x"),
        (AppError::Usage("x".into()), "usage: x"),
        (AppError::Attachment("x".into()), "attachment: x"),
        (AppError::Quota("x".into()), "quota: x"),
        (AppError::PathViolation("x".into()), "path violation: x"),
        (AppError::Process("x".into()), "process: x"),
        (AppError::Protocol("x".into()), "protocol: x"),
        (AppError::Completion("x".into()), "completion: x"),
        (AppError::Watcher("x".into()), "watcher: x"),
        (AppError::Io("x".into()), "io: x"),
    ];
    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn io_errors_convert() {
    let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
    assert!(matches!(err, AppError::Io(ref msg) if msg == "gone"));
}

#[test]
fn json_errors_are_protocol_errors() {
    let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
    assert!(matches!(err, AppError::Protocol(_)));
}

#[test]
fn toml_errors_are_config_errors() {
    let err: AppError = toml::from_str::<toml::Value>("= 1").unwrap_err().into();
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}
