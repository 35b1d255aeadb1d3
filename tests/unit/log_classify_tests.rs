//! Unit tests for agent log error extraction and classification.

use agent_conductor::watcher::classify::{parse_log_line, user_message};
use agent_conductor::watcher::LogErrorKind;

#[test]
fn info_lines_are_ignored() {
    assert!(parse_log_line("INFO  2025-06-10T12:00:00 +1ms service=llm started").is_none());
}

#[test]
fn error_line_without_name_or_status_is_ignored() {
    assert!(parse_log_line("ERROR 2025-06-10T12:00:00 +1ms service=bus something odd").is_none());
}

#[test]
fn json_provider_auth_error_is_classified() {
    let line = r#"ERROR 2025-06-10T12:00:00 +2ms service=llm error={"name":"ProviderAuthError","data":{"providerID":"anthropic","message":"invalid x-api-key"}} stream failed"#;
    let error = parse_log_line(line).expect("error record");

    assert_eq!(error.kind, LogErrorKind::Auth);
    assert!(error.is_auth_error());
    assert_eq!(error.error_name, "ProviderAuthError");
    assert_eq!(error.provider_id.as_deref(), Some("anthropic"));
    assert_eq!(error.message.as_deref(), Some("invalid x-api-key"));
    assert_eq!(
        user_message(&error),
        "Authentication failed for anthropic. Check the API key configured for this provider."
    );
}

#[test]
fn json_status_code_is_read_from_data() {
    let line = r#"ERROR x error={"name":"APIError","data":{"statusCode":429,"providerID":"openai","message":"slow down"}}"#;
    let error = parse_log_line(line).expect("error record");
    assert_eq!(error.kind, LogErrorKind::RateLimit);
    assert_eq!(error.status_code, Some(429));
}

#[test]
fn key_value_form_is_parsed() {
    let line = r#"ERROR 2025-06-10T12:00:00 +2ms service=llm name=APIError statusCode=500 providerID=openai modelID=gpt-x message="upstream \"down\"""#;
    let error = parse_log_line(line).expect("error record");

    assert_eq!(error.kind, LogErrorKind::Api);
    assert_eq!(error.status_code, Some(500));
    assert_eq!(error.provider_id.as_deref(), Some("openai"));
    assert_eq!(error.model_id.as_deref(), Some("gpt-x"));
    assert_eq!(error.message.as_deref(), Some("upstream \"down\""));
    assert_eq!(user_message(&error), "openai API error (500): upstream \"down\"");
}

#[test]
fn level_field_marks_error_lines() {
    let error = parse_log_line("ts=1 level=error name=Boom").expect("error record");
    assert_eq!(error.kind, LogErrorKind::Other);
    assert_eq!(user_message(&error), "Boom");
}

#[test]
fn status_codes_map_to_kinds() {
    let cases = [
        (401, LogErrorKind::Auth),
        (403, LogErrorKind::Auth),
        (404, LogErrorKind::ModelNotFound),
        (429, LogErrorKind::RateLimit),
        (503, LogErrorKind::Api),
    ];
    for (status, kind) in cases {
        let line = format!("ERROR statusCode={status} providerID=p");
        let error = parse_log_line(&line).expect("error record");
        assert_eq!(error.kind, kind, "status {status}");
        assert_eq!(error.error_name, "Error");
    }
}

#[test]
fn auth_keywords_in_message_mean_auth() {
    let line = r#"ERROR name=APIError providerID=anthropic message="Invalid API key provided""#;
    let error = parse_log_line(line).expect("error record");
    assert_eq!(error.kind, LogErrorKind::Auth);
}

#[test]
fn model_not_found_message_names_model() {
    let line = "ERROR name=ProviderModelNotFoundError providerID=openai modelID=gpt-9";
    let error = parse_log_line(line).expect("error record");
    assert_eq!(error.kind, LogErrorKind::ModelNotFound);
    assert_eq!(user_message(&error), "Model gpt-9 is not available from openai.");
}
