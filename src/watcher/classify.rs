//! Error-record extraction and classification for agent log lines.
//!
//! Two record shapes are recognized on `ERROR` lines:
//!
//! ```text
//! ERROR 2025-06-10T12:00:00 +2ms service=llm error={"name":"ProviderAuthError","data":{"providerID":"anthropic","message":"invalid x-api-key"}}
//! ERROR 2025-06-10T12:00:00 +2ms service=llm name=APIError statusCode=429 providerID=openai message="slow down"
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

/// Error category.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogErrorKind {
    /// Credentials were rejected.
    Auth,
    /// The requested model does not exist for the provider.
    ModelNotFound,
    /// The provider is throttling requests.
    RateLimit,
    /// Any other provider API failure.
    Api,
    /// Unclassified error record.
    Other,
}

/// A structured error record found in the agent's logs.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LogError {
    /// Category.
    pub kind: LogErrorKind,
    /// Error class name as logged.
    pub error_name: String,
    /// HTTP status, when logged.
    pub status_code: Option<u16>,
    /// Provider that failed.
    pub provider_id: Option<String>,
    /// Model that was requested.
    pub model_id: Option<String>,
    /// Provider message.
    pub message: Option<String>,
}

impl LogError {
    /// Whether this is a credential failure.
    #[must_use]
    pub fn is_auth_error(&self) -> bool {
        self.kind == LogErrorKind::Auth
    }
}

#[derive(Debug, Default)]
struct Fields {
    name: Option<String>,
    status_code: Option<u16>,
    provider_id: Option<String>,
    model_id: Option<String>,
    message: Option<String>,
}

fn key_values() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"(\w+)=("(?:[^"\\]|\\.)*"|\S+)"#).ok())
        .as_ref()
}

fn auth_keywords() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)invalid.{0,16}api.?key|unauthori[sz]ed|authentication|incorrect api key|x-api-key",
            )
            .ok()
        })
        .as_ref()
}

/// Extract an error record from a log line.
///
/// Returns `None` for non-error lines and for error lines that carry no
/// error name or status code.
#[must_use]
pub fn parse_log_line(line: &str) -> Option<LogError> {
    let line = line.trim();
    if !is_error_level(line) {
        return None;
    }

    let fields = json_fields(line).unwrap_or_else(|| key_value_fields(line));
    if fields.name.is_none() && fields.status_code.is_none() {
        return None;
    }

    let error_name = fields.name.clone().unwrap_or_else(|| "Error".into());
    let kind = classify(&error_name, fields.status_code, fields.message.as_deref());
    Some(LogError {
        kind,
        error_name,
        status_code: fields.status_code,
        provider_id: fields.provider_id,
        model_id: fields.model_id,
        message: fields.message,
    })
}

fn is_error_level(line: &str) -> bool {
    line.starts_with("ERROR") || line.contains("level=error") || line.contains("level=ERROR")
}

fn json_fields(line: &str) -> Option<Fields> {
    let start = line.find("error={")? + "error=".len();
    let value = serde_json::Deserializer::from_str(&line[start..])
        .into_iter::<Value>()
        .next()?
        .ok()?;

    let data = value.get("data").unwrap_or(&value);
    let text = |key: &str| {
        data.get(key)
            .or_else(|| value.get(key))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let status_code = data
        .get("statusCode")
        .or_else(|| value.get("statusCode"))
        .and_then(Value::as_u64)
        .and_then(|s| u16::try_from(s).ok());

    Some(Fields {
        name: value.get("name").and_then(Value::as_str).map(str::to_owned),
        status_code,
        provider_id: text("providerID"),
        model_id: text("modelID"),
        message: text("message"),
    })
}

fn key_value_fields(line: &str) -> Fields {
    let mut fields = Fields::default();
    let Some(re) = key_values() else {
        return fields;
    };
    for caps in re.captures_iter(line) {
        let (Some(key), Some(raw)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let value = unquote(raw.as_str());
        match key.as_str() {
            "name" | "errorName" => fields.name = Some(value),
            "statusCode" | "status" => fields.status_code = value.parse().ok(),
            "providerID" => fields.provider_id = Some(value),
            "modelID" => fields.model_id = Some(value),
            "message" => fields.message = Some(value),
            _ => {}
        }
    }
    fields
}

fn unquote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        raw[1..raw.len() - 1].replace("\\\"", "\"")
    } else {
        raw.to_owned()
    }
}

fn classify(name: &str, status: Option<u16>, message: Option<&str>) -> LogErrorKind {
    let auth_message = message
        .zip(auth_keywords())
        .is_some_and(|(m, re)| re.is_match(m));

    if name == "ProviderAuthError" || matches!(status, Some(401 | 403)) || auth_message {
        LogErrorKind::Auth
    } else if name == "ProviderModelNotFoundError" || status == Some(404) {
        LogErrorKind::ModelNotFound
    } else if status == Some(429) {
        LogErrorKind::RateLimit
    } else if name.contains("APIError") || name.contains("APICallError") || status.is_some() {
        LogErrorKind::Api
    } else {
        LogErrorKind::Other
    }
}

/// Human-readable text for a log error.
#[must_use]
pub fn user_message(error: &LogError) -> String {
    let provider = error.provider_id.as_deref().unwrap_or("the provider");
    match error.kind {
        LogErrorKind::Auth => format!(
            "Authentication failed for {provider}. Check the API key configured for this provider."
        ),
        LogErrorKind::ModelNotFound => match error.model_id.as_deref() {
            Some(model) => format!("Model {model} is not available from {provider}."),
            None => format!("The selected model is not available from {provider}."),
        },
        LogErrorKind::RateLimit => {
            format!("Rate limit reached for {provider}. Wait a moment and try again.")
        }
        LogErrorKind::Api => {
            let status = error
                .status_code
                .map(|s| format!(" ({s})"))
                .unwrap_or_default();
            match error.message.as_deref() {
                Some(msg) => format!("{provider} API error{status}: {msg}"),
                None => format!("{provider} API error{status}"),
            }
        }
        LogErrorKind::Other => error
            .message
            .clone()
            .unwrap_or_else(|| error.error_name.clone()),
    }
}
