//! Typed agent stream records.
//!
//! # Known record types
//!
//! | `type`        | Maps to                              |
//! |---------------|--------------------------------------|
//! | `step_start`  | [`StreamMessage::StepStart`]         |
//! | `text`        | [`StreamMessage::Text`]              |
//! | `tool_call`   | [`StreamMessage::ToolCall`]          |
//! | `tool_use`    | [`StreamMessage::ToolUse`]           |
//! | `tool_result` | [`StreamMessage::ToolResult`]        |
//! | `step_finish` | [`StreamMessage::StepFinish`]        |
//! | `error`       | [`StreamMessage::Error`]             |
//! | *(any other)* | [`StreamMessage::Unknown`]           |
//!
//! Session ids may appear on the envelope (`sessionID`) or inside `part`;
//! the envelope wins when both are present.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// One decoded record from the agent output stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// A model step began.
    StepStart(StepStart),
    /// Assistant text.
    Text(TextPart),
    /// A tool invocation announced before it runs.
    ToolCall(ToolCall),
    /// A tool invocation with its current state.
    ToolUse(ToolUse),
    /// Output of a finished tool.
    ToolResult(ToolResult),
    /// A model step ended.
    StepFinish(StepFinish),
    /// A top-level error.
    Error(ErrorRecord),
    /// A record type this crate does not know.
    Unknown(UnknownRecord),
}

impl StreamMessage {
    /// Session id carried by the record, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::StepStart(m) => m.session_id.as_deref(),
            Self::Text(m) => m.session_id.as_deref(),
            Self::ToolCall(m) => m.session_id.as_deref(),
            Self::ToolUse(m) => m.session_id.as_deref(),
            Self::ToolResult(m) => m.session_id.as_deref(),
            Self::StepFinish(m) => m.session_id.as_deref(),
            Self::Error(m) => m.session_id.as_deref(),
            Self::Unknown(_) => None,
        }
    }

    /// Wire name of the record type.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::StepStart(_) => "step_start",
            Self::Text(_) => "text",
            Self::ToolCall(_) => "tool_call",
            Self::ToolUse(_) => "tool_use",
            Self::ToolResult(_) => "tool_result",
            Self::StepFinish(_) => "step_finish",
            Self::Error(_) => "error",
            Self::Unknown(m) => &m.kind,
        }
    }
}

/// `step_start` payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepStart {
    /// Agent session id.
    pub session_id: Option<String>,
}

/// `text` payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TextPart {
    /// Agent session id.
    pub session_id: Option<String>,
    /// Message the text belongs to.
    pub message_id: Option<String>,
    /// Text content.
    pub text: String,
}

/// `tool_call` payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolCall {
    /// Agent session id.
    pub session_id: Option<String>,
    /// Tool name.
    pub tool: String,
    /// Tool arguments.
    pub input: Value,
}

/// `tool_use` payload.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolUse {
    /// Agent session id.
    pub session_id: Option<String>,
    /// Correlation id pairing the call with its result.
    pub call_id: Option<String>,
    /// Tool name.
    pub tool: String,
    /// Tool state: `pending`, `running`, `completed` or `error`.
    pub status: Option<String>,
    /// Tool arguments.
    pub input: Value,
    /// Tool output, once finished.
    pub output: Option<String>,
    /// Short title the agent gave the call.
    pub title: Option<String>,
}

impl ToolUse {
    /// Whether the tool has finished, successfully or not.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_deref(), Some("completed" | "error"))
    }
}

/// `tool_result` payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolResult {
    /// Agent session id.
    pub session_id: Option<String>,
    /// Raw output text.
    pub output: String,
}

/// `step_finish` payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StepFinish {
    /// Agent session id.
    pub session_id: Option<String>,
    /// Why the step ended, e.g. `stop`, `tool-calls`, `error`.
    pub reason: Option<String>,
}

/// `error` payload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorRecord {
    /// Agent session id.
    pub session_id: Option<String>,
    /// Error class name, when the agent sent one.
    pub name: Option<String>,
    /// Human-readable message.
    pub message: String,
}

/// A record with an unrecognized `type`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UnknownRecord {
    /// The unrecognized type name.
    pub kind: String,
    /// The full record.
    pub raw: Value,
}

#[derive(Debug, Default, Deserialize)]
struct PartWire {
    #[serde(rename = "sessionID")]
    session_id: Option<String>,
    #[serde(rename = "messageID")]
    message_id: Option<String>,
    #[serde(rename = "callID")]
    call_id: Option<String>,
    text: Option<String>,
    tool: Option<String>,
    input: Option<Value>,
    output: Option<Value>,
    reason: Option<String>,
    state: Option<ToolStateWire>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolStateWire {
    status: Option<String>,
    input: Option<Value>,
    output: Option<Value>,
    title: Option<String>,
    error: Option<String>,
}

/// Parse one stream line into a [`StreamMessage`].
///
/// # Return value
///
/// - `Ok(Some(message))` for any JSON object with a string `type`.
/// - `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the line is not JSON, has no `type`, or a
/// known record type lacks a required field.
pub fn parse_record(line: &str) -> Result<Option<StreamMessage>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(line)
        .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;
    let Some(kind) = value.get("type").and_then(Value::as_str).map(str::to_owned) else {
        return Err(AppError::Protocol("record has no type".into()));
    };

    let part: PartWire = match value.get("part") {
        Some(part) if part.is_object() => serde_json::from_value(part.clone())
            .map_err(|e| AppError::Protocol(format!("invalid {kind} part: {e}")))?,
        _ => PartWire::default(),
    };
    let session_id = value
        .get("sessionID")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| part.session_id.clone());

    let message = match kind.as_str() {
        "step_start" => StreamMessage::StepStart(StepStart { session_id }),
        "text" => StreamMessage::Text(TextPart {
            session_id,
            message_id: part.message_id,
            text: part.text.unwrap_or_default(),
        }),
        "tool_call" => StreamMessage::ToolCall(ToolCall {
            session_id,
            tool: require_tool(part.tool, &kind)?,
            input: part.input.unwrap_or(Value::Null),
        }),
        "tool_use" => {
            let state = part.state.unwrap_or_default();
            let output = state
                .output
                .or(part.output)
                .map(value_to_text)
                .or(state.error);
            StreamMessage::ToolUse(ToolUse {
                session_id,
                call_id: part.call_id,
                tool: require_tool(part.tool, &kind)?,
                status: state.status,
                input: state.input.or(part.input).unwrap_or(Value::Null),
                output,
                title: state.title,
            })
        }
        "tool_result" => StreamMessage::ToolResult(ToolResult {
            session_id,
            output: part.output.map(value_to_text).unwrap_or_default(),
        }),
        "step_finish" => StreamMessage::StepFinish(StepFinish {
            session_id,
            reason: part.reason,
        }),
        "error" => {
            let (name, message) = error_fields(&value);
            StreamMessage::Error(ErrorRecord {
                session_id,
                name,
                message,
            })
        }
        _ => StreamMessage::Unknown(UnknownRecord { kind, raw: value }),
    };

    Ok(Some(message))
}

fn require_tool(tool: Option<String>, kind: &str) -> Result<String> {
    tool.filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Protocol(format!("missing required field: {kind} part.tool")))
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Pull a name and message out of the various error shapes the agent emits.
fn error_fields(record: &Value) -> (Option<String>, String) {
    let error = record.get("error");
    let name = error
        .and_then(|e| e.get("name"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let message = match error {
        Some(Value::String(s)) => Some(s.clone()),
        Some(obj) => obj
            .get("data")
            .and_then(|d| d.get("message"))
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(str::to_owned),
        None => None,
    }
    .or_else(|| {
        record
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
    })
    .or_else(|| name.clone())
    .unwrap_or_else(|| "Unknown error".into());

    (name, message)
}
