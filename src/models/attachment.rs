//! Attachment payloads supplied with a task.

use serde::{Deserialize, Serialize};

/// Attachment type tag.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    /// Screen capture image.
    Screenshot,
    /// JSON document.
    Json,
    /// Generic image.
    Image,
    /// Plain text.
    Text,
    /// Source code.
    Code,
    /// Word-processor or PDF document.
    Document,
    /// Spreadsheet.
    Spreadsheet,
    /// Slide deck.
    Presentation,
    /// Audio recording.
    Audio,
    /// Video recording.
    Video,
    /// Electronic book.
    Ebook,
    /// Email message.
    Email,
}

impl AttachmentType {
    /// Best guess from a file extension; unknown extensions are documents.
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" => Self::Image,
            "json" => Self::Json,
            "txt" | "md" | "log" => Self::Text,
            "rs" | "py" | "js" | "ts" | "tsx" | "jsx" | "go" | "java" | "c" | "cpp" | "h"
            | "rb" | "sh" | "toml" | "yaml" | "yml" | "html" | "css" => Self::Code,
            "csv" | "xls" | "xlsx" | "ods" => Self::Spreadsheet,
            "ppt" | "pptx" | "odp" | "key" => Self::Presentation,
            "mp3" | "wav" | "m4a" | "ogg" | "flac" => Self::Audio,
            "mp4" | "mov" | "mkv" | "webm" | "avi" => Self::Video,
            "epub" | "mobi" => Self::Ebook,
            "eml" | "msg" => Self::Email,
            _ => Self::Document,
        }
    }
}

/// A user-supplied file payload, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Type tag.
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    /// Base64 payload.
    pub data: String,
    /// Display label.
    #[serde(default)]
    pub label: Option<String>,
    /// Original file name.
    #[serde(default)]
    pub file_name: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Declared size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Client-side timestamp in milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Text extracted from the document, if any.
    #[serde(default)]
    pub text_content: Option<String>,
    /// Page count for paged documents.
    #[serde(default)]
    pub page_count: Option<u32>,
    /// Source language for code attachments.
    #[serde(default)]
    pub language: Option<String>,
}

impl Attachment {
    /// Build an attachment from a type tag and base64 payload.
    #[must_use]
    pub fn new(kind: AttachmentType, data: impl Into<String>) -> Self {
        Self {
            kind,
            data: data.into(),
            label: None,
            file_name: None,
            mime_type: None,
            size: None,
            timestamp: None,
            text_content: None,
            page_count: None,
            language: None,
        }
    }

    /// Set the original file name.
    #[must_use]
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    /// Set the MIME type.
    #[must_use]
    pub fn with_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// Set the declared size.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the display label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
