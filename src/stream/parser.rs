//! Incremental parser for the agent's pseudo-terminal output.

use std::sync::OnceLock;

use bytes::BytesMut;
use regex::Regex;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

use super::codec::RecordCodec;
use super::message::{parse_record, StreamMessage};

/// One result of feeding output to the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum ParserOutput {
    /// A complete record.
    Message(StreamMessage),
    /// A line that looked like a record but could not be decoded. Parsing
    /// continues with the next line.
    Warning(String),
}

fn control_sequences() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // CSI, OSC terminated by BEL or ST, charset selection, keypad mode.
            Regex::new(r"\x1B\[[0-9;?]*[A-Za-z]|\x1B\][^\x07\x1B]*(?:\x07|\x1B\\)|\x1B[()][A-Za-z0-9]|\x1B[=>]")
                .ok()
        })
        .as_ref()
}

/// Remove terminal control sequences and carriage returns from `input`.
#[must_use]
pub fn strip_control_sequences(input: &str) -> String {
    let stripped = match control_sequences() {
        Some(re) => re.replace_all(input, "").into_owned(),
        None => input.to_owned(),
    };
    stripped.replace('\r', "")
}

/// Splits chunked output into records.
///
/// Chunks may end mid-record; the remainder is buffered until the next
/// newline. Call [`StreamParser::reset`] between tasks so a partial record
/// from one run never merges with the next.
#[derive(Debug)]
pub struct StreamParser {
    buffer: BytesMut,
    codec: RecordCodec,
}

impl StreamParser {
    /// Parser with the default line limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_codec(RecordCodec::new())
    }

    /// Parser using a specific codec.
    #[must_use]
    pub fn with_codec(codec: RecordCodec) -> Self {
        Self {
            buffer: BytesMut::new(),
            codec,
        }
    }

    /// Feed a chunk of output and return every record it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<ParserOutput> {
        self.buffer.extend_from_slice(chunk.as_bytes());
        let mut out = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => handle_line(&line, &mut out),
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "discarding unreadable agent output");
                    out.push(ParserOutput::Warning(err.to_string()));
                }
            }
        }
        out
    }

    /// Parse whatever is left in the buffer as a final record.
    pub fn flush(&mut self) -> Vec<ParserOutput> {
        let mut out = Vec::new();
        loop {
            match self.codec.decode_eof(&mut self.buffer) {
                Ok(Some(line)) => handle_line(&line, &mut out),
                Ok(None) => break,
                Err(err) => {
                    out.push(ParserOutput::Warning(err.to_string()));
                    self.buffer.clear();
                    break;
                }
            }
        }
        out
    }

    /// Drop buffered partial input.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.codec = RecordCodec::with_max_length(self.codec.max_length());
    }

    /// Bytes waiting for a newline.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn handle_line(raw: &str, out: &mut Vec<ParserOutput>) {
    let line = strip_control_sequences(raw);
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    if !line.starts_with('{') {
        debug!(line, "skipping non-record terminal output");
        return;
    }
    match parse_record(line) {
        Ok(Some(message)) => out.push(ParserOutput::Message(message)),
        Ok(None) => {}
        Err(err) => {
            warn!(%err, "failed to parse agent record");
            out.push(ParserOutput::Warning(err.to_string()));
        }
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}
