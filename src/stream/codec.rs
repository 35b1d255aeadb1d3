//! Line framing for agent output.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated record cannot grow the buffer without bound. After an
//! overlong line is reported the codec discards input up to the next
//! newline and then resumes normal framing.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum record length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited record decoder.
///
/// Trailing `\r` is removed from every line, which matters because a
/// pseudo-terminal translates `\n` into `\r\n`.
#[derive(Debug)]
pub struct RecordCodec(LinesCodec);

impl RecordCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }

    /// Configured line limit.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.0.max_length()
    }
}

impl Default for RecordCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for RecordCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let limit = self.0.max_length();
        self.0.decode(src).map_err(|e| map_codec_error(e, limit))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let limit = self.0.max_length();
        self.0.decode_eof(src).map_err(|e| map_codec_error(e, limit))
    }
}

fn map_codec_error(e: LinesCodecError, limit: usize) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {limit} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
