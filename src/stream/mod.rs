//! Agent output stream decoding.
//!
//! The agent writes newline-delimited JSON records to a pseudo-terminal, so
//! the raw stream also carries terminal control sequences, carriage returns
//! and the occasional line of shell noise. [`parser::StreamParser`] frames
//! the stream with [`codec::RecordCodec`], strips the noise and turns each
//! record into a [`message::StreamMessage`].

pub mod codec;
pub mod message;
pub mod parser;

pub use message::StreamMessage;
pub use parser::{ParserOutput, StreamParser};
