//! Backend protocol: envelope codec and the handler that drives
//! registration, authentication, heartbeats and event dispatch.

pub mod envelope;
pub mod handler;

use core::fmt;

pub use envelope::{Direction, InboundData};
pub use handler::ApiProtocolHandler;

/// Errors from encoding or decoding protocol frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not JSON, or no `data` object (line, column of the parse error).
    Malformed(usize, usize),
    /// `data.type` is empty.
    MissingType,
    /// Serialized frame exceeds the queue's frame size.
    FrameTooLarge(usize),
    /// Serialization failed.
    Encode,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(line, col) => write!(f, "malformed frame at {}:{}", line, col),
            Self::MissingType => write!(f, "frame has no type"),
            Self::FrameTooLarge(len) => write!(f, "frame too large ({} bytes)", len),
            Self::Encode => write!(f, "frame serialization failed"),
        }
    }
}
