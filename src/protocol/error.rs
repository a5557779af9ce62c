//! Protocol error types.

use thiserror::Error;

/// Errors decoding ELS payloads.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid command code: 0x{0:02x}")]
    InvalidCommand(u8),

    #[error("payload too short: expected at least {expected}, got {got}")]
    PayloadTooShort { expected: usize, got: usize },

    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("invalid page length: {0}")]
    InvalidPageLength(u8),

    #[error("malformed payload: {0}")]
    Malformed(String),
}
