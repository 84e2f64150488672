//! Protocol errors

use thiserror::Error;

/// Reasons a request could not be parsed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Verb not recognized
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Wrong arity or unparsable field
    #[error("bad command line format")]
    BadCommandLine,

    /// Key empty, too long or containing control bytes
    #[error("invalid key")]
    InvalidKey,

    /// Data block larger than the server accepts
    #[error("object too large for cache: {0} bytes")]
    ValueTooLarge(usize),

    /// Data block not followed by CRLF
    #[error("bad data chunk")]
    BadDataChunk,

    /// No CRLF within the maximum line length
    #[error("line too long")]
    LineTooLong,
}

impl ProtocolError {
    /// Reply line sent to the client, without CRLF
    pub fn reply(&self) -> String {
        match self {
            ProtocolError::UnknownCommand(_) => "ERROR".to_string(),
            other => format!("CLIENT_ERROR {}", other),
        }
    }
}
