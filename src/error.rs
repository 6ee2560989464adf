//! Error types for sessions and the client store

use thiserror::Error;

/// Reasons a session ends without a response being sent.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("header truncated: got {got} bytes, need {need}")]
    Truncated { got: usize, need: usize },

    #[error("protocol version mismatch: got {got}, expected {expected}")]
    UnsupportedVersion { got: u8, expected: u8 },

    #[error("unknown operation code {0}")]
    UnknownOperation(u8),

    #[error("filename length mismatch: declared {declared}, received {actual}")]
    NameLengthMismatch { declared: u16, actual: usize },

    #[error("connection closed before a header arrived")]
    EmptyConnection,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Short tag for audit lines
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::Truncated { .. } => "truncated",
            SessionError::UnsupportedVersion { .. } => "version",
            SessionError::UnknownOperation(_) => "unknown_op",
            SessionError::NameLengthMismatch { .. } => "name_len",
            SessionError::EmptyConnection => "empty",
            SessionError::Io(_) => "io",
        }
    }
}

/// Failures from the filesystem-backed client store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unsafe filename: {0}")]
    UnsafeName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
