//! Error types for bridge operations.

use std::io;

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging a session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed data on one of the wire protocols.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A frame or line exceeded the protocol size limit.
    #[error("frame too large: {actual} bytes (limit {limit})")]
    FrameTooLarge {
        /// Largest size the protocol can carry.
        limit: usize,
        /// Size that was attempted.
        actual: usize,
    },

    /// Configuration could not be read.
    #[error("configuration error: {0}")]
    Config(String),

    /// A binding or endpoint URL was malformed.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// A binding URL used a scheme the server cannot listen on.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

impl Error {
    /// Create a protocol error from a message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a configuration error from a message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error ends only the offending session rather than the
    /// whole process.
    pub fn is_session_local(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Protocol(_) | Self::FrameTooLarge { .. }
        )
    }
}
