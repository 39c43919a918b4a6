//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload contains the reserved frame delimiter
    #[error("Payload contains the reserved frame delimiter")]
    DelimiterInPayload,

    /// Buffer is not valid UTF-16LE text
    #[error("Invalid UTF-16LE text: {0}")]
    InvalidEncoding(String),

    /// Invalid frame format
    #[error("Invalid frame format")]
    InvalidFrame,

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// I/O error while reading or writing frames
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}
