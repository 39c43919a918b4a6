//! Error types for the tether library

use tether_crypto::CryptoError;
use tether_net::TransportError;
use tether_proto::ProtocolError;
use thiserror::Error;

/// Main error type for tether operations
#[derive(Debug, Error)]
pub enum TetherError {
    /// Socket-level failures
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Framing and serialization failures
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Key handling, encryption and signature failures
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Key exchange did not complete
    #[error("Handshake error: {0}")]
    Handshake(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Operation needs an established channel
    #[error("Channel is not established")]
    NotEstablished,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TetherError {
    /// Whether the error ends the connection rather than a single message
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Handshake(_) | Self::NotEstablished | Self::Io(_) => true,
            Self::Protocol(_) | Self::Crypto(_) | Self::Config(_) | Self::Serialization(_) => false,
        }
    }
}

impl From<serde_json::Error> for TetherError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}
