//! Transport error types

use thiserror::Error;
use std::io;
use tether_proto::ProtocolError;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection attempt failed; retried by the connection manager
    #[error("Connection error: {0}")]
    Connect(String),

    /// Writing to an established socket failed
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading from an established socket failed
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Peer closed the connection
    #[error("Connection closed by peer")]
    Closed,

    /// No socket is established
    #[error("Not connected")]
    NotConnected,

    /// Connection retry was cancelled
    #[error("Connection attempt cancelled")]
    Cancelled,

    /// Wire framing violation
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
