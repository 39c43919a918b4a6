//! # Tether Net
//!
//! TCP transport for the Tether channel: connect with indefinite retry,
//! whole-message send and receive.

#![warn(missing_docs)]

/// Socket sources
pub mod connector;

/// Connection management with retry
pub mod connection;

/// Transport error types
pub mod error;

pub use connector::{Connector, TcpConnector};
pub use connection::{ConnectionManager, ReceiveMode, DEFAULT_RETRY_INTERVAL, LEGACY_BUFFER_SIZE};
pub use error::TransportError;
