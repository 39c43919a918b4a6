//! # Tether Protocol
//!
//! Framing and handshake message definitions for the Tether secure channel.
//!
//! Two layers of framing live here. [`TextCodec`] turns a text payload into the
//! sentinel-delimited UTF-16LE buffer that gets encrypted, and [`WireCodec`]
//! puts a length prefix around each encrypted message on the socket.

#![warn(missing_docs)]

/// Sentinel-delimited text framing
pub mod frame;

/// Handshake message types
pub mod message;

/// Length-prefixed wire codec for async streams
pub mod codec;

/// Error types for protocol operations
pub mod error;

pub use frame::{TextCodec, SENTINEL};
pub use message::HandshakeMessage;
pub use codec::{WireCodec, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use error::ProtocolError;
