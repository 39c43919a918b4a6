//! # Tether
//!
//! A persistent, authenticated, encrypted text channel over TCP.
//!
//! A [`Channel`] connects to a remote controller, retrying until the peer is
//! reachable, exchanges RSA public keys, agrees on an AES-256 session key and
//! then carries text messages that are framed with a sentinel, encrypted with a
//! fresh IV and signed by the sender.
//!
//! The command shell that produces output is a collaborator behind the
//! [`CommandShell`] trait; its output reaches the channel through an
//! [`OutputQueue`].

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use tether_crypto as crypto;
pub use tether_net as net;
pub use tether_proto as proto;

/// Error types for the tether library
pub mod error;

/// Channel configuration
pub mod config;

/// Key exchange over a fresh connection
pub mod handshake;

/// Connected, encrypted text channel
pub mod channel;

/// Shell collaborator interface and output hand-off
pub mod shell;

#[cfg(test)]
mod testing;

pub use channel::{Channel, ChannelStatus};
pub use config::{ChannelConfig, Role};
pub use error::TetherError;
pub use handshake::perform_handshake;
pub use shell::{output_queue, CommandShell, OutputQueue, OutputSink};

/// Result type alias for tether operations
pub type Result<T> = std::result::Result<T, TetherError>;

/// Install a `tracing` subscriber filtered by `RUST_LOG`
///
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
