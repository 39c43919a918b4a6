//! # Tether Crypto
//!
//! Hybrid asymmetric and symmetric encryption for the Tether channel.
//!
//! Each endpoint owns an RSA key pair. After the public keys have been
//! exchanged, one side wraps a random AES-256 session key to the other's
//! public key. Bulk traffic is then AES-256-CBC with a fresh IV per message,
//! signed with the sender's RSA key.

#![warn(missing_docs)]

/// Secure channel state and operations
pub mod channel;

/// Session key and IV ledger
pub mod keys;

/// Error types for cryptographic operations
pub mod error;

pub use channel::{ChannelState, SecureChannel, DEFAULT_KEY_BITS, MIN_KEY_BITS};
pub use keys::{IvLedger, SessionKey, BLOCK_SIZE, SESSION_KEY_SIZE};
pub use error::CryptoError;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;
