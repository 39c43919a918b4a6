//! Handshake message types

use serde::{Deserialize, Serialize};
use bytes::Bytes;
use crate::ProtocolError;

/// Messages exchanged in plaintext while establishing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeMessage {
    /// Public key announcement, sent by both sides first
    PublicKey {
        /// Modulus size of the sender's key pair in bits
        key_bits: usize,
        /// Exported public key
        pem: String,
    },

    /// Session key transport, sent by the initiator only
    SessionKey {
        /// Session key encrypted to the receiver's public key
        wrapped: Bytes,
        /// Sender's signature over `wrapped`
        signature: Bytes,
    },
}

impl HandshakeMessage {
    /// Create a public key announcement
    pub fn public_key(key_bits: usize, pem: impl Into<String>) -> Self {
        Self::PublicKey {
            key_bits,
            pem: pem.into(),
        }
    }

    /// Create a session key transport message
    pub fn session_key(wrapped: impl Into<Bytes>, signature: impl Into<Bytes>) -> Self {
        Self::SessionKey {
            wrapped: wrapped.into(),
            signature: signature.into(),
        }
    }

    /// Short name of the message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PublicKey { .. } => "public_key",
            Self::SessionKey { .. } => "session_key",
        }
    }

    /// Serialize to MessagePack bytes
    pub fn to_msgpack(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(rmp_serde::to_vec(self)?)
    }

    /// Deserialize from MessagePack bytes
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
