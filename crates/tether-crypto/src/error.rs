//! Error types for cryptographic operations

use thiserror::Error;
use crate::ChannelState;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Local key pair could not be generated
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Unsupported asymmetric key size
    #[error("Unsupported key size: {0} bits")]
    UnsupportedKeySize(usize),

    /// Foreign public key could not be imported
    #[error("Key import failed: {0}")]
    KeyImport(String),

    /// Local public key could not be exported
    #[error("Key export failed: {0}")]
    KeyExport(String),

    /// Operation invoked before the channel reached the required state
    #[error("{operation} requires state {required:?}, channel is in {actual:?}")]
    Precondition {
        /// Operation that was refused
        operation: &'static str,
        /// Minimum state the operation needs
        required: ChannelState,
        /// State the channel was in
        actual: ChannelState,
    },

    /// Session key has the wrong length
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength {
        /// Expected length
        expected: usize,
        /// Actual length
        got: usize,
    },

    /// Signature does not have the agreed length
    #[error("Invalid signature length: expected {expected} bytes, got {got}")]
    InvalidSignatureLength {
        /// Agreed signature length
        expected: usize,
        /// Actual length
        got: usize,
    },

    /// Plaintext exceeds what the asymmetric cipher can carry
    #[error("Plaintext too large for asymmetric encryption: {size} bytes (max: {max})")]
    PlaintextTooLarge {
        /// Plaintext size
        size: usize,
        /// Maximum size for the foreign key
        max: usize,
    },

    /// Encryption failure
    #[error("Encryption failed: {0}")]
    Encrypt(String),

    /// Decryption failure, including padding validation
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Signing failure
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Signature did not verify against the foreign key
    #[error("Signature verification failed")]
    SignatureInvalid,

    /// Message is too short or not block aligned
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}
