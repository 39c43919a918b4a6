//! Session key and IV ledger

use std::collections::HashSet;
use std::fmt;
use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};
use crate::CryptoError;

/// AES block size, also the IV length
pub const BLOCK_SIZE: usize = 16;

/// AES-256 key length
pub const SESSION_KEY_SIZE: usize = 32;

/// Symmetric session key, zeroized on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: [u8; SESSION_KEY_SIZE],
}

impl SessionKey {
    /// Generate a random session key from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_KEY_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Build a session key from raw bytes
    pub fn from_slice(key: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SESSION_KEY_SIZE] = key.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: SESSION_KEY_SIZE,
            got: key.len(),
        })?;
        Ok(Self { bytes })
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// IVs already used under the current session key
///
/// Values are compared by content. The ledger only grows until
/// [`IvLedger::clear`] is called for a new session key.
#[derive(Debug, Default)]
pub struct IvLedger {
    used: HashSet<[u8; BLOCK_SIZE]>,
}

impl IvLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an IV, returning `false` if the value was already used
    pub fn record(&mut self, iv: [u8; BLOCK_SIZE]) -> bool {
        self.used.insert(iv)
    }

    /// Check whether an IV value has been used
    pub fn contains(&self, iv: &[u8; BLOCK_SIZE]) -> bool {
        self.used.contains(iv)
    }

    /// Number of IVs recorded
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Whether no IV has been recorded yet
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Forget every recorded IV
    pub fn clear(&mut self) {
        self.used.clear();
    }
}
