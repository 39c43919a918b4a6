//! Secure channel state and operations
//!
//! A [`SecureChannel`] moves through three states:
//!
//! 1. [`ChannelState::LocalKeyGenerated`] right after construction,
//! 2. [`ChannelState::ForeignKeySet`] once the peer's public key is imported,
//! 3. [`ChannelState::Ready`] once a session key is installed.
//!
//! Operations needing the foreign key or the session key fail with
//! [`CryptoError::Precondition`] when called too early.
//!
//! A sealed message is `IV ‖ ciphertext ‖ signature`, where the signature
//! covers `IV ‖ ciphertext`.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey, LineEnding};
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::keys::{IvLedger, SessionKey, BLOCK_SIZE};
use crate::{CryptoError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Default RSA modulus size
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Smallest RSA modulus accepted
pub const MIN_KEY_BITS: usize = 1024;

/// OAEP with SHA-256 costs two digests plus two bytes of the modulus
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

/// Lifecycle state of a secure channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    /// Local key pair exists, nothing imported yet
    LocalKeyGenerated,
    /// Foreign public key imported
    ForeignKeySet,
    /// Session key installed, symmetric operations available
    Ready,
}

/// Key material and cryptographic operations for one end of a channel
pub struct SecureChannel {
    /// Local private key
    local: RsaPrivateKey,
    /// Public half of the local key
    local_public: RsaPublicKey,
    /// Agreed modulus size in bits
    key_bits: usize,
    /// Imported foreign public key
    foreign: Option<RsaPublicKey>,
    /// Installed session key
    session: Option<SessionKey>,
    /// IVs used under the current session key
    ledger: Mutex<IvLedger>,
}

impl SecureChannel {
    /// Create a channel with a freshly generated key pair of `key_bits`
    pub fn new(key_bits: usize) -> Result<Self> {
        if key_bits < MIN_KEY_BITS || key_bits % 8 != 0 {
            return Err(CryptoError::UnsupportedKeySize(key_bits));
        }

        debug!("Generating {}-bit RSA key pair", key_bits);
        let local = RsaPrivateKey::new(&mut OsRng, key_bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

        Self::from_private_key(local)
    }

    /// Create a channel around an existing private key
    pub fn from_private_key(local: RsaPrivateKey) -> Result<Self> {
        let key_bits = local.size() * 8;
        if key_bits < MIN_KEY_BITS {
            return Err(CryptoError::UnsupportedKeySize(key_bits));
        }

        let local_public = RsaPublicKey::from(&local);
        Ok(Self {
            local,
            local_public,
            key_bits,
            foreign: None,
            session: None,
            ledger: Mutex::new(IvLedger::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ChannelState {
        if self.session.is_some() {
            ChannelState::Ready
        } else if self.foreign.is_some() {
            ChannelState::ForeignKeySet
        } else {
            ChannelState::LocalKeyGenerated
        }
    }

    /// Agreed modulus size in bits
    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    /// Length of every signature exchanged on this channel
    pub fn signature_len(&self) -> usize {
        self.key_bits / 8
    }

    /// Largest plaintext [`SecureChannel::encrypt_for_foreign`] accepts
    pub fn max_asymmetric_plaintext(&self) -> usize {
        self.signature_len().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    /// Number of IVs used under the current session key
    pub fn ivs_used(&self) -> usize {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Export the local public key as PKCS#1 PEM
    pub fn export_local_public_key(&self) -> Result<String> {
        self.local_public
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::KeyExport(e.to_string()))
    }

    /// Import the foreign public key from PKCS#1 or SPKI PEM
    ///
    /// On failure the previously imported key, if any, stays in place.
    pub fn set_foreign_key(&mut self, exported: &str) -> Result<()> {
        let key = RsaPublicKey::from_pkcs1_pem(exported)
            .or_else(|_| RsaPublicKey::from_public_key_pem(exported))
            .map_err(|e| CryptoError::KeyImport(e.to_string()))?;

        let foreign_bits = key.size() * 8;
        if foreign_bits != self.key_bits {
            return Err(CryptoError::KeyImport(format!(
                "foreign key is {} bits, expected {}",
                foreign_bits, self.key_bits
            )));
        }

        if self.foreign.replace(key).is_some() {
            debug!("Replaced previously imported foreign key");
        }
        Ok(())
    }

    /// Encrypt a small payload to the foreign public key with RSA-OAEP
    pub fn encrypt_for_foreign(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let foreign = self.foreign_key("encrypt_for_foreign")?;

        let max = self.max_asymmetric_plaintext();
        if plaintext.len() > max {
            return Err(CryptoError::PlaintextTooLarge {
                size: plaintext.len(),
                max,
            });
        }

        foreign
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))
    }

    /// Decrypt an RSA-OAEP ciphertext produced for the local key
    pub fn decrypt_local(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.local
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))
    }

    /// Sign the SHA-256 digest of `data` with the local key
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(data);
        self.local
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| CryptoError::Signing(e.to_string()))
    }

    /// Verify a signature over `data` against the foreign key
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let foreign = self.foreign_key("verify")?;

        if signature.len() != self.signature_len() {
            return Ok(false);
        }

        let digest = Sha256::digest(data);
        Ok(foreign
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
            .is_ok())
    }

    /// Draw a new random session key from the OS RNG
    pub fn generate_session_key() -> SessionKey {
        SessionKey::generate()
    }

    /// Install the symmetric session key and reset the IV ledger
    pub fn set_session_key(&mut self, key: &[u8]) -> Result<()> {
        self.require(ChannelState::ForeignKeySet, "set_session_key")?;

        let key = SessionKey::from_slice(key)?;
        self.session = Some(key);
        self.ledger
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        debug!("Session key installed");
        Ok(())
    }

    /// Encrypt under the session key, returning `IV ‖ ciphertext`
    pub fn encrypt_symmetric(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_symmetric_with(plaintext, &mut OsRng)
    }

    /// Encrypt under the session key, drawing the IV from `rng`
    pub fn encrypt_symmetric_with<R>(&self, plaintext: &[u8], rng: &mut R) -> Result<Vec<u8>>
    where
        R: RngCore + CryptoRng,
    {
        let key = self.session_key("encrypt_symmetric")?;
        let iv = self.fresh_iv(rng);

        let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
            .map_err(|e| CryptoError::Encrypt(e.to_string()))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut datagram = Vec::with_capacity(BLOCK_SIZE + ciphertext.len());
        datagram.extend_from_slice(&iv);
        datagram.extend_from_slice(&ciphertext);
        Ok(datagram)
    }

    /// Decrypt an `IV ‖ ciphertext` datagram under the session key
    pub fn decrypt_symmetric(&self, datagram: &[u8]) -> Result<Vec<u8>> {
        let key = self.session_key("decrypt_symmetric")?;

        if datagram.len() < 2 * BLOCK_SIZE || datagram.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::MalformedMessage(format!(
                "datagram of {} bytes is not IV plus whole cipher blocks",
                datagram.len()
            )));
        }

        let (iv, ciphertext) = datagram.split_at(BLOCK_SIZE);
        let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
            .map_err(|e| CryptoError::Decrypt(e.to_string()))?;

        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::Decrypt("invalid padding".to_string()))
    }

    /// Append a signature of the agreed length to `data`
    pub fn append_signature(&self, data: &[u8], signature: &[u8]) -> Result<Vec<u8>> {
        if signature.len() != self.signature_len() {
            return Err(CryptoError::InvalidSignatureLength {
                expected: self.signature_len(),
                got: signature.len(),
            });
        }

        let mut combined = Vec::with_capacity(data.len() + signature.len());
        combined.extend_from_slice(data);
        combined.extend_from_slice(signature);
        Ok(combined)
    }

    /// Split `combined` into data and its trailing signature
    pub fn separate_signature<'a>(&self, combined: &'a [u8]) -> Result<(&'a [u8], &'a [u8])> {
        let signature_len = self.signature_len();
        if combined.len() < signature_len {
            return Err(CryptoError::MalformedMessage(format!(
                "{} bytes cannot hold a {}-byte signature",
                combined.len(),
                signature_len
            )));
        }

        Ok(combined.split_at(combined.len() - signature_len))
    }

    /// Encrypt and sign a payload into a wire message
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let datagram = self.encrypt_symmetric(plaintext)?;
        let signature = self.sign(&datagram)?;
        self.append_signature(&datagram, &signature)
    }

    /// Verify and decrypt a wire message produced by the peer's `seal`
    pub fn open(&self, message: &[u8]) -> Result<Vec<u8>> {
        self.require(ChannelState::Ready, "open")?;

        let (datagram, signature) = self.separate_signature(message)?;
        if !self.verify(datagram, signature)? {
            warn!("Discarding message with invalid signature");
            return Err(CryptoError::SignatureInvalid);
        }

        self.decrypt_symmetric(datagram)
    }

    /// Draw an IV whose value has not been used under the current key
    fn fresh_iv<R>(&self, rng: &mut R) -> [u8; BLOCK_SIZE]
    where
        R: RngCore + CryptoRng,
    {
        let mut ledger = self.ledger.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let mut iv = [0u8; BLOCK_SIZE];
            rng.fill_bytes(&mut iv);
            if ledger.record(iv) {
                return iv;
            }
            warn!("IV collision under current session key, regenerating");
        }
    }

    fn require(&self, required: ChannelState, operation: &'static str) -> Result<()> {
        let actual = self.state();
        if actual < required {
            return Err(CryptoError::Precondition {
                operation,
                required,
                actual,
            });
        }
        Ok(())
    }

    fn foreign_key(&self, operation: &'static str) -> Result<&RsaPublicKey> {
        self.foreign.as_ref().ok_or(CryptoError::Precondition {
            operation,
            required: ChannelState::ForeignKeySet,
            actual: self.state(),
        })
    }

    fn session_key(&self, operation: &'static str) -> Result<&SessionKey> {
        self.session.as_ref().ok_or(CryptoError::Precondition {
            operation,
            required: ChannelState::Ready,
            actual: self.state(),
        })
    }
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("state", &self.state())
            .field("key_bits", &self.key_bits)
            .field("ivs_used", &self.ivs_used())
            .finish()
    }
}
