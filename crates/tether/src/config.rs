//! Channel configuration

use crate::{Result, TetherError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tether_crypto::{BLOCK_SIZE, DEFAULT_KEY_BITS, MIN_KEY_BITS};
use tether_net::{ReceiveMode, DEFAULT_RETRY_INTERVAL};

/// Which side of the handshake generates the session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Generates the session key and sends it wrapped to the peer
    Initiator,
    /// Waits for the peer's wrapped session key
    #[default]
    Responder,
}

/// Channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Remote hostname or IP
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Wait between failed connection attempts, in milliseconds
    pub retry_interval_ms: u64,
    /// RSA modulus size; both peers must agree, it fixes the signature length
    pub key_bits: usize,
    /// Handshake role
    pub role: Role,
    /// Message delimiting on the socket
    pub receive_mode: ReceiveMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7070,
            retry_interval_ms: duration_ms(DEFAULT_RETRY_INTERVAL),
            key_bits: DEFAULT_KEY_BITS,
            role: Role::default(),
            receive_mode: ReceiveMode::default(),
        }
    }
}

impl ChannelConfig {
    /// Create a configuration for `host:port` with defaults elsewhere
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Set the wait between failed connection attempts
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_ms = duration_ms(interval);
        self
    }

    /// Set the RSA modulus size
    pub fn with_key_bits(mut self, key_bits: usize) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// Set the handshake role
    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Set the receive mode
    pub fn with_receive_mode(mut self, receive_mode: ReceiveMode) -> Self {
        self.receive_mode = receive_mode;
        self
    }

    /// Wait between failed connection attempts
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Length of every signature on the channel
    pub fn signature_len(&self) -> usize {
        self.key_bits / 8
    }

    /// Check the configuration for values the channel cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(TetherError::Config("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(TetherError::Config("port must not be zero".to_string()));
        }
        if self.retry_interval_ms == 0 {
            return Err(TetherError::Config("retry interval must not be zero".to_string()));
        }
        if self.key_bits < MIN_KEY_BITS || self.key_bits % 8 != 0 {
            return Err(TetherError::Config(format!(
                "key_bits must be a multiple of 8 and at least {}, got {}",
                MIN_KEY_BITS, self.key_bits
            )));
        }

        // Smallest message is one IV, one cipher block and a signature
        let min_message = 2 * BLOCK_SIZE + self.signature_len();
        match self.receive_mode {
            ReceiveMode::LengthPrefixed { max_frame_size } if max_frame_size < min_message => {
                Err(TetherError::Config(format!(
                    "max_frame_size {} cannot hold a {}-byte message",
                    max_frame_size, min_message
                )))
            }
            ReceiveMode::LengthPrefixed { max_frame_size } if max_frame_size > u32::MAX as usize => {
                Err(TetherError::Config(format!(
                    "max_frame_size {} does not fit the 32-bit length header",
                    max_frame_size
                )))
            }
            // Handshake messages are always length-prefixed, only data goes through the buffer
            ReceiveMode::Legacy { buffer_size } if buffer_size < min_message => {
                Err(TetherError::Config(format!(
                    "legacy buffer of {} bytes cannot hold a {}-byte message",
                    buffer_size, min_message
                )))
            }
            _ => Ok(()),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
