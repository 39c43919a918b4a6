//! Shared fixtures for unit tests

use async_trait::async_trait;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use std::collections::VecDeque;
use std::sync::{Mutex, OnceLock};
use tether_net::{Connector, TransportError};
use tokio::io::DuplexStream;

pub(crate) const TEST_KEY_BITS: usize = 1024;

/// Key generation is slow in debug builds, so tests share a few keys
pub(crate) fn test_key(slot: usize) -> RsaPrivateKey {
    static KEYS: OnceLock<Vec<RsaPrivateKey>> = OnceLock::new();
    let keys = KEYS.get_or_init(|| {
        (0..3)
            .map(|_| RsaPrivateKey::new(&mut OsRng, TEST_KEY_BITS).unwrap())
            .collect()
    });
    keys[slot].clone()
}

/// Connector handing out in-memory streams in order
pub(crate) struct DuplexConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
}

impl DuplexConnector {
    pub(crate) fn new(stream: DuplexStream) -> Self {
        Self::from_streams(vec![stream])
    }

    pub(crate) fn from_streams(streams: Vec<DuplexStream>) -> Self {
        Self {
            streams: Mutex::new(streams.into()),
        }
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _host: &str, _port: u16) -> Result<DuplexStream, TransportError> {
        self.streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Connect("no stream queued".to_string()))
    }
}
