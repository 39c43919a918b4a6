//! Connection management with retry

use crate::{Connector, TransportError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tether_proto::{ProtocolError, WireCodec, MAX_FRAME_SIZE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Fixed read size of the legacy receive path
pub const LEGACY_BUFFER_SIZE: usize = 512;

/// Wait between failed connection attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// How whole messages are delimited on the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReceiveMode {
    /// 4-byte big-endian length header before every message
    LengthPrefixed {
        /// Largest message accepted
        max_frame_size: usize,
    },
    /// No header; each receive is a single read into a fixed buffer
    ///
    /// Messages longer than `buffer_size` are cut at the buffer boundary.
    /// Only useful for talking to peers that predate length prefixes.
    Legacy {
        /// Size of the read buffer
        buffer_size: usize,
    },
}

impl Default for ReceiveMode {
    fn default() -> Self {
        Self::LengthPrefixed {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ReceiveMode {
    /// Legacy mode with the historical 512-byte buffer
    pub fn legacy() -> Self {
        Self::Legacy {
            buffer_size: LEGACY_BUFFER_SIZE,
        }
    }
}

/// Owns the socket to the remote peer
///
/// `connect` blocks the calling task until a connection is made, retrying at a
/// fixed interval for as long as it takes. Cancel the token returned by
/// [`ConnectionManager::cancellation_token`] to give up.
pub struct ConnectionManager<C: Connector> {
    /// Socket source
    connector: C,
    /// Established socket
    stream: Option<C::Stream>,
    /// Wait between failed attempts
    retry_interval: Duration,
    /// Message delimiting on the socket
    receive_mode: ReceiveMode,
    /// Length-prefix codec and its read buffer
    codec: WireCodec,
    /// Attempts made by the last `connect` call
    attempts: u64,
    /// Aborts the retry loop
    cancel: CancellationToken,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a disconnected manager
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            stream: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            receive_mode: ReceiveMode::default(),
            codec: WireCodec::new(),
            attempts: 0,
            cancel: CancellationToken::new(),
        }
    }

    /// Set the wait between failed connection attempts
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Set how messages are delimited on the socket
    pub fn with_receive_mode(mut self, receive_mode: ReceiveMode) -> Self {
        self.codec = match receive_mode {
            ReceiveMode::LengthPrefixed { max_frame_size } => WireCodec::with_max_frame_size(max_frame_size),
            ReceiveMode::Legacy { .. } => WireCodec::new(),
        };
        self.receive_mode = receive_mode;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts an in-progress `connect` when cancelled
    ///
    /// Once cancelled, every later `connect` fails with
    /// [`TransportError::Cancelled`] until [`ConnectionManager::reset_cancellation`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace a cancelled token with a fresh one and return it
    pub fn reset_cancellation(&mut self) -> CancellationToken {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.cancel.clone()
    }

    /// Number of attempts made by the most recent `connect`
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    /// Whether a socket is established
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Configured receive mode
    pub fn receive_mode(&self) -> ReceiveMode {
        self.receive_mode
    }

    /// Connect to `host:port`, retrying until it succeeds or is cancelled
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.close().await;
        self.attempts = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            self.attempts += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                result = self.connector.connect(host, port) => result,
            };

            match result {
                Ok(stream) => {
                    info!("Connected to {}:{} after {} attempt(s)", host, port, self.attempts);
                    self.stream = Some(stream);
                    self.codec.clear_buffer();
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        "Connection attempt {} to {}:{} failed: {}; retrying in {:?}",
                        self.attempts, host, port, e, self.retry_interval
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(TransportError::Cancelled),
                        _ = sleep(self.retry_interval) => {}
                    }
                }
            }
        }
    }

    /// Send one whole message
    ///
    /// Any write failure drops the socket; the caller has to reconnect.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let framed = matches!(self.receive_mode, ReceiveMode::LengthPrefixed { .. });
        self.send_inner(payload, framed).await
    }

    /// Send one message with a length header regardless of the receive mode
    ///
    /// Control messages use this so that they stay whole in legacy mode.
    pub async fn send_framed(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.send_inner(payload, true).await
    }

    async fn send_inner(&mut self, payload: &[u8], framed: bool) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let wire = if framed {
            self.codec.encode_frame(payload)?
        } else {
            Bytes::copy_from_slice(payload)
        };

        let written = async {
            stream.write_all(&wire).await?;
            stream.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                debug!("Sent {} bytes", wire.len());
                Ok(())
            }
            Err(e) => {
                error!("Send failed, dropping connection: {}", e);
                self.stream = None;
                Err(TransportError::Send(e.to_string()))
            }
        }
    }

    /// Receive one whole message
    ///
    /// Any failure, including a clean close by the peer, drops the socket.
    pub async fn receive(&mut self) -> Result<Bytes, TransportError> {
        let legacy_buffer = match self.receive_mode {
            ReceiveMode::LengthPrefixed { .. } => None,
            ReceiveMode::Legacy { buffer_size } => Some(buffer_size),
        };
        self.receive_inner(legacy_buffer).await
    }

    /// Receive one message sent with [`ConnectionManager::send_framed`]
    pub async fn receive_framed(&mut self) -> Result<Bytes, TransportError> {
        self.receive_inner(None).await
    }

    /// `legacy_buffer` of `None` reads a length-prefixed frame
    async fn receive_inner(&mut self, legacy_buffer: Option<usize>) -> Result<Bytes, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;

        let result = match legacy_buffer {
            None => match self.codec.read_frame(stream).await {
                Ok(Some(payload)) => Ok(payload),
                Ok(None) => Err(TransportError::Closed),
                Err(e @ ProtocolError::FrameTooLarge { .. }) => Err(TransportError::Protocol(e)),
                Err(e) => Err(TransportError::Receive(e.to_string())),
            },
            // Bytes read past the last frame come first
            Some(buffer_size) if self.codec.buffer_size() > 0 => Ok(self.codec.take_buffered(buffer_size)),
            Some(buffer_size) => {
                let mut buf = vec![0u8; buffer_size];
                match stream.read(&mut buf).await {
                    Ok(0) => Err(TransportError::Closed),
                    Ok(n) => {
                        buf.truncate(n);
                        Ok(Bytes::from(buf))
                    }
                    Err(e) => Err(TransportError::Receive(e.to_string())),
                }
            }
        };

        match &result {
            Ok(payload) => debug!("Received {} bytes", payload.len()),
            Err(TransportError::Closed) => {
                info!("Connection closed by peer");
                self.stream = None;
            }
            Err(e) => {
                error!("Receive failed, dropping connection: {}", e);
                self.stream = None;
            }
        }

        result
    }

    /// Shut the socket down, if any
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing connection");
            if let Err(e) = stream.shutdown().await {
                debug!("Error shutting down socket: {}", e);
            }
        }
        self.codec.clear_buffer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{duplex, DuplexStream};
    use tokio::time::Instant;

    /// Connector failing a set number of times before handing out duplex pipes
    #[derive(Clone, Default)]
    struct MockConnector {
        failures_left: Arc<AtomicUsize>,
        attempts: Arc<Mutex<Vec<Instant>>>,
        peers: Arc<Mutex<Vec<DuplexStream>>>,
    }

    impl MockConnector {
        fn failing(times: usize) -> Self {
            let connector = Self::default();
            connector.failures_left.store(times, Ordering::SeqCst);
            connector
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }

        fn take_peer(&self) -> DuplexStream {
            self.peers.lock().unwrap().pop().expect("no peer stream")
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _host: &str, _port: u16) -> Result<DuplexStream, TransportError> {
            self.attempts.lock().unwrap().push(Instant::now());

            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::Connect("Mock connection refused".to_string()));
            }

            let (local, peer) = duplex(64 * 1024);
            self.peers.lock().unwrap().push(peer);
            Ok(local)
        }
    }

    async fn connected(mode: ReceiveMode) -> (ConnectionManager<MockConnector>, DuplexStream) {
        let connector = MockConnector::default();
        let mut manager = ConnectionManager::new(connector.clone()).with_receive_mode(mode);
        manager.connect("controller", 4444).await.unwrap();
        (manager, connector.take_peer())
    }

    #[test]
    fn test_receive_mode_default() {
        assert_eq!(
            ReceiveMode::default(),
            ReceiveMode::LengthPrefixed { max_frame_size: MAX_FRAME_SIZE }
        );
        assert_eq!(ReceiveMode::legacy(), ReceiveMode::Legacy { buffer_size: 512 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_at_fixed_interval() {
        let connector = MockConnector::failing(3);
        let mut manager = ConnectionManager::new(connector.clone());

        let started = Instant::now();
        manager.connect("controller", 4444).await.unwrap();

        assert!(manager.is_connected());
        assert_eq!(manager.attempts(), 4);

        let times = connector.attempt_times();
        assert_eq!(times.len(), 4);
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= DEFAULT_RETRY_INTERVAL);
        }
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_retry_interval() {
        let connector = MockConnector::failing(2);
        let mut manager = ConnectionManager::new(connector.clone())
            .with_retry_interval(Duration::from_secs(1));

        manager.connect("controller", 4444).await.unwrap();

        let times = connector.attempt_times();
        assert_eq!(times.len(), 3);
        assert!(times[2] - times[0] >= Duration::from_secs(2));
        assert!(times[2] - times[0] < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_retry() {
        let connector = MockConnector::failing(usize::MAX);
        let mut manager = ConnectionManager::new(connector.clone());

        let token = manager.cancellation_token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(25)).await;
            token.cancel();
        });

        let result = manager.connect("controller", 4444).await;
        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(!manager.is_connected());
        assert_eq!(connector.attempt_times().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_connect() {
        let connector = MockConnector::default();
        let token = CancellationToken::new();
        token.cancel();

        let mut manager = ConnectionManager::new(connector.clone()).with_cancellation_token(token);
        let result = manager.connect("controller", 4444).await;

        assert!(matches!(result, Err(TransportError::Cancelled)));
        assert!(connector.attempt_times().is_empty());
    }

    #[tokio::test]
    async fn test_reset_cancellation_allows_connect() {
        let connector = MockConnector::default();
        let mut manager = ConnectionManager::new(connector.clone());

        let stale = manager.cancellation_token();
        stale.cancel();
        assert!(matches!(
            manager.connect("controller", 4444).await,
            Err(TransportError::Cancelled)
        ));

        let fresh = manager.reset_cancellation();
        assert!(!fresh.is_cancelled());
        manager.connect("controller", 4444).await.unwrap();
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_send_receive_without_connection() {
        let mut manager = ConnectionManager::new(MockConnector::default());
        assert!(matches!(manager.send(b"x").await, Err(TransportError::NotConnected)));
        assert!(matches!(manager.receive().await, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn test_length_prefixed_send() {
        let (mut manager, mut peer) = connected(ReceiveMode::default()).await;
        manager.send(b"hello controller").await.unwrap();

        let mut codec = WireCodec::new();
        let payload = codec.read_frame(&mut peer).await.unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"hello controller");
    }

    #[tokio::test]
    async fn test_length_prefixed_receive_recovers_large_message() {
        let (mut manager, mut peer) = connected(ReceiveMode::default()).await;
        let message: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let encoded = WireCodec::new().encode_frame(&message).unwrap();
        let writer = tokio::spawn(async move {
            // Dribble the frame so the reader sees partial data
            for chunk in encoded.chunks(300) {
                peer.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
            peer
        });

        let received = manager.receive().await.unwrap();
        assert_eq!(received.len(), 1000);
        assert_eq!(received.as_ref(), message.as_slice());

        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_legacy_receive_truncates_to_buffer() {
        let (mut manager, mut peer) = connected(ReceiveMode::legacy()).await;
        let message = vec![0xA5u8; 1000];

        peer.write_all(&message).await.unwrap();

        let received = manager.receive().await.unwrap();
        assert_eq!(received.len(), LEGACY_BUFFER_SIZE);
        assert!(received.iter().all(|b| *b == 0xA5));
    }

    #[tokio::test]
    async fn test_framed_messages_in_legacy_mode() {
        let (mut manager, mut peer) = connected(ReceiveMode::legacy()).await;

        // Two control messages and raw data arrive in one burst
        let codec = WireCodec::new();
        let mut burst = Vec::new();
        burst.extend_from_slice(&codec.encode_frame(&[1u8; 300]).unwrap());
        burst.extend_from_slice(&codec.encode_frame(&[2u8; 300]).unwrap());
        burst.extend_from_slice(b"raw data");
        peer.write_all(&burst).await.unwrap();

        assert_eq!(manager.receive_framed().await.unwrap().as_ref(), &[1u8; 300][..]);
        assert_eq!(manager.receive_framed().await.unwrap().as_ref(), &[2u8; 300][..]);
        // Leftover bytes feed the next legacy read
        assert_eq!(manager.receive().await.unwrap().as_ref(), b"raw data");

        manager.send_framed(b"ack").await.unwrap();
        let mut header = [0u8; 4];
        peer.read_exact(&mut header).await.unwrap();
        assert_eq!(u32::from_be_bytes(header), 3);
    }

    #[tokio::test]
    async fn test_legacy_send_has_no_header() {
        let (mut manager, mut peer) = connected(ReceiveMode::legacy()).await;
        manager.send(b"raw").await.unwrap();

        let mut buf = [0u8; 3];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"raw");
    }

    #[tokio::test]
    async fn test_peer_close_is_reported() {
        let (mut manager, peer) = connected(ReceiveMode::default()).await;
        drop(peer);

        assert!(matches!(manager.receive().await, Err(TransportError::Closed)));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let mode = ReceiveMode::LengthPrefixed { max_frame_size: 64 };
        let (mut manager, mut peer) = connected(mode).await;

        peer.write_all(&1_000_000u32.to_be_bytes()).await.unwrap();

        let result = manager.receive().await;
        assert!(matches!(
            result,
            Err(TransportError::Protocol(ProtocolError::FrameTooLarge { size: 1_000_000, max: 64 }))
        ));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_oversized_send_keeps_connection() {
        let mode = ReceiveMode::LengthPrefixed { max_frame_size: 8 };
        let (mut manager, _peer) = connected(mode).await;

        let result = manager.send(&[0u8; 9]).await;
        assert!(matches!(result, Err(TransportError::Protocol(_))));
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut manager, _peer) = connected(ReceiveMode::default()).await;
        manager.close().await;
        assert!(!manager.is_connected());
        manager.close().await;
        assert!(!manager.is_connected());
    }
}
