//! Connected, encrypted text channel
//!
//! Send path: text, sentinel framing, encrypt then sign, socket.
//! Receive path: socket, verify then decrypt, strip the sentinel, text.

use crate::shell::OutputQueue;
use crate::{perform_handshake, ChannelConfig, Result, TetherError};
use std::fmt;
use tether_crypto::SecureChannel;
use tether_net::{ConnectionManager, Connector, TcpConnector, TransportError};
use tether_proto::TextCodec;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle of a [`Channel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No socket
    Disconnected,
    /// Socket up, handshake not finished
    Connected,
    /// Handshake finished, text can flow
    Established,
}

/// Encrypted text channel to a remote peer
///
/// The RSA key pair is generated once and reused across reconnects. Each
/// successful [`Channel::open`] runs a new handshake and installs a new
/// session key.
pub struct Channel<C: Connector = TcpConnector> {
    /// Settings the channel was built from
    config: ChannelConfig,
    /// Socket and retry state
    connection: ConnectionManager<C>,
    /// Key material
    crypto: SecureChannel,
    /// Sentinel framing
    codec: TextCodec,
    /// Current lifecycle state
    status: ChannelStatus,
    /// Identifier of the current established session
    session_id: Option<Uuid>,
}

impl Channel<TcpConnector> {
    /// Create a TCP channel with a freshly generated key pair
    pub fn new(config: ChannelConfig) -> Result<Self> {
        Self::with_connector(config, TcpConnector::new())
    }
}

impl<C: Connector> Channel<C> {
    /// Create a channel over a custom socket source
    pub fn with_connector(config: ChannelConfig, connector: C) -> Result<Self> {
        config.validate()?;
        let crypto = SecureChannel::new(config.key_bits)?;
        Self::build(config, connector, crypto)
    }

    /// Create a channel around existing key material
    pub fn with_secure_channel(config: ChannelConfig, connector: C, crypto: SecureChannel) -> Result<Self> {
        config.validate()?;
        if crypto.key_bits() != config.key_bits {
            return Err(TetherError::Config(format!(
                "key pair is {} bits but key_bits is {}",
                crypto.key_bits(),
                config.key_bits
            )));
        }
        Self::build(config, connector, crypto)
    }

    fn build(config: ChannelConfig, connector: C, crypto: SecureChannel) -> Result<Self> {
        let connection = ConnectionManager::new(connector)
            .with_retry_interval(config.retry_interval())
            .with_receive_mode(config.receive_mode);

        Ok(Self {
            config,
            connection,
            crypto,
            codec: TextCodec::new(),
            status: ChannelStatus::Disconnected,
            session_id: None,
        })
    }

    /// Current lifecycle state
    pub fn status(&self) -> ChannelStatus {
        self.status
    }

    /// Identifier of the established session, if any
    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Settings the channel was built from
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Key material of the channel
    pub fn secure_channel(&self) -> &SecureChannel {
        &self.crypto
    }

    /// Token that aborts an in-progress [`Channel::open`] when cancelled
    ///
    /// A cancelled `open` installs a new token, so fetch the token again
    /// before the next `open` if it should stay cancellable.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.connection.cancellation_token()
    }

    /// Connect, retrying until the peer answers, then run the handshake
    ///
    /// Any previous connection is closed first. A failed handshake closes the
    /// socket again and leaves the channel disconnected.
    pub async fn open(&mut self) -> Result<Uuid> {
        self.close().await;

        if let Err(e) = self.connection.connect(&self.config.host, self.config.port).await {
            if matches!(e, TransportError::Cancelled) {
                info!("Connecting to {}:{} cancelled", self.config.host, self.config.port);
                self.connection.reset_cancellation();
            }
            return Err(e.into());
        }
        self.status = ChannelStatus::Connected;

        if let Err(e) = perform_handshake(&mut self.connection, &mut self.crypto, self.config.role).await {
            error!("Handshake with {}:{} failed: {}", self.config.host, self.config.port, e);
            self.close().await;
            return Err(e);
        }

        let session_id = Uuid::new_v4();
        self.status = ChannelStatus::Established;
        self.session_id = Some(session_id);
        info!(%session_id, "Channel established with {}:{}", self.config.host, self.config.port);
        Ok(session_id)
    }

    /// Frame, encrypt, sign and send one text message
    ///
    /// Text containing the frame sentinel is rejected before anything is sent.
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.require_established()?;

        let frame = self.codec.encode(text)?;
        let message = self.crypto.seal(&frame)?;

        if let Err(e) = self.connection.send(&message).await {
            return Err(self.transport_failed(e));
        }
        debug!(session_id = ?self.session_id, "Sent {} chars", text.chars().count());
        Ok(())
    }

    /// Receive, verify, decrypt and unframe one text message
    ///
    /// Tampered or undecodable messages are dropped with an error and the
    /// channel stays established. Transport failures disconnect it.
    pub async fn recv_text(&mut self) -> Result<String> {
        self.require_established()?;

        let message = match self.connection.receive().await {
            Ok(message) => message,
            Err(e) => return Err(self.transport_failed(e)),
        };

        let frame = self.crypto.open(&message).map_err(|e| {
            warn!(session_id = ?self.session_id, "Dropping message: {}", e);
            TetherError::from(e)
        })?;

        let text = self.codec.decode(&frame).map_err(|e| {
            warn!(session_id = ?self.session_id, "Dropping undecodable message: {}", e);
            TetherError::from(e)
        })?;

        debug!(session_id = ?self.session_id, "Received {} chars", text.chars().count());
        Ok(text)
    }

    /// Send everything buffered in `queue` as one message
    ///
    /// Each line is terminated with `\n`. Returns the number of lines sent;
    /// an empty queue sends nothing.
    pub async fn send_output(&mut self, queue: &mut OutputQueue) -> Result<usize> {
        self.require_established()?;

        let lines = queue.drain();
        if lines.is_empty() {
            return Ok(0);
        }

        let text: String = lines.iter().map(|line| format!("{}\n", line)).collect();
        self.send_text(&text).await?;
        Ok(lines.len())
    }

    /// Shut the socket down; the key pair is kept for the next `open`
    pub async fn close(&mut self) {
        if self.status != ChannelStatus::Disconnected {
            info!(session_id = ?self.session_id, "Closing channel");
        }
        self.connection.close().await;
        self.status = ChannelStatus::Disconnected;
        self.session_id = None;
    }

    fn require_established(&self) -> Result<()> {
        if self.status != ChannelStatus::Established {
            return Err(TetherError::NotEstablished);
        }
        Ok(())
    }

    fn transport_failed(&mut self, err: TransportError) -> TetherError {
        if !self.connection.is_connected() {
            error!(session_id = ?self.session_id, "Channel lost: {}", err);
            self.status = ChannelStatus::Disconnected;
            self.session_id = None;
        }
        err.into()
    }
}

impl<C: Connector> fmt::Debug for Channel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("role", &self.config.role)
            .field("status", &self.status)
            .field("session_id", &self.session_id)
            .finish()
    }
}
