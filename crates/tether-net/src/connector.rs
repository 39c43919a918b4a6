//! Socket sources

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;
use crate::TransportError;

/// Source of connected byte streams
///
/// One call is one connection attempt. Retrying is the caller's job.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Stream type produced by a successful attempt
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Make a single attempt to connect to `host:port`
    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream, TransportError>;
}

/// TCP connector resolving host names and trying every resolved address
#[derive(Debug, Clone)]
pub struct TcpConnector {
    /// Disable Nagle's algorithm on connected sockets
    nodelay: bool,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnector {
    /// Create a TCP connector with `TCP_NODELAY` enabled
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Set whether `TCP_NODELAY` is enabled on connected sockets
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|e| TransportError::Connect(format!("Failed to resolve {}: {}", host, e)))?;

        let mut last_error = None;
        for addr in addrs {
            debug!("Trying {}", addr);
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(self.nodelay)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connection to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::Connect(match last_error {
            Some(e) => format!("Failed to connect to {}:{}: {}", host, port, e),
            None => format!("No addresses found for {}", host),
        }))
    }
}
