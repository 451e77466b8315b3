use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ClientError;

/// Size of a single read from the socket
pub const DEFAULT_READ_SIZE: usize = 1024;

/// A `(host, port)` pair for one instrument service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`, or a bare port which is served by `default_host`.
    pub fn parse(value: &str, default_host: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(port) = value.parse::<u16>() {
            return Some(Self::new(default_host, port));
        }

        let (host, port) = value.rsplit_once(':')?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        let port = port.parse::<u16>().ok()?;
        Some(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Raw byte stream to one endpoint. No framing.
pub trait Transport: Send {
    fn send(&mut self, bytes: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// One read of at most `max_bytes`. An empty result means the peer closed.
    fn receive(&mut self, max_bytes: usize) -> impl Future<Output = io::Result<Vec<u8>>> + Send;

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Opens transports to endpoints
pub trait Connector: Send + Sync {
    type Transport: Transport;

    fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Self::Transport, ClientError>> + Send;
}

/// Connector for plain TCP streams
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&self, endpoint: &Endpoint) -> Result<TcpTransport, ClientError> {
        let addr = (endpoint.host.as_str(), endpoint.port);
        let stream = match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ClientError::Timeout {
                    operation: "connect",
                    after: self.connect_timeout,
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on {}: {}", endpoint, e);
        }
        debug!("Connected to {}", endpoint);

        Ok(TcpTransport { stream })
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn receive(&mut self, max_bytes: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        let n = self.stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}
