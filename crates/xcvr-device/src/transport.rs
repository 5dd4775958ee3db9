//! Byte transport seam.
//!
//! `Connector::open` yields a `Transport`, a duplex byte channel to exactly
//! one device. Framing is done above this layer. Two impls:
//! - `StreamTransport`: any tokio `AsyncRead + AsyncWrite` stream, e.g. a
//!   TCP bridge in front of the USB endpoint (`TcpConnector`)
//! - `MockTransport`: simulated device for tests (in `mock.rs`)

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("device disconnected")]
    Disconnected,

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Convenience alias for transport results.
pub type TransportResult<T> = Result<T, TransportError>;

/// Duplex byte channel to a single attached device.
#[async_trait]
pub trait Transport: Send {
    /// Write all of `bytes`.
    async fn write(&mut self, bytes: &[u8]) -> TransportResult<()>;

    /// Read at most `max_bytes`, waiting up to `timeout` for the first byte.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> TransportResult<Vec<u8>>;

    async fn close(&mut self) -> TransportResult<()>;
}

/// Opens a transport to the attached device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> TransportResult<Box<dyn Transport>>;
}

// ── Stream transport ────────────────────────────────────────────

/// Transport over any async byte stream.
pub struct StreamTransport<S> {
    stream: S,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8]) -> TransportResult<()> {
        self.stream.write_all(bytes).await.map_err(io_error)?;
        self.stream.flush().await.map_err(io_error)
    }

    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> TransportResult<Vec<u8>> {
        let mut buf = vec![0u8; max_bytes];
        match tokio::time::timeout(timeout, self.stream.read(&mut buf)).await {
            Ok(Ok(0)) => Err(TransportError::Disconnected),
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(io_error(e)),
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.stream.shutdown().await.map_err(io_error)
    }
}

fn io_error(e: std::io::Error) -> TransportError {
    match e.kind() {
        std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::UnexpectedEof => TransportError::Disconnected,
        _ => TransportError::Io(e.to_string()),
    }
}

/// Connects to a TCP bridge that forwards bytes to the device endpoint.
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn open(&self) -> TransportResult<Box<dyn Transport>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout {
                timeout_ms: self.connect_timeout.as_millis() as u64,
            })?
            .map_err(io_error)?;
        stream.set_nodelay(true).map_err(io_error)?;
        tracing::debug!(addr = %self.addr, "transport connected");
        Ok(Box::new(StreamTransport::new(stream)))
    }
}
