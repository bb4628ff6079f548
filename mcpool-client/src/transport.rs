//! Send side of a connection.
//!
//! Commands write through `Transport` so they can be exercised against an
//! in-memory buffer in tests and against the socket write half in production.

use std::future::Future;
use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;

/// Sink for request bytes.
pub trait Transport: Send {
    /// Sends every segment, in order, and resolves once all are written.
    fn send(&mut self, segments: &[&[u8]]) -> impl Future<Output = io::Result<()>> + Send;
}

/// Socket write half. The socket is created with `TCP_NODELAY`.
pub struct TcpTransport {
    stream: OwnedWriteHalf,
}

impl TcpTransport {
    pub fn new(stream: OwnedWriteHalf) -> Self {
        TcpTransport { stream }
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, segments: &[&[u8]]) -> io::Result<()> {
        for segment in segments {
            self.stream.write_all(segment).await?;
        }
        self.stream.flush().await
    }
}

/// Captures requests in memory.
impl Transport for Vec<u8> {
    async fn send(&mut self, segments: &[&[u8]]) -> io::Result<()> {
        for segment in segments {
            self.extend_from_slice(segment);
        }
        Ok(())
    }
}
