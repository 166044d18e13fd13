//! Network provider abstraction.
//!
//! The socket transport never calls `tokio::net` directly. It asks a
//! [`NetworkProvider`] for a stream, which lets tests substitute a provider
//! whose connections fail or misbehave.

use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};

/// Provider trait for opening outbound connections.
///
/// Connections are driven from tasks spawned on a multi-threaded runtime, so
/// both the provider and its streams are `Send`.
#[async_trait]
pub trait NetworkProvider: Clone + Send + Sync + 'static {
    /// The stream type produced by this provider.
    type TcpStream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to a `host:port` address.
    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream>;
}

/// Real Tokio networking implementation.
#[derive(Debug, Clone)]
pub struct TokioNetworkProvider {
    nodelay: bool,
}

impl TokioNetworkProvider {
    /// Create a provider with `TCP_NODELAY` enabled.
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Choose whether connections disable Nagle's algorithm.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TokioNetworkProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkProvider for TokioNetworkProvider {
    type TcpStream = tokio::net::TcpStream;

    async fn connect(&self, addr: &str) -> io::Result<Self::TcpStream> {
        let stream = tokio::net::TcpStream::connect(addr).await?;
        stream.set_nodelay(self.nodelay)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_tokio_provider_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();

        let accept = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.expect("read");
            buf
        });

        let mut stream = TokioNetworkProvider::new()
            .connect(&addr)
            .await
            .expect("connect");
        assert!(stream.nodelay().expect("nodelay"));
        stream.write_all(b"ping").await.expect("write");

        assert_eq!(&accept.await.expect("join"), b"ping");
    }

    #[tokio::test]
    async fn test_tokio_provider_connect_refused() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        drop(listener);

        let result = TokioNetworkProvider::new().connect(&addr).await;
        assert!(result.is_err());
    }
}
