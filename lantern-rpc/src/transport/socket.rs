//! Framed TCP transport.
//!
//! One connection per dispatcher, owned by a single background task that
//! writes queued frames and reads responses concurrently:
//!
//! ```text
//! Dispatcher::call ──► outbound queue ──► connection_task ──► socket
//!                                              │
//! Dispatcher::handle_response ◄── frame parser ◄┘
//! ```
//!
//! The connection is opened as soon as the transport is built; requests sent
//! meanwhile wait in the queue. Any failure (connect, read, write, EOF,
//! malformed frame) is terminal: the queue is closed first, so later sends
//! fail on their own, then every outstanding call is failed once and the
//! task exits. There is no reconnection.

use std::sync::Arc;

use bytes::Bytes;
use lantern_core::{Endpoint, NetworkProvider, TokioNetworkProvider};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use super::{ResponseSink, Transport, TransportBuilder};
use crate::config::SocketConfig;
use crate::error::RpcError;
use crate::wire::{ENVELOPE_SIZE, Envelope, WireError, serialize_frame, try_deserialize_frame};

/// Builder for the `tcp` scheme.
#[derive(Debug, Clone)]
pub struct SocketTransportBuilder<N: NetworkProvider = TokioNetworkProvider> {
    network: N,
    config: SocketConfig,
}

impl SocketTransportBuilder<TokioNetworkProvider> {
    /// Tokio networking with the default [`SocketConfig`].
    pub fn new() -> Self {
        Self::with_network(TokioNetworkProvider::new(), SocketConfig::default())
    }
}

impl Default for SocketTransportBuilder<TokioNetworkProvider> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NetworkProvider> SocketTransportBuilder<N> {
    /// Connections opened through `network`.
    pub fn with_network(network: N, config: SocketConfig) -> Self {
        Self { network, config }
    }

    /// Replace the socket configuration.
    pub fn with_config(mut self, config: SocketConfig) -> Self {
        self.config = config;
        self
    }

    /// Current socket configuration.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }
}

impl<N: NetworkProvider> TransportBuilder for SocketTransportBuilder<N> {
    fn scheme(&self) -> &'static str {
        "tcp"
    }

    fn build(
        &self,
        endpoint: &Endpoint,
        sink: ResponseSink,
    ) -> Result<Arc<dyn Transport>, RpcError> {
        let address = endpoint
            .socket_address()
            .ok_or_else(|| RpcError::InvalidEndpoint {
                message: format!("{} has no port", endpoint),
            })?;
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        runtime.spawn(connection_task(Connection {
            network: self.network.clone(),
            address,
            endpoint: endpoint.to_string(),
            config: self.config.clone(),
            sink,
            outbound_rx,
            shutdown_rx,
        }));

        Ok(Arc::new(SocketTransport {
            endpoint: endpoint.to_string(),
            max_payload_size: self.config.max_payload_size,
            outbound_tx,
            shutdown_tx,
        }))
    }
}

struct SocketTransport {
    endpoint: String,
    max_payload_size: usize,
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown_tx: mpsc::UnboundedSender<()>,
}

impl Transport for SocketTransport {
    fn send(&self, envelope: Envelope, payload: Bytes) -> Result<(), RpcError> {
        let frame = serialize_frame(&envelope, &payload, self.max_payload_size)?;
        self.outbound_tx
            .send(frame)
            .map_err(|_| RpcError::Disconnected {
                endpoint: self.endpoint.clone(),
            })
    }

    fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Everything the connection task owns.
struct Connection<N: NetworkProvider> {
    network: N,
    address: String,
    endpoint: String,
    config: SocketConfig,
    sink: ResponseSink,
    outbound_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

async fn connection_task<N: NetworkProvider>(mut conn: Connection<N>) {
    let fault = run_connection(&mut conn).await;

    // Close before failing calls so nothing can slip in between.
    conn.outbound_rx.close();

    match fault {
        Some(error) => {
            tracing::warn!(
                endpoint = %conn.endpoint,
                system_id = conn.sink.system_id(),
                error = %error,
                "socket transport faulted"
            );
            conn.sink.complete_all_error(error);
        }
        None => tracing::debug!(endpoint = %conn.endpoint, "socket transport shut down"),
    }
}

/// Drive the connection. `None` means an orderly shutdown, `Some` a fault.
async fn run_connection<N: NetworkProvider>(conn: &mut Connection<N>) -> Option<RpcError> {
    let connect = tokio::select! {
        _ = conn.shutdown_rx.recv() => return None,
        result = tokio::time::timeout(
            conn.config.connect_timeout,
            conn.network.connect(&conn.address),
        ) => result,
    };

    let stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Some(network_fault(
                &conn.endpoint,
                format!("connect to {} failed: {}", conn.address, e),
            ));
        }
        Err(_) => {
            return Some(network_fault(
                &conn.endpoint,
                format!(
                    "connect to {} timed out after {:?}",
                    conn.address, conn.config.connect_timeout
                ),
            ));
        }
    };
    tracing::debug!(endpoint = %conn.endpoint, address = %conn.address, "connected");

    let (reader, writer) = tokio::io::split(stream);
    let Connection {
        ref endpoint,
        ref config,
        ref sink,
        ref mut outbound_rx,
        ref mut shutdown_rx,
        ..
    } = *conn;

    // Reader and writer are polled side by side so a stalled write never
    // holds back responses.
    tokio::select! {
        _ = shutdown_rx.recv() => None,
        fault = write_frames(writer, outbound_rx, endpoint) => fault,
        fault = read_frames(reader, sink, config, endpoint) => fault,
    }
}

fn network_fault(endpoint: &str, message: String) -> RpcError {
    RpcError::NetworkFault {
        endpoint: endpoint.to_string(),
        message,
    }
}

/// Write queued frames until the queue closes or a write fails.
async fn write_frames<W: AsyncWrite + Unpin>(
    mut writer: W,
    outbound_rx: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    endpoint: &str,
) -> Option<RpcError> {
    // All senders gone: the dispatcher was dropped.
    while let Some(frame) = outbound_rx.recv().await {
        tracing::trace!(endpoint = %endpoint, bytes = frame.len(), "writing frame");
        if let Err(e) = writer.write_all(&frame).await {
            return Some(network_fault(endpoint, format!("write failed: {}", e)));
        }
    }
    None
}

/// Read and deliver frames until EOF, a bad frame, or the dispatcher goes away.
async fn read_frames<R: AsyncRead + Unpin>(
    mut reader: R,
    sink: &ResponseSink,
    config: &SocketConfig,
    endpoint: &str,
) -> Option<RpcError> {
    let mut read_buffer: Vec<u8> = Vec::with_capacity(config.read_buffer_size);
    let mut chunk = vec![0u8; config.read_buffer_size.max(ENVELOPE_SIZE)];

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                return Some(RpcError::Disconnected {
                    endpoint: endpoint.to_string(),
                });
            }
            Ok(n) => {
                read_buffer.extend_from_slice(&chunk[..n]);
                match deliver_frames(&mut read_buffer, sink, config, endpoint) {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => {
                        if let WireError::ChecksumMismatch { expected, actual } = &e {
                            tracing::warn!(
                                endpoint = %endpoint,
                                "checksum mismatch: expected={:#010x} actual={:#010x}",
                                expected,
                                actual
                            );
                        }
                        return Some(network_fault(endpoint, format!("malformed frame: {}", e)));
                    }
                }
            }
            Err(e) => return Some(network_fault(endpoint, format!("read failed: {}", e))),
        }
    }
}

/// Hand every complete frame in `read_buffer` to the dispatcher.
///
/// Returns `Ok(false)` once the dispatcher is gone.
fn deliver_frames(
    read_buffer: &mut Vec<u8>,
    sink: &ResponseSink,
    config: &SocketConfig,
    endpoint: &str,
) -> Result<bool, WireError> {
    while let Some((envelope, payload, consumed)) =
        try_deserialize_frame(read_buffer, config.max_payload_size)?
    {
        read_buffer.drain(..consumed);
        tracing::trace!(
            endpoint = %endpoint,
            correlation_id = envelope.correlation_id,
            bytes = payload.len(),
            "frame received"
        );
        if !sink.handle_response(envelope, &payload) {
            return Ok(false);
        }
    }
    Ok(true)
}
